use std::io;

use thiserror::Error;

/// Errors surfaced by the reactor and the handler pipeline.
///
/// Per-connection I/O failures never reach a caller directly: the reactor
/// collapses them into a synthesized close of that connection. Only
/// [`Error::InvalidState`] (illegal lifecycle transitions) and
/// [`Error::MalformedFrame`] (returned to a protocol handler, which decides
/// what to do with it) are meant to be handled by application code.
#[derive(Error, Debug)]
pub enum Error {
    #[error("io read failed: {0}")]
    IoReadFailed(#[source] io::Error),

    #[error("io write failed: {0}")]
    IoWriteFailed(#[source] io::Error),

    #[error("io accept failed: {0}")]
    IoAcceptFailed(#[source] io::Error),

    #[error("peer closed connection")]
    PeerClosed,

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("handler panicked in {handler} while handling {event}")]
    HandlerPanic { handler: &'static str, event: &'static str },

    #[error("invalid reactor lifecycle transition: {0}")]
    InvalidState(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
