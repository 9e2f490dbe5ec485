//! Per-connection handler pipeline: an ordered chain of [`Handler`]s dispatched
//! over connect, read, and close events, plus a parallel write-side chain
//! dispatched when the reactor is ready to flush outbound bytes.
//!
//! This is the Rust reshaping of the reference `HandlerPipeline` /
//! `NetworkEventHandler` duo. The reference handler methods take the event
//! payload and return either nothing (continue with the same payload) or a
//! replacement payload. That shape does not survive translation: a Rust
//! handler taking `Payload` by value has already consumed it by the time it
//! would "continue with the same payload", and if the handler panics
//! mid-call the payload is dropped by unwinding before the executor can hand
//! it to the next handler in the chain, which would violate the requirement
//! that a panicking handler not prevent its neighbours in the chain from
//! seeing subsequent events. Handlers here instead take `&mut Payload`: they
//! mutate in place to "forward" a new value, and the executor's owned
//! `Payload` survives a caught panic intact.

use std::any::Any;
use std::fmt;
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};

use crate::error::Error;

/// The mutable value threaded through a single pipeline dispatch. Handlers
/// that want to hand a transformed value to the next handler overwrite
/// `*payload` in place; handlers that want to pass the value through
/// untouched leave it alone.
#[derive(Debug)]
pub enum Payload {
    /// Raw bytes drained from the connection's read buffer.
    Bytes(Vec<u8>),
    /// A structured value produced by an upstream handler (for example a
    /// decoded protocol message) and handed to the next handler in the chain.
    Decoded(Box<dyn Any + Send>),
}

impl Payload {
    pub fn bytes(data: Vec<u8>) -> Self {
        Self::Bytes(data)
    }

    pub fn decoded<T: Any + Send>(value: T) -> Self {
        Self::Decoded(Box::new(value))
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            Self::Decoded(_) => None,
        }
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Self::Decoded(v) => v.downcast_ref::<T>(),
            Self::Bytes(_) => None,
        }
    }

    /// Replaces the payload in place, implementing a handler's FORWARD.
    pub fn replace(&mut self, new_value: Payload) {
        *self = new_value;
    }
}

/// The outcome of a single handler invocation.
#[derive(Debug, Default, PartialEq, Eq)]
pub enum PipelineResult {
    /// Keep walking the chain with the (possibly mutated-in-place) payload.
    #[default]
    Continue,
    /// Stop walking the downstream chain and re-arm the connection for reads.
    RequestRead,
    /// Stop walking the chain, queue `bytes` for write, and arm the
    /// connection writable.
    RequestWrite(Vec<u8>),
    /// Stop walking the chain and tear the connection down.
    RequestClose,
}

/// The outcome of pipeline-level connect handling: a brand new connection may
/// be refused outright before any bytes are ever read from it.
#[derive(Debug, Default, PartialEq, Eq)]
pub enum ConnectResult {
    #[default]
    Accept,
    Reject,
}

/// One stage in a connection's handler chain.
///
/// All three methods have inert default implementations so a handler that
/// only cares about, say, decoding reads doesn't have to stub out
/// `on_connect`/`on_close`. Handlers are invoked strictly in chain order for
/// `on_connect`/`on_read`/`on_close`, and in reverse chain order for
/// `on_write` (mirroring the upstream/downstream split of the original
/// pipeline).
pub trait Handler: Send {
    /// A human-readable name used in panic/log reporting. Defaults to the
    /// Rust type name, which is good enough unless a handler is generic over
    /// something that makes the type name unreadable.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// A handler that doesn't care about new connections doesn't need to
    /// override this, but the inherited behaviour is to refuse them: opting
    /// out of `on_connect` means opting out of accepting traffic.
    fn on_connect(&mut self, _peer: SocketAddr) -> ConnectResult {
        ConnectResult::Reject
    }

    /// Defaults to closing the connection, matching `on_connect`: a handler
    /// silent on reads is assumed not to want the data.
    fn on_read(&mut self, _payload: &mut Payload) -> PipelineResult {
        PipelineResult::RequestClose
    }

    /// Called when the reactor is ready to write and the write-side chain
    /// runs. `payload` starts out as the bytes queued by the downstream
    /// chain's `RequestWrite`; an upstream handler may rewrite it (e.g. to
    /// add a protocol envelope) before it reaches the socket.
    ///
    /// Defaults to a no-op rather than closing: most handlers never touch
    /// the write side at all and shouldn't have to opt in just to avoid
    /// tearing the connection down.
    fn on_write(&mut self, _payload: &mut Payload) -> PipelineResult {
        PipelineResult::Continue
    }

    fn on_close(&mut self) {}
}

/// Builds a fresh [`Handler`] chain for each accepted connection.
///
/// Grounded on the reference `PipelineFactory`: handlers are typically
/// stateful per connection (a decoder accumulates partial frames) so a new
/// chain is built per accept rather than shared.
pub trait PipelineFactory: Send + Sync {
    fn build(&self) -> Vec<Box<dyn Handler>>;
}

impl<F> PipelineFactory for F
where
    F: Fn() -> Vec<Box<dyn Handler>> + Send + Sync,
{
    fn build(&self) -> Vec<Box<dyn Handler>> {
        self()
    }
}

/// An instantiated, ordered handler chain bound to one connection.
///
/// Handlers that need to accumulate partial protocol frames across reads
/// (the syslog lexer, for instance) own their buffering privately; the
/// pipeline itself is just the ordered chain plus the executor logic.
pub struct HandlerPipeline {
    handlers: Vec<Box<dyn Handler>>,
}

impl fmt::Debug for HandlerPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerPipeline").field("handlers", &self.handlers.len()).finish()
    }
}

impl HandlerPipeline {
    pub fn new(handlers: Vec<Box<dyn Handler>>) -> Self {
        Self { handlers }
    }

    /// Runs `on_connect` down the chain in order. The first handler to
    /// reject the connection short-circuits the rest.
    pub fn dispatch_connect(&mut self, peer: SocketAddr) -> ConnectResult {
        for handler in &mut self.handlers {
            let name = handler.name();
            let outcome = catch_handler(name, "connect", || handler.on_connect(peer));
            match outcome {
                Ok(ConnectResult::Accept) => {}
                Ok(ConnectResult::Reject) => return ConnectResult::Reject,
                Err(_) => return ConnectResult::Reject,
            }
        }
        ConnectResult::Accept
    }

    /// Runs `on_read` down the chain in order, starting from `payload`. A
    /// handler panic is caught, logged as [`Error::HandlerPanic`], and
    /// treated as [`PipelineResult::Continue`] so the remaining handlers
    /// still see the (unmodified, since the panicking call only held a
    /// `&mut` that was never committed) payload.
    pub fn dispatch_read(&mut self, payload: &mut Payload) -> PipelineResult {
        Self::run_chain(self.handlers.iter_mut(), "read", payload)
    }

    /// Runs `on_write` up the chain in reverse order.
    pub fn dispatch_write(&mut self, payload: &mut Payload) -> PipelineResult {
        Self::run_chain(self.handlers.iter_mut().rev(), "write", payload)
    }

    /// Runs `on_close` down the chain in order. Every handler is invoked
    /// exactly once regardless of earlier handlers panicking: a close
    /// notification must reach every stage so each can release its
    /// resources.
    pub fn dispatch_close(&mut self) {
        for handler in &mut self.handlers {
            let name = handler.name();
            let _ = catch_handler(name, "close", || {
                handler.on_close();
                ConnectResult::Accept
            });
        }
    }

    fn run_chain<'a>(
        handlers: impl Iterator<Item = &'a mut Box<dyn Handler>>,
        event: &'static str,
        payload: &mut Payload,
    ) -> PipelineResult {
        for handler in handlers {
            let name = handler.name();
            let outcome = catch_handler(name, event, || {
                if event == "write" { handler.on_write(payload) } else { handler.on_read(payload) }
            });
            match outcome {
                Ok(PipelineResult::Continue) => {}
                Ok(other) => return other,
                Err(_) => {
                    // Swallowed: the panic was already logged by catch_handler.
                    // The payload is untouched since the panicking call only
                    // ever had a mutable borrow, so the chain carries on.
                }
            }
        }
        PipelineResult::Continue
    }
}

fn catch_handler<T>(
    handler: &'static str,
    event: &'static str,
    f: impl FnOnce() -> T,
) -> Result<T, Error> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Ok(value),
        Err(_) => {
            let err = Error::HandlerPanic { handler, event };
            tracing::error!(%err, "handler panicked");
            Err(err)
        }
    }
}
