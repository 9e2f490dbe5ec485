//! Example handlers wiring `switchboard-core` into runnable servers.
//!
//! Supplements the bare library crates with the reference `BasicHandler`
//! (`netpype.examples.simple`) and a syslog-to-log-line bridge, exercised by
//! the two binaries in this crate.

use std::net::SocketAddr;

use switchboard_core::{ConnectResult, Handler, Payload, PipelineResult};
use switchboard_syslog::SyslogMessage;

/// Replies to any connection with a canned HTTP response, then closes.
///
/// Ported directly from `netpype.examples.simple.BasicHandler`: accept,
/// reply `HTTP/1.1 200 OK\r\n\r\n` to the first read regardless of its
/// content, then request close once that reply has been flushed.
#[derive(Debug, Default)]
pub struct EchoHandler {
    replied: bool,
}

impl Handler for EchoHandler {
    fn name(&self) -> &'static str {
        "switchboard_demo::EchoHandler"
    }

    fn on_connect(&mut self, peer: SocketAddr) -> ConnectResult {
        tracing::info!(%peer, "connected");
        ConnectResult::Accept
    }

    fn on_read(&mut self, payload: &mut Payload) -> PipelineResult {
        let len = payload.as_bytes().map_or(0, <[u8]>::len);
        tracing::info!(bytes = len, "read");
        self.replied = true;
        PipelineResult::RequestWrite(b"HTTP/1.1 200 OK\r\n\r\n".to_vec())
    }

    fn on_write(&mut self, _payload: &mut Payload) -> PipelineResult {
        PipelineResult::RequestClose
    }

    fn on_close(&mut self) {
        tracing::info!("closing connection");
    }
}

/// Sits downstream of a [`switchboard_syslog::SyslogLexer`] and logs every
/// decoded message at `info`, then re-arms the connection for more reads.
#[derive(Debug, Default)]
pub struct SyslogPrinter;

impl Handler for SyslogPrinter {
    fn name(&self) -> &'static str {
        "switchboard_demo::SyslogPrinter"
    }

    fn on_connect(&mut self, _peer: SocketAddr) -> ConnectResult {
        ConnectResult::Accept
    }

    fn on_read(&mut self, payload: &mut Payload) -> PipelineResult {
        if let Some(messages) = payload.downcast_ref::<Vec<SyslogMessage>>() {
            for message in messages {
                tracing::info!(
                    hostname = %message.hostname,
                    appname = %message.appname,
                    processid = %message.processid,
                    body = %message.message_lossy(),
                    "syslog message"
                );
            }
        }
        PipelineResult::RequestRead
    }
}
