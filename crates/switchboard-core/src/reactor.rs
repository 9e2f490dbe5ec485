//! The single-threaded, readiness-driven event loop.
//!
//! Mirrors the reference `TcpConnector`'s split of a `Poll`-owning
//! `ConnectionManager` from the top-level driver holding the reusable
//! `Events` buffer — `Reactor { events, conn_mgr }` — which keeps the
//! event-iteration borrow separate from the connection-table mutation borrow.
//! Unlike that reference (which tracks a handful of outbound/inbound peers in
//! a linearly-scanned `Vec`), a reactor here is meant to field many inbound
//! connections from a listener, so the connection table is a `Token`-keyed
//! map instead.

use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::time::Duration;

use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};

use crate::error::{Error, Result};
use crate::lifecycle::Lifecycle;
use crate::pipeline::{ConnectResult, HandlerPipeline, Payload, PipelineFactory, PipelineResult};
use crate::safe_panic;
use crate::socket;

/// Bytes read from the socket per readable event, per the single-`recv`
/// contract: one non-blocking read attempt of up to this many bytes, not a
/// read-until-`WouldBlock` loop.
const READ_CHUNK_SIZE: usize = 1024;

/// How long a single `poll` call blocks waiting for readiness before
/// returning control to the lifecycle loop to check the stop flag.
const POLL_TIMEOUT: Duration = Duration::from_millis(10);

const LISTENER_TOKEN_BASE: usize = 0;

/// What a connection is currently registered for. Distinct from
/// [`PipelineResult`]: this is the reactor's bookkeeping of the last interest
/// applied to the registry, kept so reregistration is only issued when the
/// desired interest actually changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnInterest {
    Read,
    Write,
    ReadWrite,
}

impl ConnInterest {
    fn as_mio(self) -> Interest {
        match self {
            Self::Read => Interest::READABLE,
            Self::Write => Interest::WRITABLE,
            Self::ReadWrite => Interest::READABLE.add(Interest::WRITABLE),
        }
    }
}

struct ConnectionRecord {
    stream: TcpStream,
    peer: SocketAddr,
    pipeline: HandlerPipeline,
    interest: ConnInterest,
    write_buf: VecDeque<u8>,
}

enum Slot {
    Listener(TcpListener),
    Connection(ConnectionRecord),
}

/// Owns the `Poll` instance, the listener(s), and every live connection.
/// Kept separate from [`Reactor`]'s `Events` buffer so the event-iteration
/// loop can hold an immutable borrow of `events` while mutating `conn_mgr`.
struct ConnectionManager {
    poll: Poll,
    slots: HashMap<Token, Slot>,
    next_token: usize,
    factory: Box<dyn PipelineFactory>,
}

impl ConnectionManager {
    fn new(factory: Box<dyn PipelineFactory>) -> Result<Self> {
        let poll = Poll::new().map_err(Error::IoAcceptFailed)?;
        Ok(Self { poll, slots: HashMap::new(), next_token: LISTENER_TOKEN_BASE, factory })
    }

    fn next_token(&mut self) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        token
    }

    fn listen(&mut self, addr: SocketAddr, backlog: i32) -> Result<Token> {
        let mut listener = socket::bind_listener(addr, backlog)?;
        let token = self.next_token();
        self.poll
            .registry()
            .register(&mut listener, token, Interest::READABLE)
            .map_err(Error::IoAcceptFailed)?;
        self.slots.insert(token, Slot::Listener(listener));
        Ok(token)
    }

    /// Accepts every connection currently pending on `listener_token`, one
    /// `accept()` at a time until it would block.
    fn accept_all(&mut self, listener_token: Token) {
        loop {
            let accepted = match self.slots.get_mut(&listener_token) {
                Some(Slot::Listener(listener)) => listener.accept(),
                _ => {
                    safe_panic!("accept on a token that is not a listener");
                    return;
                }
            };
            let (mut stream, peer) = match accepted {
                Ok(pair) => pair,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    return;
                }
            };

            if let Err(e) = socket::disable_nagle(&stream) {
                tracing::warn!(error = %e, "failed to set TCP_NODELAY, closing new connection");
                continue;
            }

            let token = self.next_token();
            // Registered readable as a technical placeholder: mio has no
            // "no interest" value, and the synchronous on_connect dispatch
            // below immediately supersedes it via apply_signal.
            if let Err(e) =
                self.poll.registry().register(&mut stream, token, Interest::READABLE)
            {
                tracing::warn!(error = %e, "failed to register accepted stream");
                continue;
            }

            let mut pipeline = HandlerPipeline::new(self.factory.build());
            let outcome = pipeline.dispatch_connect(peer);
            let mut record = ConnectionRecord {
                stream,
                peer,
                pipeline,
                interest: ConnInterest::Read,
                write_buf: VecDeque::new(),
            };

            if outcome == ConnectResult::Reject {
                tracing::debug!(%peer, "connection rejected by pipeline");
                let _ = self.poll.registry().deregister(&mut record.stream);
                continue;
            }

            tracing::debug!(%peer, ?token, "accepted connection");
            self.slots.insert(token, Slot::Connection(record));
        }
    }

    /// Single non-blocking `recv` of up to [`READ_CHUNK_SIZE`] bytes,
    /// dispatched through the downstream chain. Zero bytes or a
    /// hangup-equivalent error synthesizes a close.
    fn readable(&mut self, token: Token) {
        let Some(Slot::Connection(record)) = self.slots.get_mut(&token) else {
            safe_panic!("readable event for unknown connection token");
            return;
        };

        let mut scratch = [0u8; READ_CHUNK_SIZE];
        match record.stream.read(&mut scratch) {
            Ok(0) => self.close_connection(token),
            Ok(n) => {
                let mut payload = Payload::bytes(scratch[..n].to_vec());
                let Some(Slot::Connection(record)) = self.slots.get_mut(&token) else {
                    return;
                };
                let signal = record.pipeline.dispatch_read(&mut payload);
                self.apply_signal(token, signal);
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => {
                tracing::debug!(error = %e, ?token, "read failed");
                self.close_connection(token);
            }
        }
    }

    /// Flushes as much of the write backlog as a single `send` permits; if
    /// the backlog fully drains, dispatches `on_write` through the upstream
    /// chain with an empty payload so handlers can react to write
    /// availability without data of their own queued.
    fn writable(&mut self, token: Token) {
        let Some(Slot::Connection(record)) = self.slots.get_mut(&token) else {
            safe_panic!("writable event for unknown connection token");
            return;
        };

        if !record.write_buf.is_empty() {
            let (first, second) = record.write_buf.as_slices();
            let chunk: Vec<u8> =
                if first.is_empty() { second.to_vec() } else { first.to_vec() };
            match record.stream.write(&chunk) {
                Ok(0) => {
                    self.close_connection(token);
                    return;
                }
                Ok(n) => {
                    record.write_buf.drain(..n);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) => {
                    tracing::debug!(error = %e, ?token, "write failed");
                    self.close_connection(token);
                    return;
                }
            }
        }

        let Some(Slot::Connection(record)) = self.slots.get_mut(&token) else {
            return;
        };
        if record.write_buf.is_empty() {
            let mut payload = Payload::bytes(Vec::new());
            let signal = record.pipeline.dispatch_write(&mut payload);
            self.apply_signal(token, signal);
        }
    }

    /// Translates the signal returned by a pipeline dispatch into registry
    /// interest changes, per §4.3.1 of the interest state machine: FORWARD
    /// reaching the end of a read dispatch behaves like `RequestRead`;
    /// `RequestWrite` both queues bytes and arms writable; `RequestClose`
    /// tears the connection down (after the terminal `on_close`).
    fn apply_signal(&mut self, token: Token, signal: PipelineResult) {
        match signal {
            PipelineResult::Continue | PipelineResult::RequestRead => {
                self.set_interest(token, ConnInterest::Read);
            }
            PipelineResult::RequestWrite(bytes) => {
                if let Some(Slot::Connection(record)) = self.slots.get_mut(&token) {
                    record.write_buf.extend(bytes);
                }
                self.set_interest(token, ConnInterest::ReadWrite);
            }
            PipelineResult::RequestClose => {
                self.close_connection(token);
            }
        }
    }

    fn set_interest(&mut self, token: Token, wanted: ConnInterest) {
        let Some(Slot::Connection(record)) = self.slots.get_mut(&token) else {
            return;
        };
        if record.interest == wanted {
            return;
        }
        if let Err(e) =
            self.poll.registry().reregister(&mut record.stream, token, wanted.as_mio())
        {
            tracing::debug!(error = %e, ?token, "reregister failed");
            self.close_connection(token);
            return;
        }
        if let Some(Slot::Connection(record)) = self.slots.get_mut(&token) {
            record.interest = wanted;
        }
    }

    /// Removes and deregisters a connection, dispatching exactly one
    /// `on_close` per handler in the chain first. Idempotent: a token already
    /// gone is a no-op, since two independent paths (a read error and a
    /// later write error on the same token within one poll batch) can both
    /// try to close it.
    fn close_connection(&mut self, token: Token) {
        let Some(Slot::Connection(mut record)) = self.slots.remove(&token) else {
            return;
        };
        record.pipeline.dispatch_close();
        let _ = record.stream.shutdown(std::net::Shutdown::Both);
        let _ = self.poll.registry().deregister(&mut record.stream);
        tracing::debug!(peer = %record.peer, ?token, "connection closed");
    }

    fn shutdown(&mut self) {
        let tokens: Vec<Token> = self.slots.keys().copied().collect();
        for token in tokens {
            match self.slots.get(&token) {
                Some(Slot::Connection(_)) => self.close_connection(token),
                Some(Slot::Listener(_)) => {
                    if let Some(Slot::Listener(mut listener)) = self.slots.remove(&token) {
                        let _ = self.poll.registry().deregister(&mut listener);
                    }
                }
                None => {}
            }
        }
    }
}

/// Drives the handler pipelines for every connection accepted on its
/// listener(s) to completion, cooperatively, until [`Lifecycle::stop`] is
/// observed.
pub struct Reactor {
    events: Events,
    conn_mgr: ConnectionManager,
    lifecycle: Lifecycle,
}

impl Reactor {
    pub fn new(factory: Box<dyn PipelineFactory>) -> Result<Self> {
        Ok(Self {
            events: Events::with_capacity(256),
            conn_mgr: ConnectionManager::new(factory)?,
            lifecycle: Lifecycle::new(),
        })
    }

    /// Starts listening at `addr` with the given backlog, returning the
    /// listener's token. Call before [`run`](Self::run).
    pub fn listen(&mut self, addr: SocketAddr, backlog: i32) -> Result<Token> {
        self.conn_mgr.listen(addr, backlog)
    }

    /// A clone of the handle used to stop this reactor from another thread
    /// (for example a `ctrlc` signal handler).
    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle.clone()
    }

    /// Runs the poll loop until [`Lifecycle::stop`] is called. Recovers
    /// silently from a signal-interrupted poll; any other poll error is
    /// logged and the loop continues, since a transient polling failure on
    /// one iteration shouldn't take down every live connection.
    pub fn run(&mut self) -> Result<()> {
        self.lifecycle.enter_running().map_err(Error::InvalidState)?;
        while self.lifecycle.is_running() {
            match self.conn_mgr.poll.poll(&mut self.events, Some(POLL_TIMEOUT)) {
                Ok(()) => {}
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::warn!(error = %e, "poll failed");
                    continue;
                }
            }

            let tokens: Vec<(Token, bool, bool, bool)> = self
                .events
                .iter()
                .map(|e| {
                    let hangup = e.is_read_closed() || e.is_write_closed();
                    (e.token(), e.is_readable(), e.is_writable(), hangup)
                })
                .collect();

            for (token, readable, writable, hangup) in tokens {
                let is_listener = matches!(self.conn_mgr.slots.get(&token), Some(Slot::Listener(_)));
                if is_listener {
                    if readable {
                        self.conn_mgr.accept_all(token);
                    }
                    continue;
                }
                // Hangup readiness synthesizes a close regardless of what
                // else fired alongside it; close_connection is idempotent,
                // so a read that already drained to a zero-byte EOF on the
                // same token is harmless to close again.
                if hangup {
                    self.conn_mgr.close_connection(token);
                    continue;
                }
                if readable {
                    self.conn_mgr.readable(token);
                }
                if writable && self.conn_mgr.slots.contains_key(&token) {
                    self.conn_mgr.writable(token);
                }
            }
        }

        self.conn_mgr.shutdown();
        Ok(())
    }
}
