//! Single-threaded, readiness-driven TCP reactor with per-connection handler
//! pipelines.
//!
//! Build a [`pipeline::PipelineFactory`], hand it to a [`reactor::Reactor`],
//! call [`reactor::Reactor::listen`] and then [`reactor::Reactor::run`].

pub mod assert;
pub mod buffer;
pub mod error;
pub mod lifecycle;
pub mod pipeline;
pub mod reactor;
pub mod socket;

pub use buffer::CyclicBuffer;
pub use error::{Error, Result};
pub use lifecycle::Lifecycle;
pub use pipeline::{ConnectResult, Handler, HandlerPipeline, Payload, PipelineFactory, PipelineResult};
pub use reactor::Reactor;
