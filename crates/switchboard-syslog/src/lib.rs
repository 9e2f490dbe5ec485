//! RFC 5424 octet-counted syslog lexer, implemented as a
//! [`switchboard_core::Handler`].
//!
//! ```no_run
//! use switchboard_syslog::SyslogLexer;
//!
//! let handlers: Vec<Box<dyn switchboard_core::Handler>> = vec![Box::new(SyslogLexer::new())];
//! ```

pub mod lexer;
pub mod message;

pub use lexer::SyslogLexer;
pub use message::{StructuredData, StructuredDataField, SyslogMessage};
