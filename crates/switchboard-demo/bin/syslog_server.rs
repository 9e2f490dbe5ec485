//! Accepts RFC 5424 octet-framed syslog connections and logs each decoded
//! message (spec.md §8 scenario (a): the `rsyslogd` fixture).

use std::net::SocketAddr;

use clap::Parser;
use switchboard_core::{Handler, PipelineFactory, Reactor};
use switchboard_demo::SyslogPrinter;
use switchboard_syslog::SyslogLexer;

#[derive(Parser, Debug)]
#[command(name = "switchboard-syslogd", about = "Example switchboard-syslog server")]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:5514")]
    listen: SocketAddr,

    /// Listen backlog passed to the kernel.
    #[arg(long, default_value_t = switchboard_core::socket::DEFAULT_BACKLOG)]
    backlog: i32,
}

struct SyslogFactory;

impl PipelineFactory for SyslogFactory {
    fn build(&self) -> Vec<Box<dyn Handler>> {
        vec![Box::new(SyslogLexer::new()), Box::new(SyslogPrinter)]
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let mut reactor = Reactor::new(Box::new(SyslogFactory))?;
    reactor.listen(args.listen, args.backlog)?;

    let lifecycle = reactor.lifecycle();
    ctrlc::set_handler(move || {
        tracing::info!("received shutdown signal");
        lifecycle.stop();
    })?;

    tracing::info!(listen = %args.listen, "switchboard-syslogd listening");
    reactor.run()?;
    Ok(())
}
