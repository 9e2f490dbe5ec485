//! Minimal HTTP-shaped echo server: replies to every connection with a
//! canned `200 OK` and closes. Exercises the reactor's read -> write ->
//! close path end to end (spec.md §8 scenario (b)).

use std::net::SocketAddr;

use clap::Parser;
use switchboard_core::{Handler, PipelineFactory, Reactor};
use switchboard_demo::EchoHandler;

#[derive(Parser, Debug)]
#[command(name = "switchboard-echo", about = "Example switchboard-core HTTP-shaped echo server")]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:8080")]
    listen: SocketAddr,

    /// Listen backlog passed to the kernel.
    #[arg(long, default_value_t = switchboard_core::socket::DEFAULT_BACKLOG)]
    backlog: i32,
}

struct EchoFactory;

impl PipelineFactory for EchoFactory {
    fn build(&self) -> Vec<Box<dyn Handler>> {
        vec![Box::new(EchoHandler::default())]
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let mut reactor = Reactor::new(Box::new(EchoFactory))?;
    reactor.listen(args.listen, args.backlog)?;

    let lifecycle = reactor.lifecycle();
    ctrlc::set_handler(move || {
        tracing::info!("received shutdown signal");
        lifecycle.stop();
    })?;

    tracing::info!(listen = %args.listen, "switchboard-echo listening");
    reactor.run()?;
    Ok(())
}
