// sendlink: one file, one peer, one link.

mod args;
mod config;
mod console;
mod flow;

use std::net::SocketAddr;
use std::process::ExitCode;

use anyhow::Context;
use args::Command;
use sendlink_net::{PeerConnectionError, RendezvousServer, TransferFailed};
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> ExitCode {
    let command = match args::parse(std::env::args().skip(1)) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("sendlink: {e}\n{}", args::USAGE);
            return ExitCode::from(2);
        }
    };
    match command {
        Command::Version => {
            println!("sendlink {}", VERSION);
            return ExitCode::SUCCESS;
        }
        Command::Help => {
            println!("{}", args::USAGE);
            return ExitCode::SUCCESS;
        }
        _ => {}
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    let cfg = config::load();

    match run(command, cfg) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(&e);
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command, cfg: config::Config) -> anyhow::Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        match command {
            Command::Send { file } => flow::send(&cfg, &file).await,
            Command::Receive { out } => {
                let out = out.unwrap_or_else(|| cfg.download_dir());
                flow::receive(&cfg, &out).await
            }
            Command::Open { link, file, out } => {
                let out = out.unwrap_or_else(|| cfg.download_dir());
                flow::open(&cfg, &link, file.as_deref(), &out).await
            }
            Command::Rendezvous { bind } => serve_rendezvous(bind).await,
            Command::Version | Command::Help => Ok(()),
        }
    })
}

async fn serve_rendezvous(bind: SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("cannot listen on {bind}"))?;
    tokio::select! {
        r = RendezvousServer::new().run(listener) => r.context("rendezvous stopped")?,
        r = shutdown_signal() => r?,
    }
    tracing::info!("rendezvous shut down");
    Ok(())
}

/// Connection problems get their own explanation; everything else prints its chain.
fn report(e: &anyhow::Error) {
    if let Some(pc) = e.downcast_ref::<PeerConnectionError>() {
        eprintln!("Connection problem: {pc}.");
        eprintln!("The link may have expired or the other side closed it. Create a new link and try again.");
    } else if let Some(tf) = e.downcast_ref::<TransferFailed>().filter(|t| t.is_decryption_failure()) {
        eprintln!("sendlink: {tf}. The link's key does not match this transfer; ask for a fresh link.");
    } else {
        eprintln!("sendlink: {e:#}");
    }
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
