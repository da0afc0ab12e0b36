// lanchat Linux daemon: UDP broadcast chat on the local segment.

mod broadcast;
mod config;
mod keepalive;

use std::sync::Arc;

use lanchat_core::Message;
use tokio::io::AsyncBufReadExt;
use tracing_subscriber::EnvFilter;

use broadcast::{BroadcastTransport, ChatListener};
use keepalive::NoopRadioLock;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prints incoming messages to stdout; errors go to the log.
struct PrintListener;

impl ChatListener for PrintListener {
    fn on_message(&self, message: Message) {
        println!(
            "[{}] {}: {}",
            message.formatted_time(),
            message.sender,
            message.content
        );
    }

    fn on_error(&self, error: String) {
        tracing::warn!("{error}");
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    for arg in std::env::args().skip(1) {
        if arg == "--version" || arg == "-V" {
            println!("lanchat-linux {}", VERSION);
            return Ok(());
        }
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cfg = config::load();
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let transport =
            BroadcastTransport::new(cfg.broadcast_addr, cfg.port, Box::new(NoopRadioLock));
        transport.set_listener(Arc::new(PrintListener)).await;
        if !transport.init().await {
            return Err::<(), Box<dyn std::error::Error>>(
                format!("could not start transport on port {}", cfg.port).into(),
            );
        }
        println!(
            "lanchat on port {} as {}; type a line to broadcast, Ctrl+C to quit",
            transport.local_port(),
            cfg.username
        );

        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                res = &mut shutdown => {
                    res?;
                    break;
                }
                line = lines.next_line() => match line? {
                    Some(line) => {
                        // Blank lines are rejected inside send_message.
                        transport.send_message(&cfg.username, line.trim()).await;
                    }
                    None => break,
                },
            }
        }
        let stats = transport.stats().await;
        tracing::info!(
            initialized = stats.initialized,
            receiving = stats.receiving,
            seen = stats.seen_count,
            "shutting down"
        );
        transport.close().await;
        Ok(())
    })?;
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM (Unix). On shutdown the transport is closed and the process exits.
async fn shutdown_signal() -> Result<(), Box<dyn std::error::Error>> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
