//! bytewire demo: a line-echo server over the connection library.
//!
//! Accepts connections, reads line-feed-terminated lines and writes each
//! one back unchanged. Configuration comes from CLI arguments or a TOML
//! file; see `--help`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use bytewire::config::Config;
use bytewire::{ByteWindow, Connection, Error, EventLoop, Server, StorageKind};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        backlog = config.backlog,
        workers = ?config.workers,
        window_capacity = config.window_capacity,
        direct_buffers = config.direct_buffers,
        "Starting bytewire echo server"
    );

    let mut event_loop = match config.workers {
        Some(workers) => EventLoop::with_workers(workers)?,
        None => EventLoop::new()?,
    };

    let addr: SocketAddr = config.listen.parse()?;
    let server = Server::bind_with_limit(&event_loop, addr, config.backlog, config.max_connections)?;

    let capacity = config.window_capacity;
    let kind = if config.direct_buffers {
        StorageKind::Direct
    } else {
        StorageKind::Heap
    };
    let timeout = config.timeout();

    let result = event_loop.block_on(server.serve(move |conn: Arc<Connection>| async move {
        echo_lines(conn, capacity, kind, timeout).await
    }));
    event_loop.shutdown();
    result?;
    Ok(())
}

/// Echo line-feed-terminated lines back until the peer goes away.
async fn echo_lines(
    conn: Arc<Connection>,
    capacity: usize,
    kind: StorageKind,
    timeout: Option<Duration>,
) -> Result<(), Error> {
    let mut window = ByteWindow::new(capacity, kind);
    loop {
        conn.read_line(&mut window, timeout).await?;
        if window.is_empty() {
            // End of stream with nothing accumulated
            return Ok(());
        }
        conn.write(&window, timeout).await?;
    }
}
