//! Accepting side: a bound listener dispatching connections to handlers.
//!
//! The accept loop re-arms immediately: each accepted socket is wrapped in
//! a [`Connection`] and handed to the lifecycle adapter on the pool before
//! the loop touches it, so concurrent connection attempts are never missed.

use std::fmt::Display;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpSocket};
use tokio::runtime::Handle;
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, info};

use crate::connection::Connection;
use crate::error::Error;
use crate::event_loop::EventLoop;
use crate::handler::drive;

/// Default upper bound on connections serviced at once.
const MAX_CONNECTIONS: usize = 10_000;

/// Listening socket plus the accept loop over it.
pub struct Server {
    listener: TcpListener,
    handle: Handle,
    limit: Arc<Semaphore>,
    stopped: AtomicBool,
    stop: Notify,
}

impl Server {
    /// Bind a listening socket on the given pool with a configurable
    /// backlog and the default connection limit.
    pub fn bind(event_loop: &EventLoop, addr: SocketAddr, backlog: u32) -> Result<Server, Error> {
        Self::bind_with_limit(event_loop, addr, backlog, MAX_CONNECTIONS)
    }

    /// Same as [`bind`](Server::bind) with an explicit cap on concurrently
    /// serviced connections.
    pub fn bind_with_limit(
        event_loop: &EventLoop,
        addr: SocketAddr,
        backlog: u32,
        max_connections: usize,
    ) -> Result<Server, Error> {
        let handle = event_loop.handle().clone();
        let listener = {
            // Socket registration needs the pool's reactor context.
            let _reactor = handle.enter();
            let socket = match addr {
                SocketAddr::V4(_) => TcpSocket::new_v4(),
                SocketAddr::V6(_) => TcpSocket::new_v6(),
            }?;
            socket.set_reuseaddr(true)?;
            socket.bind(addr)?;
            socket.listen(backlog)?
        };
        info!(address = %addr, backlog, "server listening");
        Ok(Server {
            listener,
            handle,
            limit: Arc::new(Semaphore::new(max_connections)),
            stopped: AtomicBool::new(false),
            stop: Notify::new(),
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        self.listener.local_addr().map_err(Error::Io)
    }

    /// Accept connections until [`stop`](Server::stop) or an accept failure.
    ///
    /// Handler outcomes never terminate this loop — failures are logged by
    /// the lifecycle adapter, which also guarantees every dispatched
    /// connection is closed. Only a failure of the accept operation itself
    /// ends the loop with an error.
    pub async fn serve<H, Fut, T, E>(&self, handler: H) -> Result<(), Error>
    where
        H: Fn(Arc<Connection>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Display + Send + 'static,
    {
        let handler = Arc::new(handler);
        loop {
            if self.stopped.load(Ordering::Acquire) {
                return Ok(());
            }
            // Wait for a connection slot before accepting.
            let permit = self
                .limit
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| Error::Closed)?;

            let (stream, peer) = tokio::select! {
                accepted = self.listener.accept() => accepted?,
                _ = self.stop.notified() => return Ok(()),
            };
            if self.stopped.load(Ordering::Acquire) {
                // Raced with a stop request: close instead of processing.
                drop(stream);
                return Ok(());
            }
            debug!(peer = %peer, "accepted connection");

            let connection = Connection::new(stream);
            let handler = Arc::clone(&handler);
            self.handle.spawn(async move {
                drive(connection, move |conn| (*handler)(conn)).await;
                drop(permit);
            });
        }
    }

    /// Request the accept loop to end. Connections accepted after this are
    /// closed immediately instead of processed.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.stop.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Client;
    use crate::window::{ByteWindow, StorageKind};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn any_addr() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    fn line(content: &[u8]) -> ByteWindow {
        ByteWindow::from_slice(content, StorageKind::Heap)
    }

    #[test]
    fn ping_pong_end_to_end() {
        let mut event_loop = EventLoop::with_workers(2).unwrap();
        let server = Server::bind(&event_loop, any_addr(), 128).unwrap();
        let addr = server.local_addr().unwrap();
        let client = Client::new(&event_loop);

        event_loop.block_on(async {
            let serving = server.serve(|conn: Arc<Connection>| async move {
                let mut window = ByteWindow::new(64, StorageKind::Heap);
                conn.read_line(&mut window, None).await?;
                if window.as_slice() == b"ping\n" {
                    conn.write(&line(b"pong\n"), None).await?;
                }
                Ok::<(), Error>(())
            });
            let exchange = async {
                let conn = client.connect(addr, None).await.unwrap();
                conn.write(&line(b"ping\n"), None).await.unwrap();
                let mut window = ByteWindow::new(64, StorageKind::Heap);
                conn.read_line(&mut window, None).await.unwrap();
                assert_eq!(window.as_slice(), b"pong\n");
                conn.close();
                server.stop();
            };
            let (served, ()) = tokio::join!(serving, exchange);
            served.unwrap();
        });
        event_loop.shutdown();
    }

    #[test]
    fn concurrent_connections_are_all_served() {
        const CLIENTS: usize = 16;

        let mut event_loop = EventLoop::with_workers(4).unwrap();
        let server = Server::bind(&event_loop, any_addr(), 128).unwrap();
        let addr = server.local_addr().unwrap();
        let served = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&served);
        event_loop.block_on(async {
            let serving = server.serve(move |conn: Arc<Connection>| {
                let counter = Arc::clone(&counter);
                async move {
                    let mut window = ByteWindow::new(64, StorageKind::Heap);
                    conn.read_line(&mut window, None).await?;
                    counter.fetch_add(1, Ordering::SeqCst);
                    conn.write(&window, None).await?;
                    Ok::<(), Error>(())
                }
            });
            let fan_out = async {
                let client = Client::new(&event_loop);
                let mut exchanges = Vec::with_capacity(CLIENTS);
                for i in 0..CLIENTS {
                    let conn = client.connect(addr, None).await.unwrap();
                    exchanges.push(tokio::spawn(async move {
                        let greeting = format!("hello {i}\n");
                        conn.write(
                            &ByteWindow::from_slice(greeting.as_bytes(), StorageKind::Heap),
                            None,
                        )
                        .await
                        .unwrap();
                        let mut window = ByteWindow::new(64, StorageKind::Heap);
                        conn.read_line(&mut window, None).await.unwrap();
                        assert_eq!(window.as_slice(), greeting.as_bytes());
                    }));
                }
                for exchange in exchanges {
                    exchange.await.unwrap();
                }
                server.stop();
            };
            let (served_result, ()) = tokio::join!(serving, fan_out);
            served_result.unwrap();
        });

        assert_eq!(served.load(Ordering::SeqCst), CLIENTS);
        event_loop.shutdown();
    }

    #[test]
    fn handler_failures_do_not_stop_the_loop() {
        let mut event_loop = EventLoop::with_workers(2).unwrap();
        let server = Server::bind(&event_loop, any_addr(), 16).unwrap();
        let addr = server.local_addr().unwrap();

        event_loop.block_on(async {
            let serving = server.serve(|conn: Arc<Connection>| async move {
                let mut window = ByteWindow::new(64, StorageKind::Heap);
                conn.read_line(&mut window, None).await?;
                if window.as_slice() == b"boom\n" {
                    return Err(Error::TimedOut);
                }
                conn.write(&window, None).await?;
                Ok(())
            });
            let exchange = async {
                let client = Client::new(&event_loop);

                // First handler fails; its connection must still be closed.
                let failing = client.connect(addr, None).await.unwrap();
                failing.write(&line(b"boom\n"), None).await.unwrap();
                let mut window = ByteWindow::new(8, StorageKind::Heap);
                let eof = failing
                    .read(&mut window, Some(Duration::from_secs(2)))
                    .await
                    .unwrap();
                assert_eq!(eof, 0);

                // The loop is still accepting and serving.
                let healthy = client.connect(addr, None).await.unwrap();
                healthy.write(&line(b"hi\n"), None).await.unwrap();
                let mut window = ByteWindow::new(8, StorageKind::Heap);
                healthy.read_line(&mut window, None).await.unwrap();
                assert_eq!(window.as_slice(), b"hi\n");

                server.stop();
            };
            let (served, ()) = tokio::join!(serving, exchange);
            served.unwrap();
        });
        event_loop.shutdown();
    }

    #[test]
    fn stop_ends_the_accept_loop() {
        let mut event_loop = EventLoop::with_workers(1).unwrap();
        let server = Server::bind(&event_loop, any_addr(), 16).unwrap();

        event_loop.block_on(async {
            let serving = server.serve(|_conn: Arc<Connection>| async { Ok::<(), Error>(()) });
            let stopper = async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                server.stop();
            };
            let (result, ()) = tokio::join!(serving, stopper);
            result.unwrap();
        });
        event_loop.shutdown();
    }
}
