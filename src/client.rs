//! Connecting side: establish an outbound socket as a [`Connection`].

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpSocket;
use tokio::runtime::Handle;
use tokio::task::JoinError;
use tokio::time;

use crate::connection::Connection;
use crate::error::Error;
use crate::event_loop::EventLoop;

/// Opens sockets on a given pool and connects them to remote peers.
pub struct Client {
    handle: Handle,
    local: Option<SocketAddr>,
}

impl Client {
    pub fn new(event_loop: &EventLoop) -> Self {
        Client {
            handle: event_loop.handle().clone(),
            local: None,
        }
    }

    /// Bind subsequent connections to this local address.
    pub fn bind(&mut self, local: SocketAddr) {
        self.local = Some(local);
    }

    /// Asynchronously establish a connection to `remote`.
    ///
    /// The socket is created and driven on the client's pool; an optional
    /// timeout bounds the whole establishment.
    pub async fn connect(
        &self,
        remote: SocketAddr,
        timeout: Option<Duration>,
    ) -> Result<Connection, Error> {
        let local = self.local;
        let connecting = self.handle.spawn(async move {
            let socket = match remote {
                SocketAddr::V4(_) => TcpSocket::new_v4(),
                SocketAddr::V6(_) => TcpSocket::new_v6(),
            }?;
            if let Some(local) = local {
                socket.bind(local)?;
            }
            socket.connect(remote).await
        });
        let stream = match timeout {
            Some(limit) => match time::timeout(limit, connecting).await {
                Ok(joined) => joined.map_err(join_error)??,
                Err(_) => return Err(Error::TimedOut),
            },
            None => connecting.await.map_err(join_error)??,
        };
        Ok(Connection::new(stream))
    }
}

fn join_error(e: JoinError) -> Error {
    Error::Io(io::Error::new(io::ErrorKind::Other, e))
}
