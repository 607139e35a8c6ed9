//! Lifecycle adapter: run a handler over a connection, then close it.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use tracing::error;

use crate::connection::Connection;

/// Invoke `handler` once over the connection and close the connection when
/// the handler's future settles, success or failure alike. Failures are
/// logged, never propagated.
pub async fn drive<H, Fut, T, E>(connection: Connection, handler: H)
where
    H: FnOnce(Arc<Connection>) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let connection = Arc::new(connection);
    if let Err(e) = handler(Arc::clone(&connection)).await {
        error!(error = %e, "connection handler failed");
    }
    connection.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::net::{TcpListener, TcpStream};

    async fn accepted_connection() -> (Connection, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        (Connection::new(accepted.unwrap().0), client.unwrap())
    }

    #[tokio::test]
    async fn connection_is_closed_after_success() {
        let (connection, _peer) = accepted_connection().await;
        let seen: Arc<Mutex<Option<Arc<Connection>>>> = Arc::new(Mutex::new(None));

        let keep = Arc::clone(&seen);
        drive(connection, move |conn| async move {
            *keep.lock().unwrap() = Some(conn);
            Ok::<(), crate::error::Error>(())
        })
        .await;

        let conn = seen.lock().unwrap().take().unwrap();
        assert!(!conn.is_open());
    }

    #[tokio::test]
    async fn failures_are_recovered_and_connection_still_closed() {
        let (connection, _peer) = accepted_connection().await;
        let seen: Arc<Mutex<Option<Arc<Connection>>>> = Arc::new(Mutex::new(None));

        let keep = Arc::clone(&seen);
        drive(connection, move |conn| async move {
            *keep.lock().unwrap() = Some(conn);
            Err::<(), _>(crate::error::Error::TimedOut)
        })
        .await;

        let conn = seen.lock().unwrap().take().unwrap();
        assert!(!conn.is_open());
    }
}
