//! In-memory transport for tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};

use wswrap_protocol::{Message, StatusCode};

use crate::client::Client;
use crate::server::Server;
use crate::{BoxFuture, Conn, ConnError};

/// The server-side half of an in-memory connection.
pub(crate) struct MockConn {
    inbound: Mutex<mpsc::UnboundedReceiver<Result<Message, ConnError>>>,
    outbound: mpsc::UnboundedSender<Message>,
    closed_tx: mpsc::UnboundedSender<(StatusCode, String)>,
    fail_writes: Arc<AtomicBool>,
}

/// The test's handle to the remote end of a [`MockConn`].
pub(crate) struct MockRemote {
    pub to_server: mpsc::UnboundedSender<Result<Message, ConnError>>,
    pub from_server: mpsc::UnboundedReceiver<Message>,
    pub closed: mpsc::UnboundedReceiver<(StatusCode, String)>,
    pub fail_writes: Arc<AtomicBool>,
}

impl MockRemote {
    pub fn send(&self, msg: Message) {
        self.to_server.send(Ok(msg)).unwrap();
    }

    pub fn send_json(&self, json: &str) {
        self.send(serde_json::from_str(json).unwrap());
    }

    /// Makes the next read fail, as a broken transport would.
    pub fn fail_transport(&self) {
        self.to_server
            .send(Err(ConnError::transport(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "mock transport failure",
            ))))
            .unwrap();
    }

    pub async fn recv(&mut self) -> Message {
        tokio::time::timeout(Duration::from_secs(2), self.from_server.recv())
            .await
            .expect("timed out waiting for outbound message")
            .expect("connection write side dropped")
    }

    pub async fn recv_json(&mut self) -> String {
        serde_json::to_string(&self.recv().await).unwrap()
    }

    /// Asserts that the server writes nothing for a little while.
    pub async fn expect_silence(&mut self) {
        match tokio::time::timeout(Duration::from_millis(100), self.from_server.recv()).await {
            Err(_) | Ok(None) => {}
            Ok(Some(msg)) => panic!("unexpected outbound message: {}", msg.summary()),
        }
    }
}

/// Builds a connected in-memory transport pair.
pub(crate) fn pipe() -> (MockConn, MockRemote) {
    let (to_server, inbound) = mpsc::unbounded_channel();
    let (outbound, from_server) = mpsc::unbounded_channel();
    let (closed_tx, closed) = mpsc::unbounded_channel();
    let fail_writes = Arc::new(AtomicBool::new(false));
    (
        MockConn {
            inbound: Mutex::new(inbound),
            outbound,
            closed_tx,
            fail_writes: Arc::clone(&fail_writes),
        },
        MockRemote {
            to_server,
            from_server,
            closed,
            fail_writes,
        },
    )
}

/// A fresh server with one accepted mock connection.
pub(crate) async fn test_client() -> (Arc<Server>, Arc<Client>, MockRemote) {
    let server = Server::new();
    let (conn, remote) = pipe();
    let client = server.accept(conn).await.unwrap();
    (server, client, remote)
}

impl Conn for MockConn {
    fn read_message(&self) -> BoxFuture<'_, Result<Message, ConnError>> {
        Box::pin(async move {
            match self.inbound.lock().await.recv().await {
                Some(result) => result,
                None => Err(ConnError::Closed),
            }
        })
    }

    fn write_message<'a>(&'a self, msg: &'a Message) -> BoxFuture<'a, Result<(), ConnError>> {
        Box::pin(async move {
            if self.fail_writes.load(Ordering::Relaxed) {
                return Err(ConnError::transport(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "mock write failure",
                )));
            }
            self.outbound.send(msg.clone()).map_err(|_| ConnError::Closed)
        })
    }

    fn close<'a>(
        &'a self,
        status: StatusCode,
        reason: &'a str,
    ) -> BoxFuture<'a, Result<(), ConnError>> {
        Box::pin(async move {
            let _ = self.closed_tx.send((status, reason.to_string()));
            Ok(())
        })
    }

    fn close_now(&self) -> BoxFuture<'_, Result<(), ConnError>> {
        Box::pin(async { Ok(()) })
    }
}
