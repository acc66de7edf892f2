//! WebSocket transport for the ws-wrapper router, over tokio-tungstenite.
//!
//! [`WsConn`] adapts an upgraded `WebSocketStream` to the router's
//! [`Conn`] contract: text frames carry JSON wire messages, ping/pong is
//! left to the WebSocket library, and a close frame ends the connection.
//! Use [`accept`] to upgrade an incoming TCP stream with the protocol's
//! size limits applied.
//!
//! ```no_run
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let server = wswrap_server::Server::new();
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
//! loop {
//!     let (stream, _peer) = listener.accept().await?;
//!     let conn = wswrap_tungstenite::accept(stream).await?;
//!     server.accept(conn).await?;
//! }
//! # }
//! ```

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite;
use tungstenite::protocol::frame::CloseFrame;
use tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, warn};

use wswrap_protocol::constants::MAX_MESSAGE_SIZE;
use wswrap_protocol::{Message, StatusCode};
use wswrap_server::{BoxFuture, Conn, ConnError};

/// A [`Conn`] over a tokio-tungstenite WebSocket.
///
/// Reads happen only from the router's read loop and writes are
/// serialized by the router, so the two split halves each sit behind an
/// uncontended async mutex.
pub struct WsConn<S> {
    reader: Mutex<SplitStream<WebSocketStream<S>>>,
    writer: Mutex<SplitSink<WebSocketStream<S>, tungstenite::Message>>,
}

impl<S> WsConn<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Wraps an already-upgraded WebSocket.
    pub fn new(stream: WebSocketStream<S>) -> Self {
        let (writer, reader) = stream.split();
        WsConn {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
        }
    }
}

/// Upgrades an incoming stream to a WebSocket with the wire protocol's
/// message size limits, returning it wrapped as a [`Conn`].
pub async fn accept<S>(stream: S) -> Result<WsConn<S>, tungstenite::Error>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut config = tungstenite::protocol::WebSocketConfig::default();
    config.max_message_size = Some(MAX_MESSAGE_SIZE);
    config.max_frame_size = Some(MAX_MESSAGE_SIZE);
    let ws = tokio_tungstenite::accept_async_with_config(stream, Some(config)).await?;
    Ok(WsConn::new(ws))
}

fn map_ws_error(err: tungstenite::Error) -> ConnError {
    match err {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            ConnError::Closed
        }
        other => ConnError::transport(other),
    }
}

impl<S> Conn for WsConn<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn read_message(&self) -> BoxFuture<'_, Result<Message, ConnError>> {
        Box::pin(async move {
            let mut reader = self.reader.lock().await;
            loop {
                match reader.next().await {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        return serde_json::from_str(text.as_str())
                            .map_err(ConnError::InvalidMessage);
                    }
                    Some(Ok(tungstenite::Message::Binary(_))) => {
                        warn!("unexpected binary frame, closing");
                        return Err(ConnError::transport(std::io::Error::new(
                            std::io::ErrorKind::InvalidData,
                            "unexpected binary frame",
                        )));
                    }
                    // The library answers pings on its own.
                    Some(Ok(
                        tungstenite::Message::Ping(_)
                        | tungstenite::Message::Pong(_)
                        | tungstenite::Message::Frame(_),
                    )) => continue,
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        debug!(?frame, "peer closed");
                        return Err(ConnError::Closed);
                    }
                    Some(Err(err)) => return Err(map_ws_error(err)),
                    None => return Err(ConnError::Closed),
                }
            }
        })
    }

    fn write_message<'a>(&'a self, msg: &'a Message) -> BoxFuture<'a, Result<(), ConnError>> {
        Box::pin(async move {
            let text = serde_json::to_string(msg).map_err(ConnError::InvalidMessage)?;
            let mut writer = self.writer.lock().await;
            writer
                .send(tungstenite::Message::Text(text.into()))
                .await
                .map_err(map_ws_error)
        })
    }

    fn close<'a>(
        &'a self,
        status: StatusCode,
        reason: &'a str,
    ) -> BoxFuture<'a, Result<(), ConnError>> {
        Box::pin(async move {
            let frame = CloseFrame {
                code: CloseCode::from(u16::from(status)),
                reason: reason.to_string().into(),
            };
            let mut writer = self.writer.lock().await;
            match writer.send(tungstenite::Message::Close(Some(frame))).await {
                Ok(())
                | Err(tungstenite::Error::ConnectionClosed)
                | Err(tungstenite::Error::AlreadyClosed) => Ok(()),
                Err(err) => Err(ConnError::transport(err)),
            }
        })
    }

    fn close_now(&self) -> BoxFuture<'_, Result<(), ConnError>> {
        Box::pin(async move {
            let mut writer = self.writer.lock().await;
            match writer.close().await {
                Ok(())
                | Err(tungstenite::Error::ConnectionClosed)
                | Err(tungstenite::Error::AlreadyClosed) => Ok(()),
                Err(err) => Err(ConnError::transport(err)),
            }
        })
    }
}
