//! Minimal ws-wrapper echo server.
//!
//! Run with `cargo run --example echo`, then from a browser console:
//!
//! ```text
//! const ws = new WebSocket("ws://127.0.0.1:8080");
//! ws.onopen = () => ws.send(JSON.stringify({a: ["echo", "hi"], i: 1}));
//! ws.onmessage = (e) => console.log(e.data); // {"i":1,"d":"hi"}
//! ```

use std::convert::Infallible;

use wswrap_server::Server;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let server = Server::new();
    server.on("echo", |s: String| async move { Ok::<_, Infallible>(s) })?;
    server.on_open(|client| async move {
        tracing::info!(client = %client.id(), "connected");
    });
    server.on_close(|client, status, reason| async move {
        tracing::info!(client = %client.id(), %status, reason, "disconnected");
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
    tracing::info!("listening on {}", listener.local_addr()?);

    loop {
        let (stream, peer) = listener.accept().await?;
        let server = server.clone();
        tokio::spawn(async move {
            match wswrap_tungstenite::accept(stream).await {
                Ok(conn) => {
                    if let Err(err) = server.accept(conn).await {
                        tracing::warn!(%peer, "accept failed: {err}");
                    }
                }
                Err(err) => tracing::warn!(%peer, "websocket upgrade failed: {err}"),
            }
        });
    }
}
