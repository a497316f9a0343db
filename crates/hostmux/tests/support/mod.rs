#![allow(dead_code)]

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

/// What the fake backend saw on its one connection.
#[derive(Debug, Default)]
pub struct Session {
    pub subprotocol: Option<String>,
    pub cookie: Option<String>,
    pub frames: Vec<String>,
}

/// A backend that accepts one WebSocket connection, answers the handshake
/// with seed `X1`, echoes data on `echo` channels and refuses every other
/// payload with `not-supported`.
pub async fn spawn_backend() -> (SocketAddr, JoinHandle<Session>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    let addr = listener.local_addr().expect("listener should have an address");

    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("client should connect");
        let mut session = Session::default();
        let mut socket = accept_hdr_async(stream, |request: &Request, mut response: Response| {
            let header = |name: &str| {
                request
                    .headers()
                    .get(name)
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_owned)
            };
            session.cookie = header("cookie");
            if let Some(protocol) = request.headers().get("sec-websocket-protocol") {
                session.subprotocol = header("sec-websocket-protocol");
                response
                    .headers_mut()
                    .insert("sec-websocket-protocol", protocol.clone());
            }
            Ok::<_, ErrorResponse>(response)
        })
        .await
        .expect("upgrade should succeed");

        let init = json!({
            "command": "init",
            "version": 0,
            "channel-seed": "X1",
            "user": { "name": "admin", "full-name": "Administrator" },
            "system": { "version": "312" },
        });
        socket
            .send(Message::Text(format!("\n{init}")))
            .await
            .expect("init should send");

        while let Some(Ok(message)) = socket.next().await {
            let Message::Text(text) = message else {
                continue;
            };
            session.frames.push(text.clone());
            let Some((channel, payload)) = text.split_once('\n') else {
                continue;
            };

            let reply = if channel.is_empty() {
                control_reply(payload)
            } else {
                Some(text.clone())
            };
            if let Some(reply) = reply {
                if socket.send(Message::Text(reply)).await.is_err() {
                    break;
                }
            }
        }
        session
    });

    (addr, handle)
}

fn control_reply(payload: &str) -> Option<String> {
    let message: Value = serde_json::from_str(payload).ok()?;
    let channel = message.get("channel")?.as_str()?;
    match message.get("command")?.as_str()? {
        "open" if message.get("payload") != Some(&json!("echo")) => {
            let close = json!({ "command": "close", "channel": channel, "reason": "not-supported" });
            Some(format!("\n{close}"))
        }
        "close" => {
            let close = json!({ "command": "close", "channel": channel });
            Some(format!("\n{close}"))
        }
        _ => None,
    }
}
