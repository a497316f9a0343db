//! Multi-channel example: two channels sharing one in-memory transport.
//!
//! Run with:
//!   cargo run --example multi-channel

use hostmux::channel::{ChannelEvent, ChannelOptions, TransportConfig, TransportManager};
use hostmux::frame::{decode_frame, encode_control, encode_frame, Close, ControlMessage, Frame, Init};
use hostmux::transport::{MemoryConnector, MemorySocket, Socket};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (connector, mut acceptor) = MemoryConnector::new();
    let manager = TransportManager::new(connector, TransportConfig::default());

    let backend = tokio::spawn(async move {
        match acceptor.accept().await {
            Some(socket) => serve(socket).await,
            None => Ok(()),
        }
    });

    let mut first = manager.channel(ChannelOptions::new("echo"));
    let mut second = manager.channel(ChannelOptions::new("echo").with_host("db1"));
    first.send("{\"action\":\"ping\"}");
    second.send("bulk payload here");

    for channel in [&mut first, &mut second] {
        let id = channel.opened().await?;
        if let Some(ChannelEvent::Message(payload)) = channel.recv().await {
            eprintln!("[client] {id} -> {payload}");
        }
    }

    first.close(Close::default());
    second.close(Close::default());
    let transport = manager.transport();
    manager.close(None);
    transport.finished().await;

    backend.await??;
    Ok(())
}

/// Answer the handshake and echo every data frame back on its channel.
async fn serve(mut socket: MemorySocket) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut init = Init::request(0);
    init.channel_seed = Some("demo".into());
    socket
        .send(encode_control(&ControlMessage::Init(init))?)
        .await?;

    while let Some(text) = socket.recv().await {
        match decode_frame(&text?)? {
            Frame::Control(ControlMessage::Open(open)) => {
                eprintln!("[server] open {} host={:?}", open.channel, open.host);
            }
            Frame::Control(message) => eprintln!("[server] {}", message.command()),
            Frame::Data { channel, payload } => {
                socket.send(encode_frame(&channel, &payload)).await?;
            }
        }
    }
    Ok(())
}
