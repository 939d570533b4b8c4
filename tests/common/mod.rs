//! In-process sync server used by the integration tests.
//!
//! Each test binds its own listener on `127.0.0.1:0`, so tests never share
//! a port and need no external process.

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use synclink::{
    decode_message, encode_message, ConnectionOptions, ConnectionState, SyncLinkClient,
    SyncLinkTimeouts, WireMessage,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::{tungstenite::Message, WebSocketStream};

/// Upper bound for any single wait in a test.
pub const STEP: Duration = Duration::from_secs(5);

pub struct TestServer {
    listener: TcpListener,
    base_url: String,
}

impl TestServer {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind test listener");
        let addr = listener.local_addr().expect("local addr");
        Self {
            listener,
            base_url: format!("http://{}", addr),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Accept the next client and complete the WebSocket handshake.
    pub async fn accept(&self) -> ServerConn {
        let (tcp, _) = timeout(STEP, self.listener.accept())
            .await
            .expect("client did not connect in time")
            .expect("accept");
        let ws = tokio_tungstenite::accept_async(tcp).await.expect("websocket handshake");
        ServerConn { ws }
    }
}

pub struct ServerConn {
    ws: WebSocketStream<TcpStream>,
}

impl ServerConn {
    /// Next protocol message from the client. Control frames are skipped.
    pub async fn recv(&mut self) -> WireMessage {
        loop {
            let frame = timeout(STEP, self.ws.next())
                .await
                .expect("client sent nothing in time")
                .expect("client closed the connection")
                .expect("read frame");
            match frame {
                Message::Text(text) => {
                    return decode_message(text.as_str()).expect("client sent a malformed message");
                },
                Message::Binary(bytes) => {
                    return synclink::decode_binary(&bytes).expect("client sent a malformed frame");
                },
                _ => continue,
            }
        }
    }

    /// Skip messages until one matches `pred`.
    pub async fn recv_until(&mut self, pred: impl Fn(&WireMessage) -> bool) -> WireMessage {
        loop {
            let msg = self.recv().await;
            if pred(&msg) {
                return msg;
            }
        }
    }

    pub async fn send(&mut self, msg: &WireMessage) {
        let text = encode_message(msg).expect("encode server message");
        self.ws.send(Message::Text(text.into())).await.expect("send to client");
    }

    pub async fn send_raw(&mut self, text: &str) {
        self.ws.send(Message::Text(text.to_string().into())).await.expect("send to client");
    }

    /// Drop the TCP connection without a close handshake.
    pub fn kill(self) {
        drop(self.ws);
    }
}

/// Client with short reconnect delays, pointed at `server`.
pub fn client_for(server: &TestServer) -> SyncLinkClient {
    client_with_options(server, ConnectionOptions::default().with_reconnect_delay_ms(20))
}

pub fn client_with_options(server: &TestServer, options: ConnectionOptions) -> SyncLinkClient {
    SyncLinkClient::builder()
        .base_url(server.base_url())
        .timeouts(SyncLinkTimeouts::fast())
        .connection_options(options)
        .build()
        .expect("build client")
}

/// Base URL of a local port with no listener, so every connect is refused.
pub async fn unreachable_base_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind throwaway listener");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);
    format!("http://{}", addr)
}

/// Poll until the client reports `state`, failing after `STEP`.
pub async fn wait_for_state(client: &SyncLinkClient, state: ConnectionState) {
    let mut waited = Duration::ZERO;
    while client.connection_state() != state {
        assert!(waited < STEP, "client stayed {:?}, expected {:?}", client.connection_state(), state);
        tokio::time::sleep(Duration::from_millis(10)).await;
        waited += Duration::from_millis(10);
    }
}
