//! Axum websocket as a relay [`Connection`].

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};

use pgws_core::{RelayError, RelayResult};
use pgws_infra::{Connection, Inbound, InboundHalf, OutboundHalf};

pub struct WsConnection {
    socket: WebSocket,
}

impl WsConnection {
    pub fn new(socket: WebSocket) -> Self {
        Self { socket }
    }
}

impl Connection for WsConnection {
    type Outbound = WsOutbound;
    type Inbound = WsInbound;

    fn split(self) -> (WsOutbound, WsInbound) {
        let (sink, stream) = self.socket.split();
        (WsOutbound { sink }, WsInbound { stream })
    }
}

/// Reuses the buffer when `message` is the only handle to it.
fn text_frame(message: Bytes) -> RelayResult<String> {
    String::from_utf8(Vec::from(message)).map_err(|e| RelayError::transport(e.to_string()))
}

pub struct WsOutbound {
    sink: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl OutboundHalf for WsOutbound {
    /// Messages are JSON, so they go out as text frames.
    async fn write(&mut self, message: Bytes) -> RelayResult<()> {
        let text = text_frame(message)?;
        self.sink
            .send(Message::Text(text))
            .await
            .map_err(|e| RelayError::transport(e.to_string()))
    }

    async fn close(&mut self) {
        // The peer may already be gone; nothing useful to do with errors here.
        let _ = self.sink.send(Message::Close(None)).await;
        let _ = self.sink.close().await;
    }
}

pub struct WsInbound {
    stream: SplitStream<WebSocket>,
}

#[async_trait]
impl InboundHalf for WsInbound {
    async fn next_inbound(&mut self) -> Inbound {
        match self.stream.next().await {
            None | Some(Ok(Message::Close(_))) => Inbound::Closed,
            Some(Ok(_)) => Inbound::Frame,
            Some(Err(err)) => Inbound::Failed(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_buffer_becomes_text_without_copying() {
        let message = Bytes::from(br#"{"x":1}"#.to_vec());
        let data = message.as_ptr();

        let text = text_frame(message).unwrap();

        assert_eq!(text, r#"{"x":1}"#);
        assert_eq!(text.as_ptr(), data);
    }

    #[test]
    fn non_utf8_payload_is_a_transport_error() {
        let err = text_frame(Bytes::from_static(&[0xff, 0xfe])).unwrap_err();
        assert!(matches!(err, RelayError::Transport(_)));
    }
}
