//! WebSocket Transport
//!
//! `tokio-tungstenite` client for the sensor stream. Protocol-level ping and
//! pong frames are answered by tungstenite itself and never reach the
//! supervisor; only text frames, closes and errors are surfaced.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Utf8Bytes;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

use crate::application::ports::{
    ChannelEvent, CloseReason, StreamChannel, StreamTransport, TransportError,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Upper bound on sending a close frame to an unresponsive peer.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Opens WebSocket channels to a fixed URL.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    url: Url,
    connect_timeout: Duration,
}

impl WebSocketTransport {
    /// Create a transport for `url`.
    #[must_use]
    pub const fn new(url: Url, connect_timeout: Duration) -> Self {
        Self {
            url,
            connect_timeout,
        }
    }

    /// Stream endpoint.
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl StreamTransport for WebSocketTransport {
    async fn connect(&self) -> Result<Box<dyn StreamChannel>, TransportError> {
        tracing::debug!(url = %self.url, "Opening WebSocket");

        let (stream, _response) =
            tokio::time::timeout(self.connect_timeout, connect_async(self.url.as_str()))
                .await
                .map_err(|_| {
                    TransportError::Connect(format!(
                        "timed out after {}s",
                        self.connect_timeout.as_secs()
                    ))
                })?
                .map_err(|e| TransportError::Connect(e.to_string()))?;

        Ok(Box::new(WebSocketChannel::new(stream)))
    }
}

/// One open WebSocket connection.
pub struct WebSocketChannel {
    sink: SplitSink<WsStream, Message>,
    stream: SplitStream<WsStream>,
    closed: bool,
}

impl WebSocketChannel {
    fn new(ws: WsStream) -> Self {
        let (sink, stream) = ws.split();
        Self {
            sink,
            stream,
            closed: false,
        }
    }
}

fn close_frame(reason: CloseReason) -> CloseFrame {
    let code = match reason {
        CloseReason::PeerClosed | CloseReason::Shutdown => CloseCode::Normal,
        CloseReason::TransportError => CloseCode::Error,
        CloseReason::WatchdogTimeout | CloseReason::HealthCheckStale => {
            CloseCode::from(reason.code())
        }
    };
    CloseFrame {
        code,
        reason: Utf8Bytes::from_static(reason.as_str()),
    }
}

#[async_trait]
impl StreamChannel for WebSocketChannel {
    async fn send_text(&mut self, text: &str) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.sink
            .send(Message::Text(text.to_owned().into()))
            .await
            .map_err(|e| TransportError::Channel(e.to_string()))
    }

    async fn recv(&mut self) -> ChannelEvent {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return ChannelEvent::Text(text.to_string()),
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => return ChannelEvent::Text(text),
                    Err(_) => tracing::debug!(len = data.len(), "Ignoring non-UTF-8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!(?frame, "Peer sent close frame");
                    self.closed = true;
                    return ChannelEvent::Closed;
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Err(e)) => {
                    self.closed = true;
                    return ChannelEvent::Error(TransportError::Channel(e.to_string()));
                }
                None => {
                    self.closed = true;
                    return ChannelEvent::Closed;
                }
            }
        }
    }

    async fn close(&mut self, reason: CloseReason) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let frame = close_frame(reason);
        tokio::time::timeout(CLOSE_TIMEOUT, self.sink.send(Message::Close(Some(frame))))
            .await
            .map_err(|_| TransportError::Channel("close timed out".to_string()))?
            .map_err(|e| TransportError::Channel(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    use super::*;

    async fn server() -> (TcpListener, Url) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let url = Url::parse(&format!("ws://{addr}/ruuvitag/ws")).unwrap();
        (listener, url)
    }

    #[test]
    fn forced_closes_use_application_codes() {
        assert_eq!(
            close_frame(CloseReason::WatchdogTimeout).code,
            CloseCode::Library(4000)
        );
        assert_eq!(
            close_frame(CloseReason::HealthCheckStale).code,
            CloseCode::Library(4001)
        );
        assert_eq!(close_frame(CloseReason::Shutdown).code, CloseCode::Normal);
        assert_eq!(close_frame(CloseReason::TransportError).code, CloseCode::Error);
    }

    #[tokio::test]
    async fn text_frames_and_close_are_surfaced() {
        let (listener, url) = server().await;
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();
            ws.send(Message::Ping(vec![1].into())).await.unwrap();
            ws.send(Message::Text("pong".into())).await.unwrap();
            ws.close(None).await.unwrap();
        });

        let transport = WebSocketTransport::new(url, Duration::from_secs(5));
        let mut channel = transport.connect().await.unwrap();

        match channel.recv().await {
            ChannelEvent::Text(text) => assert_eq!(text, "pong"),
            other => panic!("expected text, got {other:?}"),
        }
        assert!(matches!(channel.recv().await, ChannelEvent::Closed));
        assert!(matches!(
            channel.send_text("ping").await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn close_sends_reason_to_peer() {
        let (listener, url) = server().await;
        let peer = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();
            let first = ws.next().await.unwrap().unwrap();
            let second = ws.next().await.unwrap().unwrap();
            (first, second)
        });

        let transport = WebSocketTransport::new(url, Duration::from_secs(5));
        let mut channel = transport.connect().await.unwrap();
        channel.send_text("ping").await.unwrap();
        channel.close(CloseReason::WatchdogTimeout).await.unwrap();

        let (first, second) = peer.await.unwrap();
        assert_eq!(first, Message::Text("ping".into()));
        match second {
            Message::Close(Some(frame)) => {
                assert_eq!(frame.code, CloseCode::Library(4000));
                assert_eq!(frame.reason.as_str(), "watchdog_timeout");
            }
            other => panic!("expected close frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn refused_connection_is_a_connect_error() {
        let (listener, url) = server().await;
        drop(listener);

        let transport = WebSocketTransport::new(url, Duration::from_secs(5));
        let result = transport.connect().await;
        assert!(matches!(result, Err(TransportError::Connect(_))));
    }
}
