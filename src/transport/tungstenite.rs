use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    Connector, MaybeTlsStream, WebSocketStream,
    connect_async_tls_with_config as tungstenite_connect_tls,
    tungstenite::{
        Message as TungsteniteMessage,
        protocol::{CloseFrame as TungCloseFrame, WebSocketConfig},
    },
};

use super::{PushConnectFuture, PushTransport};
use crate::core::{PushCloseFrame, PushFrame, RefreshError};

fn map_ws_error(context: &'static str, err: impl ToString) -> RefreshError {
    RefreshError::TransportError {
        context,
        error: err.to_string(),
    }
}

fn close_to_core(frame: Option<TungCloseFrame>) -> Option<PushCloseFrame> {
    frame.map(|f| PushCloseFrame {
        code: u16::from(f.code),
        reason: AsRef::<Bytes>::as_ref(&f.reason).clone(),
    })
}

fn msg_to_frame(msg: TungsteniteMessage) -> PushFrame {
    match msg {
        TungsteniteMessage::Text(text) => PushFrame::Text(AsRef::<Bytes>::as_ref(&text).clone()),
        TungsteniteMessage::Binary(bytes) => PushFrame::Binary(bytes),
        TungsteniteMessage::Ping(bytes) => PushFrame::Ping(bytes),
        TungsteniteMessage::Pong(bytes) => PushFrame::Pong(bytes),
        TungsteniteMessage::Close(frame) => PushFrame::Close(close_to_core(frame)),
        TungsteniteMessage::Frame(_) => PushFrame::Binary(Bytes::new()),
    }
}

/// rustls 0.23 needs a process-level CryptoProvider before the first TLS handshake.
///
/// When more than one provider is compiled in rustls cannot pick a default and panics, so ring is
/// installed explicitly. An `Err` means another component already installed one.
fn install_rustls_crypto_provider() {
    static INSTALLED: OnceLock<()> = OnceLock::new();
    INSTALLED.get_or_init(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Frame size limits applied to the push socket.
#[derive(Clone, Copy, Debug)]
pub struct PushConnectConfig {
    pub max_message_size: Option<usize>,
    pub max_frame_size: Option<usize>,
}

impl Default for PushConnectConfig {
    fn default() -> Self {
        // Push messages are tiny refresh hints; anything near these limits is a misbehaving server.
        Self {
            max_message_size: Some(1024 * 1024),
            max_frame_size: Some(256 * 1024),
        }
    }
}

impl From<PushConnectConfig> for WebSocketConfig {
    fn from(cfg: PushConnectConfig) -> Self {
        WebSocketConfig::default()
            .max_message_size(cfg.max_message_size)
            .max_frame_size(cfg.max_frame_size)
    }
}

/// Websocket push transport backed by tokio-tungstenite (`ws://` and `wss://`).
#[derive(Clone, Default)]
pub struct TungsteniteTransport {
    config: PushConnectConfig,
    connector: Option<Connector>,
}

impl TungsteniteTransport {
    pub fn with_config(config: PushConnectConfig) -> Self {
        Self {
            config,
            connector: None,
        }
    }

    pub fn rustls(config: Arc<rustls::ClientConfig>) -> Self {
        Self {
            config: PushConnectConfig::default(),
            connector: Some(Connector::Rustls(config)),
        }
    }
}

/// Read half of a tungstenite push socket.
///
/// The whole stream is kept (not split) so tungstenite can flush queued pong replies while
/// reading.
pub struct TungsteniteReader {
    inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl Stream for TungsteniteReader {
    type Item = Result<PushFrame, RefreshError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.inner.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(msg))) => Poll::Ready(Some(Ok(msg_to_frame(msg)))),
            Poll::Ready(Some(Err(err))) => Poll::Ready(Some(Err(map_ws_error("read", err)))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl PushTransport for TungsteniteTransport {
    type Reader = TungsteniteReader;

    fn connect(&self, url: String) -> PushConnectFuture<Self::Reader> {
        let config = self.config;
        let connector = self.connector.clone();
        Box::pin(async move {
            install_rustls_crypto_provider();
            let (stream, _) =
                tungstenite_connect_tls(url.as_str(), Some(config.into()), false, connector)
                    .await
                    .map_err(|err| RefreshError::ConnectionFailed(err.to_string()))?;
            Ok(TungsteniteReader { inner: stream })
        })
    }
}
