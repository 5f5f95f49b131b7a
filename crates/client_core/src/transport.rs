//! Control-channel transport.
//!
//! A connector turns a URL into a stream of [`ChannelSignal`]s. Every channel
//! ends with exactly one `Closed` signal, and an `Error` signal is always
//! followed by `Closed`.

use std::time::Duration;

use futures::StreamExt;
use shared::error::ErrorCategory;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

use crate::{error::ChannelError, types::CONNECT_TIMEOUT};

/// Close code for a channel that ended without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;
/// Close code used when the peer sent a close frame with no status.
pub const NO_STATUS_RECEIVED: u16 = 1005;
const SIGNAL_BUFFER: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelSignal {
    Connected,
    Message(String),
    Error(ChannelError),
    Closed {
        was_clean: bool,
        code: u16,
        reason: String,
    },
}

impl ChannelSignal {
    pub fn abnormal_closure(reason: impl Into<String>) -> Self {
        Self::Closed {
            was_clean: false,
            code: ABNORMAL_CLOSURE,
            reason: reason.into(),
        }
    }
}

pub trait ControlChannelConnector: Send + Sync {
    /// Starts connecting to `url`. Dropping the receiver tears the channel down.
    fn open(&self, url: &Url) -> mpsc::Receiver<ChannelSignal>;
}

pub struct WebSocketConnector {
    connect_timeout: Duration,
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new(CONNECT_TIMEOUT)
    }
}

impl WebSocketConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl ControlChannelConnector for WebSocketConnector {
    fn open(&self, url: &Url) -> mpsc::Receiver<ChannelSignal> {
        let (tx, rx) = mpsc::channel(SIGNAL_BUFFER);
        tokio::spawn(run_websocket(url.to_string(), self.connect_timeout, tx));
        rx
    }
}

fn classify(err: &tungstenite::Error) -> ChannelError {
    match err {
        tungstenite::Error::Io(io) => ChannelError::from_io(io),
        other => ChannelError::new(ErrorCategory::Unknown, other.to_string()),
    }
}

async fn fail(tx: &mpsc::Sender<ChannelSignal>, err: ChannelError) {
    let reason = err.message.clone();
    if tx.send(ChannelSignal::Error(err)).await.is_ok() {
        let _ = tx.send(ChannelSignal::abnormal_closure(reason)).await;
    }
}

async fn run_websocket(url: String, connect_timeout: Duration, tx: mpsc::Sender<ChannelSignal>) {
    let mut stream = match tokio::time::timeout(connect_timeout, connect_async(url.as_str())).await
    {
        Ok(Ok((stream, _))) => stream,
        Ok(Err(err)) => {
            warn!(%url, error = %err, "ws: connect failed");
            fail(&tx, classify(&err)).await;
            return;
        }
        Err(_) => {
            warn!(%url, "ws: connect timed out");
            let err = ChannelError::new(
                ErrorCategory::Timeout,
                format!("no handshake from {url} within {connect_timeout:?}"),
            );
            fail(&tx, err).await;
            return;
        }
    };

    info!(%url, "ws: connected");
    if tx.send(ChannelSignal::Connected).await.is_err() {
        let _ = stream.close(None).await;
        return;
    }

    loop {
        let next = tokio::select! {
            _ = tx.closed() => {
                debug!(%url, "ws: receiver dropped, closing");
                let _ = stream.close(None).await;
                return;
            }
            next = stream.next() => next,
        };

        let signal = match next {
            Some(Ok(Message::Text(text))) => ChannelSignal::Message(text.to_string()),
            Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => ChannelSignal::Message(text),
                Err(_) => {
                    debug!(%url, "ws: dropping non-utf8 binary frame");
                    continue;
                }
            },
            Some(Ok(Message::Close(frame))) => {
                let (code, reason) = frame
                    .map(|frame| (u16::from(frame.code), frame.reason.to_string()))
                    .unwrap_or((NO_STATUS_RECEIVED, String::new()));
                let _ = tx
                    .send(ChannelSignal::Closed {
                        was_clean: true,
                        code,
                        reason,
                    })
                    .await;
                return;
            }
            Some(Ok(_)) => continue,
            Some(Err(err)) => {
                warn!(%url, error = %err, "ws: receive failed");
                fail(&tx, classify(&err)).await;
                return;
            }
            None => {
                let _ = tx
                    .send(ChannelSignal::abnormal_closure("stream ended"))
                    .await;
                return;
            }
        };

        if tx.send(signal).await.is_err() {
            let _ = stream.close(None).await;
            return;
        }
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
