use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::debug;
use truemid_core::error::AdapterError;
use url::Url;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Read deadline for market data sockets. A feed that stays silent this
/// long is treated as timed out so the producer can retry.
const DEFAULT_READ_DEADLINE: Duration = Duration::from_secs(60);

/// Thin WebSocket wrapper for exchange market-data feeds.
///
/// One client per feed; the owning producer drops it on every exit path,
/// which closes the session.
pub struct WsClient {
    url: String,
    writer: SplitSink<WsStream, Message>,
    reader: SplitStream<WsStream>,
    read_deadline: Duration,
}

impl WsClient {
    pub async fn connect(url: &str) -> Result<Self, AdapterError> {
        let parsed = Url::parse(url)
            .map_err(|e| AdapterError::NotSupported(format!("bad feed url {url}: {e}")))?;
        debug!(%url, "Connecting websocket");
        let (stream, response) = connect_async(parsed)
            .await
            .map_err(|e| AdapterError::Transient(format!("connect {url}: {e}")))?;
        debug!(%url, status = %response.status(), "Websocket connected");
        let (writer, reader) = stream.split();
        Ok(Self {
            url: url.to_string(),
            writer,
            reader,
            read_deadline: DEFAULT_READ_DEADLINE,
        })
    }

    pub fn with_read_deadline(mut self, deadline: Duration) -> Self {
        self.read_deadline = deadline;
        self
    }

    pub async fn send_text(&mut self, text: impl Into<String>) -> Result<(), AdapterError> {
        self.writer
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| AdapterError::Transient(format!("send on {}: {e}", self.url)))
    }

    /// Next text frame, transparently answering pings. `Timeout` when the
    /// feed stalls past the read deadline, `Transient` when it errors or
    /// ends.
    pub async fn next_text(&mut self) -> Result<String, AdapterError> {
        loop {
            let frame = tokio::time::timeout(self.read_deadline, self.reader.next())
                .await
                .map_err(|_| {
                    AdapterError::Timeout(format!(
                        "no data from {} in {:?}",
                        self.url, self.read_deadline
                    ))
                })?;
            match frame {
                Some(Ok(Message::Text(text))) => return Ok(text),
                Some(Ok(Message::Ping(payload))) => {
                    self.writer
                        .send(Message::Pong(payload))
                        .await
                        .map_err(|e| AdapterError::Transient(format!("pong on {}: {e}", self.url)))?;
                }
                Some(Ok(Message::Close(_))) | None => {
                    return Err(AdapterError::Transient(format!("{} closed", self.url)));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    return Err(AdapterError::Transient(format!("read on {}: {e}", self.url)));
                }
            }
        }
    }
}
