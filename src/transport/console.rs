//! JSON-lines console: one operator event per stdin line, one reply per
//! stdout line.

use super::reply::{Reply, ReplySink};
use crate::errors::OpError;
use crate::managers::dispatcher::Dispatcher;
use crate::services::logger::Logger;
use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::Mutex;

#[derive(Debug, Deserialize)]
pub struct InboundUpload {
    pub name: String,
    pub data_base64: String,
}

#[derive(Debug, Deserialize)]
pub struct InboundEvent {
    pub operator: String,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub upload: Option<InboundUpload>,
}

#[derive(Serialize)]
struct Outbound<'a> {
    operator: &'a str,
    reply: &'a Reply,
}

/// Writes replies as JSON lines to any async writer.
pub struct LineSink<W> {
    writer: Mutex<BufWriter<W>>,
}

impl<W: AsyncWrite + Unpin + Send> LineSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(BufWriter::new(writer)),
        }
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> ReplySink for LineSink<W> {
    async fn send(&self, operator: &str, reply: Reply) -> std::io::Result<()> {
        let payload = serde_json::to_string(&Outbound {
            operator,
            reply: &reply,
        })
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err))?;
        let mut writer = self.writer.lock().await;
        writer.write_all(payload.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await
    }
}

/// Routes one parsed event; `None` when the event needs no reply.
pub async fn handle_event(dispatcher: &Dispatcher, event: InboundEvent) -> Result<Option<Reply>, OpError> {
    if let Some(action) = event.action {
        return Ok(Some(dispatcher.on_action(&event.operator, &action).await));
    }
    if let Some(upload) = event.upload {
        let data = base64::engine::general_purpose::STANDARD
            .decode(upload.data_base64.trim())
            .map_err(|err| OpError::validation(format!("Upload is not valid base64: {}", err)))?;
        return Ok(dispatcher
            .on_upload(&event.operator, &upload.name, Bytes::from(data))
            .await);
    }
    if let Some(text) = event.text {
        return Ok(dispatcher.on_text(&event.operator, &text).await);
    }
    Err(OpError::validation("Event has no action, text or upload"))
}

pub async fn run_stdio(logger: Logger, dispatcher: &Dispatcher) -> Result<(), OpError> {
    let logger = logger.child("console");
    let sink = LineSink::new(tokio::io::stdout());
    let mut reader = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = reader.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let event: InboundEvent = match serde_json::from_str(trimmed) {
            Ok(event) => event,
            Err(err) => {
                logger.warn(
                    "Malformed event line",
                    Some(&serde_json::json!({"error": err.to_string()})),
                );
                continue;
            }
        };
        let operator = event.operator.clone();
        let reply = match handle_event(dispatcher, event).await {
            Ok(reply) => reply,
            Err(err) => Some(Reply::text(err.operator_text())),
        };
        if let Some(reply) = reply {
            sink.send(&operator, reply).await?;
        }
    }
    logger.info("Console input closed", None);
    Ok(())
}
