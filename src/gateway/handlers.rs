use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{GatewayError, Result};
use crate::auth::InternalUser;

/// Handler for inbound client frames
///
/// Returns an optional reply for the sending connection. Errors are logged
/// by the connection loop and never close the socket.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, user: &InternalUser, text: &str) -> Result<Option<String>>;
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
}

/// Answers `{"type":"ping"}` with `{"type":"pong"}` and ignores other messages
#[derive(Debug, Clone, Default)]
pub struct PingHandler;

#[async_trait]
impl MessageHandler for PingHandler {
    async fn handle(&self, _user: &InternalUser, text: &str) -> Result<Option<String>> {
        let envelope: Envelope =
            serde_json::from_str(text).map_err(|e| GatewayError::MalformedMessage(e.to_string()))?;

        match envelope.kind.as_str() {
            "ping" => Ok(Some(json!({"type": "pong"}).to_string())),
            _ => Ok(None),
        }
    }
}
