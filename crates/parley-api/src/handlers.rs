//! Route handler functions for all API endpoints.

use axum::extract::{Path, State};
use axum::Json;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use parley_chat::phone::ensure_jid;
use parley_chat::{InboundKind, InboundMedia, InboundMessage, InboundOutcome};
use parley_queue::KeyPhase;

use crate::error::ApiError;
use crate::state::AppState;

// =============================================================================
// Health
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    /// Conversation keys with live queue state.
    pub active_queues: usize,
}

/// GET / and GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let scheduler = state.scheduler();
    let status = if scheduler.is_shut_down() {
        "shutting_down"
    } else {
        "ok"
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        active_queues: scheduler.active_keys(),
    })
}

// =============================================================================
// Manual send
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub to: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SendResponse {
    pub success: bool,
    /// Normalized recipient chat id.
    pub to: String,
}

/// POST /send - send a text message to a phone number or chat id.
pub async fn send(
    State(state): State<AppState>,
    Json(body): Json<SendRequest>,
) -> Result<Json<SendResponse>, ApiError> {
    let (Some(to), Some(message)) = (body.to, body.message) else {
        return Err(ApiError::BadRequest(
            "Both 'to' and 'message' are required".to_string(),
        ));
    };
    if message.trim().is_empty() {
        return Err(ApiError::BadRequest("'message' must not be empty".to_string()));
    }
    let to = ensure_jid(&to)
        .ok_or_else(|| ApiError::BadRequest(format!("Invalid recipient: {}", to)))?;

    state.outbound.send(&to, &message).await?;
    tracing::info!(to = %to, "Manual message sent");

    Ok(Json(SendResponse { success: true, to }))
}

// =============================================================================
// Inbound webhook
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct MediaPayload {
    /// Base64 encoded bytes.
    pub data: String,
    pub mime_type: String,
    pub filename: Option<String>,
}

/// Request body for POST /inbound.
#[derive(Debug, Deserialize)]
pub struct InboundRequest {
    pub from: String,
    #[serde(rename = "type", default = "default_kind")]
    pub kind: InboundKind,
    pub body: Option<String>,
    pub caption: Option<String>,
    pub push_name: Option<String>,
    #[serde(default)]
    pub is_status: bool,
    pub media: Option<MediaPayload>,
}

fn default_kind() -> InboundKind {
    InboundKind::Chat
}

impl InboundRequest {
    fn into_message(self) -> Result<InboundMessage, ApiError> {
        let media = match self.media {
            Some(media) => {
                let data = base64::engine::general_purpose::STANDARD
                    .decode(media.data.trim())
                    .map_err(|e| ApiError::BadRequest(format!("Invalid base64 media: {}", e)))?;
                Some(InboundMedia {
                    data,
                    mime_type: media.mime_type,
                    filename: media.filename,
                })
            }
            None => None,
        };

        Ok(InboundMessage {
            from: self.from,
            kind: self.kind,
            body: self.body,
            caption: self.caption,
            push_name: self.push_name,
            is_status: self.is_status,
            media,
        })
    }
}

/// POST /inbound - run a chat message through the inbound pipeline.
pub async fn inbound(
    State(state): State<AppState>,
    Json(body): Json<InboundRequest>,
) -> Result<Json<InboundOutcome>, ApiError> {
    let message = body.into_message()?;
    let outcome = state.pipeline.handle(message).await?;
    Ok(Json(outcome))
}

// =============================================================================
// Queue diagnostics
// =============================================================================

#[derive(Debug, Serialize)]
pub struct QueueStatusResponse {
    pub key: String,
    pub phase: KeyPhase,
    pub processing: bool,
}

/// GET /queues/{key}
pub async fn queue_status(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Json<QueueStatusResponse> {
    let phase = state.scheduler().status(&key);
    Json(QueueStatusResponse {
        key,
        phase,
        processing: phase.is_processing(),
    })
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FlushResponse {
    pub key: String,
    pub flushed: bool,
}

/// POST /queues/{key}/flush - expire the key's window now.
pub async fn flush_queue(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<FlushResponse>, ApiError> {
    if !state.scheduler().flush_now(&key) {
        return Err(ApiError::NotFound(format!("No queue for {}", key)));
    }
    tracing::info!(key = %key, "Queue flushed on request");
    Ok(Json(FlushResponse { key, flushed: true }))
}
