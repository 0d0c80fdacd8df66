//! Bearer token authentication.
//!
//! Token generation and persistence, plus the middleware guarding the
//! protected routes.

use std::path::Path;

use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rand::Rng;

use crate::error::ErrorBody;
use crate::state::AppState;

/// Generate a random 32-character hex token.
pub fn generate_token() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    hex::encode(bytes)
}

/// Pick the API token: the configured one, else the one saved at
/// `token_path`, else a freshly generated token that is saved there.
pub fn resolve_token(configured: &str, token_path: &Path) -> String {
    let configured = configured.trim();
    if !configured.is_empty() {
        return configured.to_string();
    }

    if let Ok(contents) = std::fs::read_to_string(token_path) {
        let token = contents.trim();
        if !token.is_empty() {
            tracing::info!(path = %token_path.display(), "API token loaded");
            return token.to_string();
        }
    }

    let token = generate_token();
    if let Err(e) = save_token(token_path, &token) {
        tracing::warn!(error = %e, path = %token_path.display(), "Failed to save API token");
    } else {
        tracing::info!(path = %token_path.display(), "API token generated");
    }
    token
}

fn save_token(path: &Path, token: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, token)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorBody {
            error: "unauthorized".to_string(),
            message: message.to_string(),
        }),
    )
        .into_response()
}

/// Middleware validating `Authorization: Bearer <token>`.
///
/// An empty configured token rejects every request.
pub async fn require_auth(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(value) = req.headers().get(header::AUTHORIZATION) else {
        return unauthorized("Missing Authorization header");
    };
    let Ok(value) = value.to_str() else {
        return unauthorized("Invalid Authorization header encoding");
    };

    match value.strip_prefix("Bearer ") {
        Some(token) if !state.api_token.is_empty() && token == state.api_token => {
            next.run(req).await
        }
        _ => unauthorized("Invalid bearer token"),
    }
}
