use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;
use tracing::warn;

/// Hand out the process key as text.
///
/// Anyone who can reach this endpoint can decrypt every envelope the process
/// produces. Disabled with `security.expose_key = false`, in which case the
/// route answers 404.
pub async fn get_key(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    if !state.config.security.expose_key {
        return Err(AppError::NotFound("Key endpoint is disabled".to_string()));
    }

    warn!("Process key requested over HTTP");
    Ok(HttpResponse::Ok().json(json!({ "key": state.envelope.key_text() })))
}
