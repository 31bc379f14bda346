//! HTTP handlers for the voice API.

pub mod form;
pub mod key;
pub mod voice;

pub use key::*;
pub use voice::*;

use crate::health;
use actix_web::web;

/// Register every route of the service.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health::health_check)).service(
        web::scope("/api")
            .route("/process-voice", web::post().to(process_voice))
            .route("/decrypt-voice", web::post().to(decrypt_voice))
            .route("/get-key", web::get().to(get_key))
            .route("/metrics", web::get().to(health::detailed_metrics)),
    );
}
