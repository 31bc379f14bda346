//! # Voice Endpoints
//!
//! - `POST /api/process-voice`: decode, mask, and (optionally) encrypt an upload
//! - `POST /api/decrypt-voice`: reverse the encryption of a previous result
//!
//! Both read `multipart/form-data`. The heavy lifting runs on actix's blocking
//! pool so decode and DSP work never stalls the async workers.

use crate::audio::RawUpload;
use crate::error::AppError;
use crate::handlers::form::{read_form, FormData};
use crate::masking::ProcessingOptions;
use crate::processing::PipelineError;
use crate::state::AppState;
use actix_multipart::Multipart;
use actix_web::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use actix_web::{web, HttpResponse};
use tracing::{info, warn};

const AUDIO_FIELD: &str = "audio_file";
const ENCRYPTED_FIELD: &str = "encrypted_file";

/// Form values are booleans only when they read exactly `"true"`.
fn flag(form: &FormData, name: &str, default: bool) -> bool {
    form.field(name).map(|value| value == "true").unwrap_or(default)
}

/// Build [`ProcessingOptions`] from the form, applying the defaults.
pub fn parse_options(form: &FormData) -> Result<ProcessingOptions, AppError> {
    let defaults = ProcessingOptions::default();

    let pitch_steps = match form.field("pitch_steps") {
        Some(raw) => raw
            .trim()
            .parse::<i32>()
            .map_err(|_| AppError::ValidationError(format!("pitch_steps must be an integer, got '{}'", raw)))?,
        None => defaults.pitch_steps,
    };

    Ok(ProcessingOptions {
        pitch_shift_enabled: flag(form, "pitch_shift", defaults.pitch_shift_enabled),
        pitch_steps,
        ai_masking_enabled: flag(form, "use_ai_masking", defaults.ai_masking_enabled),
        encrypt: flag(form, "encrypt", defaults.encrypt),
    })
}

fn attachment(filename: &str) -> (actix_web::http::header::HeaderName, String) {
    (CONTENT_DISPOSITION, format!("attachment; filename=\"{}\"", filename))
}

/// Process an uploaded recording.
///
/// ## Request:
/// Multipart form with `audio_file` (required) and optional `pitch_shift`,
/// `pitch_steps`, `use_ai_masking`, `encrypt`.
///
/// ## Response:
/// - Encrypted: `masked_voice.enc` as `application/octet-stream`
/// - Plain: `masked_voice.wav` as `audio/wav`
pub async fn process_voice(state: web::Data<AppState>, payload: Multipart) -> Result<HttpResponse, AppError> {
    let mut form = read_form(payload, AUDIO_FIELD, state.config.audio.max_upload_bytes).await?;
    let file = form
        .file
        .take()
        .ok_or_else(|| AppError::MissingInput("No audio file provided".to_string()))?;
    let options = parse_options(&form)?;

    let upload = RawUpload::from_filename(file.bytes, file.filename.as_deref(), &state.config.default_format());
    info!(
        filename = file.filename.as_deref().unwrap_or("<none>"),
        format = %upload.format,
        bytes = upload.bytes.len(),
        ?options,
        "Processing voice upload"
    );

    let pipeline = state.pipeline.clone();
    let result = web::block(move || pipeline.process(&upload, &options)).await?;

    let voice = match result {
        Ok(voice) => voice,
        Err(err) => {
            if let PipelineError::Decode(decode) = &err {
                state.record_decode_failure();
                warn!(
                    format = %decode.format(),
                    attempts = decode.attempted().len(),
                    "Every decode strategy failed"
                );
            }
            warn!("Voice processing failed: {}", err);
            return Err(err.into());
        }
    };

    state.record_voice_processed(voice.strategy, voice.encrypted);

    let (filename, mime) = if voice.encrypted {
        ("masked_voice.enc", "application/octet-stream")
    } else {
        ("masked_voice.wav", "audio/wav")
    };

    Ok(HttpResponse::Ok()
        .insert_header((CONTENT_TYPE, mime))
        .insert_header(attachment(filename))
        .body(voice.bytes))
}

/// Decrypt a token produced by [`process_voice`] back into WAV bytes.
pub async fn decrypt_voice(state: web::Data<AppState>, payload: Multipart) -> Result<HttpResponse, AppError> {
    let form = read_form(payload, ENCRYPTED_FIELD, state.config.audio.max_upload_bytes).await?;
    let file = form
        .file
        .ok_or_else(|| AppError::MissingInput("No encrypted file provided".to_string()))?;

    let wav = state.envelope.decrypt(&file.bytes).map_err(|err| {
        state.record_decrypt_failure();
        warn!("Decryption failed: {}", err);
        AppError::from(err)
    })?;

    Ok(HttpResponse::Ok()
        .insert_header((CONTENT_TYPE, "audio/wav"))
        .insert_header(attachment("decrypted_voice.wav"))
        .body(wav))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::decoder::test_support::{sine_i16, wav_bytes};
    use crate::config::AppConfig;
    use crate::handlers::configure;
    use crate::handlers::form::test_support::{body, content_type, Part};
    use crate::state::test_support::test_state;
    use actix_web::{test as actix_test, App};
    use std::io::Cursor;

    fn form_with(fields: &[(&str, &str)]) -> FormData {
        FormData {
            file: None,
            fields: fields.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        }
    }

    fn post(uri: &str, parts: &[Part<'_>]) -> actix_test::TestRequest {
        actix_test::TestRequest::post()
            .uri(uri)
            .insert_header((CONTENT_TYPE, content_type()))
            .set_payload(body(parts))
    }

    #[test]
    fn test_options_defaults() {
        assert_eq!(parse_options(&form_with(&[])).unwrap(), ProcessingOptions::default());
    }

    #[test]
    fn test_options_only_exact_true_enables() {
        let form = form_with(&[
            ("pitch_shift", "false"),
            ("use_ai_masking", "TRUE"),
            ("encrypt", "true"),
            ("pitch_steps", "-3"),
        ]);
        let options = parse_options(&form).unwrap();

        assert!(!options.pitch_shift_enabled);
        assert!(!options.ai_masking_enabled);
        assert!(options.encrypt);
        assert_eq!(options.pitch_steps, -3);
    }

    #[test]
    fn test_non_integer_pitch_steps_rejected() {
        let err = parse_options(&form_with(&[("pitch_steps", "four")])).unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));
    }

    #[actix_web::test]
    async fn test_missing_audio_file_is_400() {
        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(test_state(AppConfig::default())))
                .configure(configure),
        )
        .await;

        let req = post("/api/process-voice", &[Part::text("encrypt", "false")]).to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);

        let json: serde_json::Value = actix_test::read_body_json(resp).await;
        assert_eq!(json["error"], "No audio file provided");
    }

    #[actix_web::test]
    async fn test_plain_wav_response() {
        let state = web::Data::new(test_state(AppConfig::default()));
        let app = actix_test::init_service(App::new().app_data(state.clone()).configure(configure)).await;
        let wav = wav_bytes(&sine_i16(8000, 16000), 16000, 1);

        let req = post(
            "/api/process-voice",
            &[Part::file("audio_file", "voice.wav", &wav), Part::text("encrypt", "false")],
        )
        .to_request();
        let resp = actix_test::call_service(&app, req).await;

        assert_eq!(resp.status(), 200);
        assert_eq!(resp.headers().get(CONTENT_TYPE).unwrap(), "audio/wav");
        assert_eq!(
            resp.headers().get(CONTENT_DISPOSITION).unwrap(),
            "attachment; filename=\"masked_voice.wav\""
        );

        let bytes = actix_test::read_body(resp).await;
        let reader = hound::WavReader::new(Cursor::new(bytes.to_vec())).unwrap();
        assert_eq!(reader.spec().sample_rate, 16000);
        assert_eq!(reader.len(), 8000);

        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.voices_processed, 1);
        assert_eq!(metrics.decode_strategies["decoder"], 1);
    }

    #[actix_web::test]
    async fn test_encrypted_response_round_trips_through_decrypt() {
        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(test_state(AppConfig::default())))
                .configure(configure),
        )
        .await;
        let wav = wav_bytes(&sine_i16(4000, 8000), 8000, 1);

        let req = post("/api/process-voice", &[Part::file("audio_file", "voice.wav", &wav)]).to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.headers().get(CONTENT_TYPE).unwrap(), "application/octet-stream");
        assert_eq!(
            resp.headers().get(CONTENT_DISPOSITION).unwrap(),
            "attachment; filename=\"masked_voice.enc\""
        );
        let token = actix_test::read_body(resp).await;

        let req = post(
            "/api/decrypt-voice",
            &[Part::file("encrypted_file", "masked_voice.enc", &token)],
        )
        .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
        assert_eq!(
            resp.headers().get(CONTENT_DISPOSITION).unwrap(),
            "attachment; filename=\"decrypted_voice.wav\""
        );

        let bytes = actix_test::read_body(resp).await;
        let reader = hound::WavReader::new(Cursor::new(bytes.to_vec())).unwrap();
        assert_eq!(reader.spec().sample_rate, 8000);
        assert_eq!(reader.len(), 4000);
    }

    #[actix_web::test]
    async fn test_undecodable_webm_reports_both_strategies() {
        let state = web::Data::new(test_state(AppConfig::default()));
        let app = actix_test::init_service(App::new().app_data(state.clone()).configure(configure)).await;

        let req = post(
            "/api/process-voice",
            &[Part::file("audio_file", "clip.webm", b"definitely not a webm container")],
        )
        .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), 500);

        let json: serde_json::Value = actix_test::read_body_json(resp).await;
        assert_eq!(json["type"], "decode_error");
        let traceback = json["traceback"].as_array().unwrap();
        assert_eq!(traceback.len(), 2);
        assert!(traceback[0].as_str().unwrap().starts_with("transcoder: transcoder not found"));
        assert!(traceback[1].as_str().unwrap().starts_with("streaming: "));
        assert_eq!(state.get_metrics_snapshot().decode_failures, 1);
    }

    #[actix_web::test]
    async fn test_oversized_upload_rejected() {
        let mut config = AppConfig::default();
        config.audio.max_upload_bytes = 16;
        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(test_state(config)))
                .configure(configure),
        )
        .await;

        let req = post("/api/process-voice", &[Part::file("audio_file", "a.wav", &[0u8; 64])]).to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);
    }

    #[actix_web::test]
    async fn test_bad_token_is_authentication_error() {
        let state = web::Data::new(test_state(AppConfig::default()));
        let app = actix_test::init_service(App::new().app_data(state.clone()).configure(configure)).await;

        let req = post(
            "/api/decrypt-voice",
            &[Part::file("encrypted_file", "x.enc", b"gAAAAAB-not-really-a-token")],
        )
        .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), 500);

        let json: serde_json::Value = actix_test::read_body_json(resp).await;
        assert_eq!(json["type"], "authentication_error");
        assert!(json.get("traceback").is_none());
        assert_eq!(state.get_metrics_snapshot().decrypt_failures, 1);
    }

    #[actix_web::test]
    async fn test_decrypt_without_file_is_400() {
        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(test_state(AppConfig::default())))
                .configure(configure),
        )
        .await;

        let req = post("/api/decrypt-voice", &[Part::text("note", "nothing here")]).to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);
    }
}
