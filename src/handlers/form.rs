//! # Multipart Form Reading
//!
//! Collects one file part plus any small text fields from a
//! `multipart/form-data` body.
//!
//! ## Limits:
//! - The file part is capped at `max_file_bytes`; reading stops as soon as
//!   the cap is exceeded
//! - Text fields are capped at [`MAX_TEXT_FIELD_BYTES`]
//! - Parts other than the file and text fields are drained and ignored

use crate::error::AppError;
use actix_multipart::{Field, Multipart};
use futures_util::stream::StreamExt;
use std::collections::HashMap;

pub const MAX_TEXT_FIELD_BYTES: usize = 1024;

/// An uploaded file part.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct FormData {
    pub file: Option<UploadedFile>,
    pub fields: HashMap<String, String>,
}

impl FormData {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

/// Read the whole form, keeping the part named `file_field` as the upload.
pub async fn read_form(mut payload: Multipart, file_field: &str, max_file_bytes: usize) -> Result<FormData, AppError> {
    let mut form = FormData::default();

    while let Some(item) = payload.next().await {
        let mut field: Field = item?;

        let (name, filename) = {
            let disposition = field
                .content_disposition()
                .ok_or_else(|| AppError::BadRequest("Missing content disposition".to_string()))?;
            let name = disposition
                .get_name()
                .ok_or_else(|| AppError::BadRequest("Missing field name".to_string()))?
                .to_string();
            (name, disposition.get_filename().map(str::to_string))
        };

        if name == file_field {
            let bytes = read_field(&mut field, max_file_bytes, &name).await?;
            form.file = Some(UploadedFile { filename, bytes });
        } else if filename.is_none() {
            let bytes = read_field(&mut field, MAX_TEXT_FIELD_BYTES, &name).await?;
            let value = String::from_utf8(bytes)
                .map_err(|_| AppError::ValidationError(format!("Field '{}' is not valid UTF-8", name)))?;
            form.fields.insert(name, value);
        } else {
            while let Some(chunk) = field.next().await {
                chunk?;
            }
        }
    }

    Ok(form)
}

async fn read_field(field: &mut Field, limit: usize, name: &str) -> Result<Vec<u8>, AppError> {
    let mut bytes = Vec::new();
    while let Some(chunk) = field.next().await {
        let chunk = chunk?;
        if bytes.len() + chunk.len() > limit {
            return Err(AppError::ValidationError(format!(
                "Field '{}' too large (max: {} bytes)",
                name, limit
            )));
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}

#[cfg(test)]
pub(crate) mod test_support {
    pub const BOUNDARY: &str = "----voice-mask-test-boundary";

    /// A multipart part: field name, optional filename, content.
    pub struct Part<'a> {
        pub name: &'a str,
        pub filename: Option<&'a str>,
        pub content: &'a [u8],
    }

    impl<'a> Part<'a> {
        pub fn file(name: &'a str, filename: &'a str, content: &'a [u8]) -> Self {
            Self {
                name,
                filename: Some(filename),
                content,
            }
        }

        pub fn text(name: &'a str, value: &'a str) -> Self {
            Self {
                name,
                filename: None,
                content: value.as_bytes(),
            }
        }
    }

    pub fn content_type() -> String {
        format!("multipart/form-data; boundary={}", BOUNDARY)
    }

    pub fn body(parts: &[Part<'_>]) -> Vec<u8> {
        let mut body = Vec::new();
        for part in parts {
            body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
            match part.filename {
                Some(filename) => {
                    body.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                            part.name, filename
                        )
                        .as_bytes(),
                    );
                }
                None => {
                    body.extend_from_slice(
                        format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", part.name).as_bytes(),
                    );
                }
            }
            body.extend_from_slice(part.content);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        body
    }
}
