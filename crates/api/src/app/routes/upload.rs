//! Shared handling of `POST /<resource>/excel` uploads.

use std::sync::Arc;

use axum::extract::Multipart;
use axum::extract::multipart::MultipartRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use almoner_core::DomainError;
use almoner_import::ImportKind;

use crate::app::errors;
use crate::app::services::AppServices;

/// Multipart field carrying the workbook.
pub const FILE_FIELD: &str = "file";

struct Upload {
    filename: String,
    bytes: Vec<u8>,
}

async fn read_upload(multipart: Result<Multipart, MultipartRejection>) -> Result<Upload, Response> {
    let mut multipart = multipart.map_err(|rejection| {
        errors::json_error(StatusCode::BAD_REQUEST, "invalid_upload", rejection.body_text())
    })?;
    loop {
        let field = multipart.next_field().await.map_err(|e| {
            errors::json_error(StatusCode::BAD_REQUEST, "invalid_upload", e.body_text())
        })?;
        let Some(field) = field else {
            return Err(errors::json_error(
                StatusCode::BAD_REQUEST,
                "invalid_upload",
                format!("multipart field '{FILE_FIELD}' is required"),
            ));
        };
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let bytes = field.bytes().await.map_err(|e| {
            errors::json_error(StatusCode::BAD_REQUEST, "invalid_upload", e.body_text())
        })?;
        return Ok(Upload {
            filename,
            bytes: bytes.to_vec(),
        });
    }
}

/// Read the `file` field and run the matching import; 201 with the report.
pub async fn import_upload(
    services: Arc<AppServices>,
    kind: ImportKind,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let upload = match read_upload(multipart).await {
        Ok(u) => u,
        Err(res) => return res,
    };
    match services
        .importer
        .import(kind, &upload.filename, &upload.bytes)
        .await
    {
        Ok(report) => (StatusCode::CREATED, Json(report)).into_response(),
        Err(e) => errors::domain_error_to_response(DomainError::from(e)),
    }
}
