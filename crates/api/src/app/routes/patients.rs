use std::sync::Arc;

use axum::{
    extract::{
        Extension, Multipart, Path, Query,
        multipart::MultipartRejection,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

use almoner_beneficiaries::{NewPatient, PatientPatch};
use almoner_core::PatientId;
use almoner_import::ImportKind;

use crate::app::dto::{ListQuery, ListResponse};
use crate::app::errors;
use crate::app::routes::upload;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_patients).post(create_patient))
        .route("/excel", post(import_patients))
        .route(
            "/:id",
            get(get_patient).patch(update_patient).delete(delete_patient),
        )
}

pub async fn list_patients(
    Extension(services): Extension<Arc<AppServices>>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Response {
    let query = match errors::query_params(query) {
        Ok(q) => q,
        Err(res) => return res,
    };
    match services.patients.list(query.page()).await {
        Ok(page) => Json(ListResponse::from(page)).into_response(),
        Err(e) => errors::domain_error_to_response(e),
    }
}

pub async fn create_patient(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<NewPatient>, JsonRejection>,
) -> Response {
    let body = match errors::json_body(body) {
        Ok(b) => b,
        Err(res) => return res,
    };
    match services.patients.create(body).await {
        Ok(patient) => (StatusCode::CREATED, Json(patient)).into_response(),
        Err(e) => errors::domain_error_to_response(e),
    }
}

pub async fn get_patient(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Response {
    let id: PatientId = match errors::parse_id(&id) {
        Ok(v) => v,
        Err(res) => return res,
    };
    match services.patients.get(id).await {
        Ok(patient) => Json(patient).into_response(),
        Err(e) => errors::domain_error_to_response(e),
    }
}

pub async fn update_patient(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    body: Result<Json<PatientPatch>, JsonRejection>,
) -> Response {
    let id: PatientId = match errors::parse_id(&id) {
        Ok(v) => v,
        Err(res) => return res,
    };
    let patch = match errors::json_body(body) {
        Ok(b) => b,
        Err(res) => return res,
    };
    match services.patients.update(id, patch).await {
        Ok(patient) => Json(patient).into_response(),
        Err(e) => errors::domain_error_to_response(e),
    }
}

pub async fn delete_patient(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Response {
    let id: PatientId = match errors::parse_id(&id) {
        Ok(v) => v,
        Err(res) => return res,
    };
    match services.patients.delete(id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::domain_error_to_response(e),
    }
}

pub async fn import_patients(
    Extension(services): Extension<Arc<AppServices>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    upload::import_upload(services, ImportKind::Patients, multipart).await
}
