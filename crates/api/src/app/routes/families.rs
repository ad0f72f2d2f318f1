use std::sync::Arc;

use axum::{
    extract::{
        Extension, Multipart, Path, Query,
        multipart::MultipartRejection,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};

use almoner_beneficiaries::{FamilyPatch, NewFamily, NewPerson};
use almoner_core::{FamilyId, PersonId};
use almoner_import::ImportKind;

use crate::app::dto::{ListQuery, ListResponse};
use crate::app::errors;
use crate::app::routes::upload;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_families).post(create_family))
        .route("/excel", post(import_families))
        .route(
            "/:id",
            get(get_family).patch(update_family).delete(delete_family),
        )
        .route("/:id/person", post(add_person))
        .route("/:id/person/:person_id", delete(remove_person))
}

pub async fn list_families(
    Extension(services): Extension<Arc<AppServices>>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Response {
    let query = match errors::query_params(query) {
        Ok(q) => q,
        Err(res) => return res,
    };
    match services.families.list(query.page()).await {
        Ok(page) => Json(ListResponse::from(page)).into_response(),
        Err(e) => errors::domain_error_to_response(e),
    }
}

pub async fn create_family(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<NewFamily>, JsonRejection>,
) -> Response {
    let body = match errors::json_body(body) {
        Ok(b) => b,
        Err(res) => return res,
    };
    match services.families.create(body).await {
        Ok(family) => (StatusCode::CREATED, Json(family)).into_response(),
        Err(e) => errors::domain_error_to_response(e),
    }
}

pub async fn get_family(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Response {
    let id: FamilyId = match errors::parse_id(&id) {
        Ok(v) => v,
        Err(res) => return res,
    };
    match services.families.get(id).await {
        Ok(family) => Json(family).into_response(),
        Err(e) => errors::domain_error_to_response(e),
    }
}

pub async fn update_family(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    body: Result<Json<FamilyPatch>, JsonRejection>,
) -> Response {
    let id: FamilyId = match errors::parse_id(&id) {
        Ok(v) => v,
        Err(res) => return res,
    };
    let patch = match errors::json_body(body) {
        Ok(b) => b,
        Err(res) => return res,
    };
    match services.families.update(id, patch).await {
        Ok(family) => Json(family).into_response(),
        Err(e) => errors::domain_error_to_response(e),
    }
}

pub async fn delete_family(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Response {
    let id: FamilyId = match errors::parse_id(&id) {
        Ok(v) => v,
        Err(res) => return res,
    };
    match services.families.delete(id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::domain_error_to_response(e),
    }
}

pub async fn add_person(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    body: Result<Json<NewPerson>, JsonRejection>,
) -> Response {
    let id: FamilyId = match errors::parse_id(&id) {
        Ok(v) => v,
        Err(res) => return res,
    };
    let body = match errors::json_body(body) {
        Ok(b) => b,
        Err(res) => return res,
    };
    match services.families.add_member(id, body).await {
        Ok(person) => (StatusCode::CREATED, Json(person)).into_response(),
        Err(e) => errors::domain_error_to_response(e),
    }
}

pub async fn remove_person(
    Extension(services): Extension<Arc<AppServices>>,
    Path((id, person_id)): Path<(String, String)>,
) -> Response {
    let id: FamilyId = match errors::parse_id(&id) {
        Ok(v) => v,
        Err(res) => return res,
    };
    let person_id: PersonId = match errors::parse_id(&person_id) {
        Ok(v) => v,
        Err(res) => return res,
    };
    match services.families.remove_member(id, person_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::domain_error_to_response(e),
    }
}

pub async fn import_families(
    Extension(services): Extension<Arc<AppServices>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    upload::import_upload(services, ImportKind::Families, multipart).await
}
