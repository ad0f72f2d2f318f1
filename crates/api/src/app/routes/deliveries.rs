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

use almoner_core::{DeliveryId, FamilyId};
use almoner_deliveries::{DeliveryPatch, NewDelivery};
use almoner_import::ImportKind;

use crate::app::dto::{DeliveryQuery, ListResponse};
use crate::app::errors;
use crate::app::routes::upload;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_deliveries).post(create_delivery))
        .route("/excel", post(import_deliveries))
        .route("/family/:family_id", get(family_deliveries))
        .route(
            "/:id",
            get(get_delivery).patch(update_delivery).delete(delete_delivery),
        )
}

pub async fn list_deliveries(
    Extension(services): Extension<Arc<AppServices>>,
    query: Result<Query<DeliveryQuery>, QueryRejection>,
) -> Response {
    let query = match errors::query_params(query) {
        Ok(q) => q,
        Err(res) => return res,
    };
    let filter = match query.filter() {
        Ok(f) => f,
        Err(e) => return errors::domain_error_to_response(e),
    };
    match services.ledger.list(filter, query.page()).await {
        Ok(page) => Json(ListResponse::from(page)).into_response(),
        Err(e) => errors::domain_error_to_response(e),
    }
}

pub async fn create_delivery(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<NewDelivery>, JsonRejection>,
) -> Response {
    let body = match errors::json_body(body) {
        Ok(b) => b,
        Err(res) => return res,
    };
    match services.ledger.create(body).await {
        Ok(delivery) => (StatusCode::CREATED, Json(delivery)).into_response(),
        Err(e) => errors::domain_error_to_response(e),
    }
}

pub async fn get_delivery(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Response {
    let id: DeliveryId = match errors::parse_id(&id) {
        Ok(v) => v,
        Err(res) => return res,
    };
    match services.ledger.get(id).await {
        Ok(delivery) => Json(delivery).into_response(),
        Err(e) => errors::domain_error_to_response(e),
    }
}

pub async fn update_delivery(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    body: Result<Json<DeliveryPatch>, JsonRejection>,
) -> Response {
    let id: DeliveryId = match errors::parse_id(&id) {
        Ok(v) => v,
        Err(res) => return res,
    };
    let patch = match errors::json_body(body) {
        Ok(b) => b,
        Err(res) => return res,
    };
    match services.ledger.update(id, patch).await {
        Ok(delivery) => Json(delivery).into_response(),
        Err(e) => errors::domain_error_to_response(e),
    }
}

pub async fn delete_delivery(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Response {
    let id: DeliveryId = match errors::parse_id(&id) {
        Ok(v) => v,
        Err(res) => return res,
    };
    match services.ledger.delete(id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::domain_error_to_response(e),
    }
}

pub async fn family_deliveries(
    Extension(services): Extension<Arc<AppServices>>,
    Path(family_id): Path<String>,
) -> Response {
    let family_id: FamilyId = match errors::parse_id(&family_id) {
        Ok(v) => v,
        Err(res) => return res,
    };
    match services.ledger.for_family(family_id).await {
        Ok(deliveries) => Json(deliveries).into_response(),
        Err(e) => errors::domain_error_to_response(e),
    }
}

pub async fn import_deliveries(
    Extension(services): Extension<Arc<AppServices>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    upload::import_upload(services, ImportKind::Deliveries, multipart).await
}
