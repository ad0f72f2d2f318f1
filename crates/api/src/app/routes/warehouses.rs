use std::sync::Arc;

use axum::{
    extract::{
        Extension, Multipart, Path, Query,
        multipart::MultipartRejection,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};

use almoner_core::{ProductId, WarehouseId};
use almoner_import::ImportKind;
use almoner_inventory::{NewProduct, ProductPatch};

use crate::app::dto::{CreateWarehouseRequest, ListQuery, ListResponse, RenameWarehouseRequest};
use crate::app::errors;
use crate::app::routes::upload;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_warehouses).post(create_warehouse))
        .route("/excel", post(import_products))
        .route(
            "/:id",
            get(get_warehouse).patch(rename_warehouse).delete(delete_warehouse),
        )
        .route("/:id/product", post(add_product))
        .route(
            "/:id/product/:product_id",
            patch(update_product).delete(remove_product),
        )
}

pub async fn list_warehouses(
    Extension(services): Extension<Arc<AppServices>>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Response {
    let query = match errors::query_params(query) {
        Ok(q) => q,
        Err(res) => return res,
    };
    match services.warehouses.list(query.page()).await {
        Ok(page) => Json(ListResponse::from(page)).into_response(),
        Err(e) => errors::domain_error_to_response(e),
    }
}

pub async fn create_warehouse(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<CreateWarehouseRequest>, JsonRejection>,
) -> Response {
    let body = match errors::json_body(body) {
        Ok(b) => b,
        Err(res) => return res,
    };
    match services.warehouses.create(body.name).await {
        Ok(warehouse) => (StatusCode::CREATED, Json(warehouse)).into_response(),
        Err(e) => errors::domain_error_to_response(e),
    }
}

pub async fn get_warehouse(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Response {
    let id: WarehouseId = match errors::parse_id(&id) {
        Ok(v) => v,
        Err(res) => return res,
    };
    match services.warehouses.get(id).await {
        Ok(warehouse) => Json(warehouse).into_response(),
        Err(e) => errors::domain_error_to_response(e),
    }
}

pub async fn rename_warehouse(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    body: Result<Json<RenameWarehouseRequest>, JsonRejection>,
) -> Response {
    let id: WarehouseId = match errors::parse_id(&id) {
        Ok(v) => v,
        Err(res) => return res,
    };
    let body = match errors::json_body(body) {
        Ok(b) => b,
        Err(res) => return res,
    };
    match services.warehouses.rename(id, body.name).await {
        Ok(warehouse) => Json(warehouse).into_response(),
        Err(e) => errors::domain_error_to_response(e),
    }
}

pub async fn delete_warehouse(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Response {
    let id: WarehouseId = match errors::parse_id(&id) {
        Ok(v) => v,
        Err(res) => return res,
    };
    match services.warehouses.delete(id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::domain_error_to_response(e),
    }
}

pub async fn add_product(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    body: Result<Json<NewProduct>, JsonRejection>,
) -> Response {
    let id: WarehouseId = match errors::parse_id(&id) {
        Ok(v) => v,
        Err(res) => return res,
    };
    let body = match errors::json_body(body) {
        Ok(b) => b,
        Err(res) => return res,
    };
    match services.warehouses.add_product(id, body).await {
        Ok(product) => (StatusCode::CREATED, Json(product)).into_response(),
        Err(e) => errors::domain_error_to_response(e),
    }
}

pub async fn update_product(
    Extension(services): Extension<Arc<AppServices>>,
    Path((id, product_id)): Path<(String, String)>,
    body: Result<Json<ProductPatch>, JsonRejection>,
) -> Response {
    let id: WarehouseId = match errors::parse_id(&id) {
        Ok(v) => v,
        Err(res) => return res,
    };
    let product_id: ProductId = match errors::parse_id(&product_id) {
        Ok(v) => v,
        Err(res) => return res,
    };
    let patch = match errors::json_body(body) {
        Ok(b) => b,
        Err(res) => return res,
    };
    match services.warehouses.update_product(id, product_id, patch).await {
        Ok(product) => Json(product).into_response(),
        Err(e) => errors::domain_error_to_response(e),
    }
}

pub async fn remove_product(
    Extension(services): Extension<Arc<AppServices>>,
    Path((id, product_id)): Path<(String, String)>,
) -> Response {
    let id: WarehouseId = match errors::parse_id(&id) {
        Ok(v) => v,
        Err(res) => return res,
    };
    let product_id: ProductId = match errors::parse_id(&product_id) {
        Ok(v) => v,
        Err(res) => return res,
    };
    match services.warehouses.remove_product(id, product_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::domain_error_to_response(e),
    }
}

pub async fn import_products(
    Extension(services): Extension<Arc<AppServices>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    upload::import_upload(services, ImportKind::Products, multipart).await
}
