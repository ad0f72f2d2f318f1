use axum::Router;

pub mod deliveries;
pub mod families;
pub mod patients;
pub mod system;
pub mod upload;
pub mod warehouses;

/// Router for every resource endpoint.
pub fn router() -> Router {
    Router::new()
        .nest("/delivery", deliveries::router())
        .nest("/warehouse", warehouses::router())
        .nest("/family", families::router())
        .nest("/patient", patients::router())
}
