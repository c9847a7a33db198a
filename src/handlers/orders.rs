use crate::handlers::common::{created_response, success_response, validate_input};
use crate::{
    errors::ServiceError,
    services::orders::{NewOrder, NewOrderItem},
    AppState,
};
use axum::{
    extract::{Json, Path, State},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use uuid::Uuid;

/// Creates the router for order endpoints
pub fn orders_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_order))
        .route("/:id", get(get_order))
        .route("/:id/items", get(get_order_items).post(add_item))
        .route("/:id/freeze", post(freeze_prices))
}

async fn create_order(
    State(state): State<AppState>,
    Json(payload): Json<NewOrder>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;
    let order = state.services.orders.create_order(payload).await?;
    Ok(created_response(order))
}

async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state.services.orders.get_order(id).await?;
    Ok(success_response(order))
}

async fn get_order_items(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let items = state.services.orders.get_order_items(id).await?;
    Ok(success_response(items))
}

async fn add_item(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<NewOrderItem>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;
    let item = state.services.orders.add_item(id, payload).await?;
    Ok(created_response(item))
}

async fn freeze_prices(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state.services.orders.freeze_prices(id).await?;
    Ok(success_response(order))
}
