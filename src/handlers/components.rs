use crate::handlers::common::{
    created_response, no_content_response, success_response, validate_input,
};
use crate::{
    errors::ServiceError,
    services::components::{ComponentUpdate, NewComponent},
    AppState,
};
use axum::{
    extract::{Json, Path, State},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct StockMovementRequest {
    #[validate(range(min = 1, message = "quantity must be at least 1"))]
    pub quantity: i32,
}

/// Creates the router for component endpoints
pub fn components_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_components).post(create_component))
        .route("/filters", get(list_filter_components))
        .route(
            "/:id",
            get(get_component)
                .put(update_component)
                .delete(delete_component),
        )
        .route("/:id/restock", post(restock_component))
        .route("/:id/sales", post(record_sale))
}

async fn create_component(
    State(state): State<AppState>,
    Json(payload): Json<NewComponent>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;
    let component = state.services.components.create_component(payload).await?;
    Ok(created_response(component))
}

async fn list_components(State(state): State<AppState>) -> Result<impl IntoResponse, ServiceError> {
    let components = state.services.components.list_components().await?;
    Ok(success_response(components))
}

async fn list_filter_components(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ServiceError> {
    let components = state.services.components.list_filter_components().await?;
    Ok(success_response(components))
}

async fn get_component(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let component = state.services.components.get_component(id).await?;
    Ok(success_response(component))
}

async fn update_component(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ComponentUpdate>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;
    let component = state
        .services
        .components
        .update_component(id, payload)
        .await?;
    Ok(success_response(component))
}

async fn restock_component(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<StockMovementRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;
    let component = state
        .services
        .components
        .restock_component(id, payload.quantity)
        .await?;
    Ok(success_response(component))
}

async fn record_sale(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<StockMovementRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;
    let component = state
        .services
        .components
        .record_sale(id, payload.quantity)
        .await?;
    Ok(success_response(component))
}

async fn delete_component(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    state.services.components.delete_component(id).await?;
    Ok(no_content_response())
}
