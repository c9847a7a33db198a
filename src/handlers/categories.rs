use crate::handlers::common::{
    created_response, no_content_response, success_response, validate_input,
};
use crate::{errors::ServiceError, services::categories::NewCategory, AppState};
use axum::{
    extract::{Json, Path, State},
    response::IntoResponse,
    routing::get,
    Router,
};
use uuid::Uuid;

/// Creates the router for category endpoints
pub fn categories_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_categories).post(create_category))
        .route("/:id", get(get_category).delete(delete_category))
}

async fn create_category(
    State(state): State<AppState>,
    Json(payload): Json<NewCategory>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;
    let category = state.services.categories.create_category(payload).await?;
    Ok(created_response(category))
}

async fn list_categories(State(state): State<AppState>) -> Result<impl IntoResponse, ServiceError> {
    let categories = state.services.categories.list_categories().await?;
    Ok(success_response(categories))
}

async fn get_category(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let category = state.services.categories.get_category(id).await?;
    Ok(success_response(category))
}

async fn delete_category(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    state.services.categories.delete_category(id).await?;
    Ok(no_content_response())
}
