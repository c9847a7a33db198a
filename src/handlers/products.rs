use crate::handlers::common::{
    created_response, no_content_response, normalize_optional_string, success_response,
    validate_input,
};
use crate::{
    errors::ServiceError,
    services::{
        compositions::NewComposition,
        products::{NewProduct, ProductFilter, ProductUpdate},
    },
    AppState,
};
use axum::{
    extract::{Json, Path, Query, State},
    response::IntoResponse,
    routing::{get, post, put},
    Router,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct AddCompositionRequest {
    pub component_id: Uuid,
    #[validate(range(min = 0, message = "quantity_per_product cannot be negative"))]
    pub quantity_per_product: i32,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateCompositionRequest {
    #[validate(range(min = 0, message = "quantity_per_product cannot be negative"))]
    pub quantity_per_product: i32,
}

/// Creates the router for product and composition endpoints
pub fn products_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_products).post(create_product))
        .route("/slug/:slug", get(get_product_by_slug))
        .route(
            "/:id",
            get(get_product).put(update_product).delete(delete_product),
        )
        .route("/:id/recalculate", post(recalculate_product))
        .route(
            "/:id/compositions",
            get(list_compositions).post(add_composition),
        )
}

/// Composition endpoints addressed by composition id
pub fn compositions_routes() -> Router<AppState> {
    Router::new().route(
        "/:id",
        put(update_composition).delete(remove_composition),
    )
}

async fn create_product(
    State(state): State<AppState>,
    Json(mut payload): Json<NewProduct>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;
    payload.header_title = normalize_optional_string(payload.header_title);
    payload.header_description = normalize_optional_string(payload.header_description);

    let product = state.services.products.create_product(payload).await?;
    Ok(created_response(product))
}

async fn list_products(
    State(state): State<AppState>,
    Query(filter): Query<ProductFilter>,
) -> Result<impl IntoResponse, ServiceError> {
    let products = state.services.products.list_products(filter).await?;
    Ok(success_response(products))
}

async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let product = state.services.products.get_product(id).await?;
    Ok(success_response(product))
}

async fn get_product_by_slug(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let product = state.services.products.get_product_by_slug(&slug).await?;
    Ok(success_response(product))
}

async fn update_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ProductUpdate>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;
    let product = state.services.products.update_product(id, payload).await?;
    Ok(success_response(product))
}

async fn recalculate_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let product = state.services.products.recalculate_product(id).await?;
    Ok(success_response(product))
}

async fn delete_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    state.services.products.delete_product(id).await?;
    Ok(no_content_response())
}

async fn list_compositions(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let compositions = state.services.compositions.list_compositions(id).await?;
    Ok(success_response(compositions))
}

async fn add_composition(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AddCompositionRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;
    let change = state
        .services
        .compositions
        .add_composition(NewComposition {
            product_id: id,
            component_id: payload.component_id,
            quantity_per_product: payload.quantity_per_product,
        })
        .await?;
    Ok(created_response(change))
}

async fn update_composition(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateCompositionRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;
    let change = state
        .services
        .compositions
        .update_composition(id, payload.quantity_per_product)
        .await?;
    Ok(success_response(change))
}

async fn remove_composition(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let product = state.services.compositions.remove_composition(id).await?;
    Ok(success_response(product))
}
