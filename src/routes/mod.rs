use std::sync::Arc;

use axum::{
    http::StatusCode,
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    db::RatingStore,
    middleware::{make_span_with_request_id, request_id_middleware},
    models::MovieCatalog,
    services::{ModelRegistry, RecommendationServer, RetrainScheduler},
};

pub mod model;
pub mod movies;
pub mod ratings;
pub mod recommendations;

/// Shared state handed to every handler
pub struct AppState {
    pub ratings: Arc<dyn RatingStore>,
    pub catalog: Arc<MovieCatalog>,
    pub registry: Arc<ModelRegistry>,
    pub recommender: Arc<RecommendationServer>,
    pub scheduler: Arc<RetrainScheduler>,
}

/// Creates the application router with all routes
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/recommendations/:user_id", get(recommendations::for_user))
        .route(
            "/recommendations/genre/:genre_id",
            get(recommendations::for_genre),
        )
        .route("/predict", post(recommendations::predict))
        .route("/ratings", post(ratings::create))
        .route("/movies", get(movies::list))
        .route("/movies/:movie_id", get(movies::get))
        .route("/model", get(model::status))
        .route("/model/retrain", post(model::retrain))
        .route("/model/rollback", post(model::rollback))
        .layer(
            ServiceBuilder::new()
                .layer(CorsLayer::permissive())
                .layer(middleware::from_fn(request_id_middleware))
                .layer(TraceLayer::new_for_http().make_span_with(make_span_with_request_id)),
        )
        .with_state(state)
}

async fn root() -> Json<Value> {
    Json(json!({
        "service": "movie-rec-api",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Health check endpoint
async fn health_check() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "status": "healthy" })))
}
