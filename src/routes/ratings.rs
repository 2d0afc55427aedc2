use std::sync::Arc;

use axum::{extract::State, Json};
use chrono::Utc;
use serde::Deserialize;

use super::AppState;
use crate::{
    error::AppResult,
    models::{MovieId, Rating, UserId},
};

#[derive(Debug, Deserialize)]
pub struct RatingRequest {
    pub user_id: UserId,
    pub movie_id: MovieId,
    /// Checked against the rating scale by the store
    pub rating: i64,
}

/// Records a rating and echoes what was persisted
pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RatingRequest>,
) -> AppResult<Json<Rating>> {
    let rating = state
        .ratings
        .put(request.user_id, request.movie_id, request.rating, Utc::now())
        .await?;
    state.scheduler.record_new_rating();

    tracing::info!(
        user_id = rating.user_id,
        movie_id = rating.movie_id,
        rating = rating.value.get(),
        "Rating recorded"
    );
    Ok(Json(rating))
}
