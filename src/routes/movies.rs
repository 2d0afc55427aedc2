use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;

use super::AppState;
use crate::{
    error::{AppError, AppResult},
    models::{GenreId, Movie, MovieId},
};

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub genre_id: Option<GenreId>,
    #[serde(default)]
    pub skip: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    100
}

pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(movie_id): Path<MovieId>,
) -> AppResult<Json<Movie>> {
    state
        .catalog
        .get(movie_id)
        .cloned()
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("movie {}", movie_id)))
}

/// Catalog page in ascending `movie_id` order
pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListQuery>,
) -> AppResult<Json<Vec<Movie>>> {
    if params.limit == 0 {
        return Err(AppError::InvalidRequest(
            "limit must be positive".to_string(),
        ));
    }

    let movies = state
        .catalog
        .filtered(params.genre_id)
        .skip(params.skip)
        .take(params.limit)
        .cloned()
        .collect();
    Ok(Json(movies))
}
