use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::{
    error::AppResult,
    models::{GenreId, MovieCatalog, MovieId, UserId},
    services::{Prediction, RecommendationQuery, Recommendations},
};

/// Response header naming the model version a ranking was computed with
pub const MODEL_VERSION_HEADER: &str = "x-model-version";

#[derive(Debug, Deserialize)]
pub struct TopNQuery {
    pub top_n: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct GenreQuery {
    pub top_n: Option<i64>,
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub skip: usize,
}

#[derive(Debug, Serialize)]
pub struct RecommendedMovie {
    pub movie_id: MovieId,
    pub title: Option<String>,
    pub predicted_score: f64,
}

#[derive(Debug, Deserialize)]
pub struct PredictRequest {
    pub user_id: UserId,
    pub movie_id: MovieId,
}

/// Top movies the user has not rated yet
pub async fn for_user(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
    Query(params): Query<TopNQuery>,
) -> AppResult<(HeaderMap, Json<Vec<RecommendedMovie>>)> {
    let recs = state
        .recommender
        .recommend(user_id, params.top_n, None)
        .await?;
    Ok(respond(recs, &state.catalog))
}

/// Top movies within a genre, personalized when `user_id` is given
pub async fn for_genre(
    State(state): State<Arc<AppState>>,
    Path(genre_id): Path<GenreId>,
    Query(params): Query<GenreQuery>,
) -> AppResult<(HeaderMap, Json<Vec<RecommendedMovie>>)> {
    let recs = state
        .recommender
        .query(RecommendationQuery {
            user_id: params.user_id,
            top_n: params.top_n,
            genre_id: Some(genre_id),
            skip: params.skip,
        })
        .await?;
    Ok(respond(recs, &state.catalog))
}

pub async fn predict(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PredictRequest>,
) -> Json<Prediction> {
    Json(state.recommender.predict(request.user_id, request.movie_id))
}

fn respond(
    recs: Recommendations,
    catalog: &MovieCatalog,
) -> (HeaderMap, Json<Vec<RecommendedMovie>>) {
    let mut headers = HeaderMap::new();
    headers.insert(MODEL_VERSION_HEADER, recs.model_version.into());

    let movies = recs
        .movies
        .into_iter()
        .map(|m| RecommendedMovie {
            movie_id: m.movie_id,
            title: catalog.get(m.movie_id).map(|movie| movie.title.clone()),
            predicted_score: m.predicted_score,
        })
        .collect();

    (headers, Json(movies))
}
