use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::registry::ModelRegistry;
use crate::{
    cached,
    db::{Cache, CacheKey, RatingStore},
    error::{AppError, AppResult},
    models::{GenreId, ModelArtifact, MovieCatalog, MovieId, RatingValue, UserId},
};

/// One ranked movie with its raw model score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoredMovie {
    pub movie_id: MovieId,
    pub predicted_score: f64,
}

/// A ranked list and the model version that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendations {
    pub model_version: u64,
    pub movies: Vec<ScoredMovie>,
}

/// A point prediction for a single (user, movie) pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Prediction {
    pub user_id: UserId,
    pub movie_id: MovieId,
    /// Predicted rating clipped to the rating scale
    pub predicted_score: f64,
    pub known_user: bool,
    pub known_movie: bool,
    pub model_version: u64,
}

/// Parameters of a ranking request
#[derive(Debug, Clone, Copy, Default)]
pub struct RecommendationQuery {
    /// Personalize for this user and exclude what they already rated. Without
    /// a user, movies are ranked by the population baseline.
    pub user_id: Option<UserId>,
    pub top_n: Option<i64>,
    pub genre_id: Option<GenreId>,
    /// Ranked entries to skip before the returned window
    pub skip: usize,
}

/// Serves ranked recommendations from whatever model is active
pub struct RecommendationServer {
    registry: Arc<ModelRegistry>,
    ratings: Arc<dyn RatingStore>,
    catalog: Arc<MovieCatalog>,
    default_top_n: usize,
    cache: Option<Cache>,
    cache_ttl: u64,
}

impl RecommendationServer {
    pub fn new(
        registry: Arc<ModelRegistry>,
        ratings: Arc<dyn RatingStore>,
        catalog: Arc<MovieCatalog>,
        default_top_n: usize,
    ) -> Self {
        Self {
            registry,
            ratings,
            catalog,
            default_top_n,
            cache: None,
            cache_ttl: 0,
        }
    }

    pub fn with_cache(mut self, cache: Cache, ttl_secs: u64) -> Self {
        self.cache = Some(cache);
        self.cache_ttl = ttl_secs;
        self
    }

    pub fn catalog(&self) -> &MovieCatalog {
        &self.catalog
    }

    /// Top movies for `user_id` that they have not rated yet
    pub async fn recommend(
        &self,
        user_id: UserId,
        top_n: Option<i64>,
        genre_id: Option<GenreId>,
    ) -> AppResult<Recommendations> {
        self.query(RecommendationQuery {
            user_id: Some(user_id),
            top_n,
            genre_id,
            skip: 0,
        })
        .await
    }

    pub async fn query(&self, query: RecommendationQuery) -> AppResult<Recommendations> {
        let top_n = self.resolve_top_n(query.top_n)?;

        // One model for the whole request, even if a publish lands meanwhile
        let model = self.registry.active();

        let rated = match query.user_id {
            Some(user_id) => self.ratings.get_ratings_for_user(user_id).await.map_err(|e| {
                tracing::warn!(user_id, error = %e, "Could not read user ratings");
                AppError::SourceUnavailable(e.to_string())
            })?,
            None => HashSet::new(),
        };

        let key = CacheKey::Recommendations {
            model_version: model.version,
            user_id: query.user_id,
            rated_count: rated.len(),
            genre_id: query.genre_id,
            top_n,
            skip: query.skip,
        };

        let movies: Vec<ScoredMovie> = cached!(self.cache.as_ref(), key, self.cache_ttl, async {
            let candidates = self
                .catalog
                .filtered(query.genre_id)
                .map(|m| m.movie_id)
                .filter(|id| !rated.contains(id));
            Ok::<_, AppError>(rank(&model, candidates, query.user_id, query.skip, top_n))
        })?;

        tracing::debug!(
            user_id = ?query.user_id,
            genre_id = ?query.genre_id,
            model_version = model.version,
            returned = movies.len(),
            "Recommendations served"
        );

        Ok(Recommendations {
            model_version: model.version,
            movies,
        })
    }

    /// Predicted rating for one pair, clipped to the rating scale
    pub fn predict(&self, user_id: UserId, movie_id: MovieId) -> Prediction {
        let model = self.registry.active();
        let raw = model.predict(Some(user_id), movie_id);

        Prediction {
            user_id,
            movie_id,
            predicted_score: raw.clamp(RatingValue::MIN as f64, RatingValue::MAX as f64),
            known_user: model.knows_user(user_id),
            known_movie: model.knows_movie(movie_id),
            model_version: model.version,
        }
    }

    fn resolve_top_n(&self, top_n: Option<i64>) -> AppResult<usize> {
        match top_n {
            None => Ok(self.default_top_n),
            Some(n) if n > 0 => usize::try_from(n)
                .map_err(|_| AppError::InvalidRequest(format!("top_n {} is too large", n))),
            Some(n) => Err(AppError::InvalidRequest(format!(
                "top_n must be positive, got {}",
                n
            ))),
        }
    }
}

/// Scores `candidates` with `model` and returns the window `[skip, skip + top_n)`
/// of the ranking. Ties on score are broken by ascending `movie_id`, so the
/// result is fully determined by its inputs.
pub fn rank(
    model: &ModelArtifact,
    candidates: impl IntoIterator<Item = MovieId>,
    user_id: Option<UserId>,
    skip: usize,
    top_n: usize,
) -> Vec<ScoredMovie> {
    let mut scored: Vec<ScoredMovie> = candidates
        .into_iter()
        .map(|movie_id| ScoredMovie {
            movie_id,
            predicted_score: model.predict(user_id, movie_id),
        })
        .collect();

    scored.sort_by(|a, b| {
        b.predicted_score
            .total_cmp(&a.predicted_score)
            .then(a.movie_id.cmp(&b.movie_id))
    });

    scored.into_iter().skip(skip).take(top_n).collect()
}
