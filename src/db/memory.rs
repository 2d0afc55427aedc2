use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use super::RatingStore;
use crate::{
    error::AppResult,
    models::{MovieId, Rating, RatingRow, RatingSnapshot, UserId},
};

type RatingMap = BTreeMap<(UserId, MovieId), Rating>;

/// Process-local rating store for development and tests.
///
/// The map is copy-on-write: a snapshot holds its own `Arc` of the map, and a
/// writer that finds the map shared clones it before mutating, so exports
/// never observe later writes and writers never wait for an export.
#[derive(Default)]
pub struct InMemoryRatingStore {
    ratings: RwLock<Arc<RatingMap>>,
}

impl InMemoryRatingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.ratings.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RatingStore for InMemoryRatingStore {
    async fn upsert(&self, rating: Rating) -> AppResult<Rating> {
        let mut guard = self.ratings.write();
        Arc::make_mut(&mut guard).insert((rating.user_id, rating.movie_id), rating.clone());
        Ok(rating)
    }

    async fn get_ratings_for_user(&self, user_id: UserId) -> AppResult<HashSet<MovieId>> {
        let ratings = self.ratings.read();
        Ok(ratings
            .range((user_id, MovieId::MIN)..=(user_id, MovieId::MAX))
            .map(|((_, movie_id), _)| *movie_id)
            .collect())
    }

    async fn export_snapshot(&self) -> AppResult<RatingSnapshot> {
        let (taken_at, ratings) = {
            let guard = self.ratings.read();
            (Utc::now(), Arc::clone(&guard))
        };

        Ok(RatingSnapshot {
            taken_at,
            rows: ratings.values().map(RatingRow::from).collect(),
        })
    }
}
