use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    error::AppResult,
    models::{MovieId, Rating, RatingSnapshot, RatingValue, UserId},
};

/// Durable store of the current rating for every (user, movie) pair
///
/// Referential integrity of user and movie ids is owned by the external
/// directories; any id is accepted here.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RatingStore: Send + Sync {
    /// Validates `value` and records it, replacing any earlier rating of the
    /// same movie by the same user. The write is durable once this returns.
    async fn put(
        &self,
        user_id: UserId,
        movie_id: MovieId,
        value: i64,
        now: DateTime<Utc>,
    ) -> AppResult<Rating> {
        let rating = Rating {
            user_id,
            movie_id,
            value: RatingValue::new(value)?,
            rated_at: now,
        };
        self.upsert(rating).await
    }

    /// Last-write-wins insert of an already validated rating
    async fn upsert(&self, rating: Rating) -> AppResult<Rating>;

    /// Movies the user has rated
    async fn get_ratings_for_user(&self, user_id: UserId) -> AppResult<HashSet<MovieId>>;

    /// All ratings as of a single point in time. Writes that commit after the
    /// snapshot is taken are not included; `rated_at` plays no part in this.
    async fn export_snapshot(&self) -> AppResult<RatingSnapshot>;
}
