use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool};

use super::RatingStore;
use crate::{
    error::AppResult,
    models::{MovieId, Rating, RatingRow, RatingSnapshot, UserId},
};

/// Creates a PostgreSQL connection pool and applies pending migrations
pub async fn create_pool(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// Rating store backed by the `ratings` table
#[derive(Clone)]
pub struct PgRatingStore {
    pool: PgPool,
}

impl PgRatingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RatingStore for PgRatingStore {
    async fn upsert(&self, rating: Rating) -> AppResult<Rating> {
        let row = RatingRow::from(&rating);
        let stored = sqlx::query_as::<_, RatingRow>(
            r#"
            INSERT INTO ratings (user_id, movie_id, rating, rated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id, movie_id)
            DO UPDATE SET rating = EXCLUDED.rating, rated_at = EXCLUDED.rated_at
            RETURNING user_id, movie_id, rating, rated_at
            "#,
        )
        .bind(row.user_id)
        .bind(row.movie_id)
        .bind(row.rating)
        .bind(row.rated_at)
        .fetch_one(&self.pool)
        .await?;

        Rating::try_from(stored)
    }

    async fn get_ratings_for_user(&self, user_id: UserId) -> AppResult<HashSet<MovieId>> {
        let movie_ids: Vec<i64> =
            sqlx::query_scalar("SELECT movie_id FROM ratings WHERE user_id = $1")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;

        Ok(movie_ids.into_iter().collect())
    }

    async fn export_snapshot(&self) -> AppResult<RatingSnapshot> {
        // A repeatable-read transaction pins every statement to the snapshot
        // taken by its first query. That query stamps the snapshot with
        // statement_timestamp(), since now() is the earlier BEGIN time.
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await?;

        let taken_at: DateTime<Utc> = sqlx::query_scalar("SELECT statement_timestamp()")
            .fetch_one(&mut *tx)
            .await?;

        let rows = sqlx::query_as::<_, RatingRow>(
            r#"
            SELECT user_id, movie_id, rating, rated_at
            FROM ratings
            ORDER BY user_id, movie_id
            "#,
        )
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::debug!(rows = rows.len(), taken_at = %taken_at, "Rating snapshot exported");

        Ok(RatingSnapshot { taken_at, rows })
    }
}
