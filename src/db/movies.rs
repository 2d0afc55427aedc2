use std::path::Path;

use sqlx::PgPool;

use crate::{
    error::{AppError, AppResult},
    models::Movie,
};

/// Reads the full movie catalog from the `movies` table
pub async fn load_from_postgres(pool: &PgPool) -> AppResult<Vec<Movie>> {
    let movies = sqlx::query_as::<_, Movie>(
        r#"
        SELECT movie_id, title, genre_ids, release_date, url, poster_url
        FROM movies
        ORDER BY movie_id
        "#,
    )
    .fetch_all(pool)
    .await?;

    tracing::info!(movies = movies.len(), "Movie catalog loaded from database");
    Ok(movies)
}

/// Reads a JSON array of movies
pub async fn load_from_file(path: &Path) -> AppResult<Vec<Movie>> {
    let bytes = tokio::fs::read(path).await.map_err(|e| {
        AppError::Internal(format!("Failed to read catalog {}: {}", path.display(), e))
    })?;

    let movies: Vec<Movie> = serde_json::from_slice(&bytes).map_err(|e| {
        AppError::Internal(format!("Invalid catalog {}: {}", path.display(), e))
    })?;

    tracing::info!(movies = movies.len(), path = %path.display(), "Movie catalog loaded from file");
    Ok(movies)
}
