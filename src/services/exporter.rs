use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::{
    db::RatingStore,
    error::{AppError, AppResult},
    models::{Dataset, MovieId, Observation, RatingSnapshot, RatingValue, UserId},
};

/// Turns a point-in-time rating snapshot into a training dataset
#[derive(Clone)]
pub struct FeatureExporter {
    store: Arc<dyn RatingStore>,
}

impl FeatureExporter {
    pub fn new(store: Arc<dyn RatingStore>) -> Self {
        Self { store }
    }

    /// Exports one consistent snapshot. Any store failure is reported as
    /// `SourceUnavailable` and no partial dataset is produced.
    pub async fn export(&self) -> AppResult<Dataset> {
        let snapshot = self.store.export_snapshot().await.map_err(|e| {
            tracing::warn!(error = %e, "Rating snapshot export failed");
            AppError::SourceUnavailable(e.to_string())
        })?;

        let received = snapshot.rows.len();
        let dataset = build_dataset(snapshot);
        let dropped = received - dataset.len();
        if dropped > 0 {
            tracing::warn!(received, dropped, "Malformed rating rows excluded from export");
        }

        tracing::info!(
            rows = dataset.len(),
            taken_at = %dataset.taken_at,
            "Training dataset exported"
        );
        Ok(dataset)
    }
}

/// Deterministically filters a snapshot into `(user, movie)`-ordered
/// observations.
///
/// Dropped rows: values outside the rating scale, and all but the most recent
/// row for a repeated pair. Every other row the store put in the snapshot is
/// kept, whatever its `rated_at`.
pub fn build_dataset(snapshot: RatingSnapshot) -> Dataset {
    let taken_at = snapshot.taken_at;
    let mut latest: BTreeMap<(UserId, MovieId), (DateTime<Utc>, RatingValue)> = BTreeMap::new();

    for row in snapshot.rows {
        let Ok(value) = RatingValue::new(i64::from(row.rating)) else {
            continue;
        };
        let key = (row.user_id, row.movie_id);
        match latest.get(&key) {
            Some((seen_at, _)) if *seen_at > row.rated_at => {}
            _ => {
                latest.insert(key, (row.rated_at, value));
            }
        }
    }

    let observations = latest
        .into_iter()
        .map(|((user_id, movie_id), (_, value))| {
            Observation::new(user_id, movie_id, value.as_f64())
        })
        .collect();

    Dataset::new(taken_at, observations)
}
