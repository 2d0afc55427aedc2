use chrono::{DateTime, Utc};

use super::{MovieId, UserId};

/// A single observed (user, movie, rating) triple used for training
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub user_id: UserId,
    pub movie_id: MovieId,
    pub value: f64,
}

impl Observation {
    pub fn new(user_id: UserId, movie_id: MovieId, value: f64) -> Self {
        Self {
            user_id,
            movie_id,
            value,
        }
    }
}

/// Training input drawn from one rating snapshot. `taken_at` is the snapshot
/// boundary and becomes the artifact's `trained_at`.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub taken_at: DateTime<Utc>,
    pub observations: Vec<Observation>,
}

impl Dataset {
    pub fn new(taken_at: DateTime<Utc>, observations: Vec<Observation>) -> Self {
        Self {
            taken_at,
            observations,
        }
    }

    /// Convenience constructor for `(user, movie, rating)` triples
    pub fn from_triples(taken_at: DateTime<Utc>, triples: &[(UserId, MovieId, u8)]) -> Self {
        let observations = triples
            .iter()
            .map(|&(u, m, r)| Observation::new(u, m, f64::from(r)))
            .collect();
        Self::new(taken_at, observations)
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// Mean of all observed ratings, `None` for an empty dataset
    pub fn global_mean(&self) -> Option<f64> {
        if self.observations.is_empty() {
            return None;
        }
        let sum: f64 = self.observations.iter().map(|o| o.value).sum();
        Some(sum / self.observations.len() as f64)
    }
}
