use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{MovieId, UserId};
use crate::error::{AppError, AppResult};

/// An explicit star rating, guaranteed to lie in `1..=5`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct RatingValue(u8);

impl RatingValue {
    pub const MIN: i64 = 1;
    pub const MAX: i64 = 5;

    pub fn new(value: i64) -> AppResult<Self> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value as u8))
        } else {
            Err(AppError::InvalidRatingValue(value))
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }

    pub fn as_f64(self) -> f64 {
        f64::from(self.0)
    }
}

impl TryFrom<i64> for RatingValue {
    type Error = AppError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RatingValue> for i64 {
    fn from(value: RatingValue) -> Self {
        i64::from(value.0)
    }
}

/// A user's current rating of a movie. Unique per (user, movie); a newer
/// rating for the same pair supersedes the older one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rating {
    pub user_id: UserId,
    pub movie_id: MovieId,
    #[serde(rename = "rating")]
    pub value: RatingValue,
    pub rated_at: DateTime<Utc>,
}

/// Row shape of the `ratings` table. Values are not range-checked here.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct RatingRow {
    pub user_id: i64,
    pub movie_id: i64,
    pub rating: i16,
    pub rated_at: DateTime<Utc>,
}

impl TryFrom<RatingRow> for Rating {
    type Error = AppError;

    fn try_from(row: RatingRow) -> Result<Self, Self::Error> {
        Ok(Rating {
            user_id: row.user_id,
            movie_id: row.movie_id,
            value: RatingValue::new(i64::from(row.rating))?,
            rated_at: row.rated_at,
        })
    }
}

impl From<&Rating> for RatingRow {
    fn from(rating: &Rating) -> Self {
        RatingRow {
            user_id: rating.user_id,
            movie_id: rating.movie_id,
            rating: i16::from(rating.value.get()),
            rated_at: rating.rated_at,
        }
    }
}

/// All ratings visible as of `taken_at`
#[derive(Debug, Clone)]
pub struct RatingSnapshot {
    pub taken_at: DateTime<Utc>,
    pub rows: Vec<RatingRow>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rating_value_bounds() {
        assert!(RatingValue::new(1).is_ok());
        assert!(RatingValue::new(5).is_ok());
        assert!(matches!(
            RatingValue::new(0),
            Err(AppError::InvalidRatingValue(0))
        ));
        assert!(matches!(
            RatingValue::new(6),
            Err(AppError::InvalidRatingValue(6))
        ));
    }

    #[test]
    fn test_rating_value_rejected_during_deserialization() {
        let parsed: Result<RatingValue, _> = serde_json::from_str("9");
        assert!(parsed.is_err());
        let parsed: RatingValue = serde_json::from_str("4").unwrap();
        assert_eq!(parsed.get(), 4);
    }

    #[test]
    fn test_rating_serializes_value_as_rating() {
        let rating = Rating {
            user_id: 1,
            movie_id: 10,
            value: RatingValue::new(3).unwrap(),
            rated_at: DateTime::from_timestamp(0, 0).unwrap(),
        };
        let json = serde_json::to_value(&rating).unwrap();
        assert_eq!(json["rating"], 3);
        assert_eq!(json["movie_id"], 10);
    }

    #[test]
    fn test_row_with_out_of_range_value_is_rejected() {
        let row = RatingRow {
            user_id: 1,
            movie_id: 2,
            rating: 11,
            rated_at: Utc::now(),
        };
        assert!(Rating::try_from(row).is_err());
    }
}
