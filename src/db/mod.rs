pub mod memory;
pub mod model_files;
pub mod movies;
pub mod postgres;
pub mod ratings;
pub mod redis;

pub use memory::InMemoryRatingStore;
pub use model_files::{ModelFileStore, RegistryPointer};
pub use postgres::{create_pool, PgRatingStore};
pub use ratings::RatingStore;
pub use redis::create_redis_client;
pub use redis::Cache;
pub use redis::CacheKey;
