/// Read-through caching over an optional [`Cache`](crate::db::Cache).
///
/// Looks `$key` up when a cache is configured and returns the hit. On a miss,
/// a cache error, or when `$cache` is `None`, awaits `$block`, hands the value
/// to the background writer, and returns it. Cache failures are logged and
/// never surface as errors.
///
/// # Arguments
/// * `$cache`: an `Option<&Cache>`.
/// * `$key`: the [`CacheKey`](crate::db::CacheKey) to read and write.
/// * `$ttl`: time-to-live in seconds.
/// * `$block`: a future resolving to `AppResult<T>`.
#[macro_export]
macro_rules! cached {
    ($cache:expr, $key:expr, $ttl:expr, $block:expr) => {{
        let cache: Option<&$crate::db::Cache> = $cache;
        let hit = match cache {
            Some(cache) => match cache.get_from_cache(&$key).await {
                Ok(hit) => hit,
                Err(e) => {
                    tracing::warn!(error = %e, key = %$key, "Cache read failed, computing value");
                    None
                }
            },
            None => None,
        };

        match hit {
            Some(value) => Ok(value),
            None => match $block.await {
                Ok(value) => {
                    if let Some(cache) = cache {
                        cache.set_in_background(&$key, &value, $ttl);
                    }
                    Ok(value)
                }
                Err(e) => Err(e),
            },
        }
    }};
}
