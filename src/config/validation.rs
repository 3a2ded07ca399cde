use super::models::{CacheBackend, Config};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("downloader.max_attempts must be at least 1")]
    ZeroAttempts,

    #[error("downloader.max_concurrent_downloads must be at least 1")]
    ZeroConcurrency,

    #[error("combined.worker_pool_size must be at least 1")]
    ZeroWorkerPool,

    #[error("cache.write_budget must be positive")]
    ZeroWriteBudget,

    #[error("Disk cache requires a non-empty {field}")]
    MissingDiskSetting { field: &'static str },

    #[error("Retry backoff {base_ms}ms exceeds its cap of {max_ms}ms")]
    BackoffExceedsCap { base_ms: u64, max_ms: u64 },
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_downloader(config)?;
    validate_cache(config)?;

    if config.combined.worker_pool_size == 0 {
        return Err(ValidationError::ZeroWorkerPool);
    }

    Ok(())
}

fn validate_downloader(config: &Config) -> Result<(), ValidationError> {
    let downloader = &config.downloader;

    if downloader.max_attempts == 0 {
        return Err(ValidationError::ZeroAttempts);
    }
    if downloader.max_concurrent_downloads == 0 {
        return Err(ValidationError::ZeroConcurrency);
    }
    if downloader.retry_backoff_ms > downloader.max_retry_backoff_ms {
        return Err(ValidationError::BackoffExceedsCap {
            base_ms: downloader.retry_backoff_ms,
            max_ms: downloader.max_retry_backoff_ms,
        });
    }

    Ok(())
}

/// The budget only matters when something is cached
fn validate_cache(config: &Config) -> Result<(), ValidationError> {
    let cache = &config.cache;

    if cache.backend == CacheBackend::None {
        return Ok(());
    }
    if cache.write_budget.as_u64() == 0 {
        return Err(ValidationError::ZeroWriteBudget);
    }
    if cache.backend == CacheBackend::Disk {
        if cache.path.as_os_str().is_empty() {
            return Err(ValidationError::MissingDiskSetting { field: "cache.path" });
        }
        if cache.partition.trim().is_empty() {
            return Err(ValidationError::MissingDiskSetting {
                field: "cache.partition",
            });
        }
    }

    Ok(())
}
