use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::{ArcSwap, ArcSwapOption};
use tokio::sync::Mutex;

use crate::{
    db::{ModelFileStore, RegistryPointer},
    error::{AppError, AppResult},
    models::ModelArtifact,
};

/// Holds the active model and swaps it atomically.
///
/// Readers load the active `Arc` without taking a lock and keep serving from
/// it for the whole request, so a publish or rollback never changes the model
/// underneath an in-flight request and never makes a reader wait. Publishes
/// and rollbacks are serialized with each other.
pub struct ModelRegistry {
    active: ArcSwap<ModelArtifact>,
    previous: ArcSwapOption<ModelArtifact>,
    writer: Mutex<()>,
    next_version: AtomicU64,
    files: Option<ModelFileStore>,
}

impl ModelRegistry {
    /// A registry serving `bootstrap` with nothing to roll back to
    pub fn new(bootstrap: ModelArtifact) -> Self {
        Self::restored(bootstrap, None)
    }

    /// A registry resuming from previously persisted artifacts
    pub fn restored(active: ModelArtifact, previous: Option<ModelArtifact>) -> Self {
        let highest = previous
            .as_ref()
            .map_or(active.version, |p| p.version.max(active.version));

        Self {
            active: ArcSwap::from_pointee(active),
            previous: ArcSwapOption::new(previous.map(Arc::new)),
            writer: Mutex::new(()),
            next_version: AtomicU64::new(highest + 1),
            files: None,
        }
    }

    /// Persist published artifacts and the active pointer under `files`
    pub fn with_files(mut self, files: ModelFileStore) -> Self {
        self.files = Some(files);
        self
    }

    /// Like `with_files`, and also skips every version already stored in
    /// `files`
    pub async fn attach_files(self, files: ModelFileStore) -> AppResult<Self> {
        if let Some(&highest) = files.versions().await?.last() {
            self.reserve_through(highest);
        }
        Ok(self.with_files(files))
    }

    /// Never hand out `version` or anything below it again.
    ///
    /// Artifacts retired by a rollback stay on disk without being active or
    /// previous, so a restart must skip past them as well.
    pub fn reserve_through(&self, version: u64) {
        self.next_version.fetch_max(version + 1, Ordering::SeqCst);
    }

    pub fn active(&self) -> Arc<ModelArtifact> {
        self.active.load_full()
    }

    pub fn previous(&self) -> Option<Arc<ModelArtifact>> {
        self.previous.load_full()
    }

    /// Reserves a version number strictly above anything handed out before
    pub fn next_version(&self) -> u64 {
        self.next_version.fetch_add(1, Ordering::SeqCst)
    }

    /// Makes `candidate` the active model.
    ///
    /// The candidate must be structurally valid and newer than the active
    /// model, and must reach disk (when persistence is configured) before it
    /// is swapped in. On any rejection the active model is unchanged.
    pub async fn publish(&self, candidate: ModelArtifact) -> AppResult<Arc<ModelArtifact>> {
        let _writer = self.writer.lock().await;

        if let Err(reason) = candidate.check_structure() {
            tracing::warn!(version = candidate.version, %reason, "Publish rejected");
            return Err(AppError::PublishRejected(reason));
        }

        let active_version = self.active.load().version;
        if candidate.version <= active_version {
            let reason = format!(
                "version {} is not newer than active version {}",
                candidate.version, active_version
            );
            tracing::warn!(version = candidate.version, %reason, "Publish rejected");
            return Err(AppError::PublishRejected(reason));
        }

        if let Some(files) = &self.files {
            files.save(&candidate).await.map_err(|e| {
                tracing::warn!(version = candidate.version, error = %e, "Publish rejected");
                AppError::PublishRejected(format!("could not persist artifact: {}", e))
            })?;
        }

        let candidate = Arc::new(candidate);
        let retired = self.active.swap(Arc::clone(&candidate));
        self.previous.store(Some(Arc::clone(&retired)));

        tracing::info!(
            version = candidate.version,
            previous = retired.version,
            "Model published"
        );

        self.persist_pointer(&candidate, Some(&retired)).await;
        Ok(candidate)
    }

    /// Restores the model that was active before the last publish.
    ///
    /// Only one step back is kept: after a rollback there is nothing further
    /// to roll back to until the next publish.
    pub async fn rollback(&self) -> AppResult<Arc<ModelArtifact>> {
        let _writer = self.writer.lock().await;

        let Some(target) = self.previous.load_full() else {
            return Err(AppError::NotFound(
                "no previous model to roll back to".to_string(),
            ));
        };

        if let Some(files) = &self.files {
            // Bootstrap models are never published, so they have no file yet
            if target.is_bootstrap() {
                files.save(&target).await?;
            }
            files
                .write_pointer(RegistryPointer {
                    active: target.version,
                    previous: None,
                })
                .await?;
        }

        let current = self.active.swap(Arc::clone(&target));
        self.previous.store(None);

        tracing::info!(
            version = target.version,
            replaced = current.version,
            "Model rolled back"
        );
        Ok(target)
    }

    async fn persist_pointer(&self, active: &ModelArtifact, previous: Option<&ModelArtifact>) {
        let Some(files) = &self.files else {
            return;
        };

        let previous = previous.filter(|p| !p.is_bootstrap()).map(|p| p.version);
        let pointer = RegistryPointer {
            active: active.version,
            previous,
        };
        if let Err(e) = files.write_pointer(pointer).await {
            tracing::error!(error = %e, "Failed to write registry pointer");
            return;
        }

        let keep: Vec<u64> = std::iter::once(active.version).chain(previous).collect();
        match files.prune(&keep).await {
            Ok(0) => {}
            Ok(removed) => tracing::debug!(removed, "Pruned retired model files"),
            Err(e) => tracing::warn!(error = %e, "Failed to prune model files"),
        }
    }
}
