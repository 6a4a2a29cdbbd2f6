//! Editorial workflow: the two protected system folders (needs-review and
//! approved), the review/approval transitions, and the cached pending count.

#[cfg(test)]
mod tests;

use crate::access::{AccessEnforcer, AccessResolver, Principal};
use crate::error::DenyReason;
use crate::events::{Event, EventBus};
use crate::storage::{FolderProvider, ItemStore};
use anyhow::Result;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// How long a computed review count stays fresh without an explicit bust.
pub const REVIEW_COUNT_TTL: Duration = Duration::from_secs(3600);

const WORKFLOW_PARENT_NAME: &str = "Workflow";
const NEEDS_REVIEW_NAME: &str = "Needs Review";
const APPROVED_NAME: &str = "Approved";

/// Stable ids of the workflow system folders. Identity lives here, not in
/// the (theoretically renamable) display names.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SystemFolderIds {
    pub parent: Option<Uuid>,
    pub needs_review: Option<Uuid>,
    pub approved: Option<Uuid>,
    pub approved_override: Option<Uuid>,
}

/// Shared, optionally persisted record of the system folder ids.
pub struct SystemFolders {
    inner: RwLock<SystemFolderIds>,
    path: Option<PathBuf>,
}

impl SystemFolders {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(SystemFolderIds::default()),
            path: None,
        }
    }

    /// Load from `path` if present; ids are written back on every change.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let ids = if path.exists() {
            let data = std::fs::read_to_string(&path)?;
            serde_json::from_str(&data)?
        } else {
            SystemFolderIds::default()
        };
        Ok(Self {
            inner: RwLock::new(ids),
            path: Some(path),
        })
    }

    pub fn parent(&self) -> Option<Uuid> {
        self.inner.read().parent
    }

    pub fn needs_review(&self) -> Option<Uuid> {
        self.inner.read().needs_review
    }

    pub fn approved(&self) -> Option<Uuid> {
        self.inner.read().approved
    }

    pub fn approved_override(&self) -> Option<Uuid> {
        self.inner.read().approved_override
    }

    /// Whether `id` is one of the two workflow intake folders, which always
    /// accept routed uploads without an `UploadTo` check.
    pub fn is_system_folder(&self, id: Uuid) -> bool {
        let ids = self.inner.read();
        ids.needs_review == Some(id) || ids.approved == Some(id)
    }

    fn update(&self, apply: impl FnOnce(&mut SystemFolderIds)) {
        let mut ids = self.inner.write();
        apply(&mut ids);
        if let Some(path) = &self.path {
            match serde_json::to_vec_pretty(&*ids) {
                Ok(bytes) => {
                    if let Err(err) = std::fs::write(path, bytes) {
                        tracing::warn!(?path, %err, "failed to persist workflow folder ids");
                    }
                }
                Err(err) => tracing::warn!(%err, "failed to serialize workflow folder ids"),
            }
        }
    }
}

impl Default for SystemFolders {
    fn default() -> Self {
        Self::new()
    }
}

/// TTL-cached count of items pending review. Invalidated eagerly by every
/// mutation that can change needs-review membership.
#[derive(Default)]
pub struct ReviewCounter {
    cached: Mutex<Option<(u64, Instant)>>,
}

impl ReviewCounter {
    pub fn invalidate(&self) {
        *self.cached.lock() = None;
    }

    fn fresh(&self, ttl: Duration) -> Option<u64> {
        let cached = self.cached.lock();
        match *cached {
            Some((count, at)) if at.elapsed() < ttl => Some(count),
            _ => None,
        }
    }

    fn put(&self, count: u64) {
        *self.cached.lock() = Some((count, Instant::now()));
    }
}

/// Per-batch result of a bulk transition. Items succeed and fail
/// independently; one bad item never aborts the rest.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BulkOutcome {
    pub succeeded: usize,
    pub failed: usize,
}

pub struct WorkflowManager {
    folders: Arc<dyn FolderProvider>,
    items: Arc<dyn ItemStore>,
    system: Arc<SystemFolders>,
    review: Arc<ReviewCounter>,
    events: EventBus,
    ttl: Duration,
}

impl WorkflowManager {
    pub fn new(
        folders: Arc<dyn FolderProvider>,
        items: Arc<dyn ItemStore>,
        system: Arc<SystemFolders>,
        review: Arc<ReviewCounter>,
        events: EventBus,
    ) -> Self {
        Self {
            folders,
            items,
            system,
            review,
            events,
            ttl: REVIEW_COUNT_TTL,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Create the protected workflow parent and its two children if their
    /// stored ids no longer resolve. Safe to call any number of times.
    pub fn ensure_system_folders(&self) -> Result<()> {
        let parent = match self.system.parent().filter(|id| self.folders.get(*id).is_some()) {
            Some(id) => id,
            None => {
                let id = self.folders.create(WORKFLOW_PARENT_NAME, None)?;
                self.folders.set_protected(id, true)?;
                self.system.update(|ids| ids.parent = Some(id));
                id
            }
        };
        if self
            .system
            .needs_review()
            .filter(|id| self.folders.get(*id).is_some())
            .is_none()
        {
            let id = self.folders.create(NEEDS_REVIEW_NAME, Some(parent))?;
            self.folders.set_protected(id, true)?;
            self.system.update(|ids| ids.needs_review = Some(id));
        }
        if self
            .system
            .approved()
            .filter(|id| self.folders.get(*id).is_some())
            .is_none()
        {
            let id = self.folders.create(APPROVED_NAME, Some(parent))?;
            self.folders.set_protected(id, true)?;
            self.system.update(|ids| ids.approved = Some(id));
        }
        Ok(())
    }

    /// Move an item into the needs-review folder. Returns `false` when the
    /// item or the folder does not exist; never an error.
    pub fn mark_needs_review(&self, item: Uuid) -> bool {
        let Some(folder) = self
            .system
            .needs_review()
            .filter(|id| self.folders.get(*id).is_some())
        else {
            return false;
        };
        if self.items.set_folder(item, Some(folder)).is_err() {
            return false;
        }
        self.review.invalidate();
        self.events.send(Event::MarkedNeedsReview { item, folder });
        true
    }

    /// Move an item into the effective approved folder.
    pub fn mark_approved(&self, item: Uuid) -> bool {
        let Some(folder) = self.approved_folder() else {
            return false;
        };
        if self.items.set_folder(item, Some(folder)).is_err() {
            return false;
        }
        self.review.invalidate();
        self.events.send(Event::Approved { item, folder });
        true
    }

    /// The admin override folder when it still exists, else the system
    /// approved folder. A dangling override falls back silently.
    pub fn approved_folder(&self) -> Option<Uuid> {
        if let Some(id) = self.system.approved_override() {
            if self.folders.get(id).is_some() {
                return Some(id);
            }
            tracing::debug!(%id, "approved override folder is gone, using default");
        }
        self.system
            .approved()
            .filter(|id| self.folders.get(*id).is_some())
    }

    pub fn set_approved_override(&self, folder: Option<Uuid>) {
        self.system.update(|ids| ids.approved_override = folder);
    }

    /// Count of items pending review, served from cache within the TTL
    /// unless `force_refresh`.
    pub fn review_count(&self, force_refresh: bool) -> u64 {
        if !force_refresh {
            if let Some(count) = self.review.fresh(self.ttl) {
                return count;
            }
        }
        let count = self
            .system
            .needs_review()
            .map(|folder| self.items.count_in_folder(folder))
            .unwrap_or(0);
        self.review.put(count);
        count
    }

    pub fn invalidate_review_count(&self) {
        self.review.invalidate();
    }

    /// Assign a batch of items to `destination`. The destination permission
    /// is checked once up front; a denial rejects the whole batch before any
    /// item moves. Per-item failures are independent.
    pub fn bulk_assign(
        &self,
        items: &[Uuid],
        destination: Option<Uuid>,
        principal: &Principal,
        resolver: &AccessResolver,
    ) -> Result<BulkOutcome, DenyReason> {
        let permitted = match destination {
            Some(id) if self.system.is_system_folder(id) => true,
            other => AccessEnforcer::new(resolver).gate_move(principal, other),
        };
        if !permitted {
            return Err(DenyReason::Permission);
        }
        let mut outcome = BulkOutcome::default();
        for &item in items {
            match self.items.set_folder(item, destination) {
                Ok(()) => outcome.succeeded += 1,
                Err(err) => {
                    tracing::warn!(%item, %err, "bulk assign skipped item");
                    outcome.failed += 1;
                }
            }
        }
        self.review.invalidate();
        Ok(outcome)
    }

    /// Approve a batch of items into the effective approved folder.
    pub fn bulk_approve(
        &self,
        items: &[Uuid],
        principal: &Principal,
        resolver: &AccessResolver,
    ) -> Result<BulkOutcome, DenyReason> {
        let Some(destination) = self.approved_folder() else {
            // no valid destination: nothing moves, nothing throws
            return Ok(BulkOutcome {
                succeeded: 0,
                failed: items.len(),
            });
        };
        if !self.system.is_system_folder(destination)
            && !AccessEnforcer::new(resolver).gate_move(principal, Some(destination))
        {
            return Err(DenyReason::Permission);
        }
        let mut outcome = BulkOutcome::default();
        for &item in items {
            match self.items.set_folder(item, Some(destination)) {
                Ok(()) => {
                    self.events.send(Event::Approved {
                        item,
                        folder: destination,
                    });
                    outcome.succeeded += 1;
                }
                Err(err) => {
                    tracing::warn!(%item, %err, "bulk approve skipped item");
                    outcome.failed += 1;
                }
            }
        }
        self.review.invalidate();
        Ok(outcome)
    }
}
