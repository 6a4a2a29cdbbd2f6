//! Permission resolution. One resolver is constructed per logical request;
//! its cache must never outlive that request, so a permission change is
//! always visible on the next one.

use super::{ActionKind, ActionSet, DefaultPolicy, Principal, RoleId, RoleRegistry};
use crate::routing::InboxRouter;
use crate::storage::{Folder, FolderProvider, PermissionStore};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use uuid::Uuid;

type CacheKey = (Uuid, ActionKind, String);

/// Request-scoped memo of `(folder, action, principal)` decisions. Listing,
/// counting and query scoping each re-derive the accessible set, so repeated
/// checks within one request must be answered from here.
#[derive(Default)]
pub struct ResolverCache {
    entries: Mutex<HashMap<CacheKey, bool>>,
}

impl ResolverCache {
    fn get(&self, key: &CacheKey) -> Option<bool> {
        self.entries.lock().get(key).copied()
    }

    fn put(&self, key: CacheKey, allowed: bool) {
        self.entries.lock().insert(key, allowed);
    }

    fn clear(&self) {
        self.entries.lock().clear();
    }
}

/// Decides whether a principal may perform an action on a folder.
pub struct AccessResolver {
    folders: Arc<dyn FolderProvider>,
    perms: Arc<dyn PermissionStore>,
    registry: Arc<RoleRegistry>,
    inbox: Arc<InboxRouter>,
    cache: ResolverCache,
}

impl AccessResolver {
    pub fn new(
        folders: Arc<dyn FolderProvider>,
        perms: Arc<dyn PermissionStore>,
        registry: Arc<RoleRegistry>,
        inbox: Arc<InboxRouter>,
    ) -> Self {
        Self {
            folders,
            perms,
            registry,
            inbox,
            cache: ResolverCache::default(),
        }
    }

    /// Whether `principal` may perform `action` on `folder`.
    ///
    /// Superusers pass unconditionally, explicit deny-all entries included.
    /// Unknown folder ids fail closed.
    pub fn can_perform(&self, principal: &Principal, folder: Uuid, action: ActionKind) -> bool {
        if principal.superuser {
            return true;
        }
        let key = (folder, action, principal.id.clone());
        if let Some(hit) = self.cache.get(&key) {
            return hit;
        }
        let allowed = self.resolve(principal, folder, action);
        tracing::debug!(
            principal = %principal.id,
            %folder,
            ?action,
            allowed,
            "resolved folder access"
        );
        self.cache.put(key, allowed);
        allowed
    }

    fn resolve(&self, principal: &Principal, folder: Uuid, action: ActionKind) -> bool {
        if self.folders.get(folder).is_none() {
            return false;
        }
        // a principal can always view the folder its own uploads land in
        if action == ActionKind::View && self.inbox.destination_for(principal) == Some(folder) {
            return true;
        }
        // union over roles: first allowing role wins
        principal.roles.iter().any(|role| {
            match self.perms.entry(folder, role) {
                // explicit entry, possibly empty: the entry alone decides
                Some(actions) => actions.contains(&action),
                // no entry: the role's default policy decides
                None => self.registry.policy(role) == DefaultPolicy::FullAccessByDefault,
            }
        })
    }

    /// Every folder on which `principal` holds `action`.
    pub fn accessible_folders(&self, principal: &Principal, action: ActionKind) -> BTreeSet<Uuid> {
        self.folders
            .list()
            .into_iter()
            .filter(|f| self.can_perform(principal, f.id, action))
            .map(|f| f.id)
            .collect()
    }

    /// Upsert the explicit entry for `(folder, role)`. An empty set is a
    /// valid explicit deny-all. Invalidation is coarse: a stale read is
    /// strictly worse than an over-eager clear.
    pub fn set_permissions(&self, folder: Uuid, role: &RoleId, actions: ActionSet) {
        self.perms.set_entry(folder, role, actions);
        self.cache.clear();
    }

    /// Remove the explicit entry, reverting the role to its default policy.
    pub fn remove_permissions(&self, folder: Uuid, role: &RoleId) {
        self.perms.remove_entry(folder, role);
        self.cache.clear();
    }

    /// Roles explicitly configured on the folder, empty entries included, so
    /// callers can tell "configured deny-all" from "never configured".
    pub fn get_all_permissions(&self, folder: Uuid) -> BTreeMap<RoleId, ActionSet> {
        self.perms.entries_for(folder)
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn folder(&self, id: Uuid) -> Option<Folder> {
        self.folders.get(id)
    }
}
