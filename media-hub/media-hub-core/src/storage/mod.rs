//! Storage seams consumed by the access and workflow components, plus the
//! JSON-file-backed `MemoryStore` used by the server and tests. State is
//! loaded once at startup and written back on every mutation.

#[cfg(test)]
mod tests;

use crate::access::{ActionSet, RoleId};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use uuid::Uuid;

const STATE_FILE: &str = "state.json";

/// A node in the folder tree. Protected folders are system folders that can
/// never be deleted or renamed, regardless of who asks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    pub name: String,
    #[serde(default)]
    pub protected: bool,
}

/// A stored media item. Its editorial state is nothing more than which
/// folder it sits in, if any.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: Uuid,
    pub author: String,
    pub folder_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Item {
    pub fn new(author: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            author: author.into(),
            folder_id: None,
            created_at: Utc::now(),
        }
    }
}

/// Bucket key for per-folder item counts. `Uncategorized` is the sentinel
/// for items with no folder.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CountKey {
    Folder(Uuid),
    Uncategorized,
}

/// Caller-supplied item query. The enforcer rewrites it before execution so
/// results never leak folders the principal cannot view.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemQuery {
    pub folders: Option<Vec<Uuid>>,
    pub author: Option<String>,
}

/// Folder hierarchy provider.
pub trait FolderProvider: Send + Sync {
    fn get(&self, id: Uuid) -> Option<Folder>;
    fn list(&self) -> Vec<Folder>;
    fn create(&self, name: &str, parent: Option<Uuid>) -> Result<Uuid>;
    fn rename(&self, id: Uuid, name: &str) -> Result<()>;
    fn delete(&self, id: Uuid) -> Result<()>;
    fn set_protected(&self, id: Uuid, protected: bool) -> Result<()>;
}

/// Per-folder, per-role explicit permission entries.
///
/// `entry` distinguishes three states: `None` means the role was never
/// configured for the folder (defer to its default policy), `Some(empty)` is
/// an explicit deny-all, `Some(nonempty)` an explicit allow list. Every
/// implementation must preserve that distinction through persistence.
pub trait PermissionStore: Send + Sync {
    fn entry(&self, folder: Uuid, role: &RoleId) -> Option<ActionSet>;
    fn set_entry(&self, folder: Uuid, role: &RoleId, actions: ActionSet);
    fn remove_entry(&self, folder: Uuid, role: &RoleId);
    /// All roles with an explicit entry on the folder, empty entries included.
    fn entries_for(&self, folder: Uuid) -> BTreeMap<RoleId, ActionSet>;
}

/// Item storage and counting.
pub trait ItemStore: Send + Sync {
    fn item(&self, id: Uuid) -> Option<Item>;
    fn insert(&self, item: Item);
    fn set_folder(&self, id: Uuid, folder: Option<Uuid>) -> Result<()>;
    fn count_in_folder(&self, folder: Uuid) -> u64;
    fn count_uncategorized_by_author(&self, author: &str) -> u64;
    fn counts_by_folder(&self) -> BTreeMap<CountKey, u64>;
    fn query(&self, query: &ItemQuery) -> Vec<Item>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreState {
    folders: HashMap<Uuid, Folder>,
    permissions: HashMap<Uuid, BTreeMap<RoleId, ActionSet>>,
    items: HashMap<Uuid, Item>,
}

/// In-memory store for folders, permission entries and items, optionally
/// persisted as a single JSON state file in a data directory.
pub struct MemoryStore {
    state: RwLock<StoreState>,
    dir: Option<PathBuf>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            dir: None,
        }
    }

    /// Open a store backed by `dir`, loading any previously persisted state.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(STATE_FILE);
        let state = if path.exists() {
            let data = std::fs::read_to_string(&path)?;
            serde_json::from_str(&data)?
        } else {
            StoreState::default()
        };
        Ok(Self {
            state: RwLock::new(state),
            dir: Some(dir),
        })
    }

    pub fn data_dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    fn persist(&self, state: &StoreState) {
        let Some(dir) = &self.dir else { return };
        let path = dir.join(STATE_FILE);
        match serde_json::to_vec_pretty(state) {
            Ok(bytes) => {
                if let Err(err) = std::fs::write(&path, bytes) {
                    tracing::warn!(?path, %err, "failed to persist store state");
                }
            }
            Err(err) => tracing::warn!(%err, "failed to serialize store state"),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FolderProvider for MemoryStore {
    fn get(&self, id: Uuid) -> Option<Folder> {
        self.state.read().folders.get(&id).cloned()
    }

    fn list(&self) -> Vec<Folder> {
        let mut folders: Vec<Folder> = self.state.read().folders.values().cloned().collect();
        folders.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        folders
    }

    fn create(&self, name: &str, parent: Option<Uuid>) -> Result<Uuid> {
        let mut state = self.state.write();
        if let Some(parent) = parent {
            if !state.folders.contains_key(&parent) {
                return Err(anyhow!("parent folder {parent} not found"));
            }
        }
        let id = Uuid::new_v4();
        state.folders.insert(
            id,
            Folder {
                id,
                parent_id: parent,
                name: name.to_string(),
                protected: false,
            },
        );
        self.persist(&state);
        Ok(id)
    }

    fn rename(&self, id: Uuid, name: &str) -> Result<()> {
        let mut state = self.state.write();
        let folder = state
            .folders
            .get_mut(&id)
            .ok_or_else(|| anyhow!("folder {id} not found"))?;
        if folder.protected {
            return Err(anyhow!("folder {id} is protected"));
        }
        folder.name = name.to_string();
        self.persist(&state);
        Ok(())
    }

    fn delete(&self, id: Uuid) -> Result<()> {
        let mut state = self.state.write();
        let folder = state
            .folders
            .get(&id)
            .ok_or_else(|| anyhow!("folder {id} not found"))?;
        if folder.protected {
            return Err(anyhow!("folder {id} is protected"));
        }
        let parent = folder.parent_id;
        state.folders.remove(&id);
        // children move up a level, contained items become uncategorized
        for child in state.folders.values_mut() {
            if child.parent_id == Some(id) {
                child.parent_id = parent;
            }
        }
        for item in state.items.values_mut() {
            if item.folder_id == Some(id) {
                item.folder_id = None;
            }
        }
        state.permissions.remove(&id);
        self.persist(&state);
        Ok(())
    }

    fn set_protected(&self, id: Uuid, protected: bool) -> Result<()> {
        let mut state = self.state.write();
        let folder = state
            .folders
            .get_mut(&id)
            .ok_or_else(|| anyhow!("folder {id} not found"))?;
        folder.protected = protected;
        self.persist(&state);
        Ok(())
    }
}

impl PermissionStore for MemoryStore {
    fn entry(&self, folder: Uuid, role: &RoleId) -> Option<ActionSet> {
        self.state
            .read()
            .permissions
            .get(&folder)
            .and_then(|roles| roles.get(role))
            .cloned()
    }

    fn set_entry(&self, folder: Uuid, role: &RoleId, actions: ActionSet) {
        let mut state = self.state.write();
        state
            .permissions
            .entry(folder)
            .or_default()
            .insert(role.clone(), actions);
        self.persist(&state);
    }

    fn remove_entry(&self, folder: Uuid, role: &RoleId) {
        let mut state = self.state.write();
        if let Some(roles) = state.permissions.get_mut(&folder) {
            roles.remove(role);
            if roles.is_empty() {
                state.permissions.remove(&folder);
            }
        }
        self.persist(&state);
    }

    fn entries_for(&self, folder: Uuid) -> BTreeMap<RoleId, ActionSet> {
        self.state
            .read()
            .permissions
            .get(&folder)
            .cloned()
            .unwrap_or_default()
    }
}

impl ItemStore for MemoryStore {
    fn item(&self, id: Uuid) -> Option<Item> {
        self.state.read().items.get(&id).cloned()
    }

    fn insert(&self, item: Item) {
        let mut state = self.state.write();
        state.items.insert(item.id, item);
        self.persist(&state);
    }

    fn set_folder(&self, id: Uuid, folder: Option<Uuid>) -> Result<()> {
        let mut state = self.state.write();
        if let Some(folder) = folder {
            if !state.folders.contains_key(&folder) {
                return Err(anyhow!("folder {folder} not found"));
            }
        }
        let item = state
            .items
            .get_mut(&id)
            .ok_or_else(|| anyhow!("item {id} not found"))?;
        item.folder_id = folder;
        self.persist(&state);
        Ok(())
    }

    fn count_in_folder(&self, folder: Uuid) -> u64 {
        self.state
            .read()
            .items
            .values()
            .filter(|i| i.folder_id == Some(folder))
            .count() as u64
    }

    fn count_uncategorized_by_author(&self, author: &str) -> u64 {
        self.state
            .read()
            .items
            .values()
            .filter(|i| i.folder_id.is_none() && i.author == author)
            .count() as u64
    }

    fn counts_by_folder(&self) -> BTreeMap<CountKey, u64> {
        let state = self.state.read();
        let mut counts: BTreeMap<CountKey, u64> = state
            .folders
            .keys()
            .map(|id| (CountKey::Folder(*id), 0))
            .collect();
        for item in state.items.values() {
            let key = match item.folder_id {
                Some(folder) => CountKey::Folder(folder),
                None => CountKey::Uncategorized,
            };
            *counts.entry(key).or_insert(0) += 1;
        }
        counts
    }

    fn query(&self, query: &ItemQuery) -> Vec<Item> {
        let state = self.state.read();
        let mut items: Vec<Item> = state
            .items
            .values()
            .filter(|item| match &query.folders {
                Some(folders) => item
                    .folder_id
                    .map(|f| folders.contains(&f))
                    .unwrap_or(false),
                None => true,
            })
            .filter(|item| match &query.author {
                Some(author) => &item.author == author,
                None => true,
            })
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        items
    }
}
