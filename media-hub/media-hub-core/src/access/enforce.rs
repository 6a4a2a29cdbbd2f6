//! Enforcement helpers wrapping every disclosure and mutation surface.
//! Call sites never reimplement the allow/deny rule inline; everything goes
//! through the same resolver, so one request sees one consistent
//! accessible set.

use super::{ActionKind, Principal};
use crate::access::AccessResolver;
use crate::error::DenyReason;
use crate::storage::{CountKey, Folder, ItemQuery, ItemStore};
use std::collections::BTreeMap;

pub struct AccessEnforcer<'a> {
    resolver: &'a AccessResolver,
}

impl<'a> AccessEnforcer<'a> {
    pub fn new(resolver: &'a AccessResolver) -> Self {
        Self { resolver }
    }

    /// Filter a raw folder list down to what the principal may view.
    /// Superusers are an identity passthrough, not an all-true loop.
    pub fn filter_folder_list(&self, principal: &Principal, folders: Vec<Folder>) -> Vec<Folder> {
        if principal.superuser {
            return folders;
        }
        folders
            .into_iter()
            .filter(|f| self.resolver.can_perform(principal, f.id, ActionKind::View))
            .collect()
    }

    /// Filter raw per-folder item counts. The uncategorized bucket is shown
    /// only to principals with no viewable folder at all, and then scoped to
    /// their own authored items.
    pub fn filter_folder_counts(
        &self,
        principal: &Principal,
        counts: BTreeMap<CountKey, u64>,
        items: &dyn ItemStore,
    ) -> BTreeMap<CountKey, u64> {
        if principal.superuser {
            return counts;
        }
        let visible = self.resolver.accessible_folders(principal, ActionKind::View);
        let mut out = BTreeMap::new();
        for (key, count) in counts {
            match key {
                CountKey::Folder(id) => {
                    if visible.contains(&id) {
                        out.insert(key, count);
                    }
                }
                CountKey::Uncategorized => {
                    if visible.is_empty() {
                        out.insert(key, items.count_uncategorized_by_author(&principal.id));
                    }
                }
            }
        }
        out
    }

    /// Rewrite a caller-supplied item query so it cannot disclose folders
    /// outside the principal's accessible set.
    pub fn scope_item_query(&self, principal: &Principal, query: ItemQuery) -> ItemQuery {
        if principal.superuser {
            return query;
        }
        let visible = self.resolver.accessible_folders(principal, ActionKind::View);
        match query.folders {
            Some(requested) => ItemQuery {
                folders: Some(
                    requested
                        .into_iter()
                        .filter(|f| visible.contains(f))
                        .collect(),
                ),
                ..query
            },
            None if visible.is_empty() => ItemQuery {
                author: Some(principal.id.clone()),
                ..query
            },
            None => ItemQuery {
                folders: Some(visible.into_iter().collect()),
                ..query
            },
        }
    }

    /// Gate moving an item into `destination`. Destination-only: the source
    /// folder is irrelevant, and uncategorizing needs no permission.
    pub fn gate_move(&self, principal: &Principal, destination: Option<uuid::Uuid>) -> bool {
        match destination {
            None => true,
            Some(folder) => self.resolver.can_perform(principal, folder, ActionKind::MoveTo),
        }
    }

    /// Gate deleting a folder. The protected check comes first and is
    /// unconditional, independent of any role or action entry.
    pub fn gate_delete(&self, principal: &Principal, folder: uuid::Uuid) -> Result<(), DenyReason> {
        let target = self.resolver.folder(folder).ok_or(DenyReason::NotFound)?;
        if target.protected {
            return Err(DenyReason::Protected);
        }
        if self.resolver.can_perform(principal, folder, ActionKind::Delete) {
            Ok(())
        } else {
            Err(DenyReason::Permission)
        }
    }

    /// Gate renaming a folder. Same protected invariant as delete; the
    /// `Delete` action doubles as the folder-management permission.
    pub fn gate_rename(&self, principal: &Principal, folder: uuid::Uuid) -> Result<(), DenyReason> {
        self.gate_delete(principal, folder)
    }
}
