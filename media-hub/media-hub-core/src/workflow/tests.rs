use super::*;
use crate::access::{ActionKind, ActionSet, DefaultPolicy, RoleId, RoleRegistry};
use crate::routing::InboxRouter;
use crate::storage::{Item, ItemQuery, MemoryStore, PermissionStore};
use tokio::sync::broadcast::error::TryRecvError;

struct Rig {
    store: Arc<MemoryStore>,
    registry: Arc<RoleRegistry>,
    system: Arc<SystemFolders>,
    review: Arc<ReviewCounter>,
    events: EventBus,
    workflow: WorkflowManager,
}

fn rig() -> Rig {
    let mut registry = RoleRegistry::new();
    registry.define("editor".into(), DefaultPolicy::FullAccessByDefault);
    registry.define("contributor".into(), DefaultPolicy::NoAccess);
    rig_with(Arc::new(MemoryStore::new()), registry)
}

fn rig_with(store: Arc<MemoryStore>, registry: RoleRegistry) -> Rig {
    let registry = Arc::new(registry);
    let system = Arc::new(SystemFolders::new());
    let review = Arc::new(ReviewCounter::default());
    let events = EventBus::new();
    let folders: Arc<dyn FolderProvider> = store.clone();
    let items: Arc<dyn ItemStore> = store.clone();
    let workflow = WorkflowManager::new(
        folders,
        items,
        system.clone(),
        review.clone(),
        events.clone(),
    );
    Rig {
        store,
        registry,
        system,
        review,
        events,
        workflow,
    }
}

impl Rig {
    fn resolver(&self) -> AccessResolver {
        let folders: Arc<dyn FolderProvider> = self.store.clone();
        let items: Arc<dyn ItemStore> = self.store.clone();
        let perms: Arc<dyn PermissionStore> = self.store.clone();
        let router = Arc::new(InboxRouter::new(
            folders.clone(),
            items,
            self.registry.clone(),
            self.system.clone(),
            self.review.clone(),
            self.events.clone(),
        ));
        AccessResolver::new(folders, perms, self.registry.clone(), router)
    }

    fn new_item(&self, author: &str) -> Uuid {
        let item = Item::new(author);
        let id = item.id;
        self.store.insert(item);
        id
    }

    fn contributor(&self) -> Principal {
        Principal::new("bob", [RoleId::from("contributor")])
    }
}

#[test]
fn ensure_system_folders_is_idempotent() {
    let r = rig();
    r.workflow.ensure_system_folders().unwrap();
    r.workflow.ensure_system_folders().unwrap();

    let folders = r.store.list();
    assert_eq!(folders.len(), 3);
    assert!(folders.iter().all(|f| f.protected));

    let parent = r.system.parent().unwrap();
    let review = r.store.get(r.system.needs_review().unwrap()).unwrap();
    let approved = r.store.get(r.system.approved().unwrap()).unwrap();
    assert_eq!(review.parent_id, Some(parent));
    assert_eq!(approved.parent_id, Some(parent));
}

#[test]
fn system_folders_refuse_delete_and_rename() {
    let r = rig();
    r.workflow.ensure_system_folders().unwrap();
    for folder in r.store.list() {
        assert!(r.store.delete(folder.id).is_err());
        assert!(r.store.rename(folder.id, "renamed").is_err());
    }
}

#[test]
fn mark_needs_review_moves_item_and_emits() {
    let r = rig();
    r.workflow.ensure_system_folders().unwrap();
    let review_folder = r.system.needs_review().unwrap();
    let item = r.new_item("bob");
    let mut rx = r.events.subscribe();

    assert!(r.workflow.mark_needs_review(item));
    assert_eq!(r.store.item(item).unwrap().folder_id, Some(review_folder));
    assert!(matches!(
        rx.try_recv(),
        Ok(Event::MarkedNeedsReview { folder, .. }) if folder == review_folder
    ));
}

#[test]
fn mark_transitions_fail_softly_without_folders() {
    let r = rig();
    let item = r.new_item("bob");
    // system folders were never created
    assert!(!r.workflow.mark_needs_review(item));
    assert!(!r.workflow.mark_approved(item));
    assert_eq!(r.store.item(item).unwrap().folder_id, None);
}

#[test]
fn mark_unknown_item_returns_false() {
    let r = rig();
    r.workflow.ensure_system_folders().unwrap();
    assert!(!r.workflow.mark_needs_review(Uuid::new_v4()));
}

#[test]
fn approved_override_wins_while_it_exists() {
    let r = rig();
    r.workflow.ensure_system_folders().unwrap();
    let custom = r.store.create("published", None).unwrap();
    r.workflow.set_approved_override(Some(custom));
    assert_eq!(r.workflow.approved_folder(), Some(custom));

    let item = r.new_item("bob");
    assert!(r.workflow.mark_approved(item));
    assert_eq!(r.store.item(item).unwrap().folder_id, Some(custom));

    // a dangling override falls back to the system folder silently
    r.store.delete(custom).unwrap();
    assert_eq!(r.workflow.approved_folder(), r.system.approved());
}

#[test]
fn review_count_is_cached_until_invalidated() {
    let r = rig();
    r.workflow.ensure_system_folders().unwrap();
    let item = r.new_item("bob");
    assert!(r.workflow.mark_needs_review(item));
    assert_eq!(r.workflow.review_count(false), 1);

    // a direct store write is invisible until the cache is busted
    let second = r.new_item("bob");
    r.store
        .set_folder(second, r.system.needs_review())
        .unwrap();
    assert_eq!(r.workflow.review_count(false), 1);

    r.workflow.invalidate_review_count();
    assert_eq!(r.workflow.review_count(false), 2);
}

#[test]
fn review_count_force_refresh_bypasses_cache() {
    let r = rig();
    r.workflow.ensure_system_folders().unwrap();
    assert_eq!(r.workflow.review_count(false), 0);
    let item = r.new_item("bob");
    r.store.set_folder(item, r.system.needs_review()).unwrap();
    assert_eq!(r.workflow.review_count(true), 1);
}

#[test]
fn review_count_expires_with_ttl() {
    let r = rig();
    r.workflow.ensure_system_folders().unwrap();
    let workflow = {
        let folders: Arc<dyn FolderProvider> = r.store.clone();
        let items: Arc<dyn ItemStore> = r.store.clone();
        WorkflowManager::new(
            folders,
            items,
            r.system.clone(),
            r.review.clone(),
            r.events.clone(),
        )
        .with_ttl(Duration::ZERO)
    };
    assert_eq!(workflow.review_count(false), 0);
    let item = r.new_item("bob");
    r.store.set_folder(item, r.system.needs_review()).unwrap();
    // zero TTL: every read recomputes
    assert_eq!(workflow.review_count(false), 1);
}

#[test]
fn marking_invalidates_the_cached_count() {
    let r = rig();
    r.workflow.ensure_system_folders().unwrap();
    assert_eq!(r.workflow.review_count(false), 0);
    let item = r.new_item("bob");
    assert!(r.workflow.mark_needs_review(item));
    assert_eq!(r.workflow.review_count(false), 1);

    assert!(r.workflow.mark_approved(item));
    assert_eq!(r.workflow.review_count(false), 0);
}

#[test]
fn bulk_approve_moves_each_item_independently() {
    let r = rig();
    r.workflow.ensure_system_folders().unwrap();
    let approved = r.system.approved().unwrap();
    let items = [r.new_item("bob"), r.new_item("bob"), Uuid::new_v4()];
    let resolver = r.resolver();
    let mut rx = r.events.subscribe();

    let outcome = r
        .workflow
        .bulk_approve(&items, &r.contributor(), &resolver)
        .unwrap();
    assert_eq!(outcome, BulkOutcome { succeeded: 2, failed: 1 });
    for item in &items[..2] {
        assert_eq!(r.store.item(*item).unwrap().folder_id, Some(approved));
    }
    assert!(matches!(rx.try_recv(), Ok(Event::Approved { .. })));
    assert!(matches!(rx.try_recv(), Ok(Event::Approved { .. })));
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
}

#[test]
fn bulk_approve_rejects_batch_on_denied_override() {
    let r = rig();
    r.workflow.ensure_system_folders().unwrap();
    let custom = r.store.create("published", None).unwrap();
    r.workflow.set_approved_override(Some(custom));
    let items = [r.new_item("bob"), r.new_item("bob")];
    let resolver = r.resolver();

    // contributor lacks MoveTo on the override folder: nothing may move
    let denied = r.workflow.bulk_approve(&items, &r.contributor(), &resolver);
    assert_eq!(denied, Err(crate::error::DenyReason::Permission));
    for item in items {
        assert_eq!(r.store.item(item).unwrap().folder_id, None);
    }
}

#[test]
fn bulk_assign_checks_destination_once_up_front() {
    let r = rig();
    let dest = r.store.create("gallery", None).unwrap();
    let items = [r.new_item("bob")];
    let resolver = r.resolver();

    let denied = r
        .workflow
        .bulk_assign(&items, Some(dest), &r.contributor(), &resolver);
    assert_eq!(denied, Err(crate::error::DenyReason::Permission));

    r.store.set_entry(
        dest,
        &RoleId::from("contributor"),
        ActionSet::from([ActionKind::MoveTo]),
    );
    let resolver = r.resolver();
    let outcome = r
        .workflow
        .bulk_assign(&items, Some(dest), &r.contributor(), &resolver)
        .unwrap();
    assert_eq!(outcome, BulkOutcome { succeeded: 1, failed: 0 });
}

#[test]
fn bulk_assign_to_uncategorized_needs_no_permission() {
    let r = rig();
    let dest = r.store.create("gallery", None).unwrap();
    let item = r.new_item("bob");
    r.store.set_folder(item, Some(dest)).unwrap();
    let resolver = r.resolver();

    let outcome = r
        .workflow
        .bulk_assign(&[item], None, &r.contributor(), &resolver)
        .unwrap();
    assert_eq!(outcome, BulkOutcome { succeeded: 1, failed: 0 });
    assert_eq!(r.store.item(item).unwrap().folder_id, None);
}

#[test]
fn editor_queries_see_reviewed_items() {
    // end-to-end sanity: routed item shows up for a default-policy editor
    let r = rig();
    r.workflow.ensure_system_folders().unwrap();
    let item = r.new_item("bob");
    assert!(r.workflow.mark_needs_review(item));

    let results = r.store.query(&ItemQuery {
        folders: Some(vec![r.system.needs_review().unwrap()]),
        author: None,
    });
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, item);
}
