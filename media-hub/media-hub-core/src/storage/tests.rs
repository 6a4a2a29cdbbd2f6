use super::*;
use crate::access::ActionKind;

#[test]
fn folder_crud_and_hierarchy() {
    let store = MemoryStore::new();
    let root = store.create("library", None).unwrap();
    let child = store.create("photos", Some(root)).unwrap();

    assert_eq!(store.get(child).unwrap().parent_id, Some(root));
    assert_eq!(store.list().len(), 2);

    store.rename(child, "pictures").unwrap();
    assert_eq!(store.get(child).unwrap().name, "pictures");

    // creating under a missing parent fails
    assert!(store.create("orphan", Some(Uuid::new_v4())).is_err());
}

#[test]
fn protected_folders_refuse_delete_and_rename() {
    let store = MemoryStore::new();
    let folder = store.create("system", None).unwrap();
    store.set_protected(folder, true).unwrap();

    assert!(store.delete(folder).is_err());
    assert!(store.rename(folder, "other").is_err());
    assert!(store.get(folder).is_some());

    store.set_protected(folder, false).unwrap();
    assert!(store.delete(folder).is_ok());
}

#[test]
fn delete_reparents_children_and_uncategorizes_items() {
    let store = MemoryStore::new();
    let root = store.create("library", None).unwrap();
    let mid = store.create("mid", Some(root)).unwrap();
    let leaf = store.create("leaf", Some(mid)).unwrap();
    let mut item = Item::new("alice");
    item.folder_id = Some(mid);
    let item_id = item.id;
    store.insert(item);

    store.delete(mid).unwrap();
    assert_eq!(store.get(leaf).unwrap().parent_id, Some(root));
    assert_eq!(store.item(item_id).unwrap().folder_id, None);
}

#[test]
fn permission_entries_keep_absent_and_empty_distinct() {
    let store = MemoryStore::new();
    let folder = store.create("media", None).unwrap();
    let role = crate::access::RoleId::from("contributor");

    assert_eq!(store.entry(folder, &role), None);

    store.set_entry(folder, &role, ActionSet::new());
    assert_eq!(store.entry(folder, &role), Some(ActionSet::new()));

    store.set_entry(folder, &role, ActionSet::from([ActionKind::View]));
    assert_eq!(
        store.entry(folder, &role),
        Some(ActionSet::from([ActionKind::View]))
    );

    store.remove_entry(folder, &role);
    assert_eq!(store.entry(folder, &role), None);
}

#[test]
fn state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let folder;
    let item_id;
    let role = crate::access::RoleId::from("contributor");
    {
        let store = MemoryStore::open(dir.path()).unwrap();
        folder = store.create("media", None).unwrap();
        store.set_protected(folder, true).unwrap();
        // the explicit empty entry must survive the round trip as empty,
        // not come back as absent
        store.set_entry(folder, &role, ActionSet::new());
        let item = Item::new("alice");
        item_id = item.id;
        store.insert(item);
        store.set_folder(item_id, Some(folder)).unwrap();
    }

    let store = MemoryStore::open(dir.path()).unwrap();
    assert!(store.get(folder).unwrap().protected);
    assert_eq!(store.entry(folder, &role), Some(ActionSet::new()));
    assert_eq!(
        store.item(item_id).unwrap().folder_id,
        Some(folder)
    );
}

#[test]
fn counts_include_empty_folders_and_uncategorized() {
    let store = MemoryStore::new();
    let full = store.create("full", None).unwrap();
    let empty = store.create("empty", None).unwrap();
    let mut filed = Item::new("alice");
    filed.folder_id = Some(full);
    store.insert(filed);
    store.insert(Item::new("alice"));
    store.insert(Item::new("bob"));

    let counts = store.counts_by_folder();
    assert_eq!(counts.get(&CountKey::Folder(full)), Some(&1));
    assert_eq!(counts.get(&CountKey::Folder(empty)), Some(&0));
    assert_eq!(counts.get(&CountKey::Uncategorized), Some(&2));
    assert_eq!(store.count_uncategorized_by_author("alice"), 1);
    assert_eq!(store.count_in_folder(full), 1);
}

#[test]
fn query_filters_by_folder_and_author() {
    let store = MemoryStore::new();
    let a = store.create("a", None).unwrap();
    let b = store.create("b", None).unwrap();
    let mut one = Item::new("alice");
    one.folder_id = Some(a);
    let mut two = Item::new("bob");
    two.folder_id = Some(b);
    let loose = Item::new("alice");
    store.insert(one.clone());
    store.insert(two);
    store.insert(loose.clone());

    let hits = store.query(&ItemQuery {
        folders: Some(vec![a]),
        author: None,
    });
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, one.id);

    let hits = store.query(&ItemQuery {
        folders: None,
        author: Some("alice".into()),
    });
    assert_eq!(hits.len(), 2);

    // a folder filter never matches uncategorized items
    let hits = store.query(&ItemQuery {
        folders: Some(vec![a, b]),
        author: Some("alice".into()),
    });
    assert_eq!(hits.len(), 1);
}

#[test]
fn set_folder_validates_the_destination() {
    let store = MemoryStore::new();
    let item = Item::new("alice");
    let id = item.id;
    store.insert(item);
    assert!(store.set_folder(id, Some(Uuid::new_v4())).is_err());
    assert!(store.set_folder(Uuid::new_v4(), None).is_err());
}
