use crate::access::RoleId;
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type")]
pub enum Event {
    ItemRouted {
        item: Uuid,
        folder: Uuid,
        principal: String,
    },
    MarkedNeedsReview {
        item: Uuid,
        folder: Uuid,
    },
    Approved {
        item: Uuid,
        folder: Uuid,
    },
    FolderCreated {
        id: Uuid,
    },
    FolderDeleted {
        id: Uuid,
    },
    PermissionsChanged {
        folder: Uuid,
        role: RoleId,
    },
}

impl Event {
    /// Folder this event concerns, used by subscribers to filter per principal.
    pub fn folder_id(&self) -> Uuid {
        match self {
            Event::ItemRouted { folder, .. }
            | Event::MarkedNeedsReview { folder, .. }
            | Event::Approved { folder, .. }
            | Event::PermissionsChanged { folder, .. } => *folder,
            Event::FolderCreated { id } | Event::FolderDeleted { id } => *id,
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(100);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn send(&self, event: Event) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
