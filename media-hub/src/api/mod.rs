//! HTTP surface. Every disclosure and mutation goes through the access
//! enforcer; handlers build one resolver per request so permission changes
//! are visible on the next request at the latest.

use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::{wrappers::BroadcastStream, Stream, StreamExt};
use uuid::Uuid;

use media_hub_core::access::{
    AccessEnforcer, AccessResolver, ActionKind, ActionSet, Principal, RoleId, RoleRegistry,
};
use media_hub_core::auth::TokenVerifier;
use media_hub_core::error::DenyReason;
use media_hub_core::events::{Event, EventBus};
use media_hub_core::routing::InboxRouter;
use media_hub_core::storage::{
    CountKey, Folder, FolderProvider, Item, ItemQuery, ItemStore, MemoryStore, PermissionStore,
};
use media_hub_core::workflow::{BulkOutcome, ReviewCounter, SystemFolders, WorkflowManager};

/// Authenticated request identity: a verified bearer token when one is
/// presented, else the trusted identity headers.
#[derive(Clone, Debug)]
pub struct AuthContext {
    pub principal: Principal,
}

impl FromRequestParts<AppState> for AuthContext {
    type Rejection = StatusCode;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let headers = &parts.headers;
        if let Some(auth) = headers.get("Authorization").and_then(|v| v.to_str().ok()) {
            if let Some(token) = auth.strip_prefix("Bearer ") {
                if let Some(claims) = state.verifier.verify(token).await {
                    return Ok(Self {
                        principal: claims.into_principal(),
                    });
                }
            }
        }
        let Some(user) = headers
            .get("X-User-Id")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
        else {
            return Err(StatusCode::UNAUTHORIZED);
        };
        let roles = headers
            .get("X-Roles")
            .and_then(|v| v.to_str().ok())
            .map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .map(RoleId::from)
                    .collect()
            })
            .unwrap_or_default();
        let superuser = headers
            .get("X-Superuser")
            .and_then(|v| v.to_str().ok())
            .map(|v| v == "1" || v == "true")
            .unwrap_or(false);
        Ok(Self {
            principal: Principal {
                id: user,
                roles,
                superuser,
            },
        })
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<MemoryStore>,
    pub registry: Arc<RoleRegistry>,
    pub system: Arc<SystemFolders>,
    pub review: Arc<ReviewCounter>,
    pub inbox: Arc<InboxRouter>,
    pub workflow: Arc<WorkflowManager>,
    pub events: EventBus,
    pub verifier: Arc<dyn TokenVerifier>,
}

impl AppState {
    /// Fresh request-scoped resolver; never held across requests.
    fn resolver(&self) -> AccessResolver {
        let folders: Arc<dyn FolderProvider> = self.store.clone();
        let perms: Arc<dyn PermissionStore> = self.store.clone();
        AccessResolver::new(folders, perms, self.registry.clone(), self.inbox.clone())
    }
}

fn deny_status(reason: DenyReason) -> StatusCode {
    match reason {
        DenyReason::Protected => StatusCode::LOCKED,
        DenyReason::Permission => StatusCode::FORBIDDEN,
        DenyReason::NotFound => StatusCode::NOT_FOUND,
    }
}

#[derive(Deserialize)]
struct FolderCreateRequest {
    name: String,
    parent_id: Option<Uuid>,
}

#[derive(Deserialize)]
struct RenameRequest {
    name: String,
}

#[derive(Serialize)]
struct CountsResponse {
    folders: BTreeMap<Uuid, u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    uncategorized: Option<u64>,
}

#[derive(Deserialize)]
struct PermissionRequest {
    role: RoleId,
    actions: ActionSet,
}

#[derive(Serialize)]
struct ItemResponse {
    id: Uuid,
    folder_id: Option<Uuid>,
}

#[derive(Deserialize)]
struct ItemsParams {
    /// Comma-separated folder ids to restrict the query to.
    folders: Option<String>,
    author: Option<String>,
}

#[derive(Deserialize)]
struct MoveRequest {
    folder_id: Option<Uuid>,
}

#[derive(Deserialize)]
struct BulkAssignRequest {
    items: Vec<Uuid>,
    folder_id: Option<Uuid>,
}

#[derive(Deserialize)]
struct BulkApproveRequest {
    items: Vec<Uuid>,
}

#[derive(Deserialize)]
struct ReviewCountParams {
    #[serde(default)]
    refresh: bool,
}

#[derive(Serialize)]
struct ReviewCountResponse {
    count: u64,
}

#[derive(Deserialize)]
struct OverrideRequest {
    folder_id: Option<Uuid>,
}

#[allow(clippy::too_many_arguments)]
pub fn router(
    store: Arc<MemoryStore>,
    registry: Arc<RoleRegistry>,
    system: Arc<SystemFolders>,
    review: Arc<ReviewCounter>,
    inbox: Arc<InboxRouter>,
    workflow: Arc<WorkflowManager>,
    events: EventBus,
    verifier: Arc<dyn TokenVerifier>,
) -> Router {
    let app_state = AppState {
        store,
        registry,
        system,
        review,
        inbox,
        workflow,
        events,
        verifier,
    };
    Router::new()
        .route("/folders", get(list_folders).post(create_folder))
        .route("/folders/counts", get(folder_counts))
        .route("/folders/{id}", delete(delete_folder))
        .route("/folders/{id}/rename", put(rename_folder))
        .route(
            "/folders/{id}/permissions",
            get(get_permissions).put(set_permissions),
        )
        .route("/folders/{id}/permissions/{role}", delete(remove_permissions))
        .route("/items", get(list_items).post(create_item))
        .route("/items/{id}/move", put(move_item))
        .route("/items/{id}/review", post(mark_review))
        .route("/items/{id}/approve", post(mark_approve))
        .route("/items/bulk/assign", post(bulk_assign))
        .route("/items/bulk/approve", post(bulk_approve))
        .route("/review/count", get(review_count))
        .route("/workflow/approved-override", put(set_approved_override))
        .route("/events", get(events_stream))
        .with_state(app_state)
}

async fn list_folders(State(state): State<AppState>, auth: AuthContext) -> Json<Vec<Folder>> {
    let resolver = state.resolver();
    let folders =
        AccessEnforcer::new(&resolver).filter_folder_list(&auth.principal, state.store.list());
    Json(folders)
}

async fn create_folder(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<FolderCreateRequest>,
) -> Result<Json<Folder>, StatusCode> {
    if !auth.principal.superuser {
        return Err(StatusCode::FORBIDDEN);
    }
    let id = state
        .store
        .create(&req.name, req.parent_id)
        .map_err(|_| StatusCode::BAD_REQUEST)?;
    state.events.send(Event::FolderCreated { id });
    state.store.get(id).map(Json).ok_or(StatusCode::NOT_FOUND)
}

async fn delete_folder(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> StatusCode {
    let resolver = state.resolver();
    if let Err(reason) = AccessEnforcer::new(&resolver).gate_delete(&auth.principal, id) {
        return deny_status(reason);
    }
    match state.store.delete(id) {
        Ok(()) => {
            state.review.invalidate();
            state.events.send(Event::FolderDeleted { id });
            StatusCode::NO_CONTENT
        }
        Err(_) => StatusCode::NOT_FOUND,
    }
}

async fn rename_folder(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
    Json(req): Json<RenameRequest>,
) -> StatusCode {
    let resolver = state.resolver();
    if let Err(reason) = AccessEnforcer::new(&resolver).gate_rename(&auth.principal, id) {
        return deny_status(reason);
    }
    match state.store.rename(id, &req.name) {
        Ok(()) => StatusCode::NO_CONTENT,
        Err(_) => StatusCode::NOT_FOUND,
    }
}

async fn folder_counts(State(state): State<AppState>, auth: AuthContext) -> Json<CountsResponse> {
    let resolver = state.resolver();
    let counts = AccessEnforcer::new(&resolver).filter_folder_counts(
        &auth.principal,
        state.store.counts_by_folder(),
        &*state.store,
    );
    let mut folders = BTreeMap::new();
    let mut uncategorized = None;
    for (key, count) in counts {
        match key {
            CountKey::Folder(id) => {
                folders.insert(id, count);
            }
            CountKey::Uncategorized => uncategorized = Some(count),
        }
    }
    Json(CountsResponse {
        folders,
        uncategorized,
    })
}

async fn get_permissions(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<Json<BTreeMap<RoleId, ActionSet>>, StatusCode> {
    if !auth.principal.superuser {
        return Err(StatusCode::FORBIDDEN);
    }
    if state.store.get(id).is_none() {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(Json(state.store.entries_for(id)))
}

async fn set_permissions(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
    Json(req): Json<PermissionRequest>,
) -> StatusCode {
    if !auth.principal.superuser {
        return StatusCode::FORBIDDEN;
    }
    if state.store.get(id).is_none() {
        return StatusCode::NOT_FOUND;
    }
    state.store.set_entry(id, &req.role, req.actions);
    state.events.send(Event::PermissionsChanged {
        folder: id,
        role: req.role,
    });
    StatusCode::NO_CONTENT
}

async fn remove_permissions(
    State(state): State<AppState>,
    auth: AuthContext,
    Path((id, role)): Path<(Uuid, RoleId)>,
) -> StatusCode {
    if !auth.principal.superuser {
        return StatusCode::FORBIDDEN;
    }
    if state.store.get(id).is_none() {
        return StatusCode::NOT_FOUND;
    }
    state.store.remove_entry(id, &role);
    state
        .events
        .send(Event::PermissionsChanged { folder: id, role });
    StatusCode::NO_CONTENT
}

async fn create_item(State(state): State<AppState>, auth: AuthContext) -> Json<ItemResponse> {
    let item = Item::new(auth.principal.id.clone());
    let id = item.id;
    state.store.insert(item);
    let resolver = state.resolver();
    let folder_id = state.inbox.route_on_create(id, &auth.principal, &resolver);
    Json(ItemResponse { id, folder_id })
}

async fn list_items(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(params): Query<ItemsParams>,
) -> Result<Json<Vec<Item>>, StatusCode> {
    let folders = match params.folders {
        Some(raw) => {
            let parsed: Result<Vec<Uuid>, _> = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(Uuid::parse_str)
                .collect();
            Some(parsed.map_err(|_| StatusCode::BAD_REQUEST)?)
        }
        None => None,
    };
    let query = ItemQuery {
        folders,
        author: params.author,
    };
    let resolver = state.resolver();
    let scoped = AccessEnforcer::new(&resolver).scope_item_query(&auth.principal, query);
    Ok(Json(state.store.query(&scoped)))
}

async fn move_item(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
    Json(req): Json<MoveRequest>,
) -> StatusCode {
    let resolver = state.resolver();
    if !AccessEnforcer::new(&resolver).gate_move(&auth.principal, req.folder_id) {
        return StatusCode::FORBIDDEN;
    }
    let before = state.store.item(id).and_then(|i| i.folder_id);
    match state.store.set_folder(id, req.folder_id) {
        Ok(()) => {
            let needs_review = state.system.needs_review();
            if needs_review.is_some() && (needs_review == before || needs_review == req.folder_id) {
                state.review.invalidate();
            }
            StatusCode::NO_CONTENT
        }
        Err(_) => StatusCode::NOT_FOUND,
    }
}

async fn mark_review(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(id): Path<Uuid>,
) -> StatusCode {
    if state.workflow.mark_needs_review(id) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn mark_approve(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(id): Path<Uuid>,
) -> StatusCode {
    if state.workflow.mark_approved(id) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn bulk_assign(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<BulkAssignRequest>,
) -> Result<Json<BulkOutcome>, StatusCode> {
    let resolver = state.resolver();
    state
        .workflow
        .bulk_assign(&req.items, req.folder_id, &auth.principal, &resolver)
        .map(Json)
        .map_err(deny_status)
}

async fn bulk_approve(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<BulkApproveRequest>,
) -> Result<Json<BulkOutcome>, StatusCode> {
    let resolver = state.resolver();
    state
        .workflow
        .bulk_approve(&req.items, &auth.principal, &resolver)
        .map(Json)
        .map_err(deny_status)
}

async fn review_count(
    State(state): State<AppState>,
    _auth: AuthContext,
    Query(params): Query<ReviewCountParams>,
) -> Json<ReviewCountResponse> {
    Json(ReviewCountResponse {
        count: state.workflow.review_count(params.refresh),
    })
}

async fn set_approved_override(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<OverrideRequest>,
) -> StatusCode {
    if !auth.principal.superuser {
        return StatusCode::FORBIDDEN;
    }
    if let Some(id) = req.folder_id {
        if state.store.get(id).is_none() {
            return StatusCode::NOT_FOUND;
        }
    }
    state.workflow.set_approved_override(req.folder_id);
    StatusCode::NO_CONTENT
}

/// Server-sent event stream of workflow and folder events, filtered down to
/// folders the subscriber may view.
async fn events_stream(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let principal = auth.principal;
    let resolver = state.resolver();
    let rx = state.events.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(move |event| {
        let event = event.ok()?;
        if !resolver.can_perform(&principal, event.folder_id(), ActionKind::View) {
            return None;
        }
        let json = serde_json::to_string(&event).ok()?;
        Some(Ok(SseEvent::default().data(json)))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
