use anyhow::Context;
use axum::{routing::get, serve, Router};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use media_hub_core::access::{DefaultPolicy, RoleRegistry};
use media_hub_core::auth::{Hs256Verifier, NoopVerifier, TokenVerifier};
use media_hub_core::events::EventBus;
use media_hub_core::routing::InboxRouter;
use media_hub_core::storage::{FolderProvider, ItemStore, MemoryStore};
use media_hub_core::workflow::{ReviewCounter, SystemFolders, WorkflowManager};

use media_hub::api;

#[derive(Parser)]
#[command(about = "Media folder and editorial workflow server")]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:3000")]
    listen: String,
    /// Directory holding the persisted store and workflow state.
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,
    /// HS256 secret for bearer tokens; without it the server trusts
    /// identity headers instead.
    #[arg(long, env = "MEDIA_HUB_JWT_SECRET")]
    jwt_secret: Option<String>,
    /// JSON role configuration file; a built-in default is used otherwise.
    #[arg(long)]
    roles: Option<PathBuf>,
}

fn load_registry(path: Option<&Path>) -> anyhow::Result<RoleRegistry> {
    match path {
        Some(path) => {
            let data = std::fs::read_to_string(path)
                .with_context(|| format!("reading roles file {}", path.display()))?;
            serde_json::from_str(&data)
                .with_context(|| format!("parsing roles file {}", path.display()))
        }
        None => {
            let mut registry = RoleRegistry::new();
            registry.define("editor".into(), DefaultPolicy::FullAccessByDefault);
            registry.define("contributor".into(), DefaultPolicy::NoAccess);
            registry.define("subscriber".into(), DefaultPolicy::NoAccess);
            Ok(registry)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();
    let args = Args::parse();

    let store = Arc::new(MemoryStore::open(&args.data_dir)?);
    let registry = Arc::new(load_registry(args.roles.as_deref())?);
    let system = Arc::new(SystemFolders::open(args.data_dir.join("workflow.json"))?);
    let review = Arc::new(ReviewCounter::default());
    let events = EventBus::new();

    let folders: Arc<dyn FolderProvider> = store.clone();
    let items: Arc<dyn ItemStore> = store.clone();
    let inbox = Arc::new(InboxRouter::new(
        folders.clone(),
        items.clone(),
        registry.clone(),
        system.clone(),
        review.clone(),
        events.clone(),
    ));
    let workflow = Arc::new(WorkflowManager::new(
        folders,
        items,
        system.clone(),
        review.clone(),
        events.clone(),
    ));
    workflow.ensure_system_folders()?;

    let verifier: Arc<dyn TokenVerifier> = match args.jwt_secret {
        Some(secret) => Arc::new(Hs256Verifier::new(secret)),
        None => Arc::new(NoopVerifier),
    };

    let app = Router::new()
        .merge(api::router(
            store, registry, system, review, inbox, workflow, events, verifier,
        ))
        .route("/health", get(|| async { "OK" }))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        );

    let listener = TcpListener::bind(&args.listen).await?;
    tracing::info!(addr = %args.listen, "listening");
    serve(listener, app.into_make_service()).await?;
    Ok(())
}
