//! Process bootstrap.
//!
//! A node plays one or both roles from its config:
//! - relay: mesh router plus the store it hosts
//! - web: leaf client plus the HTTP/WebSocket delivery endpoints
//!
//! Every instance is built here and injected; nothing is global.

use std::net::SocketAddr;
use std::sync::Arc;

use courier_core::error::{CourierError, Result};

use crate::app_state::{AppState, Timings};
use crate::config::{MeshSection, NodeConfig, RelaySection, StoreSection, WebSection};
use crate::mesh::{Endpoint, LeafClient, Relay};
use crate::router;
use crate::session::InMemorySessions;
use crate::store::{Store, StoreHost};
use crate::stream::{MeshStoreLink, StreamCoordinator};

pub struct RelayNode {
    pub relay: Arc<Relay>,
    pub store: Arc<Store>,
    pub endpoint: Endpoint,
}

impl RelayNode {
    pub fn shutdown(&self) {
        self.relay.shutdown();
        self.store.close();
    }
}

/// Bind the relay, dial its peers and start the store host.
///
/// A peer that cannot be reached is logged and skipped; it may dial us later.
pub async fn start_relay(
    section: &RelaySection,
    store_cfg: &StoreSection,
    mesh: &MeshSection,
) -> Result<RelayNode> {
    let (relay, relay_events) = Relay::new(section.identity.clone(), mesh.clone());
    let endpoint = relay.bind(&section.bind).await?;

    for peer in &section.peers {
        if let Err(e) = relay.connect(peer).await {
            tracing::warn!(relay = %section.identity, peer = %peer, error = %e, "peer connect failed");
        }
    }

    let (store, forwards) = Store::new(store_cfg.ttl());
    store.spawn_reaper(store_cfg.reap_interval());
    tokio::spawn(StoreHost::new(Arc::clone(&relay), Arc::clone(&store)).run(relay_events, forwards));

    tracing::info!(
        relay = %section.identity,
        endpoint = %endpoint,
        ttl_secs = store.ttl().as_secs(),
        "relay node started"
    );
    Ok(RelayNode {
        relay,
        store,
        endpoint,
    })
}

pub struct WebNode {
    pub leaf: Arc<LeafClient>,
    pub sessions: Arc<InMemorySessions>,
    pub store_link: Arc<MeshStoreLink>,
    pub coordinator: Arc<StreamCoordinator>,
    pub state: AppState,
}

/// Connect the leaf client and wire the coordinator behind the endpoints.
pub async fn start_web(web: &WebSection, mesh: &MeshSection) -> Result<WebNode> {
    let (leaf, leaf_events) = LeafClient::connect(web.identity.clone(), &web.relay, mesh).await?;

    let sessions = Arc::new(InMemorySessions::new(web.store_route.clone()));
    for key in &web.sessions {
        sessions.insert(key.clone());
    }

    let store_link = Arc::new(MeshStoreLink::new(Arc::clone(&leaf)));
    let coordinator = Arc::new(StreamCoordinator::new(sessions.clone(), store_link.clone()));
    tokio::spawn(Arc::clone(&coordinator).run_deliveries(leaf_events));

    let state = AppState::new(Timings::from_config(web), Arc::clone(&coordinator));
    Ok(WebNode {
        leaf,
        sessions,
        store_link,
        coordinator,
        state,
    })
}

/// Run until ctrl-c / SIGTERM.
pub async fn run(cfg: NodeConfig) -> Result<()> {
    let relay = match &cfg.relay {
        Some(section) => Some(start_relay(section, &cfg.store, &cfg.mesh).await?),
        None => None,
    };

    match &cfg.web {
        Some(web) => {
            let listen: SocketAddr = web
                .listen
                .parse()
                .map_err(|e| CourierError::BadRequest(format!("web.listen must be a valid SocketAddr: {e}")))?;
            let node = start_web(web, &cfg.mesh).await?;
            let app = router::build_router(node.state.clone());

            let listener = tokio::net::TcpListener::bind(listen)
                .await
                .map_err(|e| CourierError::BindConflict(format!("{listen}: {e}")))?;
            tracing::info!(%listen, leaf = %node.leaf.identity(), "delivery endpoints listening");

            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await
                .map_err(|e| CourierError::Internal(format!("server failed: {e}")))?;
        }
        None => shutdown_signal().await,
    }

    if let Some(node) = relay {
        node.shutdown();
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("signal received, starting graceful shutdown");
}
