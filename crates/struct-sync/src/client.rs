use std::sync::Arc;
use std::time::Duration;

use crate::config::{DEFAULT_ROUTE, SyncConfig, normalize_route};
use crate::error::TransportError;
use crate::http::HttpRequester;
use crate::registry::StructRegistry;
use crate::transport::{LocalSocket, Requester, Socket};
use crate::ws::WsSocket;

/// Transport pair, route prefix and name registry shared by every struct built from it.
#[derive(Clone)]
pub struct SyncClient {
    requester: Arc<dyn Requester>,
    socket: Arc<dyn Socket>,
    route: String,
    registry: StructRegistry,
}

impl SyncClient {
    /// Uses the default `/struct` route and the process-wide registry.
    pub fn new(requester: Arc<dyn Requester>, socket: Arc<dyn Socket>) -> Self {
        Self {
            requester,
            socket,
            route: DEFAULT_ROUTE.to_string(),
            registry: StructRegistry::global().clone(),
        }
    }

    #[must_use]
    pub fn with_route(mut self, route: &str) -> Self {
        self.route = normalize_route(route);
        self
    }

    #[must_use]
    pub fn with_registry(mut self, registry: StructRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// HTTP requester plus a WebSocket push channel, or an idle in-process socket when no
    /// socket URL is configured.
    pub async fn connect(config: &SyncConfig) -> Result<Self, TransportError> {
        let config = config.clone().normalized();
        let requester: Arc<dyn Requester> = Arc::new(HttpRequester::new(&config)?);
        let socket: Arc<dyn Socket> = match config.socket_url.as_deref() {
            Some(url) => {
                Arc::new(WsSocket::connect(url, Duration::from_millis(config.timeout_ms)).await?)
            }
            None => {
                tracing::warn!(
                    base_url = %config.base_url,
                    "no struct socket configured; push events will not arrive"
                );
                Arc::new(LocalSocket::new())
            }
        };
        Ok(Self::new(requester, socket).with_route(&config.route))
    }

    pub fn requester(&self) -> &Arc<dyn Requester> {
        &self.requester
    }

    pub fn socket(&self) -> &Arc<dyn Socket> {
        &self.socket
    }

    pub fn route(&self) -> &str {
        &self.route
    }

    pub fn registry(&self) -> &StructRegistry {
        &self.registry
    }
}

impl std::fmt::Debug for SyncClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncClient")
            .field("route", &self.route)
            .field("registry", &self.registry.names())
            .finish_non_exhaustive()
    }
}
