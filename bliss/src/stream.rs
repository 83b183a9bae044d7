use crate::catalog::{Catalog, RouteId, StructureId};
use crate::err::HostErr;
use crate::route::{RouteTable, ON_MESSAGE};
use crate::sandbox::proxy::{AppHandle, SocketProxy};
use crate::sandbox::{Bindings, ContextBuilder};
use dashmap::DashMap;
use rhai::Dynamic;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// one open persistent connection bound to a stream route
#[derive(Debug, Clone)]
pub struct StreamSession {
    pub id: String,
    pub route_id: RouteId,
    pub structure_id: StructureId,
    pub params: HashMap<String, String>,
}

/// Serves `WS` routes.  Every inbound message runs the route's `on_message(socket, message)` in
/// a fresh context; whatever the handler sends through `socket` is returned for delivery.
#[derive(Clone)]
pub struct Streams {
    catalog: Catalog,
    routes: Arc<RouteTable>,
    contexts: ContextBuilder,
    live: Arc<DashMap<RouteId, usize>>,
}

impl Streams {
    pub fn new(catalog: Catalog, routes: Arc<RouteTable>, contexts: ContextBuilder) -> Self {
        Self {
            catalog,
            routes,
            contexts,
            live: Arc::new(DashMap::new()),
        }
    }

    /// `None` when no stream route serves `path`
    pub fn open(&self, path: &str) -> Option<StreamSession> {
        let found = self.routes.find_stream(path)?;
        *self.live.entry(found.route_id).or_insert(0) += 1;
        let session = StreamSession {
            id: Uuid::new_v4().to_string(),
            route_id: found.route_id,
            structure_id: found.structure_id,
            params: found.params,
        };
        info!(route = session.route_id, session = %session.id, "stream opened");
        Some(session)
    }

    pub fn close(&self, session: &StreamSession) {
        if let Some(mut count) = self.live.get_mut(&session.route_id) {
            *count = count.saturating_sub(1);
        }
        self.live.remove_if(&session.route_id, |_, count| *count == 0);
        info!(route = session.route_id, session = %session.id, "stream closed");
    }

    /// open sessions on `route`
    pub fn live(&self, route: RouteId) -> usize {
        self.live.get(&route).map(|count| *count).unwrap_or(0)
    }

    pub async fn on_message(
        &self,
        session: &StreamSession,
        message: String,
    ) -> Result<Vec<String>, HostErr> {
        let route = self.catalog.route(session.route_id).await?;
        let structure = self.catalog.structure(session.structure_id).await?;
        let socket = SocketProxy::new(session.id.as_str());

        let params: rhai::Map = session
            .params
            .iter()
            .map(|(k, v)| (k.as_str().into(), Dynamic::from(v.clone())))
            .collect();
        let bindings = Bindings::new()
            .bind("app", AppHandle::from(&structure))
            .bind("params", params);
        let context = self.contexts.build(structure.id, bindings).await?;

        let handler = route.handler.clone();
        let proxy = Dynamic::from(socket.clone());
        let returned = tokio::task::spawn_blocking(move || {
            context.invoke(handler.as_str(), ON_MESSAGE, proxy, Dynamic::from(message))
        })
        .await?;

        let returned = match returned {
            Ok(returned) => returned,
            Err(err) => {
                warn!(route = route.id, session = %session.id, "stream handler failed: {}", err);
                return Err(err.into());
            }
        };

        let mut outbox = socket.drain();
        if outbox.is_empty() && !returned.is_unit() {
            socket.send(&returned);
            outbox = socket.drain();
        }
        debug!(route = route.id, "stream handler produced {} messages", outbox.len());
        Ok(outbox)
    }
}
