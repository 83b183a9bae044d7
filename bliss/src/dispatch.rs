use crate::catalog::{Catalog, Route, Structure};
use crate::err::HostErr;
use crate::render::{Chrome, RendererCache, TenantRenderer};
use crate::route::{RouteMatch, RouteTable, Verb};
use crate::sandbox::proxy::{
    AppHandle, HttpReply, RequestParts, ResponseProxy, APPLICATION_JSON, TEXT_PLAIN,
};
use crate::sandbox::{Bindings, ContextBuilder};
use rhai::Dynamic;
use serde::Serialize;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, error, info_span, warn, Instrument};
use uuid::Uuid;

/// the entry function every handler must define
pub static HANDLE: &str = "handle";

#[derive(Debug, Clone, Default)]
pub struct InboundRequest {
    pub method: String,
    pub path: String,
    pub query: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

#[derive(Debug, Clone)]
pub enum Outcome {
    NotFound,
    /// the host itself failed while matching or loading the route
    Internal(HostErr),
    /// tenant code (or the context it runs in) failed
    Diagnostic(HostErr),
    Reply(HttpReply),
}

#[derive(Serialize)]
struct Envelope<'a> {
    success: bool,
    message: &'a str,
}

fn envelope(message: &str) -> String {
    serde_json::to_string(&Envelope {
        success: false,
        message,
    })
    .unwrap_or_default()
}

impl Outcome {
    pub fn into_reply(self) -> HttpReply {
        match self {
            Outcome::NotFound => HttpReply::new(404, APPLICATION_JSON, envelope("Path not found")),
            Outcome::Internal(_) => {
                HttpReply::new(500, APPLICATION_JSON, envelope("Internal server error"))
            }
            Outcome::Diagnostic(err) => HttpReply::new(500, TEXT_PLAIN, err.diagnostic()),
            Outcome::Reply(reply) => reply,
        }
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    catalog: Catalog,
    routes: Arc<RouteTable>,
    contexts: ContextBuilder,
    renderers: Arc<RendererCache>,
}

impl Dispatcher {
    pub fn new(
        catalog: Catalog,
        routes: Arc<RouteTable>,
        contexts: ContextBuilder,
        renderers: Arc<RendererCache>,
    ) -> Self {
        Self {
            catalog,
            routes,
            contexts,
            renderers,
        }
    }

    /// Always produces an outcome; nothing a tenant does escapes as an error.
    pub async fn dispatch(&self, request: InboundRequest) -> Outcome {
        let span = info_span!(
            "dispatch",
            request = %Uuid::new_v4(),
            method = %request.method,
            path = %request.path
        );
        self.dispatch_in_span(request).instrument(span).await
    }

    async fn dispatch_in_span(&self, request: InboundRequest) -> Outcome {
        let verb = match Verb::parse(request.method.as_str()) {
            Ok(verb) if !verb.is_stream() => verb,
            _ => return Outcome::NotFound,
        };

        let found = match self.routes.find(verb, request.path.as_str()) {
            Some(found) => found,
            None => {
                debug!("no route");
                return Outcome::NotFound;
            }
        };

        let (route, structure) = match self.load(&found).await {
            Ok(loaded) => loaded,
            Err(err) => {
                error!(route = found.route_id, "could not load route: {}", err);
                return Outcome::Internal(err);
            }
        };

        match self.execute(&route, &structure, request, found).await {
            Ok(reply) => Outcome::Reply(reply),
            Err(err) => {
                warn!(route = route.id, "handler failed: {}", err);
                Outcome::Diagnostic(err)
            }
        }
    }

    async fn load(&self, found: &RouteMatch) -> Result<(Route, Structure), HostErr> {
        let route = self.catalog.route(found.route_id).await?;
        let structure = self.catalog.structure(found.structure_id).await?;
        Ok((route, structure))
    }

    pub fn renderer(&self, structure: &Structure) -> Result<Arc<TenantRenderer>, HostErr> {
        let catalog = self.catalog.clone();
        let id = structure.id;
        Ok(self.renderers.get_or_create(&id, move || {
            TenantRenderer::new(id, catalog, Handle::current()).map(Arc::new)
        })?)
    }

    async fn execute(
        &self,
        route: &Route,
        structure: &Structure,
        request: InboundRequest,
        found: RouteMatch,
    ) -> Result<HttpReply, HostErr> {
        let renderer = self.renderer(structure)?;
        let req = Dynamic::from_map(
            RequestParts {
                method: request.method,
                path: request.path,
                params: found.params,
                query: request.query,
                headers: request.headers,
                body: request.body,
            }
            .to_map(),
        );
        let res = ResponseProxy::new();

        let bindings = Bindings::new()
            .bind("req", req.clone())
            .bind("res", res.clone())
            .bind("app", AppHandle::from(structure))
            .with_render(renderer, Chrome::from(structure));
        let context = self.contexts.build(structure.id, bindings).await?;

        let handler = route.handler.clone();
        let proxy = Dynamic::from(res.clone());
        let returned = tokio::task::spawn_blocking(move || {
            context.invoke(handler.as_str(), HANDLE, req, proxy)
        })
        .await??;

        Ok(res.into_reply(&returned))
    }
}
