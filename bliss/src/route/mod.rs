use crate::catalog::{Catalog, PrefixedRoute, Route, RouteId, StructureId};
use crate::dispatch::HANDLE;
use crate::err::HostErr;
use crate::route::err::RouteErr;
use crate::route::pattern::{join_prefix, PathPattern};
use crate::sandbox::proxy::AppHandle;
use crate::sandbox::script::{self, defines, ScriptErr};
use crate::sandbox::{Bindings, ContextBuilder};
use arc_swap::ArcSwap;
use rhai::Engine;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use strum_macros::EnumString;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub mod err;
pub mod pattern;

/// the entry function every stream route must define
pub static ON_MESSAGE: &str = "on_message";

#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Hash, EnumString, strum_macros::Display, strum_macros::EnumIter,
)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum Verb {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
    /// persistent stream (websocket) pseudo verb
    Ws,
}

impl Verb {
    pub fn parse(verb: &str) -> Result<Self, RouteErr> {
        Verb::from_str(verb.trim()).map_err(|_| RouteErr::Verb(verb.to_string()))
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, Verb::Ws)
    }
}

#[derive(Debug, Clone)]
pub struct CompiledRoute {
    pub route_id: RouteId,
    pub structure_id: StructureId,
    pub verb: Verb,
    pub pattern: PathPattern,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RouteMatch {
    pub route_id: RouteId,
    pub structure_id: StructureId,
    pub params: HashMap<String, String>,
    pub generation: u64,
}

/// An immutable route table.  Routes are kept per verb in build order; stream routes live
/// apart from the verb buckets.
#[derive(Debug, Default)]
pub struct RouteSnapshot {
    generation: u64,
    buckets: HashMap<Verb, Vec<CompiledRoute>>,
    streams: Vec<CompiledRoute>,
}

impl RouteSnapshot {
    pub fn new(generation: u64) -> Self {
        Self {
            generation,
            ..Default::default()
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn push(&mut self, route: CompiledRoute) {
        if route.verb.is_stream() {
            self.streams.push(route);
        } else {
            self.buckets.entry(route.verb).or_default().push(route);
        }
    }

    /// When several routes match, the one built last wins.
    pub fn find(&self, verb: Verb, path: &str) -> Option<RouteMatch> {
        let bucket = if verb.is_stream() {
            &self.streams
        } else {
            self.buckets.get(&verb)?
        };
        bucket.iter().rev().find_map(|route| {
            route.pattern.captures(path).map(|params| RouteMatch {
                route_id: route.route_id,
                structure_id: route.structure_id,
                params,
                generation: self.generation,
            })
        })
    }

    pub fn find_stream(&self, path: &str) -> Option<RouteMatch> {
        self.find(Verb::Ws, path)
    }

    pub fn len(&self) -> usize {
        self.buckets.values().map(|b| b.len()).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0 && self.streams.is_empty()
    }

    pub fn streams(&self) -> &Vec<CompiledRoute> {
        &self.streams
    }

    /// every compiled route, verb buckets first (in verb order) then streams
    pub fn routes(&self) -> Vec<&CompiledRoute> {
        let mut rtn = vec![];
        for verb in <Verb as strum::IntoEnumIterator>::iter() {
            if let Some(bucket) = self.buckets.get(&verb) {
                rtn.extend(bucket.iter());
            }
        }
        rtn.extend(self.streams.iter());
        rtn
    }
}

/// The live route table.  Readers load the current snapshot without locking; a rebuild
/// compiles a complete replacement and publishes it with a single atomic store.
pub struct RouteTable {
    catalog: Catalog,
    contexts: ContextBuilder,
    current: ArcSwap<RouteSnapshot>,
    rebuilding: Mutex<()>,
}

impl RouteTable {
    pub fn new(catalog: Catalog, contexts: ContextBuilder) -> Self {
        Self {
            catalog,
            contexts,
            current: ArcSwap::from_pointee(RouteSnapshot::default()),
            rebuilding: Mutex::new(()),
        }
    }

    pub fn snapshot(&self) -> Arc<RouteSnapshot> {
        self.current.load_full()
    }

    pub fn generation(&self) -> u64 {
        self.current.load().generation
    }

    pub fn find(&self, verb: Verb, path: &str) -> Option<RouteMatch> {
        self.current.load().find(verb, path)
    }

    pub fn find_stream(&self, path: &str) -> Option<RouteMatch> {
        self.current.load().find_stream(path)
    }

    pub async fn rebuild(&self) -> Result<Arc<RouteSnapshot>, HostErr> {
        let _guard = self.rebuilding.lock().await;

        let routes = self.catalog.routes_with_prefix().await?;
        let mut snapshot = RouteSnapshot::new(self.generation() + 1);
        let mut failed = 0;

        for PrefixedRoute {
            route,
            route_prefix,
        } in routes
        {
            match self.checked(&route, route_prefix.as_deref()).await {
                Some(compiled) => snapshot.push(compiled),
                None => failed += 1,
            }
        }

        let snapshot = Arc::new(snapshot);
        self.current.store(snapshot.clone());
        info!(
            "route table generation {}: {} routes, {} streams, {} failed",
            snapshot.generation(),
            snapshot.len(),
            snapshot.streams().len(),
            failed
        );
        Ok(snapshot)
    }

    /// Compiles `route` and records the outcome as its last error.  Handler edits don't
    /// rebuild the table, so they are checked here instead.
    pub async fn recheck(&self, route: &Route) -> Result<(), HostErr> {
        let structure = self.catalog.structure(route.structure_id).await?;
        self.checked(route, structure.route_prefix.as_deref()).await;
        Ok(())
    }

    async fn checked(&self, route: &Route, route_prefix: Option<&str>) -> Option<CompiledRoute> {
        match self.compile(route, route_prefix).await {
            Ok(compiled) => {
                if route.error.is_some() {
                    self.record_error(route.id, None).await;
                }
                Some(compiled)
            }
            Err(err) => {
                warn!(route = route.id, "route excluded from table: {}", err);
                let message = err.diagnostic();
                self.record_error(route.id, Some(message.as_str())).await;
                None
            }
        }
    }

    async fn compile(
        &self,
        route: &Route,
        route_prefix: Option<&str>,
    ) -> Result<CompiledRoute, HostErr> {
        let verb = Verb::parse(route.verb.as_str())?;
        let pattern = PathPattern::compile(join_prefix(route_prefix, route.path.as_str()).as_str())?;

        if verb.is_stream() {
            self.register_stream(route).await?;
        } else {
            check_handler(route.handler.as_str())?;
        }

        Ok(CompiledRoute {
            route_id: route.id,
            structure_id: route.structure_id,
            verb,
            pattern,
        })
    }

    /// a stream route is live only if its structure's libraries load and its handler defines
    /// `on_message`
    async fn register_stream(&self, route: &Route) -> Result<(), HostErr> {
        let structure = self.catalog.structure(route.structure_id).await?;
        let app = AppHandle {
            structure_id: structure.id,
            name: structure.name,
            route_prefix: structure.route_prefix,
        };
        let context = self
            .contexts
            .build(route.structure_id, Bindings::new().bind("app", app))
            .await?;
        let handler = route.handler.clone();
        tokio::task::spawn_blocking(move || context.verify(handler.as_str(), ON_MESSAGE))
            .await??;
        Ok(())
    }

    async fn record_error(&self, route: RouteId, error: Option<&str>) {
        if let Err(err) = self.catalog.set_route_error(route, error).await {
            warn!(route, "could not record route error: {}", err);
        }
    }
}

/// parses an http handler and checks that it defines `handle(req, res)`
fn check_handler(source: &str) -> Result<(), ScriptErr> {
    let ast = script::compile(&Engine::new_raw(), source)?;
    if defines(&ast, HANDLE, 2) {
        Ok(())
    } else {
        Err(ScriptErr::new(format!(
            "script does not define fn {}(_, _)",
            HANDLE
        )))
    }
}
