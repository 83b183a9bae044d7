use crate::cache::ResourceCache;
use crate::catalog::err::CatalogErr;
use crate::catalog::sqlite::{tx, SqliteCatalog};
use crate::catalog::{
    Catalog, CatalogApi, DatabaseId, NewDatabase, NewFile, NewRoute, NewStructure, NewTemplate,
    Route, RouteId, RouteUpdate, Structure, StructureId, TemplateId,
};
use crate::clone::{CloneRequest, Cloned, StructureCloner};
use crate::config::BlissConfig;
use crate::dispatch::{Dispatcher, InboundRequest, Outcome};
use crate::err::HostErr;
use crate::files::DataFiles;
use crate::render::{Chrome, RenderErr, RendererCache};
use crate::route::{RouteSnapshot, RouteTable};
use crate::sandbox::db::DbHandle;
use crate::sandbox::proxy::AppHandle;
use crate::sandbox::{Bindings, ConnectionCache, ContextBuilder};
use crate::stream::Streams;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// settings a structure's editor may change
#[derive(Debug, Clone, Default)]
pub struct StructureSettings {
    pub name: Option<String>,
    pub route_prefix: Option<Option<String>>,
    pub head: Option<Option<String>>,
}

/// The host: owns the catalog, the data files, both caches and the route table, and exposes
/// the operations a structure's editor performs along with request dispatch.
#[derive(Clone)]
pub struct Bliss {
    catalog: Arc<SqliteCatalog>,
    files: DataFiles,
    connections: Arc<ConnectionCache>,
    renderers: Arc<RendererCache>,
    contexts: ContextBuilder,
    routes: Arc<RouteTable>,
    dispatcher: Dispatcher,
    streams: Streams,
    cloner: StructureCloner,
}

impl Bliss {
    pub async fn new(config: &BlissConfig) -> Result<Self, HostErr> {
        if let Some(dir) = Path::new(config.catalog.as_str()).parent() {
            if !dir.as_os_str().is_empty() {
                tokio::fs::create_dir_all(dir).await?;
            }
        }
        let catalog = SqliteCatalog::connect(config.catalog.as_str()).await?;
        let files = DataFiles::new(config.data_dir.as_str());
        files.init().await?;
        Self::open(
            catalog,
            files,
            config.renderer_cache,
            config.connection_cache,
        )
        .await
    }

    pub async fn open(
        catalog: SqliteCatalog,
        files: DataFiles,
        renderer_cache: usize,
        connection_cache: usize,
    ) -> Result<Self, HostErr> {
        let catalog = Arc::new(catalog);
        let shared: Catalog = catalog.clone();

        let connections: Arc<ConnectionCache> = Arc::new(
            ResourceCache::new("connection", connection_cache)
                .with_eviction(|_, handle: DbHandle| handle.close()),
        );
        let renderers: Arc<RendererCache> =
            Arc::new(ResourceCache::new("renderer", renderer_cache));

        let contexts = ContextBuilder::new(shared.clone(), files.clone(), connections.clone());
        let routes = Arc::new(RouteTable::new(shared.clone(), contexts.clone()));
        let dispatcher = Dispatcher::new(
            shared.clone(),
            routes.clone(),
            contexts.clone(),
            renderers.clone(),
        );
        let streams = Streams::new(shared, routes.clone(), contexts.clone());
        let cloner = StructureCloner::new(catalog.clone(), files.clone());

        let bliss = Self {
            catalog,
            files,
            connections,
            renderers,
            contexts,
            routes,
            dispatcher,
            streams,
            cloner,
        };
        bliss.rebuild().await?;
        Ok(bliss)
    }

    pub fn catalog(&self) -> &Arc<SqliteCatalog> {
        &self.catalog
    }

    pub fn files(&self) -> &DataFiles {
        &self.files
    }

    pub fn routes(&self) -> &Arc<RouteTable> {
        &self.routes
    }

    pub fn streams(&self) -> &Streams {
        &self.streams
    }

    pub fn connections(&self) -> &Arc<ConnectionCache> {
        &self.connections
    }

    pub fn renderers(&self) -> &Arc<RendererCache> {
        &self.renderers
    }

    pub async fn dispatch(&self, request: InboundRequest) -> Outcome {
        self.dispatcher.dispatch(request).await
    }

    pub async fn rebuild(&self) -> Result<Arc<RouteSnapshot>, HostErr> {
        self.routes.rebuild().await
    }

    pub async fn create_structure(&self, structure: &NewStructure) -> Result<StructureId, HostErr> {
        let id = self.catalog.create_structure(structure).await?;
        info!("created structure {} '{}'", id, structure.name);
        Ok(id)
    }

    /// a prefix change moves every route of the structure, so it rebuilds the table
    pub async fn update_structure(
        &self,
        id: StructureId,
        settings: StructureSettings,
    ) -> Result<Structure, HostErr> {
        let mut structure = self.catalog.structure(id).await?;
        let mut moved = false;
        if let Some(name) = settings.name {
            structure.name = name;
        }
        if let Some(route_prefix) = settings.route_prefix {
            moved = route_prefix != structure.route_prefix;
            structure.route_prefix = route_prefix;
        }
        if let Some(head) = settings.head {
            structure.head = head;
        }
        self.catalog.update_structure(&structure).await?;
        if moved {
            self.rebuild().await?;
        }
        Ok(structure)
    }

    pub async fn create_route(&self, route: &NewRoute) -> Result<RouteId, HostErr> {
        let id = self.catalog.create_route(route).await?;
        self.rebuild().await?;
        Ok(id)
    }

    /// rebuilds only when the verb or path changed; handler source is read per request, so a
    /// handler edit is only checked and its error recorded
    pub async fn update_route(&self, id: RouteId, update: &RouteUpdate) -> Result<Route, HostErr> {
        let before = self.catalog.route(id).await?;
        let after = self.catalog.update_route(id, update).await?;
        if before.verb != after.verb || before.path != after.path {
            self.rebuild().await?;
        } else if before.handler != after.handler {
            self.routes.recheck(&after).await?;
        }
        Ok(self.catalog.route(id).await?)
    }

    pub async fn create_template(&self, template: &NewTemplate) -> Result<TemplateId, HostErr> {
        Ok(self.catalog.create_template(template).await?)
    }

    pub async fn update_template(
        &self,
        id: TemplateId,
        content: &str,
        test_object: &str,
    ) -> Result<(), HostErr> {
        Ok(self.catalog.update_template(id, content, test_object).await?)
    }

    /// registers a new database, allocates its empty data file and attaches it to its
    /// originating structure under `alias`
    pub async fn create_database(
        &self,
        database: &NewDatabase,
        alias: &str,
    ) -> Result<DatabaseId, HostErr> {
        let mut transaction = self.catalog.begin().await?;
        let id = tx::insert_database(&mut *transaction, database).await?;
        tx::insert_attachment(&mut *transaction, database.structure_id, id, alias, None).await?;
        let path = self.files.create(id).await?;
        if let Err(err) = transaction.commit().await {
            self.files.remove(&[path]).await;
            return Err(CatalogErr::from(err).into());
        }
        info!(
            "created database {} '{}' for structure {}",
            id, database.name, database.structure_id
        );
        Ok(id)
    }

    pub async fn update_library(&self, id: DatabaseId, library: &str) -> Result<(), HostErr> {
        Ok(self.catalog.update_library(id, library).await?)
    }

    /// shares an existing database with `structure`
    pub async fn attach(
        &self,
        structure: StructureId,
        database: DatabaseId,
        alias: &str,
    ) -> Result<i64, HostErr> {
        self.catalog.structure(structure).await?;
        self.catalog.database(database).await?;
        Ok(self.catalog.attach(structure, database, alias).await?)
    }

    pub async fn record_file(&self, file: &NewFile) -> Result<i64, HostErr> {
        Ok(self.catalog.create_file(file).await?)
    }

    pub async fn clone_structure(&self, request: &CloneRequest) -> Result<Cloned, HostErr> {
        let cloned = self.cloner.clone_structure(request).await?;
        self.rebuild().await?;
        Ok(cloned)
    }

    /// renders a template with the value its test object script evaluates to
    pub async fn preview_template(&self, id: TemplateId) -> Result<String, HostErr> {
        let template = self.catalog.template(id).await?;
        let structure = self.catalog.structure(template.structure_id).await?;
        let renderer = self.dispatcher.renderer(&structure)?;
        let chrome = Chrome::from(&structure);

        let bindings = Bindings::new()
            .bind("app", AppHandle::from(&structure))
            .with_render(renderer.clone(), chrome.clone());
        let context = self.contexts.build(structure.id, bindings).await?;

        tokio::task::spawn_blocking(move || -> Result<String, HostErr> {
            let value = context.eval(template.test_object.as_str())?;
            let data: serde_json::Value = rhai::serde::from_dynamic(&value)
                .map_err(|err| RenderErr::Data(err.to_string()))?;
            let html = renderer.render_source(
                template.name.as_str(),
                template.content.as_str(),
                &data,
            )?;
            Ok(renderer.decorate(html.as_str(), &chrome))
        })
        .await?
    }
}

#[cfg(test)]
pub mod test {
    use crate::catalog::{
        CatalogApi, NewDatabase, NewRoute, NewStructure, NewTemplate, RouteUpdate,
    };
    use crate::clone::CloneRequest;
    use crate::config::BlissConfig;
    use crate::dispatch::{InboundRequest, Outcome};
    use crate::host::{Bliss, StructureSettings};
    use crate::sandbox::proxy::HttpReply;
    use std::collections::HashSet;
    use tempdir::TempDir;

    static WIDGETS_LIBRARY: &str = r#"
        db.exec("CREATE TABLE IF NOT EXISTS widgets (id INTEGER PRIMARY KEY, name TEXT)");
        exports.findWidget = |id| {
            let rows = db.query("SELECT id, name FROM widgets WHERE id = ?", [parse_int(id)]);
            if rows.len() == 0 { () } else { rows[0] }
        };
        exports.addWidget = |name| {
            db.execute("INSERT INTO widgets (name) VALUES (?)", [name]);
            db.last_insert_id()
        };
    "#;

    static GET_WIDGET: &str = r#"
        fn handle(req, res) {
            let widget = getDb("main").library.findWidget(req.params.id);
            if type_of(widget) == "()" {
                res.status(404).send("no widget");
            } else {
                res.json(widget);
            }
        }
    "#;

    static POST_WIDGET: &str = r#"
        fn handle(req, res) {
            let id = getDb("main").library.addWidget(req.form.name);
            res.status(201).json(#{ id: id });
        }
    "#;

    async fn bliss() -> (TempDir, Bliss) {
        let home = TempDir::new("bliss-home").unwrap();
        let bliss = Bliss::new(&BlissConfig::with_home(home.path()))
            .await
            .unwrap();
        (home, bliss)
    }

    fn get(path: &str) -> InboundRequest {
        InboundRequest {
            method: "GET".to_string(),
            path: path.to_string(),
            ..Default::default()
        }
    }

    fn post_form(path: &str, body: &str) -> InboundRequest {
        InboundRequest {
            method: "POST".to_string(),
            path: path.to_string(),
            headers: vec![(
                "content-type".to_string(),
                "application/x-www-form-urlencoded".to_string(),
            )],
            body: body.to_string(),
            ..Default::default()
        }
    }

    async fn reply(bliss: &Bliss, request: InboundRequest) -> HttpReply {
        bliss.dispatch(request).await.into_reply()
    }

    fn route(structure_id: i64, verb: &str, path: &str, handler: &str) -> NewRoute {
        NewRoute {
            verb: verb.to_string(),
            path: path.to_string(),
            structure_id,
            handler: handler.to_string(),
        }
    }

    async fn widget_shop(bliss: &Bliss) -> (i64, i64) {
        let shop = bliss
            .create_structure(&NewStructure {
                name: "shop".to_string(),
                user_id: Some(1),
                ..Default::default()
            })
            .await
            .unwrap();
        let main = bliss
            .create_database(
                &NewDatabase {
                    name: "widgets".to_string(),
                    library: WIDGETS_LIBRARY.to_string(),
                    structure_id: shop,
                },
                "main",
            )
            .await
            .unwrap();
        bliss
            .create_route(&route(shop, "GET", "/widgets/:id", GET_WIDGET))
            .await
            .unwrap();
        bliss
            .create_route(&route(shop, "POST", "/widgets", POST_WIDGET))
            .await
            .unwrap();
        (shop, main)
    }

    #[tokio::test(flavor = "multi_thread")]
    pub async fn test_widgets_end_to_end() {
        let (_home, bliss) = bliss().await;
        let (_shop, main) = widget_shop(&bliss).await;
        assert!(bliss.files().path(main).exists());

        let created = reply(&bliss, post_form("/widgets", "name=sprocket")).await;
        assert_eq!(created.status, 201);
        assert_eq!(created.body, r#"{"id":1}"#);

        let found = reply(&bliss, get("/widgets/1")).await;
        assert_eq!(found.status, 200);
        assert_eq!(found.header("content-type"), Some("application/json"));
        assert_eq!(found.body, r#"{"id":1,"name":"sprocket"}"#);

        let missing = reply(&bliss, get("/widgets/2")).await;
        assert_eq!(missing.status, 404);
        assert_eq!(missing.body, "no widget");

        let nowhere = reply(&bliss, get("/nowhere")).await;
        assert_eq!(nowhere.status, 404);
        assert_eq!(nowhere.body, r#"{"success":false,"message":"Path not found"}"#);

        assert!(matches!(
            bliss
                .dispatch(InboundRequest {
                    method: "TRACE".to_string(),
                    path: "/widgets/1".to_string(),
                    ..Default::default()
                })
                .await,
            Outcome::NotFound
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    pub async fn test_throwing_handler_is_isolated() {
        let (_home, bliss) = bliss().await;
        let app = bliss
            .create_structure(&NewStructure {
                name: "app".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        bliss
            .create_route(&route(
                app,
                "GET",
                "/boom",
                r#"fn handle(req, res) { throw "handler exploded"; }"#,
            ))
            .await
            .unwrap();
        bliss
            .create_route(&route(app, "GET", "/fine", r#"fn handle(req, res) { "fine" }"#))
            .await
            .unwrap();

        let boom = reply(&bliss, get("/boom")).await;
        assert_eq!(boom.status, 500);
        assert_eq!(boom.header("content-type"), Some("text/plain; charset=utf-8"));
        assert!(boom.body.contains("handler exploded"));

        let fine = reply(&bliss, get("/fine")).await;
        assert_eq!(fine.status, 200);
        assert_eq!(fine.body, "fine");
    }

    #[tokio::test(flavor = "multi_thread")]
    pub async fn test_render_with_chrome_and_preview() {
        let (_home, bliss) = bliss().await;
        let blog = bliss
            .create_structure(&NewStructure {
                name: "blog".to_string(),
                route_prefix: Some("/blog".to_string()),
                head: Some(r#"<meta name="bliss">"#.to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        let template = bliss
            .create_template(&NewTemplate {
                structure_id: blog,
                name: "index".to_string(),
                content: r#"<html><head><title>{{title}}</title></head><body><a href="/posts">posts</a></body></html>"#.to_string(),
                test_object: r#"#{ title: "Preview " + app.name }"#.to_string(),
            })
            .await
            .unwrap();
        bliss
            .create_route(&route(
                blog,
                "GET",
                "/",
                r#"fn handle(req, res) { res.send(render("index", #{ title: "Blog" })); }"#,
            ))
            .await
            .unwrap();

        let page = reply(&bliss, get("/blog")).await;
        assert_eq!(page.status, 200);
        assert_eq!(
            page.body,
            r#"<html><head><title>Blog</title><meta name="bliss"></head><body><a href="/blog/posts">posts</a></body></html>"#
        );

        let preview = bliss.preview_template(template).await.unwrap();
        assert!(preview.contains("<title>Preview blog</title>"));

        // template edits are visible without touching the cache
        bliss
            .update_template(template, "<p>{{title}}</p>", "#{ title: 1 }")
            .await
            .unwrap();
        assert_eq!(reply(&bliss, get("/blog")).await.body, "<p>Blog</p>");
        assert_eq!(bliss.renderers().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    pub async fn test_clone_then_serve() {
        let (_home, bliss) = bliss().await;
        let (shop, main) = widget_shop(&bliss).await;
        assert_eq!(
            reply(&bliss, post_form("/widgets", "name=sprocket")).await.status,
            201
        );

        let cloned = bliss
            .clone_structure(&CloneRequest {
                source: shop,
                name: "shop copy".to_string(),
                owner: Some(2),
                route_prefix: Some("/copy".to_string()),
                deep_copy: HashSet::from([main]),
            })
            .await
            .unwrap();
        assert_eq!(cloned.routes, 2);

        let found = reply(&bliss, get("/copy/widgets/1")).await;
        assert_eq!(found.body, r#"{"id":1,"name":"sprocket"}"#);

        // the copy writes to its own file
        assert_eq!(
            reply(&bliss, post_form("/copy/widgets", "name=gear")).await.body,
            r#"{"id":2}"#
        );
        assert_eq!(reply(&bliss, get("/widgets/2")).await.status, 404);
        assert_eq!(reply(&bliss, get("/copy/widgets/2")).await.status, 200);
    }

    #[tokio::test(flavor = "multi_thread")]
    pub async fn test_route_updates() {
        let (_home, bliss) = bliss().await;
        let app = bliss
            .create_structure(&NewStructure {
                name: "app".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        let id = bliss
            .create_route(&route(app, "GET", "/a", r#"fn handle(req, res) { "one" }"#))
            .await
            .unwrap();
        let generation = bliss.routes().generation();

        bliss
            .update_route(
                id,
                &RouteUpdate {
                    handler: Some(r#"fn handle(req, res) { "two" }"#.to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(bliss.routes().generation(), generation);
        assert_eq!(reply(&bliss, get("/a")).await.body, "two");

        let broken = bliss
            .update_route(
                id,
                &RouteUpdate {
                    handler: Some("fn handle(req, res) { let = ; }".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(broken.error.is_some());
        assert_eq!(reply(&bliss, get("/a")).await.status, 500);
        let fixed = bliss
            .update_route(
                id,
                &RouteUpdate {
                    handler: Some(r#"fn handle(req, res) { "two" }"#.to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(fixed.error.is_none());
        assert_eq!(bliss.routes().generation(), generation);

        bliss
            .update_route(
                id,
                &RouteUpdate {
                    path: Some("/b".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(bliss.routes().generation(), generation + 1);
        assert_eq!(reply(&bliss, get("/a")).await.status, 404);
        assert_eq!(reply(&bliss, get("/b")).await.body, "two");

        bliss
            .update_structure(
                app,
                StructureSettings {
                    route_prefix: Some(Some("/app".to_string())),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(reply(&bliss, get("/app/b")).await.body, "two");
    }

    #[tokio::test(flavor = "multi_thread")]
    pub async fn test_last_registered_route_wins() {
        let (_home, bliss) = bliss().await;
        let first = bliss
            .create_structure(&NewStructure {
                name: "first".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        let second = bliss
            .create_structure(&NewStructure {
                name: "second".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        bliss
            .create_route(&route(first, "GET", "/dup", r#"fn handle(req, res) { "first" }"#))
            .await
            .unwrap();
        bliss
            .create_route(&route(second, "GET", "/dup", r#"fn handle(req, res) { "second" }"#))
            .await
            .unwrap();
        assert_eq!(reply(&bliss, get("/dup")).await.body, "second");
    }

    #[tokio::test(flavor = "multi_thread")]
    pub async fn test_stream_route() {
        let (_home, bliss) = bliss().await;
        let chat = bliss
            .create_structure(&NewStructure {
                name: "chat".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        let live = bliss
            .create_route(&route(
                chat,
                "WS",
                "/live",
                r#"fn on_message(socket, message) { socket.send("echo:" + message); }"#,
            ))
            .await
            .unwrap();

        assert!(bliss.streams().open("/nope").is_none());
        assert_eq!(reply(&bliss, get("/live")).await.status, 404);

        let session = bliss.streams().open("/live").unwrap();
        assert_eq!(session.route_id, live);
        assert_eq!(bliss.streams().live(live), 1);
        let sent = bliss
            .streams()
            .on_message(&session, "hi".to_string())
            .await
            .unwrap();
        assert_eq!(sent, vec!["echo:hi".to_string()]);
        bliss.streams().close(&session);
        assert_eq!(bliss.streams().live(live), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    pub async fn test_connection_eviction() {
        let home = TempDir::new("bliss-home").unwrap();
        let mut config = BlissConfig::with_home(home.path());
        config.connection_cache = 1;
        let bliss = Bliss::new(&config).await.unwrap();

        let app = bliss
            .create_structure(&NewStructure {
                name: "app".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        for alias in ["one", "two"] {
            bliss
                .create_database(
                    &NewDatabase {
                        name: alias.to_string(),
                        library: format!("exports.name = \"{}\";", alias),
                        structure_id: app,
                    },
                    alias,
                )
                .await
                .unwrap();
        }
        bliss
            .create_route(&route(
                app,
                "GET",
                "/names",
                r#"fn handle(req, res) { getDb("one").library.name + getDb("two").library.name }"#,
            ))
            .await
            .unwrap();

        for _ in 0..3 {
            assert_eq!(reply(&bliss, get("/names")).await.body, "onetwo");
        }
        assert_eq!(bliss.connections().len(), 1);
        assert_eq!(bliss.catalog().attachments(app).await.unwrap().len(), 2);
    }
}
