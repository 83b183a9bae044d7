use crate::cache::ResourceCache;
use crate::catalog::{Attachment, Catalog, DatabaseId, StructureId};
use crate::err::HostErr;
use crate::files::DataFiles;
use crate::render::{Chrome, TenantRenderer};
use crate::sandbox::db::DbHandle;
use crate::sandbox::script::{compile, defines, ScriptErr};
use parking_lot::RwLock;
use rhai::{Dynamic, Engine, EvalAltResult, Map, Scope, AST};
use std::sync::Arc;
use tracing::{debug, info};

pub mod db;
pub mod proxy;
pub mod script;

pub type ConnectionCache = ResourceCache<DatabaseId, DbHandle>;

/// Capabilities handed to one context in addition to its databases.
#[derive(Default)]
pub struct Bindings {
    values: Vec<(String, Dynamic)>,
    render: Option<(Arc<TenantRenderer>, Chrome)>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind<V>(mut self, name: &str, value: V) -> Self
    where
        V: Clone + Send + Sync + 'static,
    {
        self.values.push((name.to_string(), Dynamic::from(value)));
        self
    }

    pub fn with_render(mut self, renderer: Arc<TenantRenderer>, chrome: Chrome) -> Self {
        self.render = Some((renderer, chrome));
        self
    }
}

/// Assembles sandbox contexts.  Each context gets its own engine, sees only what it was
/// given, and is consumed by the one script run it was built for.
#[derive(Clone)]
pub struct ContextBuilder {
    catalog: Catalog,
    files: DataFiles,
    connections: Arc<ConnectionCache>,
}

impl ContextBuilder {
    pub fn new(catalog: Catalog, files: DataFiles, connections: Arc<ConnectionCache>) -> Self {
        Self {
            catalog,
            files,
            connections,
        }
    }

    pub fn connections(&self) -> &Arc<ConnectionCache> {
        &self.connections
    }

    pub async fn build(
        &self,
        structure: StructureId,
        bindings: Bindings,
    ) -> Result<SandboxContext, HostErr> {
        let attachments = self.catalog.attachments(structure).await?;
        let builder = self.clone();
        tokio::task::spawn_blocking(move || builder.assemble(structure, attachments, bindings))
            .await?
    }

    /// the blocking half of [`ContextBuilder::build`]: runs every attached library in order
    pub fn assemble(
        &self,
        structure: StructureId,
        attachments: Vec<Attachment>,
        bindings: Bindings,
    ) -> Result<SandboxContext, HostErr> {
        let mut engine = Engine::new();
        db::register(&mut engine);
        proxy::register(&mut engine);
        engine.on_print(move |text| info!(structure, "{}", text));
        engine.on_debug(move |text, _, pos| debug!(structure, "{} @ {}", text, pos));

        let databases: Arc<RwLock<Map>> = Arc::new(RwLock::new(Map::new()));
        {
            let databases = databases.clone();
            engine.register_fn(
                "getDb",
                move |alias: &str| -> Result<Dynamic, Box<EvalAltResult>> {
                    databases.read().get(alias).cloned().ok_or_else(|| {
                        format!("no database attached under alias '{}'", alias).into()
                    })
                },
            );
        }

        if let Some((renderer, chrome)) = bindings.render {
            register_render(&mut engine, renderer, chrome);
        }

        let mut functions = AST::empty();
        let mut aliases = vec![];
        for attachment in attachments {
            let id = attachment.database_id;
            let handle = self
                .connections
                .get_or_create(&id, || DbHandle::open(self.files.path(id)))
                .map_err(|err| HostErr::Connection {
                    id,
                    message: err.to_string(),
                })?;

            let (exports, library) = script::execute(
                &engine,
                attachment.library.as_str(),
                vec![("db".to_string(), Dynamic::from(handle.clone()))],
            )
            .map_err(|mut err| {
                err.trace.push(format!(
                    "in library of database '{}' ({})",
                    attachment.alias, id
                ));
                err
            })?;
            functions = functions.merge(&library);

            let mut entry = Map::new();
            entry.insert("library".into(), exports);
            entry.insert("db".into(), Dynamic::from(handle));
            databases
                .write()
                .insert(attachment.alias.as_str().into(), Dynamic::from_map(entry));
            aliases.push(attachment.alias);
        }

        let mut scope = Scope::new();
        for (name, value) in bindings.values {
            scope.push_dynamic(name, value);
        }

        Ok(SandboxContext {
            structure,
            engine,
            scope,
            functions,
            aliases,
        })
    }
}

fn register_render(engine: &mut Engine, renderer: Arc<TenantRenderer>, chrome: Chrome) {
    let render = move |name: &str, data: Dynamic| -> Result<String, Box<EvalAltResult>> {
        let data: serde_json::Value = rhai::serde::from_dynamic(&data)?;
        let html = renderer.render(name, &data).map_err(|e| e.to_string())?;
        Ok(renderer.decorate(html.as_str(), &chrome))
    };
    let with_data = render.clone();
    engine.register_fn("render", move |name: &str, data: Dynamic| with_data(name, data));
    engine.register_fn("render", move |name: &str| render(name, Dynamic::UNIT));
}

/// a ready to run, single-shot execution context
pub struct SandboxContext {
    structure: StructureId,
    engine: Engine,
    scope: Scope<'static>,
    functions: AST,
    aliases: Vec<String>,
}

impl SandboxContext {
    pub fn structure(&self) -> StructureId {
        self.structure
    }

    /// aliases available through `getDb`, in load order
    pub fn aliases(&self) -> &Vec<String> {
        &self.aliases
    }

    fn program(&self, source: &str) -> Result<AST, ScriptErr> {
        Ok(self.functions.merge(&compile(&self.engine, source)?))
    }

    /// runs `source` and returns the value of its last statement
    pub fn eval(mut self, source: &str) -> Result<Dynamic, ScriptErr> {
        let program = self.program(source)?;
        Ok(self
            .engine
            .eval_ast_with_scope::<Dynamic>(&mut self.scope, &program)?)
    }

    /// fails unless `source` compiles and defines `entry` taking two arguments
    pub fn verify(&self, source: &str, entry: &str) -> Result<(), ScriptErr> {
        let program = self.program(source)?;
        if defines(&program, entry, 2) {
            Ok(())
        } else {
            Err(ScriptErr::new(format!(
                "script does not define fn {}(_, _)",
                entry
            )))
        }
    }

    /// runs the top level of `source`, then calls its `entry` function with two arguments
    pub fn invoke(
        mut self,
        source: &str,
        entry: &str,
        first: Dynamic,
        second: Dynamic,
    ) -> Result<Dynamic, ScriptErr> {
        let program = self.program(source)?;
        if !defines(&program, entry, 2) {
            return Err(ScriptErr::new(format!(
                "script does not define fn {}(_, _)",
                entry
            )));
        }
        Ok(self.engine.call_fn::<Dynamic>(
            &mut self.scope,
            &program,
            entry,
            (first, second),
        )?)
    }
}

#[cfg(test)]
pub mod test {
    use crate::cache::ResourceCache;
    use crate::catalog::sqlite::test::{catalog, structure};
    use crate::catalog::{CatalogApi, NewDatabase};
    use crate::err::HostErr;
    use crate::files::DataFiles;
    use crate::sandbox::{Bindings, ContextBuilder};
    use rhai::Dynamic;
    use std::sync::Arc;
    use tempdir::TempDir;

    #[tokio::test]
    pub async fn test_libraries_and_get_db() {
        let (_dir, catalog) = catalog().await;
        let catalog = Arc::new(catalog);
        let data = TempDir::new("bliss-data").unwrap();
        let files = DataFiles::new(data.path());

        let owner = catalog.create_structure(&structure("owner")).await.unwrap();
        let counter = catalog
            .create_database(&NewDatabase {
                name: "counter".to_string(),
                library: r#"
                    db.exec("CREATE TABLE IF NOT EXISTS hits (n INTEGER)");
                    exports.hit = || {
                        db.execute("INSERT INTO hits (n) VALUES (1)");
                        db.query("SELECT count(*) AS total FROM hits")[0].total
                    };
                "#
                .to_string(),
                structure_id: owner,
            })
            .await
            .unwrap();
        catalog.attach(owner, counter, "main").await.unwrap();

        let builder = ContextBuilder::new(
            catalog.clone(),
            files,
            Arc::new(ResourceCache::new("connections", 4)),
        );

        for expected in 1..=2_i64 {
            let context = builder
                .build(owner, Bindings::new().bind("greeting", "hi".to_string()))
                .await
                .unwrap();
            assert_eq!(context.aliases(), &vec!["main".to_string()]);
            let total = tokio::task::spawn_blocking(move || {
                context.eval(r#"getDb("main").library.hit()"#)
            })
            .await
            .unwrap()
            .unwrap();
            assert_eq!(total.as_int().unwrap(), expected);
        }
        assert_eq!(builder.connections().len(), 1);
    }

    #[tokio::test]
    pub async fn test_failing_library_aborts_build() {
        let (_dir, catalog) = catalog().await;
        let catalog = Arc::new(catalog);
        let data = TempDir::new("bliss-data").unwrap();

        let owner = catalog.create_structure(&structure("owner")).await.unwrap();
        let broken = catalog
            .create_database(&NewDatabase {
                name: "broken".to_string(),
                library: r#"throw "library exploded";"#.to_string(),
                structure_id: owner,
            })
            .await
            .unwrap();
        catalog.attach(owner, broken, "main").await.unwrap();

        let builder = ContextBuilder::new(
            catalog.clone(),
            DataFiles::new(data.path()),
            Arc::new(ResourceCache::new("connections", 4)),
        );
        match builder.build(owner, Bindings::new()).await {
            Err(HostErr::Script(err)) => {
                assert_eq!(err.message, "library exploded");
                assert!(err.trace.iter().any(|line| line.contains("'main'")));
            }
            Err(other) => panic!("unexpected error {}", other),
            Ok(_) => panic!("expected the build to fail"),
        }
    }

    #[tokio::test]
    pub async fn test_invoke_requires_entry() {
        let (_dir, catalog) = catalog().await;
        let catalog = Arc::new(catalog);
        let data = TempDir::new("bliss-data").unwrap();
        let owner = catalog.create_structure(&structure("owner")).await.unwrap();
        let builder = ContextBuilder::new(
            catalog.clone(),
            DataFiles::new(data.path()),
            Arc::new(ResourceCache::new("connections", 4)),
        );

        let context = builder.build(owner, Bindings::new()).await.unwrap();
        let err = context
            .invoke("let x = 1;", "handle", Dynamic::UNIT, Dynamic::UNIT)
            .unwrap_err();
        assert!(err.message.contains("handle"));

        let context = builder.build(owner, Bindings::new()).await.unwrap();
        let value = context
            .invoke(
                "fn handle(a, b) { a + b }",
                "handle",
                Dynamic::from_int(2),
                Dynamic::from_int(3),
            )
            .unwrap();
        assert_eq!(value.as_int().unwrap(), 5);
    }
}
