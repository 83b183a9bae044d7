use crate::catalog::err::CatalogErr;
use crate::catalog::{
    Attachment, CatalogApi, Database, DatabaseId, FileMeta, NewDatabase, NewFile, NewRoute,
    NewStructure, NewTemplate, PrefixedRoute, Route, RouteId, RouteUpdate, Structure, StructureId,
    Template, TemplateId,
};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use std::path::Path;
use std::time::Duration;
use tracing::{error, info};

static ROUTE_FIELDS: &str = "r.id, r.verb, r.path, r.structure_id, r.handler, r.error, r.updated_at";

static ATTACHMENT_QUERY: &str = r#"SELECT sd.id, sd.structure_id, sd.database_id, sd.alias, sd.created_at,
                d.name, d.library, (d.structure_id = sd.structure_id) AS owned
         FROM structure_databases AS sd
         JOIN databases AS d ON d.id = sd.database_id
         WHERE sd.structure_id = ?
         ORDER BY sd.created_at ASC, owned DESC, sd.id ASC"#;

pub fn now() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// the catalog (`prime.db`) on top of a sqlx sqlite pool
#[derive(Clone)]
pub struct SqliteCatalog {
    pool: SqlitePool,
}

impl SqliteCatalog {
    pub async fn connect<P>(path: P) -> Result<Self, CatalogErr>
    where
        P: AsRef<Path>,
    {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        let catalog = Self { pool };

        match catalog.setup().await {
            Ok(_) => {}
            Err(err) => {
                error!("catalog setup failed {}", err);
                return Err(CatalogErr::SetupFailed(err.to_string()));
            }
        }

        info!("catalog ready at '{}'", path.as_ref().display());
        Ok(catalog)
    }

    /// creates the tables the core reads and writes.  The real migration runner owns the
    /// rest of `prime.db` (users, sessions ...)
    async fn setup(&self) -> Result<(), CatalogErr> {
        let structures = r#"CREATE TABLE IF NOT EXISTS structures (
         id INTEGER PRIMARY KEY AUTOINCREMENT,
         name TEXT NOT NULL,
         user_id INTEGER,
         route_prefix TEXT,
         head TEXT,
         cloned_from INTEGER,
         FOREIGN KEY (cloned_from) REFERENCES structures (id)
        )"#;

        let routes = r#"CREATE TABLE IF NOT EXISTS routes (
         id INTEGER PRIMARY KEY AUTOINCREMENT,
         verb TEXT NOT NULL,
         path TEXT NOT NULL,
         structure_id INTEGER NOT NULL,
         handler TEXT NOT NULL DEFAULT '',
         error TEXT,
         updated_at INTEGER NOT NULL,
         FOREIGN KEY (structure_id) REFERENCES structures (id)
        )"#;

        let databases = r#"CREATE TABLE IF NOT EXISTS databases (
         id INTEGER PRIMARY KEY AUTOINCREMENT,
         name TEXT NOT NULL,
         library TEXT NOT NULL DEFAULT '',
         structure_id INTEGER NOT NULL,
         FOREIGN KEY (structure_id) REFERENCES structures (id)
        )"#;

        let attachments = r#"CREATE TABLE IF NOT EXISTS structure_databases (
         id INTEGER PRIMARY KEY AUTOINCREMENT,
         structure_id INTEGER NOT NULL,
         database_id INTEGER NOT NULL,
         alias TEXT NOT NULL,
         created_at INTEGER NOT NULL,
         FOREIGN KEY (structure_id) REFERENCES structures (id),
         FOREIGN KEY (database_id) REFERENCES databases (id)
        )"#;

        let templates = r#"CREATE TABLE IF NOT EXISTS templates (
         id INTEGER PRIMARY KEY AUTOINCREMENT,
         structure_id INTEGER NOT NULL,
         name TEXT NOT NULL,
         content TEXT NOT NULL DEFAULT '',
         test_object TEXT NOT NULL DEFAULT '',
         FOREIGN KEY (structure_id) REFERENCES structures (id)
        )"#;

        let files = r#"CREATE TABLE IF NOT EXISTS files (
         id INTEGER PRIMARY KEY AUTOINCREMENT,
         structure_id INTEGER NOT NULL,
         name TEXT NOT NULL,
         path TEXT NOT NULL,
         mime_type TEXT NOT NULL,
         mime_subtype TEXT NOT NULL,
         FOREIGN KEY (structure_id) REFERENCES structures (id)
        )"#;

        let routes_index =
            "CREATE INDEX IF NOT EXISTS routes_structure_index ON routes(structure_id)";
        let attachments_index = "CREATE INDEX IF NOT EXISTS structure_databases_structure_index ON structure_databases(structure_id)";
        let templates_index =
            "CREATE INDEX IF NOT EXISTS templates_name_index ON templates(structure_id,name)";

        let mut transaction = self.pool.begin().await?;
        for statement in [
            structures,
            routes,
            databases,
            attachments,
            templates,
            files,
            routes_index,
            attachments_index,
            templates_index,
        ] {
            sqlx::query(statement).execute(&mut *transaction).await?;
        }
        transaction.commit().await?;

        Ok(())
    }

    /// starts a catalog transaction.  Statements inside it go through [`tx`]
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>, CatalogErr> {
        Ok(self.pool.begin().await?)
    }

    /// waits for checked out connections to return, then closes the pool
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// statements that must be able to run inside a caller's transaction
pub mod tx {
    use super::{now, ATTACHMENT_QUERY};
    use crate::catalog::err::CatalogErr;
    use crate::catalog::{
        Attachment, DatabaseId, NewDatabase, NewStructure, Structure, StructureId,
    };
    use sqlx::SqliteConnection;

    pub async fn insert_structure(
        conn: &mut SqliteConnection,
        structure: &NewStructure,
    ) -> Result<StructureId, CatalogErr> {
        let result = sqlx::query(
            "INSERT INTO structures (name, user_id, route_prefix, head, cloned_from) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(structure.name.as_str())
        .bind(structure.user_id)
        .bind(structure.route_prefix.as_deref())
        .bind(structure.head.as_deref())
        .bind(structure.cloned_from)
        .execute(&mut *conn)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn insert_database(
        conn: &mut SqliteConnection,
        database: &NewDatabase,
    ) -> Result<DatabaseId, CatalogErr> {
        let result =
            sqlx::query("INSERT INTO databases (name, library, structure_id) VALUES (?, ?, ?)")
                .bind(database.name.as_str())
                .bind(database.library.as_str())
                .bind(database.structure_id)
                .execute(&mut *conn)
                .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn insert_attachment(
        conn: &mut SqliteConnection,
        structure: StructureId,
        database: DatabaseId,
        alias: &str,
        created_at: Option<i64>,
    ) -> Result<i64, CatalogErr> {
        let result = sqlx::query(
            "INSERT INTO structure_databases (structure_id, database_id, alias, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(structure)
        .bind(database)
        .bind(alias)
        .bind(created_at.unwrap_or_else(now))
        .execute(&mut *conn)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn attachments(
        conn: &mut SqliteConnection,
        structure: StructureId,
    ) -> Result<Vec<Attachment>, CatalogErr> {
        Ok(sqlx::query_as::<_, Attachment>(ATTACHMENT_QUERY)
            .bind(structure)
            .fetch_all(&mut *conn)
            .await?)
    }

    pub async fn structure(
        conn: &mut SqliteConnection,
        id: StructureId,
    ) -> Result<Structure, CatalogErr> {
        sqlx::query_as::<_, Structure>(
            "SELECT id, name, user_id, route_prefix, head, cloned_from FROM structures WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(CatalogErr::not_found("structure", id))
    }

    /// copies templates in id order, returns how many were copied
    pub async fn copy_templates(
        conn: &mut SqliteConnection,
        from: StructureId,
        to: StructureId,
    ) -> Result<u64, CatalogErr> {
        let result = sqlx::query(
            r#"INSERT INTO templates (structure_id, name, content, test_object)
               SELECT ?, name, content, test_object FROM templates WHERE structure_id = ? ORDER BY id"#,
        )
        .bind(to)
        .bind(from)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// copies routes in id order so the clone keeps the same build order
    pub async fn copy_routes(
        conn: &mut SqliteConnection,
        from: StructureId,
        to: StructureId,
    ) -> Result<u64, CatalogErr> {
        let result = sqlx::query(
            r#"INSERT INTO routes (verb, path, structure_id, handler, error, updated_at)
               SELECT verb, path, ?, handler, error, ? FROM routes WHERE structure_id = ? ORDER BY id"#,
        )
        .bind(to)
        .bind(now())
        .bind(from)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected())
    }
}

impl SqliteCatalog {
    async fn fetch_route(conn: &mut SqliteConnection, id: RouteId) -> Result<Route, CatalogErr> {
        let query = format!("SELECT {} FROM routes AS r WHERE r.id = ?", ROUTE_FIELDS);
        sqlx::query_as::<_, Route>(query.as_str())
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or(CatalogErr::not_found("route", id))
    }
}

#[async_trait]
impl CatalogApi for SqliteCatalog {
    async fn create_structure<'a>(
        &'a self,
        structure: &'a NewStructure,
    ) -> Result<StructureId, CatalogErr> {
        let mut conn = self.pool.acquire().await?;
        tx::insert_structure(&mut conn, structure).await
    }

    async fn structure(&self, id: StructureId) -> Result<Structure, CatalogErr> {
        let mut conn = self.pool.acquire().await?;
        tx::structure(&mut conn, id).await
    }

    async fn structures(&self) -> Result<Vec<Structure>, CatalogErr> {
        Ok(sqlx::query_as::<_, Structure>(
            "SELECT id, name, user_id, route_prefix, head, cloned_from FROM structures ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    async fn update_structure<'a>(&'a self, structure: &'a Structure) -> Result<(), CatalogErr> {
        let result =
            sqlx::query("UPDATE structures SET name = ?, route_prefix = ?, head = ? WHERE id = ?")
                .bind(structure.name.as_str())
                .bind(structure.route_prefix.as_deref())
                .bind(structure.head.as_deref())
                .bind(structure.id)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(CatalogErr::not_found("structure", structure.id));
        }
        Ok(())
    }

    async fn routes_with_prefix(&self) -> Result<Vec<PrefixedRoute>, CatalogErr> {
        let query = format!(
            "SELECT {}, s.route_prefix FROM routes AS r JOIN structures AS s ON s.id = r.structure_id ORDER BY r.id",
            ROUTE_FIELDS
        );
        Ok(sqlx::query_as::<_, PrefixedRoute>(query.as_str())
            .fetch_all(&self.pool)
            .await?)
    }

    async fn route(&self, id: RouteId) -> Result<Route, CatalogErr> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch_route(&mut conn, id).await
    }

    async fn routes(&self, structure: StructureId) -> Result<Vec<Route>, CatalogErr> {
        let query = format!(
            "SELECT {} FROM routes AS r WHERE r.structure_id = ? ORDER BY r.id",
            ROUTE_FIELDS
        );
        Ok(sqlx::query_as::<_, Route>(query.as_str())
            .bind(structure)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn create_route<'a>(&'a self, route: &'a NewRoute) -> Result<RouteId, CatalogErr> {
        let result = sqlx::query(
            "INSERT INTO routes (verb, path, structure_id, handler, updated_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(route.verb.as_str())
        .bind(route.path.as_str())
        .bind(route.structure_id)
        .bind(route.handler.as_str())
        .bind(now())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn update_route<'a>(
        &'a self,
        id: RouteId,
        update: &'a RouteUpdate,
    ) -> Result<Route, CatalogErr> {
        // write before read so the transaction holds the write lock for both
        let mut transaction = self.pool.begin().await?;
        let result = sqlx::query(
            "UPDATE routes SET verb = COALESCE(?, verb), path = COALESCE(?, path), handler = COALESCE(?, handler), updated_at = ? WHERE id = ?",
        )
        .bind(update.verb.as_deref())
        .bind(update.path.as_deref())
        .bind(update.handler.as_deref())
        .bind(now())
        .bind(id)
        .execute(&mut *transaction)
        .await?;
        if result.rows_affected() == 0 {
            return Err(CatalogErr::not_found("route", id));
        }
        let route = Self::fetch_route(&mut *transaction, id).await?;
        transaction.commit().await?;
        Ok(route)
    }

    async fn set_route_error<'a>(
        &'a self,
        id: RouteId,
        error: Option<&'a str>,
    ) -> Result<(), CatalogErr> {
        sqlx::query("UPDATE routes SET error = ? WHERE id = ?")
            .bind(error)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn database(&self, id: DatabaseId) -> Result<Database, CatalogErr> {
        sqlx::query_as::<_, Database>(
            "SELECT id, name, library, structure_id FROM databases WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(CatalogErr::not_found("database", id))
    }

    async fn create_database<'a>(
        &'a self,
        database: &'a NewDatabase,
    ) -> Result<DatabaseId, CatalogErr> {
        let mut conn = self.pool.acquire().await?;
        tx::insert_database(&mut conn, database).await
    }

    async fn update_library<'a>(
        &'a self,
        id: DatabaseId,
        library: &'a str,
    ) -> Result<(), CatalogErr> {
        let result = sqlx::query("UPDATE databases SET library = ? WHERE id = ?")
            .bind(library)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CatalogErr::not_found("database", id));
        }
        Ok(())
    }

    async fn attachments(&self, structure: StructureId) -> Result<Vec<Attachment>, CatalogErr> {
        let mut conn = self.pool.acquire().await?;
        tx::attachments(&mut conn, structure).await
    }

    async fn attach<'a>(
        &'a self,
        structure: StructureId,
        database: DatabaseId,
        alias: &'a str,
    ) -> Result<i64, CatalogErr> {
        let mut conn = self.pool.acquire().await?;
        tx::insert_attachment(&mut conn, structure, database, alias, None).await
    }

    async fn template(&self, id: TemplateId) -> Result<Template, CatalogErr> {
        sqlx::query_as::<_, Template>(
            "SELECT id, structure_id, name, content, test_object FROM templates WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(CatalogErr::not_found("template", id))
    }

    async fn templates(&self, structure: StructureId) -> Result<Vec<Template>, CatalogErr> {
        Ok(sqlx::query_as::<_, Template>(
            "SELECT id, structure_id, name, content, test_object FROM templates WHERE structure_id = ? ORDER BY id",
        )
        .bind(structure)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn create_template<'a>(
        &'a self,
        template: &'a NewTemplate,
    ) -> Result<TemplateId, CatalogErr> {
        let result = sqlx::query(
            "INSERT INTO templates (structure_id, name, content, test_object) VALUES (?, ?, ?, ?)",
        )
        .bind(template.structure_id)
        .bind(template.name.as_str())
        .bind(template.content.as_str())
        .bind(template.test_object.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn update_template<'a>(
        &'a self,
        id: TemplateId,
        content: &'a str,
        test_object: &'a str,
    ) -> Result<(), CatalogErr> {
        let result = sqlx::query("UPDATE templates SET content = ?, test_object = ? WHERE id = ?")
            .bind(content)
            .bind(test_object)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CatalogErr::not_found("template", id));
        }
        Ok(())
    }

    async fn template_content<'a>(
        &'a self,
        structure: StructureId,
        name: &'a str,
    ) -> Result<Option<String>, CatalogErr> {
        // newest wins when a structure holds two templates with the same name
        Ok(sqlx::query_scalar::<_, String>(
            "SELECT content FROM templates WHERE structure_id = ? AND name = ? ORDER BY id DESC LIMIT 1",
        )
        .bind(structure)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn create_file<'a>(&'a self, file: &'a NewFile) -> Result<i64, CatalogErr> {
        let result = sqlx::query(
            "INSERT INTO files (structure_id, name, path, mime_type, mime_subtype) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(file.structure_id)
        .bind(file.name.as_str())
        .bind(file.path.as_str())
        .bind(file.mime_type.as_str())
        .bind(file.mime_subtype.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn files(&self, structure: StructureId) -> Result<Vec<FileMeta>, CatalogErr> {
        Ok(sqlx::query_as::<_, FileMeta>(
            "SELECT id, structure_id, name, path, mime_type, mime_subtype FROM files WHERE structure_id = ? ORDER BY id",
        )
        .bind(structure)
        .fetch_all(&self.pool)
        .await?)
    }
}

#[cfg(test)]
pub mod test {
    use crate::catalog::sqlite::SqliteCatalog;
    use crate::catalog::{
        CatalogApi, NewDatabase, NewRoute, NewStructure, NewTemplate, RouteUpdate,
    };
    use tempdir::TempDir;

    pub async fn catalog() -> (TempDir, SqliteCatalog) {
        let dir = TempDir::new("bliss-catalog").unwrap();
        let catalog = SqliteCatalog::connect(dir.path().join("prime.db"))
            .await
            .unwrap();
        (dir, catalog)
    }

    pub fn structure(name: &str) -> NewStructure {
        NewStructure {
            name: name.to_string(),
            user_id: Some(1),
            ..Default::default()
        }
    }

    #[tokio::test]
    pub async fn test_routes_with_prefix() {
        let (_dir, catalog) = catalog().await;
        let mut new = structure("shop");
        new.route_prefix = Some("/shop".to_string());
        let shop = catalog.create_structure(&new).await.unwrap();
        let plain = catalog.create_structure(&structure("plain")).await.unwrap();

        catalog
            .create_route(&NewRoute {
                verb: "GET".to_string(),
                path: "/items".to_string(),
                structure_id: shop,
                handler: "fn handle(req, res) { }".to_string(),
            })
            .await
            .unwrap();
        catalog
            .create_route(&NewRoute {
                verb: "POST".to_string(),
                path: "/items".to_string(),
                structure_id: plain,
                handler: "".to_string(),
            })
            .await
            .unwrap();

        let routes = catalog.routes_with_prefix().await.unwrap();
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].route_prefix.as_deref(), Some("/shop"));
        assert_eq!(routes[0].route.verb, "GET");
        assert_eq!(routes[1].route_prefix, None);
        assert_eq!(routes[1].route.structure_id, plain);
    }

    #[tokio::test]
    pub async fn test_update_route() {
        let (_dir, catalog) = catalog().await;
        let id = catalog.create_structure(&structure("s")).await.unwrap();
        let route = catalog
            .create_route(&NewRoute {
                verb: "GET".to_string(),
                path: "/a".to_string(),
                structure_id: id,
                handler: "1".to_string(),
            })
            .await
            .unwrap();

        let update = RouteUpdate {
            path: Some("/b".to_string()),
            ..Default::default()
        };
        let updated = catalog.update_route(route, &update).await.unwrap();
        assert_eq!(updated.path, "/b");
        assert_eq!(updated.handler, "1");

        catalog.set_route_error(route, Some("bad")).await.unwrap();
        assert_eq!(catalog.route(route).await.unwrap().error.as_deref(), Some("bad"));
        catalog.set_route_error(route, None).await.unwrap();
        assert_eq!(catalog.route(route).await.unwrap().error, None);

        assert!(catalog.route(9999).await.unwrap_err().is_not_found());
        assert!(catalog
            .update_route(9999, &update)
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    pub async fn test_concurrent_route_edits_keep_both_fields() {
        let (_dir, catalog) = catalog().await;
        let catalog = std::sync::Arc::new(catalog);
        let id = catalog.create_structure(&structure("s")).await.unwrap();
        let route = catalog
            .create_route(&NewRoute {
                verb: "GET".to_string(),
                path: "/a".to_string(),
                structure_id: id,
                handler: "h".to_string(),
            })
            .await
            .unwrap();

        let mut edits = vec![];
        for n in 0..10 {
            let catalog = catalog.clone();
            edits.push(tokio::spawn(async move {
                let update = if n % 2 == 0 {
                    RouteUpdate {
                        path: Some(format!("/p{}", n)),
                        ..Default::default()
                    }
                } else {
                    RouteUpdate {
                        handler: Some(format!("h{}", n)),
                        ..Default::default()
                    }
                };
                catalog.update_route(route, &update).await.unwrap()
            }));
        }
        for edit in edits {
            edit.await.unwrap();
        }

        let route = catalog.route(route).await.unwrap();
        assert!(route.path.starts_with("/p"));
        assert_ne!(route.handler, "h");
        assert_eq!(route.verb, "GET");
    }

    #[tokio::test]
    pub async fn test_attachment_order() {
        let (_dir, catalog) = catalog().await;
        let a = catalog.create_structure(&structure("a")).await.unwrap();
        let b = catalog.create_structure(&structure("b")).await.unwrap();

        let shared = catalog
            .create_database(&NewDatabase {
                name: "shared".to_string(),
                library: "".to_string(),
                structure_id: b,
            })
            .await
            .unwrap();
        let own = catalog
            .create_database(&NewDatabase {
                name: "own".to_string(),
                library: "".to_string(),
                structure_id: a,
            })
            .await
            .unwrap();

        // identical timestamps: owned sorts before aliased
        let mut conn = catalog.pool.acquire().await.unwrap();
        super::tx::insert_attachment(&mut conn, a, shared, "shared", Some(10))
            .await
            .unwrap();
        super::tx::insert_attachment(&mut conn, a, own, "main", Some(10))
            .await
            .unwrap();
        super::tx::insert_attachment(&mut conn, a, shared, "early", Some(5))
            .await
            .unwrap();
        drop(conn);

        let attachments = catalog.attachments(a).await.unwrap();
        let aliases: Vec<&str> = attachments.iter().map(|a| a.alias.as_str()).collect();
        assert_eq!(aliases, vec!["early", "main", "shared"]);
        assert!(attachments[1].owned);
        assert!(!attachments[2].owned);
    }

    #[tokio::test]
    pub async fn test_template_content() {
        let (_dir, catalog) = catalog().await;
        let id = catalog.create_structure(&structure("s")).await.unwrap();
        let template = catalog
            .create_template(&NewTemplate {
                structure_id: id,
                name: "index".to_string(),
                content: "<p>{{name}}</p>".to_string(),
                test_object: "#{ name: \"x\" }".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(
            catalog.template_content(id, "index").await.unwrap().as_deref(),
            Some("<p>{{name}}</p>")
        );
        assert_eq!(catalog.template_content(id, "missing").await.unwrap(), None);

        catalog
            .update_template(template, "<b>{{name}}</b>", "#{}")
            .await
            .unwrap();
        assert_eq!(
            catalog.template(template).await.unwrap().content,
            "<b>{{name}}</b>"
        );
    }
}
