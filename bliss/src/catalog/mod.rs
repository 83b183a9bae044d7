use crate::catalog::err::CatalogErr;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub mod err;
pub mod sqlite;

pub type StructureId = i64;
pub type RouteId = i64;
pub type DatabaseId = i64;
pub type TemplateId = i64;
pub type UserId = i64;

/// the catalog is the single source of truth.  Everything the host keeps in memory (the
/// route table, the caches) is a projection that can be rebuilt from it at any time.
pub type Catalog = Arc<dyn CatalogApi>;

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Structure {
    pub id: StructureId,
    pub name: String,
    pub user_id: Option<UserId>,
    pub route_prefix: Option<String>,
    pub head: Option<String>,
    pub cloned_from: Option<StructureId>,
}

#[derive(Debug, Clone, Default)]
pub struct NewStructure {
    pub name: String,
    pub user_id: Option<UserId>,
    pub route_prefix: Option<String>,
    pub head: Option<String>,
    pub cloned_from: Option<StructureId>,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Route {
    pub id: RouteId,
    /// kept as text so a single unknown verb can't poison a whole listing; it is
    /// parsed when the route table compiles the route
    pub verb: String,
    pub path: String,
    pub structure_id: StructureId,
    pub handler: String,
    pub error: Option<String>,
    pub updated_at: i64,
}

#[derive(Debug, Clone)]
pub struct NewRoute {
    pub verb: String,
    pub path: String,
    pub structure_id: StructureId,
    pub handler: String,
}

#[derive(Debug, Clone, Default)]
pub struct RouteUpdate {
    pub verb: Option<String>,
    pub path: Option<String>,
    pub handler: Option<String>,
}

/// a [`Route`] joined with the route prefix of its owning [`Structure`]
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PrefixedRoute {
    #[sqlx(flatten)]
    pub route: Route,
    pub route_prefix: Option<String>,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Database {
    pub id: DatabaseId,
    pub name: String,
    pub library: String,
    pub structure_id: StructureId,
}

#[derive(Debug, Clone)]
pub struct NewDatabase {
    pub name: String,
    pub library: String,
    pub structure_id: StructureId,
}

/// a database as seen from one structure: the join of an attachment row with its database
#[derive(Debug, Clone, Eq, PartialEq, sqlx::FromRow)]
pub struct Attachment {
    pub id: i64,
    pub structure_id: StructureId,
    pub database_id: DatabaseId,
    pub alias: String,
    pub created_at: i64,
    pub name: String,
    pub library: String,
    /// true when the attaching structure is also the database's originating structure
    pub owned: bool,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Template {
    pub id: TemplateId,
    pub structure_id: StructureId,
    pub name: String,
    pub content: String,
    pub test_object: String,
}

#[derive(Debug, Clone)]
pub struct NewTemplate {
    pub structure_id: StructureId,
    pub name: String,
    pub content: String,
    pub test_object: String,
}

/// upload metadata.  The bytes themselves live with the upload store.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct FileMeta {
    pub id: i64,
    pub structure_id: StructureId,
    pub name: String,
    pub path: String,
    pub mime_type: String,
    pub mime_subtype: String,
}

#[derive(Debug, Clone)]
pub struct NewFile {
    pub structure_id: StructureId,
    pub name: String,
    pub path: String,
    pub mime_type: String,
    pub mime_subtype: String,
}

#[async_trait]
pub trait CatalogApi: Send + Sync {
    async fn create_structure<'a>(&'a self, structure: &'a NewStructure)
        -> Result<StructureId, CatalogErr>;

    async fn structure(&self, id: StructureId) -> Result<Structure, CatalogErr>;

    async fn structures(&self) -> Result<Vec<Structure>, CatalogErr>;

    async fn update_structure<'a>(&'a self, structure: &'a Structure) -> Result<(), CatalogErr>;

    /// every route of every structure in build order (ascending id)
    async fn routes_with_prefix(&self) -> Result<Vec<PrefixedRoute>, CatalogErr>;

    async fn route(&self, id: RouteId) -> Result<Route, CatalogErr>;

    async fn routes(&self, structure: StructureId) -> Result<Vec<Route>, CatalogErr>;

    async fn create_route<'a>(&'a self, route: &'a NewRoute) -> Result<RouteId, CatalogErr>;

    async fn update_route<'a>(
        &'a self,
        id: RouteId,
        update: &'a RouteUpdate,
    ) -> Result<Route, CatalogErr>;

    async fn set_route_error<'a>(
        &'a self,
        id: RouteId,
        error: Option<&'a str>,
    ) -> Result<(), CatalogErr>;

    async fn database(&self, id: DatabaseId) -> Result<Database, CatalogErr>;

    async fn create_database<'a>(
        &'a self,
        database: &'a NewDatabase,
    ) -> Result<DatabaseId, CatalogErr>;

    async fn update_library<'a>(&'a self, id: DatabaseId, library: &'a str)
        -> Result<(), CatalogErr>;

    /// attachments ordered by creation time, owned databases before aliased ones on ties
    async fn attachments(&self, structure: StructureId) -> Result<Vec<Attachment>, CatalogErr>;

    async fn attach<'a>(
        &'a self,
        structure: StructureId,
        database: DatabaseId,
        alias: &'a str,
    ) -> Result<i64, CatalogErr>;

    async fn template(&self, id: TemplateId) -> Result<Template, CatalogErr>;

    async fn templates(&self, structure: StructureId) -> Result<Vec<Template>, CatalogErr>;

    async fn create_template<'a>(
        &'a self,
        template: &'a NewTemplate,
    ) -> Result<TemplateId, CatalogErr>;

    async fn update_template<'a>(
        &'a self,
        id: TemplateId,
        content: &'a str,
        test_object: &'a str,
    ) -> Result<(), CatalogErr>;

    async fn template_content<'a>(
        &'a self,
        structure: StructureId,
        name: &'a str,
    ) -> Result<Option<String>, CatalogErr>;

    async fn create_file<'a>(&'a self, file: &'a NewFile) -> Result<i64, CatalogErr>;

    async fn files(&self, structure: StructureId) -> Result<Vec<FileMeta>, CatalogErr>;
}
