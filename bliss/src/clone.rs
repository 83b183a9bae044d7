use crate::catalog::err::CatalogErr;
use crate::catalog::sqlite::{tx, SqliteCatalog};
use crate::catalog::{DatabaseId, NewDatabase, NewStructure, StructureId, UserId};
use crate::err::HostErr;
use crate::files::DataFiles;
use sqlx::SqliteConnection;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
pub struct CloneRequest {
    pub source: StructureId,
    pub name: String,
    pub owner: Option<UserId>,
    pub route_prefix: Option<String>,
    /// attached databases to copy; every other attachment is shared by alias
    pub deep_copy: HashSet<DatabaseId>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Cloned {
    pub structure: StructureId,
    /// (source database, new database) for each deep copy
    pub copies: Vec<(DatabaseId, DatabaseId)>,
    pub shared: Vec<DatabaseId>,
    pub templates: u64,
    pub routes: u64,
}

/// Duplicates a structure inside one catalog transaction.  Data files copied before a failure
/// are removed again when the transaction rolls back.
#[derive(Clone)]
pub struct StructureCloner {
    catalog: Arc<SqliteCatalog>,
    files: DataFiles,
}

impl StructureCloner {
    pub fn new(catalog: Arc<SqliteCatalog>, files: DataFiles) -> Self {
        Self { catalog, files }
    }

    /// The route table is not rebuilt here; that is up to the caller once this returns.
    pub async fn clone_structure(&self, request: &CloneRequest) -> Result<Cloned, HostErr> {
        let mut transaction = self.catalog.begin().await?;
        let mut written: Vec<PathBuf> = vec![];

        match self.copy(&mut *transaction, request, &mut written).await {
            Ok(cloned) => match transaction.commit().await {
                Ok(_) => {
                    info!(
                        "cloned structure {} into {} ({} deep copies, {} shared, {} templates, {} routes)",
                        request.source,
                        cloned.structure,
                        cloned.copies.len(),
                        cloned.shared.len(),
                        cloned.templates,
                        cloned.routes
                    );
                    Ok(cloned)
                }
                Err(err) => {
                    self.files.remove(&written).await;
                    Err(CatalogErr::from(err).into())
                }
            },
            Err(err) => {
                warn!("clone of structure {} failed: {}", request.source, err);
                if let Err(rollback) = transaction.rollback().await {
                    warn!("rollback failed: {}", rollback);
                }
                self.files.remove(&written).await;
                Err(err)
            }
        }
    }

    async fn copy(
        &self,
        conn: &mut SqliteConnection,
        request: &CloneRequest,
        written: &mut Vec<PathBuf>,
    ) -> Result<Cloned, HostErr> {
        let source = tx::structure(conn, request.source).await?;

        let structure = tx::insert_structure(
            conn,
            &NewStructure {
                name: request.name.clone(),
                user_id: request.owner,
                route_prefix: request.route_prefix.clone(),
                head: source.head.clone(),
                cloned_from: Some(source.id),
            },
        )
        .await?;

        let attachments = tx::attachments(conn, request.source).await?;
        let attached: HashSet<DatabaseId> = attachments.iter().map(|a| a.database_id).collect();
        if let Some(missing) = request.deep_copy.iter().find(|id| !attached.contains(id)) {
            return Err(CatalogErr::NotAttached {
                structure: request.source,
                database: *missing,
            }
            .into());
        }

        let mut copies = vec![];
        let mut shared = vec![];
        for attachment in attachments {
            if request.deep_copy.contains(&attachment.database_id) {
                let copy = tx::insert_database(
                    conn,
                    &NewDatabase {
                        name: attachment.name.clone(),
                        library: attachment.library.clone(),
                        structure_id: structure,
                    },
                )
                .await?;
                tx::insert_attachment(
                    conn,
                    structure,
                    copy,
                    attachment.alias.as_str(),
                    Some(attachment.created_at),
                )
                .await?;
                written.extend(self.files.copy(attachment.database_id, copy).await?);
                copies.push((attachment.database_id, copy));
            } else {
                tx::insert_attachment(
                    conn,
                    structure,
                    attachment.database_id,
                    attachment.alias.as_str(),
                    Some(attachment.created_at),
                )
                .await?;
                shared.push(attachment.database_id);
            }
        }

        let templates = tx::copy_templates(conn, request.source, structure).await?;
        let routes = tx::copy_routes(conn, request.source, structure).await?;

        Ok(Cloned {
            structure,
            copies,
            shared,
            templates,
            routes,
        })
    }
}
