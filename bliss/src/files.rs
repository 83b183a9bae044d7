use crate::catalog::DatabaseId;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// sqlite write-ahead-log and shared-memory files live next to the data file
pub static SIDECARS: [&str; 2] = ["-wal", "-shm"];

#[derive(Error, Debug, Clone)]
pub enum FileErr {
    #[error("data file for database '{0}' does not exist")]
    Missing(DatabaseId),
    #[error("data file for database '{0}' already exists")]
    Exists(DatabaseId),
    #[error("data file '{path}': {err}")]
    Io { path: PathBuf, err: Arc<std::io::Error> },
}

impl FileErr {
    fn io(path: &Path, err: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            err: Arc::new(err),
        }
    }
}

/// the directory holding one embedded data file per database, named by the database id
#[derive(Clone, Debug)]
pub struct DataFiles {
    dir: PathBuf,
}

impl DataFiles {
    pub fn new<P>(dir: P) -> Self
    where
        P: Into<PathBuf>,
    {
        Self { dir: dir.into() }
    }

    pub async fn init(&self) -> Result<(), FileErr> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|err| FileErr::io(&self.dir, err))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, id: DatabaseId) -> PathBuf {
        self.dir.join(format!("{}.db", id))
    }

    fn sidecar(&self, id: DatabaseId, suffix: &str) -> PathBuf {
        self.dir.join(format!("{}.db{}", id, suffix))
    }

    /// allocates a fresh, empty data file.  Sqlite treats a zero length file as an empty database
    pub async fn create(&self, id: DatabaseId) -> Result<PathBuf, FileErr> {
        let path = self.path(id);
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(_) => {
                debug!("created data file {}", path.display());
                Ok(path)
            }
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => Err(FileErr::Exists(id)),
            Err(err) => Err(FileErr::io(&path, err)),
        }
    }

    /// byte for byte copy of the data file of `from` (and any sidecar present) to the paths of
    /// `to`.  Returns every path written so a caller can undo the copy.
    pub async fn copy(&self, from: DatabaseId, to: DatabaseId) -> Result<Vec<PathBuf>, FileErr> {
        let source = self.path(from);
        if !tokio::fs::try_exists(&source)
            .await
            .map_err(|err| FileErr::io(&source, err))?
        {
            return Err(FileErr::Missing(from));
        }

        let mut written = vec![];
        let target = self.path(to);
        if let Err(err) = tokio::fs::copy(&source, &target).await {
            return Err(FileErr::io(&target, err));
        }
        written.push(target);

        for suffix in SIDECARS {
            let source = self.sidecar(from, suffix);
            let target = self.sidecar(to, suffix);
            match tokio::fs::copy(&source, &target).await {
                Ok(_) => written.push(target),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    self.remove(&written).await;
                    return Err(FileErr::io(&target, err));
                }
            }
        }

        debug!("copied data file {} -> {}", from, to);
        Ok(written)
    }

    /// best effort removal
    pub async fn remove(&self, paths: &[PathBuf]) {
        for path in paths {
            if let Err(err) = tokio::fs::remove_file(path).await {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!("could not remove data file {}: {}", path.display(), err);
                }
            }
        }
    }
}

#[cfg(test)]
pub mod test {
    use crate::files::{DataFiles, FileErr};
    use tempdir::TempDir;

    #[tokio::test]
    pub async fn test_copy_with_sidecars() {
        let dir = TempDir::new("bliss-files").unwrap();
        let files = DataFiles::new(dir.path());
        files.init().await.unwrap();

        tokio::fs::write(files.path(1), b"main").await.unwrap();
        tokio::fs::write(dir.path().join("1.db-wal"), b"wal").await.unwrap();

        let written = files.copy(1, 2).await.unwrap();
        assert_eq!(written.len(), 2);
        assert_eq!(tokio::fs::read(files.path(2)).await.unwrap(), b"main");
        assert_eq!(
            tokio::fs::read(dir.path().join("2.db-wal")).await.unwrap(),
            b"wal"
        );
        assert!(!dir.path().join("2.db-shm").exists());

        files.remove(&written).await;
        assert!(!files.path(2).exists());
    }

    #[tokio::test]
    pub async fn test_create_and_missing() {
        let dir = TempDir::new("bliss-files").unwrap();
        let files = DataFiles::new(dir.path().join("data"));
        files.init().await.unwrap();

        files.create(7).await.unwrap();
        assert!(files.path(7).exists());
        assert!(matches!(files.create(7).await, Err(FileErr::Exists(7))));
        assert!(matches!(files.copy(8, 9).await, Err(FileErr::Missing(8))));
    }
}
