use parking_lot::Mutex;
use rhai::{Array, Blob, Dynamic, Engine, EvalAltResult, Map, INT};
use rusqlite::types::{Value, ValueRef};
use rusqlite::{params_from_iter, Connection};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// An open connection to one tenant data file.  Clones share the connection, and the mutex
/// keeps it to one in-flight statement at a time.
#[derive(Clone)]
pub struct DbHandle {
    conn: Arc<Mutex<Connection>>,
}

impl DbHandle {
    pub fn open<P>(path: P) -> Result<Self, rusqlite::Error>
    where
        P: AsRef<Path>,
    {
        let conn = Connection::open(path.as_ref())?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!("opened {} (journal_mode={})", path.as_ref().display(), mode);
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Releases the file handle if this is the last reference; otherwise the connection is
    /// closed when the final in-flight clone drops.
    pub fn close(self) {
        if let Ok(conn) = Arc::try_unwrap(self.conn) {
            if let Err((_, err)) = conn.into_inner().close() {
                warn!("error closing data file connection: {}", err);
            }
        }
    }

    pub fn query(&self, sql: &str, params: Vec<Value>) -> Result<Vec<Map>, rusqlite::Error> {
        let conn = self.conn.lock();
        let mut statement = conn.prepare(sql)?;
        let columns: Vec<String> = statement
            .column_names()
            .into_iter()
            .map(|c| c.to_string())
            .collect();
        let mut rows = statement.query(params_from_iter(params))?;
        let mut rtn = vec![];
        while let Some(row) = rows.next()? {
            let mut map = Map::new();
            for (index, column) in columns.iter().enumerate() {
                map.insert(column.as_str().into(), to_dynamic(row.get_ref(index)?));
            }
            rtn.push(map);
        }
        Ok(rtn)
    }

    pub fn execute(&self, sql: &str, params: Vec<Value>) -> Result<usize, rusqlite::Error> {
        self.conn.lock().execute(sql, params_from_iter(params))
    }

    pub fn exec(&self, batch: &str) -> Result<(), rusqlite::Error> {
        self.conn.lock().execute_batch(batch)
    }

    pub fn last_insert_id(&self) -> i64 {
        self.conn.lock().last_insert_rowid()
    }
}

fn to_dynamic(value: ValueRef<'_>) -> Dynamic {
    match value {
        ValueRef::Null => Dynamic::UNIT,
        ValueRef::Integer(i) => Dynamic::from_int(i),
        ValueRef::Real(f) => Dynamic::from_float(f),
        ValueRef::Text(text) => Dynamic::from(String::from_utf8_lossy(text).to_string()),
        ValueRef::Blob(blob) => Dynamic::from_blob(blob.to_vec()),
    }
}

fn to_value(value: Dynamic) -> Value {
    if value.is_unit() {
        Value::Null
    } else if let Some(i) = value.clone().try_cast::<INT>() {
        Value::Integer(i)
    } else if let Some(f) = value.clone().try_cast::<f64>() {
        Value::Real(f)
    } else if let Some(b) = value.clone().try_cast::<bool>() {
        Value::Integer(b as i64)
    } else if let Some(blob) = value.clone().try_cast::<Blob>() {
        Value::Blob(blob)
    } else {
        Value::Text(value.to_string())
    }
}

fn to_values(params: Array) -> Vec<Value> {
    params.into_iter().map(to_value).collect()
}

fn script_err(err: rusqlite::Error) -> Box<EvalAltResult> {
    format!("database error: {}", err).into()
}

/// exposes [`DbHandle`] to scripts as the type `Db`
pub fn register(engine: &mut Engine) {
    engine.register_type_with_name::<DbHandle>("Db");

    engine.register_fn(
        "query",
        |db: &mut DbHandle, sql: &str| -> Result<Array, Box<EvalAltResult>> {
            let rows = db.query(sql, vec![]).map_err(script_err)?;
            Ok(rows.into_iter().map(Dynamic::from_map).collect())
        },
    );
    engine.register_fn(
        "query",
        |db: &mut DbHandle, sql: &str, params: Array| -> Result<Array, Box<EvalAltResult>> {
            let rows = db.query(sql, to_values(params)).map_err(script_err)?;
            Ok(rows.into_iter().map(Dynamic::from_map).collect())
        },
    );
    engine.register_fn(
        "execute",
        |db: &mut DbHandle, sql: &str| -> Result<INT, Box<EvalAltResult>> {
            Ok(db.execute(sql, vec![]).map_err(script_err)? as INT)
        },
    );
    engine.register_fn(
        "execute",
        |db: &mut DbHandle, sql: &str, params: Array| -> Result<INT, Box<EvalAltResult>> {
            Ok(db.execute(sql, to_values(params)).map_err(script_err)? as INT)
        },
    );
    engine.register_fn(
        "exec",
        |db: &mut DbHandle, batch: &str| -> Result<(), Box<EvalAltResult>> {
            db.exec(batch).map_err(script_err)
        },
    );
    engine.register_fn("last_insert_id", |db: &mut DbHandle| -> INT {
        db.last_insert_id()
    });
}
