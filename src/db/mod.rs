//! Plan Database Gateway
//!
//! Persists plan specifications and mementos to a sled store under a
//! configured directory, and services externally initiated `PlanDB`
//! operations. Values are JSON-serialized records keyed by id; plans and
//! mementos live in separate trees so ids never collide across kinds.
//!
//! All access is from the engine loop; there are no concurrent writers.
//! Writes flush explicitly so a store confirmed to the operator survives a
//! power cut.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::messages::{
    MessageType, PlanDb, PlanDbArg, PlanDbOp, PlanMemento, PlanSpecification,
};

/// Error type for plan store operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Storage(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("database is closed")]
    Closed,
}

impl From<sled::Error> for DbError {
    fn from(err: sled::Error) -> Self {
        DbError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::Serialization(err.to_string())
    }
}

/// Kinds of records held by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Plan,
    Memento,
}

struct OpenStore {
    db: sled::Db,
    plans: sled::Tree,
    mementos: sled::Tree,
}

/// Persistent store of plan specifications and mementos.
///
/// Closed until [`open`](PlanDatabase::open) is called, and again after
/// [`close`](PlanDatabase::close) (used across power-down windows). Every
/// operation on a closed store fails with [`DbError::Closed`].
pub struct PlanDatabase {
    root: PathBuf,
    store: Option<OpenStore>,
}

impl PlanDatabase {
    /// Create a gateway rooted at `root`. Does not touch the filesystem
    /// until opened.
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            store: None,
        }
    }

    /// Open the persistent store. Idempotent: opening an open store is a
    /// no-op.
    pub fn open(&mut self) -> Result<(), DbError> {
        if self.store.is_some() {
            return Ok(());
        }
        let db = sled::open(&self.root)?;
        let plans = db.open_tree("plans")?;
        let mementos = db.open_tree("mementos")?;
        info!(path = %self.root.display(), plans = plans.len(), mementos = mementos.len(),
              "Plan database open");
        self.store = Some(OpenStore {
            db,
            plans,
            mementos,
        });
        Ok(())
    }

    /// Flush and release the store.
    pub fn close(&mut self) {
        if let Some(store) = self.store.take() {
            if let Err(e) = store.db.flush() {
                debug!(error = %e, "Flush on close failed");
            }
            info!("Plan database closed");
        }
    }

    pub fn is_open(&self) -> bool {
        self.store.is_some()
    }

    fn open_store(&self) -> Result<&OpenStore, DbError> {
        self.store.as_ref().ok_or(DbError::Closed)
    }

    // ========================================================================
    // Records
    // ========================================================================

    /// Store a plan specification keyed by its `plan_id`.
    pub fn store_plan(&self, spec: &PlanSpecification) -> Result<(), DbError> {
        let store = self.open_store()?;
        let value = serde_json::to_vec(spec)?;
        store.plans.insert(spec.plan_id.as_bytes(), value)?;
        store.db.flush()?;
        Ok(())
    }

    /// Store a memento keyed by its `id`.
    pub fn store_memento(&self, memento: &PlanMemento) -> Result<(), DbError> {
        let store = self.open_store()?;
        let value = serde_json::to_vec(memento)?;
        store.mementos.insert(memento.id.as_bytes(), value)?;
        store.db.flush()?;
        Ok(())
    }

    /// Look up a plan by id. `Ok(None)` when the id is unknown.
    pub fn lookup_plan(&self, id: &str) -> Result<Option<PlanSpecification>, DbError> {
        let store = self.open_store()?;
        match store.plans.get(id.as_bytes())? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    /// Look up a memento by id. `Ok(None)` when the id is unknown.
    pub fn lookup_memento(&self, id: &str) -> Result<Option<PlanMemento>, DbError> {
        let store = self.open_store()?;
        match store.mementos.get(id.as_bytes())? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    /// Delete a record by id. Returns whether anything was removed.
    pub fn delete(&self, kind: RecordKind, id: &str) -> Result<bool, DbError> {
        let store = self.open_store()?;
        let tree = match kind {
            RecordKind::Plan => &store.plans,
            RecordKind::Memento => &store.mementos,
        };
        let removed = tree.remove(id.as_bytes())?.is_some();
        store.db.flush()?;
        Ok(removed)
    }

    /// Remove every stored plan and memento.
    pub fn clear(&self) -> Result<(), DbError> {
        let store = self.open_store()?;
        store.plans.clear()?;
        store.mementos.clear()?;
        store.db.flush()?;
        Ok(())
    }

    /// Number of stored plans.
    pub fn plan_count(&self) -> usize {
        self.store.as_ref().map_or(0, |s| s.plans.len())
    }

    // ========================================================================
    // External PlanDB requests
    // ========================================================================

    /// Service an externally initiated `PlanDB` request, returning the
    /// paired reply. The caller stamps the header and dispatches it.
    ///
    /// A `DbError` from the underlying store is returned to the caller
    /// (who degrades the engine's entity state) in addition to producing a
    /// failure reply.
    pub fn handle_request(&mut self, req: &PlanDb) -> (PlanDb, Result<(), DbError>) {
        let outcome = self.apply_request(req);
        let reply = match &outcome {
            Ok(arg) => PlanDb {
                dtype: MessageType::Success,
                arg: arg.clone(),
                info: String::new(),
                ..req.clone()
            },
            Err(e) => PlanDb {
                dtype: MessageType::Failure,
                arg: None,
                info: e.to_string(),
                ..req.clone()
            },
        };
        // Missing records are a failed request, not a store failure.
        let health = match outcome {
            Ok(_) => Ok(()),
            Err(RequestError::Db(e)) => Err(e),
            Err(RequestError::Request(_)) => Ok(()),
        };
        (reply, health)
    }

    fn apply_request(&mut self, req: &PlanDb) -> Result<Option<PlanDbArg>, RequestError> {
        match req.op {
            PlanDbOp::Set => match &req.arg {
                Some(PlanDbArg::Spec(spec)) => {
                    self.store_plan(spec)?;
                    debug!(plan_id = %spec.plan_id, "PlanDB SET plan");
                    Ok(None)
                }
                Some(PlanDbArg::Memento(memento)) => {
                    self.store_memento(memento)?;
                    debug!(id = %memento.id, "PlanDB SET memento");
                    Ok(None)
                }
                None => Err(RequestError::Request("SET request without argument".into())),
            },
            PlanDbOp::Get => {
                if let Some(spec) = self.lookup_plan(&req.plan_id)? {
                    return Ok(Some(PlanDbArg::Spec(spec)));
                }
                if let Some(memento) = self.lookup_memento(&req.plan_id)? {
                    return Ok(Some(PlanDbArg::Memento(memento)));
                }
                Err(RequestError::Request(format!(
                    "no plan or memento named '{}'",
                    req.plan_id
                )))
            }
            PlanDbOp::Del => {
                let removed = self.delete(RecordKind::Plan, &req.plan_id)?
                    | self.delete(RecordKind::Memento, &req.plan_id)?;
                if removed {
                    Ok(None)
                } else {
                    Err(RequestError::Request(format!(
                        "no plan or memento named '{}'",
                        req.plan_id
                    )))
                }
            }
            PlanDbOp::Clear => {
                self.clear()?;
                info!("PlanDB cleared");
                Ok(None)
            }
        }
    }
}

/// Distinguishes a broken store from a merely unsatisfiable request.
enum RequestError {
    Db(DbError),
    Request(String),
}

impl From<DbError> for RequestError {
    fn from(e: DbError) -> Self {
        RequestError::Db(e)
    }
}

impl std::fmt::Display for RequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestError::Db(e) => write!(f, "{}", e),
            RequestError::Request(msg) => write!(f, "{}", msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{Header, Maneuver, PlanManeuver};

    fn make_spec(plan_id: &str) -> PlanSpecification {
        PlanSpecification {
            plan_id: plan_id.to_string(),
            description: String::new(),
            start_man_id: "m1".to_string(),
            maneuvers: vec![PlanManeuver {
                maneuver_id: "m1".to_string(),
                data: Maneuver::Idle { duration: 5.0 },
                memento: None,
            }],
            transitions: Vec::new(),
            required_entities: Vec::new(),
        }
    }

    fn open_db() -> (PlanDatabase, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut db = PlanDatabase::new(dir.path());
        db.open().expect("open");
        (db, dir)
    }

    #[test]
    fn test_open_is_idempotent() {
        let (mut db, _dir) = open_db();
        db.open().expect("second open");
        assert!(db.is_open());
    }

    #[test]
    fn test_closed_store_refuses_operations() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = PlanDatabase::new(dir.path());
        assert!(matches!(db.lookup_plan("p"), Err(DbError::Closed)));
        assert!(matches!(db.store_plan(&make_spec("p")), Err(DbError::Closed)));
    }

    #[test]
    fn test_store_and_lookup_plan() {
        let (db, _dir) = open_db();
        let spec = make_spec("survey-1");
        db.store_plan(&spec).expect("store");
        let found = db.lookup_plan("survey-1").expect("lookup");
        assert_eq!(found, Some(spec));
        assert_eq!(db.lookup_plan("other").expect("lookup"), None);
    }

    #[test]
    fn test_memento_tree_is_separate() {
        let (db, _dir) = open_db();
        let memento = PlanMemento {
            id: "survey-1".to_string(),
            plan_id: "survey-1".to_string(),
            maneuver_id: "m1".to_string(),
            memento: "blob".to_string(),
        };
        db.store_memento(&memento).expect("store");
        // Same id in the plan tree stays missing
        assert_eq!(db.lookup_plan("survey-1").expect("lookup"), None);
        assert_eq!(db.lookup_memento("survey-1").expect("lookup"), Some(memento));
    }

    #[test]
    fn test_handle_request_get_set_del() {
        let (mut db, _dir) = open_db();
        let spec = make_spec("p1");

        let set = PlanDb {
            header: Header::default(),
            dtype: MessageType::Request,
            op: PlanDbOp::Set,
            request_id: 1,
            plan_id: "p1".to_string(),
            arg: Some(PlanDbArg::Spec(spec.clone())),
            info: String::new(),
        };
        let (reply, health) = db.handle_request(&set);
        assert_eq!(reply.dtype, MessageType::Success);
        assert!(health.is_ok());

        let get = PlanDb {
            op: PlanDbOp::Get,
            request_id: 2,
            arg: None,
            ..set.clone()
        };
        let (reply, _) = db.handle_request(&get);
        assert_eq!(reply.dtype, MessageType::Success);
        assert_eq!(reply.arg, Some(PlanDbArg::Spec(spec)));

        let del = PlanDb {
            op: PlanDbOp::Del,
            request_id: 3,
            arg: None,
            ..set
        };
        let (reply, _) = db.handle_request(&del);
        assert_eq!(reply.dtype, MessageType::Success);
        assert_eq!(db.plan_count(), 0);
    }

    #[test]
    fn test_missing_record_fails_request_without_degrading() {
        let (mut db, _dir) = open_db();
        let get = PlanDb {
            header: Header::default(),
            dtype: MessageType::Request,
            op: PlanDbOp::Get,
            request_id: 9,
            plan_id: "ghost".to_string(),
            arg: None,
            info: String::new(),
        };
        let (reply, health) = db.handle_request(&get);
        assert_eq!(reply.dtype, MessageType::Failure);
        assert!(reply.info.contains("ghost"));
        // The store itself is healthy
        assert!(health.is_ok());
    }

    #[test]
    fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let mut db = PlanDatabase::new(dir.path());
            db.open().expect("open");
            db.store_plan(&make_spec("persist")).expect("store");
            db.close();
        }
        let mut db = PlanDatabase::new(dir.path());
        db.open().expect("reopen");
        assert!(db.lookup_plan("persist").expect("lookup").is_some());
    }
}
