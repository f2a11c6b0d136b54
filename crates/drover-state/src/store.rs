//! StateStore: redb-backed persistence for applications and agents.
//!
//! Provides typed CRUD over applications, versions, taskgroups, agents, and
//! agent settings, and implements [`drover_core::Store`] on top of it. The
//! store supports both on-disk and in-memory backends (the latter for
//! testing).

use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex, PoisonError};

use redb::{Database, ReadableDatabase, ReadableTable};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use drover_core::{
    AgentInfo, AgentSetting, Application, Store, StoreError, StoreResult, TaskGroup, Version,
    application_key,
};

use crate::error::{StateError, StateResult};
use crate::tables::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Advisory application locks: held keys plus a condvar for waiters.
#[derive(Default)]
struct AppLocks {
    held: Mutex<HashSet<String>>,
    released: Condvar,
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
    locks: Arc<AppLocks>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self::with_database(db);
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self::with_database(db);
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn with_database(db: Database) -> Self {
        Self {
            db: Arc::new(db),
            locks: Arc::new(AppLocks::default()),
        }
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        for table in [
            APPLICATIONS,
            VERSIONS,
            TASKGROUPS,
            TASKGROUP_INDEX,
            AGENTS,
            AGENT_SETTINGS,
        ] {
            txn.open_table(table).map_err(map_err!(Table))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Generic JSON helpers ───────────────────────────────────────

    fn put_json<T: Serialize>(&self, table: JsonTable, key: &str, value: &T) -> StateResult<()> {
        let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut t = txn.open_table(table).map_err(map_err!(Table))?;
            t.insert(key, bytes.as_slice()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get_json<T: DeserializeOwned>(&self, table: JsonTable, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = txn.open_table(table).map_err(map_err!(Table))?;
        match t.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Every value whose key starts with `prefix` (all values for an empty prefix).
    fn scan_json<T: DeserializeOwned>(&self, table: JsonTable, prefix: &str) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = txn.open_table(table).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in t.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(prefix) {
                let item = serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(item);
            }
        }
        Ok(results)
    }

    fn remove(&self, table: JsonTable, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut t = txn.open_table(table).map_err(map_err!(Table))?;
            existed = t.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    // ── Applications ───────────────────────────────────────────────

    /// Insert or update an application.
    pub fn put_application(&self, app: &Application) -> StateResult<()> {
        let key = app.table_key();
        self.put_json(APPLICATIONS, &key, app)?;
        debug!(%key, "application stored");
        Ok(())
    }

    pub fn get_application(&self, run_as: &str, app_id: &str) -> StateResult<Option<Application>> {
        self.get_json(APPLICATIONS, &application_key(run_as, app_id))
    }

    /// List applications in a namespace.
    pub fn list_applications(&self, run_as: &str) -> StateResult<Vec<Application>> {
        self.scan_json(APPLICATIONS, &format!("{run_as}/"))
    }

    /// Distinct namespaces that hold at least one application.
    pub fn list_namespaces(&self) -> StateResult<Vec<String>> {
        let apps: Vec<Application> = self.scan_json(APPLICATIONS, "")?;
        let namespaces: BTreeSet<String> = apps.into_iter().map(|a| a.run_as).collect();
        Ok(namespaces.into_iter().collect())
    }

    /// Delete an application by key. Returns true if it existed.
    pub fn delete_application(&self, run_as: &str, app_id: &str) -> StateResult<bool> {
        let key = application_key(run_as, app_id);
        let existed = self.remove(APPLICATIONS, &key)?;
        debug!(%key, existed, "application deleted");
        Ok(existed)
    }

    // ── Versions ───────────────────────────────────────────────────

    pub fn put_version(&self, version: &Version) -> StateResult<()> {
        self.put_json(VERSIONS, &version.table_key(), version)
    }

    pub fn get_current_version(&self, run_as: &str, app_id: &str) -> StateResult<Option<Version>> {
        self.get_json(VERSIONS, &application_key(run_as, app_id))
    }

    // ── TaskGroups ─────────────────────────────────────────────────

    /// Insert or update a taskgroup and its id index entry.
    pub fn put_task_group(&self, tg: &TaskGroup) -> StateResult<()> {
        let key = tg.table_key();
        let bytes = serde_json::to_vec(tg).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(TASKGROUPS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), bytes.as_slice())
                .map_err(map_err!(Write))?;
            let mut index = txn.open_table(TASKGROUP_INDEX).map_err(map_err!(Table))?;
            index
                .insert(tg.id.as_str(), key.as_bytes())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Look up a taskgroup by its id alone.
    pub fn get_task_group(&self, taskgroup_id: &str) -> StateResult<Option<TaskGroup>> {
        let key = {
            let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
            let index = txn.open_table(TASKGROUP_INDEX).map_err(map_err!(Table))?;
            match index.get(taskgroup_id).map_err(map_err!(Read))? {
                Some(guard) => String::from_utf8(guard.value().to_vec()).map_err(map_err!(Deserialize))?,
                None => return Ok(None),
            }
        };
        self.get_json(TASKGROUPS, &key)
    }

    /// List the taskgroups of one application.
    pub fn list_task_groups_for(&self, run_as: &str, app_id: &str) -> StateResult<Vec<TaskGroup>> {
        self.scan_json(TASKGROUPS, &format!("{}:", application_key(run_as, app_id)))
    }

    /// Delete a taskgroup by id. Returns true if it existed.
    pub fn delete_task_group(&self, taskgroup_id: &str) -> StateResult<bool> {
        let Some(tg) = self.get_task_group(taskgroup_id)? else {
            return Ok(false);
        };
        let key = tg.table_key();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(TASKGROUPS).map_err(map_err!(Table))?;
            table.remove(key.as_str()).map_err(map_err!(Write))?;
            let mut index = txn.open_table(TASKGROUP_INDEX).map_err(map_err!(Table))?;
            index.remove(taskgroup_id).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(true)
    }

    // ── Agents ─────────────────────────────────────────────────────

    pub fn put_agent(&self, agent: &AgentInfo) -> StateResult<()> {
        self.put_json(AGENTS, &agent.ip, agent)
    }

    pub fn get_agent(&self, ip: &str) -> StateResult<Option<AgentInfo>> {
        self.get_json(AGENTS, ip)
    }

    pub fn put_agent_setting(&self, setting: &AgentSetting) -> StateResult<()> {
        self.put_json(AGENT_SETTINGS, &setting.inner_ip, setting)
    }

    pub fn get_agent_setting(&self, ip: &str) -> StateResult<Option<AgentSetting>> {
        self.get_json(AGENT_SETTINGS, ip)
    }
}

impl Store for StateStore {
    fn fetch_agent(&self, ip: &str) -> StoreResult<AgentInfo> {
        self.get_agent(ip)?
            .ok_or_else(|| StoreError::NotFound(format!("agent {ip}")))
    }

    fn fetch_agent_setting(&self, ip: &str) -> StoreResult<Option<AgentSetting>> {
        Ok(self.get_agent_setting(ip)?)
    }

    fn save_agent_setting(&self, setting: &AgentSetting) -> StoreResult<()> {
        Ok(self.put_agent_setting(setting)?)
    }

    fn lock_application(&self, key: &str) {
        let mut held = self
            .locks
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while held.contains(key) {
            held = self
                .locks
                .released
                .wait(held)
                .unwrap_or_else(PoisonError::into_inner);
        }
        held.insert(key.to_string());
    }

    fn unlock_application(&self, key: &str) {
        let mut held = self
            .locks
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        held.remove(key);
        self.locks.released.notify_all();
    }

    fn fetch_application(&self, run_as: &str, app_id: &str) -> StoreResult<Option<Application>> {
        Ok(self.get_application(run_as, app_id)?)
    }

    fn list_task_groups(&self, run_as: &str, app_id: &str) -> StoreResult<Vec<TaskGroup>> {
        Ok(self.list_task_groups_for(run_as, app_id)?)
    }

    fn fetch_task_group(&self, taskgroup_id: &str) -> StoreResult<Option<TaskGroup>> {
        Ok(self.get_task_group(taskgroup_id)?)
    }

    fn list_run_as(&self) -> StoreResult<Vec<String>> {
        Ok(self.list_namespaces()?)
    }

    fn list_application_nodes(&self, run_as: &str) -> StoreResult<Vec<Application>> {
        Ok(self.list_applications(run_as)?)
    }

    fn get_version(&self, run_as: &str, app_id: &str) -> StoreResult<Option<Version>> {
        Ok(self.get_current_version(run_as, app_id)?)
    }
}
