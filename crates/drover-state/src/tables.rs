//! redb table definitions for the drover state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// Shape shared by every table.
pub type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Applications keyed by `{run_as}/{app_id}`.
pub const APPLICATIONS: JsonTable = TableDefinition::new("applications");

/// Current versions keyed by `{run_as}/{app_id}`.
pub const VERSIONS: JsonTable = TableDefinition::new("versions");

/// Taskgroups keyed by `{run_as}/{app_id}:{taskgroup_id}`.
pub const TASKGROUPS: JsonTable = TableDefinition::new("taskgroups");

/// Taskgroup id -> key in `TASKGROUPS`.
pub const TASKGROUP_INDEX: JsonTable = TableDefinition::new("taskgroup_index");

/// Agent capacity keyed by IP.
pub const AGENTS: JsonTable = TableDefinition::new("agents");

/// Agent settings keyed by IP.
pub const AGENT_SETTINGS: JsonTable = TableDefinition::new("agent_settings");
