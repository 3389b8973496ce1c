//! Point-in-time copy of the orchestrator state
//!
//! A snapshot carries the chassis registrations with their dispatch order and
//! retired tallies, the policy and every VM record, terminal ones included, so
//! that a restored orchestrator continues generation numbering where the old
//! one stopped.

use std::collections::BTreeMap;
use std::error::Error;
use std::path::Path;

use api_types::{ChassisRegistration, VmState};
use chrono::{DateTime, Utc};
use derive_more::Display;
use error_stack::{Report, ResultExt};
use serde::{Deserialize, Serialize};
use tokio::fs;

use super::scheduler::SchedulingPolicy;

#[derive(Debug, Display)]
pub enum SnapshotError {
    #[display("Failed to read snapshot: {path}")]
    Read { path: String },
    #[display("Failed to write snapshot: {path}")]
    Write { path: String },
    #[display("Malformed snapshot")]
    Format,
}

impl Error for SnapshotError {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HypervisorSnapshot {
    pub policy: SchedulingPolicy,
    pub taken_at: DateTime<Utc>,
    pub chassis: Vec<ChassisRecord>,
    pub vms: Vec<VmRecord>,
}

/// Persisted form of one chassis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChassisRecord {
    #[serde(flatten)]
    pub registration: ChassisRegistration,
    /// Runnable VM ids in the order the next tick would consider them
    #[serde(default)]
    pub dispatch_order: Vec<String>,
    /// Lifecycles that ended on this chassis, per terminal state
    #[serde(default)]
    pub retired: BTreeMap<VmState, usize>,
}

/// Persisted form of one VM record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmRecord {
    pub vm_id: String,
    pub chassis: String,
    pub state: VmState,
    pub priority: i64,
    pub generation: u64,
    /// Generation the lifecycle started at
    pub epoch: u64,
    #[serde(default)]
    pub resources_held: BTreeMap<String, f64>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

/// Writes `snapshot` as JSON, replacing the file only once fully written.
pub async fn write_to(
    path: impl AsRef<Path>,
    snapshot: &HypervisorSnapshot,
) -> Result<(), Report<SnapshotError>> {
    let path = path.as_ref();
    let context = || SnapshotError::Write {
        path: path.display().to_string(),
    };

    let json = serde_json::to_vec_pretty(snapshot).change_context(SnapshotError::Format)?;
    let staging = path.with_extension("tmp");
    fs::write(&staging, json)
        .await
        .change_context_lazy(context)
        .attach_printable_lazy(|| format!("staging file: {}", staging.display()))?;
    fs::rename(&staging, path)
        .await
        .change_context_lazy(context)?;
    Ok(())
}

pub async fn read_from(path: impl AsRef<Path>) -> Result<HypervisorSnapshot, Report<SnapshotError>> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .await
        .change_context_lazy(|| SnapshotError::Read {
            path: path.display().to_string(),
        })?;
    serde_json::from_str(&content)
        .change_context(SnapshotError::Format)
        .attach_printable_lazy(|| format!("snapshot file: {}", path.display()))
}
