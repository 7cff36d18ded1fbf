use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Metadata bookkeeping keys ─────────────────────────────────────────────────

/// Consecutive failure counter, stored as a stringified integer.
pub const METADATA_FAILURES: &str = "Failures";
/// Disablement deadline, RFC 3339 UTC.
pub const METADATA_DISABLED_UNTIL: &str = "DisabledUntil";
/// Message of the most recent failed operation or probe.
pub const METADATA_LAST_ERROR: &str = "LastError";
/// Timestamp of the most recent successful operation or probe, RFC 3339 UTC.
pub const METADATA_LAST_SUCCESS: &str = "LastSuccess";

const INTERNAL_KEYS: &[&str] = &[
    METADATA_FAILURES,
    METADATA_DISABLED_UNTIL,
    METADATA_LAST_ERROR,
    METADATA_LAST_SUCCESS,
];

// ── Healing record ────────────────────────────────────────────────────────────

/// Advisory healing lease on a node. `locked_until = None` means unlocked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct HealingRecord {
    pub locked_until: Option<DateTime<Utc>>,
    /// Distinguishes a failure-triggered lock (the node is being healed)
    /// from a success-triggered one (a success handler holds the lease).
    pub is_failure: bool,
}

impl HealingRecord {
    pub fn is_locked(&self) -> bool {
        self.locked_until.map_or(false, |until| until > Utc::now())
    }
}

// ── Node status ───────────────────────────────────────────────────────────────

/// Derived, never stored. A pure function of the node's current fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// No success recorded yet, no failures either.
    Waiting,
    /// Last operation succeeded and the node is not disabled.
    Ready,
    /// Failures recorded but the node is not disabled.
    Retry,
    /// `DisabledUntil` lies in the future.
    Disabled,
    /// A failure-triggered healing lock is held.
    Healing,
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NodeStatus::Waiting => "waiting",
            NodeStatus::Ready => "ready",
            NodeStatus::Retry => "ready for retry",
            NodeStatus::Disabled => "disabled",
            NodeStatus::Healing => "healing",
        };
        write!(f, "{}", s)
    }
}

// ── Node ──────────────────────────────────────────────────────────────────────

/// A container host, identified by its address (a URL string).
///
/// The metadata map carries caller-supplied tags alongside the bookkeeping
/// keys above; [`Node::clean_metadata`] returns only the caller's view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub address: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub healing: HealingRecord,
}

impl Node {
    pub fn new(address: impl Into<String>, metadata: HashMap<String, String>) -> Self {
        Node {
            address: address.into(),
            metadata,
            healing: HealingRecord::default(),
        }
    }

    /// Derive the current status. Precedence: a failure-triggered healing
    /// lock masks everything; a success-triggered one masks nothing.
    pub fn status(&self) -> NodeStatus {
        if self.healing.is_locked() && self.healing.is_failure {
            return NodeStatus::Healing;
        }
        if self.is_disabled() {
            return NodeStatus::Disabled;
        }
        if self.failure_count() > 0 {
            return NodeStatus::Retry;
        }
        if self.metadata.contains_key(METADATA_LAST_SUCCESS) {
            return NodeStatus::Ready;
        }
        NodeStatus::Waiting
    }

    /// A node is enabled unless it is disabled or held by a
    /// failure-triggered healing lock.
    pub fn is_enabled(&self) -> bool {
        !matches!(self.status(), NodeStatus::Disabled | NodeStatus::Healing)
    }

    pub fn failure_count(&self) -> u32 {
        self.metadata
            .get(METADATA_FAILURES)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    fn is_disabled(&self) -> bool {
        self.disabled_until().map_or(false, |until| until > Utc::now())
    }

    pub fn disabled_until(&self) -> Option<DateTime<Utc>> {
        self.metadata
            .get(METADATA_DISABLED_UNTIL)
            .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    pub fn last_error(&self) -> Option<&str> {
        self.metadata.get(METADATA_LAST_ERROR).map(String::as_str)
    }

    // ── Mutators used by the healing pipeline ─────────────────────────────────

    /// Record a failed operation. The failure counter only moves when the
    /// caller asks for it (active probes do, regular operations don't).
    pub fn update_error(&mut self, err: String, increment_failures: bool) {
        self.metadata.insert(METADATA_LAST_ERROR.into(), err);
        if increment_failures {
            let failures = self.failure_count() + 1;
            self.metadata
                .insert(METADATA_FAILURES.into(), failures.to_string());
        }
    }

    pub fn update_disabled(&mut self, deadline: DateTime<Utc>) {
        self.metadata
            .insert(METADATA_DISABLED_UNTIL.into(), deadline.to_rfc3339());
    }

    /// Record a successful operation: clears the failure counter, the
    /// disablement deadline and the last error.
    pub fn update_success(&mut self) {
        self.metadata.remove(METADATA_FAILURES);
        self.metadata.remove(METADATA_DISABLED_UNTIL);
        self.metadata.remove(METADATA_LAST_ERROR);
        self.metadata
            .insert(METADATA_LAST_SUCCESS.into(), Utc::now().to_rfc3339());
    }

    // ── External views ────────────────────────────────────────────────────────

    /// Caller-supplied metadata only, bookkeeping keys stripped.
    pub fn clean_metadata(&self) -> HashMap<String, String> {
        self.metadata
            .iter()
            .filter(|(k, _)| !INTERNAL_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// External representation carrying the derived status.
    pub fn summary(&self) -> NodeSummary {
        NodeSummary {
            address: self.address.clone(),
            metadata: self.clean_metadata(),
            status: self.status(),
        }
    }
}

impl std::fmt::Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.address)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSummary {
    pub address: String,
    pub metadata: HashMap<String, String>,
    pub status: NodeStatus,
}

/// One row of the container→host mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerMapping {
    pub id: String,
    pub host: String,
}
