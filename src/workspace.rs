//! Workspace reconciliation
//!
//! The set of known workspaces is a cached snapshot of what
//! `terraform workspace list` last reported. All text parsing lives in
//! `parse_workspace_list` so its fragility stays unit-testable away from
//! process execution. The external tool's answer always wins: local
//! state is replaced, never patched toward a guess.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::TerradeckError;

/// One Terraform workspace as last reported by the tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub name: String,
    pub is_active: bool,
}

/// Immutable view over the workspace set
///
/// Invariant: exactly one workspace is active when the set is non-empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceSnapshot {
    pub workspaces: Vec<Workspace>,
}

impl WorkspaceSnapshot {
    pub fn active(&self) -> Option<&Workspace> {
        self.workspaces.iter().find(|w| w.is_active)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.workspaces.iter().any(|w| w.name == name)
    }

    pub fn len(&self) -> usize {
        self.workspaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workspaces.is_empty()
    }
}

/// Parse `terraform workspace list` output.
///
/// The current workspace is marked with a `*` prefix:
/// ```text
///   default
/// * staging
/// ```
/// An empty or unmarked listing is a reconciliation anomaly, Terraform
/// always has at least `default` selected.
pub fn parse_workspace_list(lines: &[String]) -> Result<WorkspaceSnapshot, TerradeckError> {
    let workspaces: Vec<Workspace> = lines
        .iter()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let trimmed = line.trim();
            let is_active = trimmed.starts_with('*');
            Workspace {
                name: trimmed.trim_start_matches('*').trim().to_string(),
                is_active,
            }
        })
        .filter(|w| !w.name.is_empty())
        .collect();

    if workspaces.is_empty() {
        return Err(TerradeckError::ReconciliationAnomaly {
            context: "workspace list".to_string(),
            details: "listing came back empty".to_string(),
        });
    }
    if workspaces.iter().filter(|w| w.is_active).count() != 1 {
        return Err(TerradeckError::ReconciliationAnomaly {
            context: "workspace list".to_string(),
            details: "listing did not mark exactly one workspace as current".to_string(),
        });
    }

    Ok(WorkspaceSnapshot { workspaces })
}

/// Holds the current workspace snapshot; replaced atomically so readers
/// see either the old or the new set, never a partial update.
#[derive(Debug, Clone, Default)]
pub struct WorkspaceManager {
    snapshot: Arc<RwLock<Arc<WorkspaceSnapshot>>>,
}

impl WorkspaceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cheap read of the last known-good snapshot
    pub fn snapshot(&self) -> Arc<WorkspaceSnapshot> {
        self.snapshot.read().clone()
    }

    /// Install a freshly parsed listing wholesale
    pub fn apply_listing(&self, snapshot: WorkspaceSnapshot) {
        *self.snapshot.write() = Arc::new(snapshot);
    }

    /// Mark `name` active after a successful `workspace select`.
    ///
    /// A successful select proves the workspace exists, so a name missing
    /// from the cached set is inserted; the authoritative listing that
    /// follows every workspace operation re-reconciles it.
    pub fn mark_active(&self, name: &str) {
        let mut guard = self.snapshot.write();
        let mut next = (**guard).clone();
        let mut found = false;
        for workspace in &mut next.workspaces {
            workspace.is_active = workspace.name == name;
            found |= workspace.is_active;
        }
        if !found {
            next.workspaces.push(Workspace {
                name: name.to_string(),
                is_active: true,
            });
        }
        *guard = Arc::new(next);
    }
}
