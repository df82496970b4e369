// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Oldest-first eviction under a byte quota.
//!
//! [`RetentionPolicy::plan`] is a pure function: no I/O, no clock, no shared state.
//! Given the same inventory, quota and incoming size it always returns the same plan.
//!
//! # Rule
//!
//! Let `total` be the size of every listed entry and `incoming` the size of what is
//! about to be uploaded. If `total + incoming <= quota` nothing is evicted. Otherwise
//! dated archives are walked in `(timestamp, name)` order and appended to the plan
//! until `total - freed + incoming <= quota`. Age is the only criterion: the plan is
//! the shortest oldest-first prefix, not the smallest set by count or bytes.
//!
//! Undated entries count toward `total` but are never planned for deletion.

use time::OffsetDateTime;

use crate::inventory::{Archive, Inventory};

/// How a plan relates to the quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanStatus {
    /// The incoming archive fits without evicting anything.
    NotNeeded,
    /// Executing the plan brings projected usage within quota.
    Satisfied,
    /// Even evicting every dated archive leaves usage above quota by `shortfall_bytes`.
    ///
    /// This is the retention-exhausted condition. It is reported, not raised: the
    /// upload still proceeds.
    Exhausted {
        /// Bytes by which projected usage exceeds the quota after the full plan.
        shortfall_bytes: u64,
    },
}

/// Archives selected for eviction in one run, oldest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionPlan {
    /// Names to delete, in execution order.
    pub names: Vec<String>,
    /// Bytes occupied by the inventory the plan was computed from.
    pub total_bytes: u64,
    /// Bytes about to be uploaded.
    pub incoming_bytes: u64,
    /// Bytes released if every planned deletion succeeds.
    pub freed_bytes: u64,
    /// Quota the plan was computed against.
    pub quota_bytes: u64,
    /// Outcome classification.
    pub status: PlanStatus,
}

impl DeletionPlan {
    /// Returns `true` if nothing is to be deleted.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Usage after executing the plan and uploading the incoming bytes.
    pub fn projected_bytes(&self) -> u64 {
        self.total_bytes
            .saturating_sub(self.freed_bytes)
            .saturating_add(self.incoming_bytes)
    }

    /// Returns `true` for the retention-exhausted condition.
    pub fn is_exhausted(&self) -> bool {
        matches!(self.status, PlanStatus::Exhausted { .. })
    }
}

/// Quota-driven retention policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    quota_bytes: u64,
}

impl RetentionPolicy {
    /// Policy enforcing `quota_bytes` as the ceiling for the remote directory.
    pub fn new(quota_bytes: u64) -> Self {
        Self { quota_bytes }
    }

    /// Configured ceiling.
    pub fn quota_bytes(&self) -> u64 {
        self.quota_bytes
    }

    /// Compute the oldest-first deletion plan that makes room for `incoming_bytes`.
    pub fn plan(&self, inventory: &Inventory, incoming_bytes: u64) -> DeletionPlan {
        let quota = self.quota_bytes;
        let total = inventory.total_size();
        let projected = |freed: u64| total.saturating_sub(freed).saturating_add(incoming_bytes);

        let mut plan = DeletionPlan {
            names: Vec::new(),
            total_bytes: total,
            incoming_bytes,
            freed_bytes: 0,
            quota_bytes: quota,
            status: PlanStatus::NotNeeded,
        };
        if projected(0) <= quota {
            return plan;
        }

        for archive in oldest_first(inventory) {
            plan.freed_bytes = plan.freed_bytes.saturating_add(archive.size_bytes);
            plan.names.push(archive.name.clone());
            if projected(plan.freed_bytes) <= quota {
                plan.status = PlanStatus::Satisfied;
                return plan;
            }
        }

        plan.status = PlanStatus::Exhausted {
            shortfall_bytes: projected(plan.freed_bytes) - quota,
        };
        plan
    }
}

/// Dated archives ordered by `(timestamp, name)`.
fn oldest_first(inventory: &Inventory) -> Vec<&Archive> {
    let mut dated: Vec<(OffsetDateTime, &Archive)> = inventory
        .archives()
        .iter()
        .filter_map(|a| a.timestamp.map(|ts| (ts, a)))
        .collect();
    dated.sort_by(|(ta, a), (tb, b)| ta.cmp(tb).then_with(|| a.name.cmp(&b.name)));
    dated.into_iter().map(|(_, a)| a).collect()
}
