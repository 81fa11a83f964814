//! The reconciliation core.
//!
//! `reconcile` turns one student's punches for one session into an
//! attendance status. It is a pure function of (window, punches, now): no
//! I/O, no wall clock, no ambient tenant state. The batch runner and the
//! on-demand tracker both call this exact function, which is what keeps the
//! live view and the persisted absence ledger from ever disagreeing.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::clock::{SessionPhase, SessionWindow, session_phase};
use crate::punch::PunchEvent;
use db::models::absence;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    Present,
    Late,
    Absent,
    /// Entry seen, no exit yet, and the grace window is still open.
    PendingExit,
    /// Punches exist but none qualifies as a valid entry.
    PendingEntry,
    /// Overlay from a justified absence record; never produced by the pure
    /// pass itself.
    Excused,
}

/// Knobs that vary per run or per tenant. `grace` already lives inside the
/// resolved window; the rest is here.
#[derive(Debug, Clone, Copy)]
pub struct ReconcilePolicy {
    /// Hours after session end before a punch-less student is finalized
    /// Absent.
    pub cutoff_hours: i64,
    /// An exit earlier than `end - early_exit_minutes` flags `left_early`.
    pub early_exit_minutes: i64,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self {
            cutoff_hours: 1,
            early_exit_minutes: 30,
        }
    }
}

impl ReconcilePolicy {
    /// Combine the run's cutoff with the tenant's policy knobs.
    pub fn for_run(cutoff_hours: i64, tenant: &crate::tenant::TenantPolicy) -> Self {
        Self {
            cutoff_hours,
            early_exit_minutes: tenant.early_exit_minutes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciliationResult {
    pub session_id: i64,
    pub student_id: i64,
    pub status: AttendanceStatus,
    /// While `status` is pending, the classification the entry would earn if
    /// nothing else arrives (Present or Late).
    pub provisional: Option<AttendanceStatus>,
    pub entry: Option<PunchEvent>,
    pub exit: Option<PunchEvent>,
    pub minutes_late: i64,
    pub left_early: bool,
}

impl ReconciliationResult {
    fn bare(session_id: i64, student_id: i64, status: AttendanceStatus) -> Self {
        Self {
            session_id,
            student_id,
            status,
            provisional: None,
            entry: None,
            exit: None,
            minutes_late: 0,
            left_early: false,
        }
    }

    /// Overlay an existing ledger row: a justified absence reads back as
    /// Excused. Reconciliation-derived data is left untouched.
    pub fn with_justification(mut self, record: Option<&absence::Model>) -> Self {
        if record.is_some_and(|r| r.justified) {
            self.status = AttendanceStatus::Excused;
        }
        self
    }
}

/// Classify one student for one session.
///
/// Returns `None` while the student is not yet decidable: no punches and the
/// cutoff has not passed. Callers must treat `None` as "say nothing", not as
/// absent.
///
/// Entry/exit pairing rule: the entry is the earliest in-window punch at or
/// before session end; the exit is the latest punch strictly after the
/// entry; punches between the two carry no information. The rule is monotone
/// under late-arriving data (new punches can only widen the pair), so
/// re-runs correct rather than oscillate.
pub fn reconcile(
    window: &SessionWindow,
    student_id: i64,
    punches: &[PunchEvent],
    now: DateTime<Utc>,
    policy: &ReconcilePolicy,
) -> Option<ReconciliationResult> {
    let mut in_window: Vec<&PunchEvent> = punches
        .iter()
        .filter(|p| p.at >= window.pointage_start && p.at <= window.grace_end)
        .collect();
    in_window.sort_by(|a, b| (a.at, a.device_id).cmp(&(b.at, b.device_id)));

    let cutoff = window.end + Duration::hours(policy.cutoff_hours);

    if in_window.is_empty() {
        if now >= cutoff {
            return Some(ReconciliationResult::bare(
                window.session_id,
                student_id,
                AttendanceStatus::Absent,
            ));
        }
        return None;
    }

    let entry = in_window.iter().find(|p| p.at <= window.end).copied();

    let Some(entry) = entry else {
        // Only post-end punches inside the grace window: an exit with no
        // valid entry. Conservatively not-yet-present.
        let mut result = ReconciliationResult::bare(
            window.session_id,
            student_id,
            AttendanceStatus::PendingEntry,
        );
        result.exit = in_window.last().map(|p| (*p).clone());
        return Some(result);
    };

    let exit = in_window
        .iter()
        .filter(|p| p.at > entry.at)
        .last()
        .copied();

    let (base, minutes_late) = if entry.at <= window.late_threshold {
        (AttendanceStatus::Present, 0)
    } else {
        (
            AttendanceStatus::Late,
            (entry.at - window.late_threshold).num_minutes(),
        )
    };

    let mut result = ReconciliationResult {
        session_id: window.session_id,
        student_id,
        status: base,
        provisional: None,
        entry: Some(entry.clone()),
        exit: exit.cloned(),
        minutes_late,
        left_early: false,
    };

    match &result.exit {
        Some(exit_punch) if exit_punch.at < window.start => {
            // Both punches before the session even started: nobody was
            // seen during the session proper.
            result.status = AttendanceStatus::PendingEntry;
            result.provisional = Some(base);
        }
        Some(exit_punch) => {
            result.left_early =
                exit_punch.at < window.end - Duration::minutes(policy.early_exit_minutes);
        }
        None => {
            if session_phase(window, now) != SessionPhase::Closed {
                result.status = AttendanceStatus::PendingExit;
                result.provisional = Some(base);
            }
            // Grace passed with a single punch: the base classification
            // stands as final.
        }
    }

    Some(result)
}
