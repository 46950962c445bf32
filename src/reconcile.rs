// src/reconcile.rs
//
// The decision kernel of the deputy: given one incoming command spec and the
// matching local handle, pick the transition. Applying the transitions (and
// every other side effect) lives in `deputy`; everything here is plain data
// so the logic can be tested without touching the process table.

use crate::messages::SheriffCmdSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmdStatus {
    Stopped,
    Running,
}

/// What to do with one command after comparing its spec against the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmdAction {
    /// Spawn it and stamp its generation with the order's `desired_runid`.
    Start,
    /// Begin (or continue) the kill escalation.
    Stop,
    /// No process transition; acknowledge the order's generation.
    SyncRunId,
}

/// The per-command transition table.
///
/// A stopped command starts only when the sheriff has bumped its generation
/// and is not simultaneously holding it down with `force_quit`. A running
/// command stops on `force_quit` or on a generation change (the restart is
/// implicit: once reaped, the next orders batch starts it again). Everything
/// else just records the generation as acknowledged.
pub fn decide(status: CmdStatus, force_quit: bool, runid_in_sync: bool) -> CmdAction {
    match status {
        CmdStatus::Stopped if !runid_in_sync && !force_quit => CmdAction::Start,
        CmdStatus::Running if force_quit || !runid_in_sync => CmdAction::Stop,
        _ => CmdAction::SyncRunId,
    }
}

/// Sheriff ids present in the local table but absent from the incoming
/// batch. Those commands are no longer wanted on this host.
pub fn orphaned_ids(present: &[i32], batch: &[SheriffCmdSpec]) -> Vec<i32> {
    present
        .iter()
        .copied()
        .filter(|sid| !batch.iter().any(|spec| spec.sheriff_id == *sid))
        .collect()
}

/// True when an order stamped `order_utime` is older than `max_age_us` at
/// `now_us`. Stale orders usually mean a skewed clock somewhere, so they are
/// dropped rather than acted on.
pub fn is_stale(now_us: i64, order_utime: i64, max_age_us: i64) -> bool {
    now_us - order_utime > max_age_us
}
