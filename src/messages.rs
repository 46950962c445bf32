// src/messages.rs

use serde::{Deserialize, Serialize};

/// Channel carrying sheriff orders to every deputy.
pub const ORDERS_CHANNEL: &str = "PMD_ORDERS";
/// Channel carrying periodic deputy snapshots back to sheriffs.
pub const INFO_CHANNEL: &str = "PMD_INFO";
/// Channel relaying child output and per-command diagnostics.
pub const PRINTF_CHANNEL: &str = "PMD_PRINTF";

/// One command as a sheriff wants it to exist on a host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheriffCmdSpec {
    pub name: String,
    pub nickname: String,
    pub group: String,
    pub sheriff_id: i32,
    /// Generation counter; the sheriff bumps it to request a (re)start.
    pub desired_runid: i32,
    /// Stop the command regardless of generation.
    pub force_quit: bool,
}

/// A batch of desired commands for one host. The deputy whose hostname
/// matches `host` reconciles its table against `cmds`; everyone else drops
/// the message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrdersMsg {
    pub utime: i64,
    pub host: String,
    pub sheriff_name: String,
    pub cmds: Vec<SheriffCmdSpec>,
}

/// Observed state of one managed command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CmdInfo {
    pub name: String,
    pub nickname: String,
    pub group: String,
    pub sheriff_id: i32,
    pub actual_runid: i32,
    /// 0 when the command is not running.
    pub pid: i32,
    /// Raw wait status from the last reap; meaningful only after an exit.
    pub exit_code: i32,
    pub cpu_usage: f32,
    pub mem_vsize_bytes: u64,
    pub mem_rss_bytes: u64,
}

/// Periodic deputy snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfoMsg {
    pub utime: i64,
    pub host: String,
    pub cpu_load: f32,
    pub phys_mem_total_bytes: u64,
    pub phys_mem_free_bytes: u64,
    pub swap_total_bytes: u64,
    pub swap_free_bytes: u64,
    pub cmds: Vec<CmdInfo>,
}

/// A relayed chunk of child output or a per-command diagnostic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrintfMsg {
    pub deputy_name: String,
    pub sheriff_id: i32,
    pub text: String,
    pub utime: i64,
}
