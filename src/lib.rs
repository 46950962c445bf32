// Rust rendition of the procman deputy: a daemon that drives one host's
// process table toward the orders a remote sheriff publishes on the bus.
pub mod bus;
pub mod command;
pub mod config;
pub mod deputy;
pub mod errors;
pub mod logger;
pub mod messages;
pub mod process_manager;
pub mod reconcile;
pub mod resource_monitor;
pub mod signals;
pub mod timestamp;

// tests
#[path = "../src/tests/reconcile_test.rs"]
mod reconcile_test;

#[path = "../src/tests/command_test.rs"]
mod command_test;

#[path = "../src/tests/process_manager_test.rs"]
mod process_manager_test;

#[path = "../src/tests/resource_monitor_test.rs"]
mod resource_monitor_test;

#[path = "../src/tests/bus_test.rs"]
mod bus_test;

#[path = "../src/tests/config_test.rs"]
mod config_test;

#[path = "../src/tests/logger_test.rs"]
mod logger_test;

#[path = "../src/tests/timestamp_test.rs"]
mod timestamp_test;

#[path = "../src/tests/deputy_test.rs"]
mod deputy_test;
