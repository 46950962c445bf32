// src/main.rs

use std::path::PathBuf;

use clap::Parser;
use gethostname::gethostname;

use procman_deputy::bus::Bus;
use procman_deputy::config::DeputyConfig;
use procman_deputy::deputy::Deputy;
use procman_deputy::logger::{redirect_to_file, set_log_level, LogLevel};

/// Process-management deputy: runs the commands a sheriff orders for this
/// host and reports their state back over the bus.
#[derive(Parser, Debug)]
#[command(name = "procman-deputy")]
struct Args {
    /// verbose output
    #[arg(short, long)]
    verbose: bool,

    /// use deputy name NAME instead of the system hostname
    #[arg(short, long, value_name = "NAME")]
    name: Option<String>,

    /// append stdout and stderr to PATH instead of the terminal
    #[arg(short, long, value_name = "PATH")]
    log: Option<PathBuf>,

    /// bus URL for deputy messages
    #[arg(short = 'u', long = "lcmurl", value_name = "URL")]
    lcmurl: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    std::process::exit(run().await);
}

async fn run() -> i32 {
    // usage and parse errors both exit 1
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let _ = err.print();
            return 1;
        }
    };

    set_log_level(LogLevel::from_verbose(args.verbose));

    if let Some(path) = &args.log {
        if let Err(err) = redirect_to_file(path) {
            eprintln!("{}", err);
            return 1;
        }
    }

    let cfg = match DeputyConfig::load() {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("error loading deputy configuration: {}", err);
            return 1;
        }
    };

    let url = args.lcmurl.clone().unwrap_or_else(|| cfg.bus_url.clone());
    let bus = match Bus::open(&url) {
        Ok(bus) => bus,
        Err(err) => {
            eprintln!("error initializing message bus at {}: {}", url, err);
            return 1;
        }
    };

    let hostname = args
        .name
        .clone()
        .unwrap_or_else(|| gethostname().to_string_lossy().into_owned());

    let mut deputy = Deputy::new(bus, cfg, hostname, args.verbose);
    match deputy.run().await {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("deputy main loop failed: {}", err);
            1
        }
    }
}
