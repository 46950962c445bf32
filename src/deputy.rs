// src/deputy.rs

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::net::unix::pipe;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::bus::Bus;
use crate::config::DeputyConfig;
use crate::errors::{DeputyError, ErrorKind};
use crate::log;
use crate::logger::LogLevel;
use crate::messages::{
    CmdInfo, InfoMsg, OrdersMsg, PrintfMsg, SheriffCmdSpec, INFO_CHANNEL, ORDERS_CHANNEL,
    PRINTF_CHANNEL,
};
use crate::process_manager::ProcessManager;
use crate::reconcile::{decide, is_stale, orphaned_ids, CmdAction};
use crate::resource_monitor::{
    self, cpu_load, elapsed_jiffies, proc_cpu_usage, ProcessSample, ResourceSampler, SystemSample,
};
use crate::signals::{SignalEvent, SignalRelay};
use crate::timestamp::{age_seconds, timestamp_now};

/// How long shutdown keeps pumping stops and reaps before giving up on
/// survivors. The escalation reaches SIGKILL after about six seconds, so
/// this leaves margin for the reap.
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(10);

enum Event {
    Bus(String, Vec<u8>),
    BusError(DeputyError),
    Signal(SignalEvent),
    StdoutReady(i32),
    InfoTick,
    MarkTick,
}

/// The deputy: one host's process-management daemon. Owns the command table
/// and every piece of reconciliation state; everything is mutated from the
/// single event-loop task in [`Deputy::run`].
pub struct Deputy {
    pub(crate) pm: ProcessManager,
    bus: Bus,
    cfg: DeputyConfig,
    hostname: String,
    verbose: bool,

    // reconciliation counters since the last MARK
    pub(crate) orders_seen: u32,
    pub(crate) orders_for_me: u32,
    pub(crate) stale_orders: u32,

    /// Sheriffs heard from since the last MARK.
    pub(crate) observed_sheriffs: HashSet<String>,
    /// The most recently heard sheriff, kept across MARKs.
    last_sheriff: Option<String>,

    sampler: ResourceSampler,
    /// Previous and current system snapshot.
    sys_samples: [SystemSample; 2],
    pub(crate) cpu_load: f32,
}

impl Deputy {
    pub fn new(bus: Bus, cfg: DeputyConfig, hostname: String, verbose: bool) -> Self {
        Self {
            pm: ProcessManager::new(),
            bus,
            cfg,
            hostname,
            verbose,
            orders_seen: 0,
            orders_for_me: 0,
            stale_orders: 0,
            observed_sheriffs: HashSet::new(),
            last_sheriff: None,
            sampler: ResourceSampler::new(),
            sys_samples: [SystemSample::default(); 2],
            cpu_load: 0.0,
        }
    }

    /// Runs the event loop until a shutdown signal arrives, then drains the
    /// children and returns.
    ///
    /// # Errors
    ///
    /// Only setup can fail (installing signal handlers); once the loop is
    /// turning, per-child and per-message failures are reported and survived.
    pub async fn run(&mut self) -> Result<(), DeputyError> {
        let mut signals = SignalRelay::new()
            .map_err(|err| DeputyError::new(ErrorKind::InitFailure, err.to_string()))?;

        let info_period = Duration::from_millis(self.cfg.info_period_ms);
        let mark_period = Duration::from_secs(self.cfg.introspection_period_s);
        let mut info_tick = interval_at(Instant::now() + info_period, info_period);
        info_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut mark_tick = interval_at(Instant::now() + mark_period, mark_period);
        mark_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        log!(
            LogLevel::Info,
            "deputy [{}] listening for orders",
            self.hostname
        );

        loop {
            let watches = self.pm.watch_list();
            let event = tokio::select! {
                received = self.bus.recv() => match received {
                    Ok((channel, payload)) => Event::Bus(channel, payload),
                    Err(err) => Event::BusError(err),
                },
                sig = signals.recv() => Event::Signal(sig),
                _ = info_tick.tick() => Event::InfoTick,
                _ = mark_tick.tick() => Event::MarkTick,
                sheriff_id = next_readable(watches) => Event::StdoutReady(sheriff_id),
            };

            match event {
                Event::Bus(channel, payload) => {
                    if channel == ORDERS_CHANNEL {
                        match serde_json::from_slice::<OrdersMsg>(&payload) {
                            Ok(orders) => self.orders_received(&orders).await,
                            Err(err) => {
                                log!(LogLevel::Warn, "undecodable orders message: {}", err)
                            }
                        }
                    }
                }
                Event::BusError(err) => log!(LogLevel::Warn, "bus receive failed: {}", err),
                Event::Signal(SignalEvent::ChildExited) => self.check_for_dead_children().await,
                Event::Signal(SignalEvent::Shutdown(name)) => {
                    log!(
                        LogLevel::Info,
                        "received {}. stopping all processes",
                        name
                    );
                    self.shutdown().await;
                    break;
                }
                Event::StdoutReady(sheriff_id) => self.pipe_data_ready(sheriff_id).await,
                Event::InfoTick => {
                    self.update_cpu_times();
                    self.transmit_proc_info().await;
                }
                Event::MarkTick => self.introspection_tick(),
            }
        }

        log!(LogLevel::Info, "deputy main loop stopped");
        Ok(())
    }

    /// Reconciles one orders batch against the table: filter by host, drop
    /// stale batches, track the sheriff, apply the per-command transition
    /// table, cull commands the batch no longer names, and publish a
    /// snapshot if anything changed.
    pub(crate) async fn orders_received(&mut self, orders: &OrdersMsg) {
        self.orders_seen += 1;
        if orders.host != self.hostname {
            if self.verbose {
                log!(LogLevel::Debug, "ignoring orders for host {}", orders.host);
            }
            return;
        }
        self.orders_for_me += 1;

        let now = timestamp_now();
        if is_stale(now, orders.utime, self.cfg.stale_order_age_us) {
            self.stale_orders += 1;
            let text = format!(
                "ignoring stale orders (utime {} seconds ago). You may want to check the system clocks!\n",
                age_seconds(now, orders.utime)
            );
            for spec in &orders.cmds {
                self.printf_and_transmit(spec.sheriff_id, &text).await;
            }
            return;
        }

        self.observed_sheriffs.insert(orders.sheriff_name.clone());
        if self.last_sheriff.as_deref() != Some(orders.sheriff_name.as_str()) {
            self.last_sheriff = Some(orders.sheriff_name.clone());
        }

        if self.verbose {
            log!(
                LogLevel::Debug,
                "orders from [{}] with {} commands",
                orders.sheriff_name,
                orders.cmds.len()
            );
        }

        let mut action_taken = false;
        for spec in &orders.cmds {
            if !self.pm.contains(spec.sheriff_id) {
                log!(LogLevel::Debug, "adding new command [{}]", spec.name);
                self.pm.add_cmd(spec);
                action_taken = true;
            }
            action_taken |= self.sync_identity(spec);

            let Some(cmd) = self.pm.get(spec.sheriff_id) else {
                continue;
            };
            let action = decide(
                cmd.status(),
                spec.force_quit,
                spec.desired_runid == cmd.actual_runid,
            );
            match action {
                CmdAction::Start => {
                    self.start_cmd(spec.sheriff_id, spec.desired_runid).await;
                    action_taken = true;
                }
                CmdAction::Stop => {
                    self.stop_cmd(spec.sheriff_id).await;
                    action_taken = true;
                }
                CmdAction::SyncRunId => {
                    if let Some(cmd) = self.pm.get_mut(spec.sheriff_id) {
                        cmd.actual_runid = spec.desired_runid;
                    }
                }
            }
        }

        // commands this batch no longer names are not wanted on this host
        for sheriff_id in orphaned_ids(&self.pm.sheriff_ids(), &orders.cmds) {
            let running = self.pm.get(sheriff_id).map(|cmd| cmd.pid != 0).unwrap_or(false);
            if running {
                if let Some(cmd) = self.pm.get_mut(sheriff_id) {
                    log!(LogLevel::Debug, "scheduling [{}] for removal", cmd.name());
                    cmd.remove_requested = true;
                }
                self.stop_cmd(sheriff_id).await;
            } else {
                if let Some(cmd) = self.pm.get(sheriff_id) {
                    log!(LogLevel::Debug, "removing [{}]", cmd.name());
                }
                if let Err(err) = self.pm.remove_cmd(sheriff_id) {
                    log!(LogLevel::Warn, "couldn't remove command: {}", err);
                }
            }
            action_taken = true;
        }

        if action_taken {
            self.transmit_proc_info().await;
        }
    }

    /// Applies the spec's name/nickname/group to the handle. A rename never
    /// touches a running pid; the new argv applies at the next spawn.
    fn sync_identity(&mut self, spec: &SheriffCmdSpec) -> bool {
        let Some(cmd) = self.pm.get_mut(spec.sheriff_id) else {
            return false;
        };
        let mut changed = false;
        if cmd.name() != spec.name {
            log!(
                LogLevel::Debug,
                "renaming [{}] to [{}]",
                cmd.name(),
                spec.name
            );
            cmd.change_name(&spec.name);
            changed = true;
        }
        if cmd.nickname != spec.nickname {
            log!(
                LogLevel::Debug,
                "setting nickname of [{}] to [{}]",
                cmd.name(),
                spec.nickname
            );
            cmd.nickname = spec.nickname.clone();
            changed = true;
        }
        if cmd.group != spec.group {
            log!(
                LogLevel::Debug,
                "setting group of [{}] to [{}]",
                cmd.name(),
                spec.group
            );
            cmd.group = spec.group.clone();
            changed = true;
        }
        changed
    }

    /// Spawns a command and stamps its generation. A failed spawn leaves the
    /// handle settled and tells the sheriff; the next orders batch retries.
    async fn start_cmd(&mut self, sheriff_id: i32, desired_runid: i32) {
        match self.pm.start_cmd(sheriff_id) {
            Ok(()) => {
                if let Some(cmd) = self.pm.get_mut(sheriff_id) {
                    cmd.actual_runid = desired_runid;
                }
            }
            Err(err) => {
                let name = self
                    .pm
                    .get(sheriff_id)
                    .map(|cmd| cmd.name().to_string())
                    .unwrap_or_default();
                log!(LogLevel::Error, "couldn't start [{}]: {}", name, err);
                self.printf_and_transmit(
                    sheriff_id,
                    &format!("ERROR!  couldn't start [{}]\n", name),
                )
                .await;
            }
        }
    }

    /// One step of the kill escalation: at most one signal per grace window,
    /// graceful first, forceful once the limit is spent.
    pub(crate) async fn stop_cmd(&mut self, sheriff_id: i32) {
        let now = timestamp_now();
        let planned = self.pm.get(sheriff_id).and_then(|cmd| {
            cmd.plan_kill(
                now,
                self.cfg.kill_retry_interval_us,
                self.cfg.graceful_kill_limit,
            )
        });
        let Some(sig) = planned else {
            return;
        };
        if let Some(cmd) = self.pm.get_mut(sheriff_id) {
            cmd.record_kill(now);
        }
        if let Err(err) = self.pm.kill_cmd(sheriff_id, sig) {
            self.printf_and_transmit(sheriff_id, &format!("kill: {}\n", err))
                .await;
        }
    }

    /// Forwards one readable chunk of a child's output, or tears the watch
    /// down on hangup.
    async fn pipe_data_ready(&mut self, sheriff_id: i32) {
        let Some((stdout, name)) = self.pm.get(sheriff_id).and_then(|cmd| {
            cmd.stdout
                .as_ref()
                .map(|stdout| (Arc::clone(stdout), cmd.name().to_string()))
        }) else {
            return;
        };
        let mut buf = vec![0u8; self.cfg.stdout_chunk_bytes];
        match stdout.try_read(&mut buf) {
            Ok(0) => {
                self.printf_and_transmit(sheriff_id, "deputy: end of output\n")
                    .await;
                self.pm.close_dead_pipe(sheriff_id);
            }
            Ok(n) => {
                let text = String::from_utf8_lossy(&buf[..n]).into_owned();
                self.printf_and_transmit(sheriff_id, &text).await;
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(err) => {
                let errno = err.raw_os_error().unwrap_or(0);
                self.printf_and_transmit(
                    sheriff_id,
                    &format!("deputy [{}] read: {} ({})\n", name, err, errno),
                )
                .await;
            }
        }
    }

    /// Reaps every waiting child. For each: flush its last output, report a
    /// signal death, drop the pipe watch, delete the handle if removal was
    /// requested, and publish a snapshot.
    pub(crate) async fn check_for_dead_children(&mut self) {
        while let Some(sheriff_id) = self.pm.reap_one() {
            self.drain_stdout(sheriff_id).await;

            let Some(cmd) = self.pm.get(sheriff_id) else {
                continue;
            };
            let (status, name, remove) =
                (cmd.exit_status, cmd.name().to_string(), cmd.remove_requested);

            if libc::WIFSIGNALED(status) {
                let signum = libc::WTERMSIG(status);
                self.printf_and_transmit(
                    sheriff_id,
                    &format!("{} (signal {})\n", signal_name(signum), signum),
                )
                .await;
                if libc::WCOREDUMP(status) {
                    self.printf_and_transmit(sheriff_id, "Core dumped.\n").await;
                }
            }

            self.pm.close_dead_pipe(sheriff_id);

            if remove {
                log!(LogLevel::Debug, "removing [{}]", name);
                if let Err(err) = self.pm.remove_cmd(sheriff_id) {
                    log!(LogLevel::Warn, "couldn't remove [{}]: {}", name, err);
                }
            }

            self.transmit_proc_info().await;
        }
    }

    /// Flushes whatever is left in a dead child's pipe, so its final output
    /// is published before the exit is reported.
    async fn drain_stdout(&mut self, sheriff_id: i32) {
        loop {
            let Some(stdout) = self
                .pm
                .get(sheriff_id)
                .and_then(|cmd| cmd.stdout.as_ref().map(Arc::clone))
            else {
                return;
            };
            let mut buf = vec![0u8; self.cfg.stdout_chunk_bytes];
            match stdout.try_read(&mut buf) {
                Ok(n) if n > 0 => {
                    let text = String::from_utf8_lossy(&buf[..n]).into_owned();
                    self.printf_and_transmit(sheriff_id, &text).await;
                }
                // EOF, empty pipe, or a read error: nothing more to flush
                _ => return,
            }
        }
    }

    /// Publishes the deputy snapshot.
    async fn transmit_proc_info(&self) {
        let cmds = self
            .pm
            .cmds()
            .map(|cmd| CmdInfo {
                name: cmd.name().to_string(),
                nickname: cmd.nickname.clone(),
                group: cmd.group.clone(),
                sheriff_id: cmd.sheriff_id,
                actual_runid: cmd.actual_runid,
                pid: cmd.pid,
                exit_code: cmd.exit_status,
                cpu_usage: cmd.cpu_usage,
                mem_vsize_bytes: cmd.cpu_samples[1].vsize,
                mem_rss_bytes: cmd.cpu_samples[1].rss,
            })
            .collect();
        let current = &self.sys_samples[1];
        let msg = InfoMsg {
            utime: timestamp_now(),
            host: self.hostname.clone(),
            cpu_load: self.cpu_load,
            phys_mem_total_bytes: current.mem_total,
            phys_mem_free_bytes: current.mem_free,
            swap_total_bytes: current.swap_total,
            swap_free_bytes: current.swap_free,
            cmds,
        };
        if self.verbose {
            log!(LogLevel::Debug, "transmitting deputy info");
        }
        if let Err(err) = self.bus.publish(INFO_CHANNEL, &msg).await {
            log!(LogLevel::Warn, "couldn't publish deputy info: {}", err);
        }
    }

    /// Publishes one log-relay line tagged with a sheriff id.
    async fn printf_and_transmit(&self, sheriff_id: i32, text: &str) {
        if self.verbose {
            log!(LogLevel::Debug, "[{}] {}", sheriff_id, text.trim_end());
        }
        let msg = PrintfMsg {
            deputy_name: self.hostname.clone(),
            sheriff_id,
            text: text.to_string(),
            utime: timestamp_now(),
        };
        if let Err(err) = self.bus.publish(PRINTF_CHANNEL, &msg).await {
            log!(LogLevel::Warn, "couldn't publish log line: {}", err);
        }
    }

    /// Rotates the system and per-child samples and recomputes the load
    /// figures.
    pub(crate) fn update_cpu_times(&mut self) {
        match self.sampler.sample_system() {
            Ok(sample) => self.sys_samples[1] = sample,
            Err(err) => log!(LogLevel::Warn, "couldn't sample system counters: {}", err),
        }
        self.cpu_load = cpu_load(&self.sys_samples[0], &self.sys_samples[1]);
        let elapsed = elapsed_jiffies(&self.sys_samples[0], &self.sys_samples[1]);

        for cmd in self.pm.cmds_mut() {
            if cmd.pid != 0 {
                match resource_monitor::sample_process(cmd.pid) {
                    Ok(sample) => {
                        cmd.cpu_samples[1] = sample;
                        cmd.cpu_usage = proc_cpu_usage(
                            &cmd.cpu_samples[0],
                            &cmd.cpu_samples[1],
                            elapsed,
                            cmd.has_prev_sample,
                        );
                        cmd.has_prev_sample = true;
                    }
                    Err(err) => {
                        cmd.cpu_samples[1] = ProcessSample::default();
                        cmd.cpu_usage = 0.0;
                        cmd.has_prev_sample = false;
                        log!(LogLevel::Debug, "couldn't sample pid {}: {}", cmd.pid, err);
                    }
                }
            } else {
                cmd.cpu_samples[1] = ProcessSample::default();
                cmd.cpu_usage = 0.0;
                cmd.has_prev_sample = false;
            }
            cmd.cpu_samples[0] = cmd.cpu_samples[1];
        }

        self.sys_samples[0] = self.sys_samples[1];
    }

    /// The periodic MARK: deputy memory footprint, table counts, and the
    /// reconciliation counters, which reset afterwards.
    fn introspection_tick(&mut self) {
        match resource_monitor::self_memory() {
            Ok((rss, vsize)) => log!(
                LogLevel::Info,
                "MARK - rss: {} kB vsz: {} kB procs: {} ({} alive)",
                rss / 1024,
                vsize / 1024,
                self.pm.len(),
                self.pm.running()
            ),
            Err(err) => log!(
                LogLevel::Warn,
                "couldn't read deputy memory usage: {}",
                err
            ),
        }
        log!(
            LogLevel::Info,
            "       orders: {} forme: {} ({} stale) sheriffs: {}",
            self.orders_seen,
            self.orders_for_me,
            self.stale_orders,
            self.observed_sheriffs.len()
        );
        self.orders_seen = 0;
        self.orders_for_me = 0;
        self.stale_orders = 0;
        self.observed_sheriffs.clear();
    }

    /// Escalates every child toward termination and pumps reaps until the
    /// table is empty or the drain deadline passes.
    pub(crate) async fn shutdown(&mut self) {
        for sheriff_id in self.pm.sheriff_ids() {
            if let Some(cmd) = self.pm.get_mut(sheriff_id) {
                cmd.remove_requested = true;
            }
        }
        let deadline = Instant::now() + SHUTDOWN_DRAIN;
        loop {
            self.check_for_dead_children().await;
            for sheriff_id in self.pm.sheriff_ids() {
                let running = self
                    .pm
                    .get(sheriff_id)
                    .map(|cmd| cmd.pid != 0)
                    .unwrap_or(false);
                if running {
                    self.stop_cmd(sheriff_id).await;
                } else if let Err(err) = self.pm.remove_cmd(sheriff_id) {
                    log!(LogLevel::Warn, "couldn't remove command: {}", err);
                }
            }
            if self.pm.is_empty() {
                break;
            }
            if Instant::now() >= deadline {
                log!(
                    LogLevel::Warn,
                    "{} children survived the shutdown drain",
                    self.pm.running()
                );
                break;
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }
}

fn signal_name(signum: i32) -> String {
    match nix::sys::signal::Signal::try_from(signum) {
        Ok(sig) => sig.as_str().to_string(),
        Err(_) => format!("signal {}", signum),
    }
}

/// Resolves with the sheriff id of the first watched stdout pipe to become
/// readable. Pends forever when nothing is watched, so the event loop simply
/// ignores this source until a child is started.
async fn next_readable(watches: Vec<(i32, Arc<pipe::Receiver>)>) -> i32 {
    if watches.is_empty() {
        return std::future::pending().await;
    }
    let mut futs: Vec<Pin<Box<dyn Future<Output = i32>>>> = watches
        .into_iter()
        .map(|(sheriff_id, stdout)| {
            let fut = async move {
                let _ = stdout.readable().await;
                sheriff_id
            };
            Box::pin(fut) as Pin<Box<dyn Future<Output = i32>>>
        })
        .collect();
    std::future::poll_fn(move |cx: &mut Context<'_>| {
        for fut in futs.iter_mut() {
            if let Poll::Ready(sheriff_id) = fut.as_mut().poll(cx) {
                return Poll::Ready(sheriff_id);
            }
        }
        Poll::Pending
    })
    .await
}
