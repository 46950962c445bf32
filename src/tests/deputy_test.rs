#[cfg(test)]
mod tests {
    use crate::bus::Bus;
    use crate::config::DeputyConfig;
    use crate::deputy::Deputy;
    use crate::messages::{OrdersMsg, SheriffCmdSpec};
    use crate::timestamp::timestamp_now;
    use std::time::{Duration, Instant};

    const HOST: &str = "testhost";

    fn deputy(port: u16) -> Deputy {
        let bus =
            Bus::open(&format!("udpm://127.0.0.1:{}?ttl=0", port)).expect("failed to open bus");
        Deputy::new(bus, DeputyConfig::default(), HOST.to_string(), false)
    }

    fn orders(cmds: Vec<SheriffCmdSpec>) -> OrdersMsg {
        OrdersMsg {
            utime: timestamp_now(),
            host: HOST.to_string(),
            sheriff_name: "sheriff0".to_string(),
            cmds,
        }
    }

    fn spec(sheriff_id: i32, name: &str, desired_runid: i32, force_quit: bool) -> SheriffCmdSpec {
        SheriffCmdSpec {
            name: name.to_string(),
            nickname: format!("cmd{}", sheriff_id),
            group: "default".to_string(),
            sheriff_id,
            desired_runid,
            force_quit,
        }
    }

    /// Pumps reaps until the command settles or the deadline passes.
    async fn wait_until_settled(deputy: &mut Deputy, sheriff_id: i32) {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            deputy.check_for_dead_children().await;
            let running = deputy
                .pm
                .get(sheriff_id)
                .map(|cmd| cmd.pid != 0)
                .unwrap_or(false);
            if !running {
                return;
            }
            assert!(
                Instant::now() < deadline,
                "command {} never settled",
                sheriff_id
            );
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    #[tokio::test]
    async fn fresh_orders_spawn_the_command() {
        let mut deputy = deputy(18031);
        deputy
            .orders_received(&orders(vec![spec(1, "sleep 60", 1, false)]))
            .await;

        let cmd = deputy.pm.get(1).expect("command was not added");
        assert!(cmd.pid > 0, "command must be running");
        assert_eq!(cmd.actual_runid, 1);
        assert!(cmd.stdout.is_some());
        assert_eq!(deputy.orders_seen, 1);
        assert_eq!(deputy.orders_for_me, 1);

        deputy.shutdown().await;
        assert!(deputy.pm.is_empty());
    }

    #[tokio::test]
    async fn reapplying_the_same_orders_is_idempotent() {
        let mut deputy = deputy(18032);
        deputy
            .orders_received(&orders(vec![spec(1, "sleep 60", 1, false)]))
            .await;
        let pid = deputy.pm.get(1).map(|cmd| cmd.pid).unwrap_or(0);

        deputy
            .orders_received(&orders(vec![spec(1, "sleep 60", 1, false)]))
            .await;
        let cmd = deputy.pm.get(1).expect("command vanished");
        assert_eq!(cmd.pid, pid, "steady state must not respawn");
        assert_eq!(cmd.num_kills_sent, 0, "steady state must not signal");

        deputy.shutdown().await;
    }

    #[tokio::test]
    async fn rename_applies_without_restarting() {
        let mut deputy = deputy(18033);
        deputy
            .orders_received(&orders(vec![spec(1, "sleep 60", 1, false)]))
            .await;
        let pid = deputy.pm.get(1).map(|cmd| cmd.pid).unwrap_or(0);
        assert!(pid > 0);

        deputy
            .orders_received(&orders(vec![spec(1, "sleep 120", 1, false)]))
            .await;
        let cmd = deputy.pm.get(1).expect("command vanished");
        assert_eq!(cmd.pid, pid, "rename must not touch the running child");
        assert_eq!(cmd.name(), "sleep 120");
        assert_eq!(cmd.num_kills_sent, 0);

        deputy.shutdown().await;
    }

    #[tokio::test]
    async fn force_quit_stops_and_settles_the_command() {
        let mut deputy = deputy(18034);
        deputy
            .orders_received(&orders(vec![spec(1, "sleep 60", 1, false)]))
            .await;
        assert!(deputy.pm.get(1).map(|cmd| cmd.pid).unwrap_or(0) > 0);

        deputy
            .orders_received(&orders(vec![spec(1, "sleep 60", 1, true)]))
            .await;
        assert_eq!(
            deputy.pm.get(1).map(|cmd| cmd.num_kills_sent).unwrap_or(0),
            1,
            "force_quit must send exactly one signal per grace window"
        );

        wait_until_settled(&mut deputy, 1).await;
        let cmd = deputy.pm.get(1).expect("force_quit must not remove the handle");
        assert_eq!(cmd.pid, 0);
        assert!(libc::WIFSIGNALED(cmd.exit_status));

        // the follow-up batch acknowledges the generation without restarting
        deputy
            .orders_received(&orders(vec![spec(1, "sleep 60", 1, true)]))
            .await;
        assert_eq!(deputy.pm.get(1).map(|cmd| cmd.pid).unwrap_or(1), 0);
        assert_eq!(deputy.pm.get(1).map(|cmd| cmd.actual_runid).unwrap_or(0), 1);

        deputy.shutdown().await;
    }

    #[tokio::test]
    async fn bumped_runid_restarts_after_force_quit() {
        let mut deputy = deputy(18035);
        deputy
            .orders_received(&orders(vec![spec(1, "sleep 60", 1, true)]))
            .await;
        // held down: registered but never spawned
        let cmd = deputy.pm.get(1).expect("command was not added");
        assert_eq!(cmd.pid, 0);
        assert_eq!(cmd.actual_runid, 1);

        deputy
            .orders_received(&orders(vec![spec(1, "sleep 60", 2, false)]))
            .await;
        let cmd = deputy.pm.get(1).expect("command vanished");
        assert!(cmd.pid > 0, "bumped generation must start the command");
        assert_eq!(cmd.actual_runid, 2);

        deputy.shutdown().await;
    }

    #[tokio::test]
    async fn unlisted_running_command_is_culled() {
        let mut deputy = deputy(18036);
        deputy
            .orders_received(&orders(vec![
                spec(1, "sleep 60", 1, false),
                spec(2, "sleep 60", 1, false),
            ]))
            .await;
        assert_eq!(deputy.pm.running(), 2);

        deputy
            .orders_received(&orders(vec![spec(1, "sleep 60", 1, false)]))
            .await;
        let culled = deputy.pm.get(2).expect("culled command still reaping");
        assert!(culled.remove_requested);
        assert_eq!(culled.num_kills_sent, 1);

        let deadline = Instant::now() + Duration::from_secs(5);
        while deputy.pm.contains(2) {
            assert!(Instant::now() < deadline, "culled command never disappeared");
            tokio::time::sleep(Duration::from_millis(50)).await;
            deputy.check_for_dead_children().await;
        }
        assert!(
            deputy.pm.get(1).map(|cmd| cmd.pid).unwrap_or(0) > 0,
            "the surviving command must keep running"
        );

        deputy.shutdown().await;
    }

    #[tokio::test]
    async fn unlisted_settled_command_is_removed_immediately() {
        let mut deputy = deputy(18037);
        // force_quit registers the command without spawning it
        deputy
            .orders_received(&orders(vec![spec(1, "sleep 60", 1, true)]))
            .await;
        assert!(deputy.pm.contains(1));

        deputy.orders_received(&orders(vec![])).await;
        assert!(!deputy.pm.contains(1));
        assert!(deputy.pm.is_empty());
    }

    #[tokio::test]
    async fn stale_orders_are_counted_and_dropped() {
        let mut deputy = deputy(18038);
        let mut batch = orders(vec![spec(1, "sleep 60", 1, false)]);
        batch.utime = timestamp_now() - 120_000_000;

        deputy.orders_received(&batch).await;
        assert_eq!(deputy.orders_seen, 1);
        assert_eq!(deputy.orders_for_me, 1);
        assert_eq!(deputy.stale_orders, 1);
        assert!(
            deputy.pm.is_empty(),
            "stale orders must not touch the table"
        );
    }

    #[tokio::test]
    async fn orders_for_other_hosts_are_ignored() {
        let mut deputy = deputy(18039);
        let mut batch = orders(vec![spec(1, "sleep 60", 1, false)]);
        batch.host = "otherhost".to_string();

        deputy.orders_received(&batch).await;
        assert_eq!(deputy.orders_seen, 1);
        assert_eq!(deputy.orders_for_me, 0);
        assert_eq!(deputy.stale_orders, 0);
        assert!(deputy.pm.is_empty());
    }

    #[tokio::test]
    async fn sheriffs_are_tracked_per_interval() {
        let mut deputy = deputy(18040);
        let mut batch = orders(vec![]);
        batch.sheriff_name = "alpha".to_string();
        deputy.orders_received(&batch).await;
        let mut batch = orders(vec![]);
        batch.sheriff_name = "beta".to_string();
        deputy.orders_received(&batch).await;
        let mut batch = orders(vec![]);
        batch.sheriff_name = "alpha".to_string();
        deputy.orders_received(&batch).await;

        assert_eq!(deputy.observed_sheriffs.len(), 2);
    }
}
