#[cfg(test)]
mod tests {
    use crate::messages::SheriffCmdSpec;
    use crate::reconcile::{decide, is_stale, orphaned_ids, CmdAction, CmdStatus};

    fn spec(sheriff_id: i32) -> SheriffCmdSpec {
        SheriffCmdSpec {
            name: format!("sleep {}", sheriff_id),
            nickname: format!("cmd{}", sheriff_id),
            group: "default".to_string(),
            sheriff_id,
            desired_runid: 1,
            force_quit: false,
        }
    }

    #[test]
    fn stopped_command_starts_on_a_new_runid() {
        assert_eq!(
            decide(CmdStatus::Stopped, false, false),
            CmdAction::Start,
            "a bumped generation must spawn a stopped command"
        );
    }

    #[test]
    fn stopped_command_stays_down_under_force_quit() {
        // force_quit wins even when the generation changed
        assert_eq!(decide(CmdStatus::Stopped, true, false), CmdAction::SyncRunId);
        assert_eq!(decide(CmdStatus::Stopped, true, true), CmdAction::SyncRunId);
    }

    #[test]
    fn stopped_command_with_current_runid_is_left_alone() {
        assert_eq!(
            decide(CmdStatus::Stopped, false, true),
            CmdAction::SyncRunId
        );
    }

    #[test]
    fn running_command_stops_on_force_quit() {
        assert_eq!(decide(CmdStatus::Running, true, true), CmdAction::Stop);
        assert_eq!(decide(CmdStatus::Running, true, false), CmdAction::Stop);
    }

    #[test]
    fn running_command_stops_on_a_new_runid() {
        // the restart is implicit: once reaped, the next batch starts it
        assert_eq!(decide(CmdStatus::Running, false, false), CmdAction::Stop);
    }

    #[test]
    fn running_command_with_current_runid_is_left_alone() {
        assert_eq!(
            decide(CmdStatus::Running, false, true),
            CmdAction::SyncRunId
        );
    }

    #[test]
    fn orphans_are_the_ids_the_batch_dropped() {
        let batch = vec![spec(1), spec(3)];
        let mut orphans = orphaned_ids(&[1, 2, 3, 4], &batch);
        orphans.sort_unstable();
        assert_eq!(orphans, vec![2, 4]);
    }

    #[test]
    fn no_orphans_when_the_batch_names_everyone() {
        let batch = vec![spec(1), spec(2)];
        assert!(orphaned_ids(&[1, 2], &batch).is_empty());
        assert!(orphaned_ids(&[], &batch).is_empty());
    }

    #[test]
    fn staleness_is_strictly_beyond_the_threshold() {
        let now = 100_000_000;
        assert!(!is_stale(now, now, 60_000_000));
        assert!(!is_stale(now, now - 60_000_000, 60_000_000));
        assert!(is_stale(now, now - 60_000_001, 60_000_000));
    }

    #[test]
    fn future_stamped_orders_are_not_stale() {
        // a slightly fast sheriff clock must not get its orders dropped
        assert!(!is_stale(100, 2_000_000, 60_000_000));
    }
}
