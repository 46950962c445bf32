#[cfg(test)]
mod tests {
    use crate::command::DeputyCommand;
    use crate::reconcile::CmdStatus;

    const RETRY_US: i64 = 900_000;
    const GRACEFUL: u32 = 6;

    fn cmd(name: &str) -> DeputyCommand {
        DeputyCommand::new(1, name, "nick", "group")
    }

    #[test]
    fn command_string_tokenizes_to_argv() {
        let c = cmd("sleep 60");
        assert_eq!(c.args(), ["sleep", "60"]);
    }

    #[test]
    fn quoted_arguments_stay_together() {
        let c = cmd("sh -c 'echo hello world'");
        assert_eq!(c.args(), ["sh", "-c", "echo hello world"]);
    }

    #[test]
    fn rename_retokenizes_without_touching_the_pid() {
        let mut c = cmd("sleep 60");
        c.pid = 4242;
        c.change_name("sleep 120");
        assert_eq!(c.name(), "sleep 120");
        assert_eq!(c.args(), ["sleep", "120"]);
        assert_eq!(c.pid, 4242);
    }

    #[test]
    fn status_follows_the_pid() {
        let mut c = cmd("sleep 60");
        assert_eq!(c.status(), CmdStatus::Stopped);
        c.pid = 1;
        assert_eq!(c.status(), CmdStatus::Running);
    }

    #[test]
    fn settled_commands_are_never_signalled() {
        let c = cmd("sleep 60");
        assert_eq!(c.plan_kill(1_000_000, RETRY_US, GRACEFUL), None);
    }

    #[test]
    fn kills_are_rate_limited_to_the_grace_window() {
        let mut c = cmd("sleep 60");
        c.pid = 4242;
        let t0 = 1_000_000;
        assert_eq!(c.plan_kill(t0, RETRY_US, GRACEFUL), Some(libc::SIGTERM));
        c.record_kill(t0);
        // a second stop inside the window sends nothing
        assert_eq!(c.plan_kill(t0 + 500_000, RETRY_US, GRACEFUL), None);
        assert_eq!(c.plan_kill(t0 + RETRY_US - 1, RETRY_US, GRACEFUL), None);
        assert_eq!(
            c.plan_kill(t0 + RETRY_US, RETRY_US, GRACEFUL),
            Some(libc::SIGTERM)
        );
    }

    #[test]
    fn escalation_turns_forceful_after_the_graceful_limit() {
        let mut c = cmd("sleep 60");
        c.pid = 4242;
        let mut now = 1_000_000;
        for _ in 0..GRACEFUL {
            assert_eq!(c.plan_kill(now, RETRY_US, GRACEFUL), Some(libc::SIGTERM));
            c.record_kill(now);
            now += 1_000_000;
        }
        // the seventh signal is SIGKILL, and stays SIGKILL
        assert_eq!(c.plan_kill(now, RETRY_US, GRACEFUL), Some(libc::SIGKILL));
        c.record_kill(now);
        now += 1_000_000;
        assert_eq!(c.plan_kill(now, RETRY_US, GRACEFUL), Some(libc::SIGKILL));
    }

    #[test]
    fn escalation_advances_even_when_a_kill_failed() {
        // record_kill is booked unconditionally by the caller
        let mut c = cmd("sleep 60");
        c.pid = 4242;
        let mut now = 1_000_000;
        for _ in 0..GRACEFUL {
            c.record_kill(now);
            now += 1_000_000;
        }
        assert_eq!(c.num_kills_sent, GRACEFUL);
        assert_eq!(c.plan_kill(now, RETRY_US, GRACEFUL), Some(libc::SIGKILL));
    }
}
