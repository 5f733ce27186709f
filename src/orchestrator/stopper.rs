/// Graceful shutdown: soft-interrupt a running service, give it a bounded
/// window to exit on its own, then fall back to a hard kill.

use anyhow::Result;
use std::time::{Duration, Instant};

use crate::process_controller::ProcessController;

const GRACE_PERIOD: Duration = Duration::from_secs(10);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Unix: SIGTERM, then poll until the process exits or `GRACE_PERIOD`
/// elapses, then SIGKILL. Windows: `soft_interrupt` already degrades to an
/// immediate hard kill, so this resolves in one step there.
pub fn stop_service_graceful(controller: &dyn ProcessController, pid: u32) -> Result<()> {
    controller.soft_interrupt(pid)?;

    let deadline = Instant::now() + GRACE_PERIOD;
    while Instant::now() < deadline {
        if !controller.is_alive(pid) {
            return Ok(());
        }
        std::thread::sleep(POLL_INTERVAL);
    }

    if controller.is_alive(pid) {
        controller.hard_kill(pid)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    struct FakeController {
        interrupted: AtomicBool,
        killed: AtomicBool,
        dies_after_interrupt: bool,
        calls_before_death: AtomicU32,
    }

    impl ProcessController for FakeController {
        fn soft_interrupt(&self, _pid: u32) -> Result<()> {
            self.interrupted.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn hard_kill(&self, _pid: u32) -> Result<()> {
            self.killed.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn is_alive(&self, _pid: u32) -> bool {
            if !self.dies_after_interrupt {
                return true;
            }
            let calls = self.calls_before_death.fetch_add(1, Ordering::SeqCst);
            calls < 2
        }
    }

    #[test]
    fn process_that_exits_promptly_is_never_hard_killed() {
        let controller = FakeController {
            interrupted: AtomicBool::new(false),
            killed: AtomicBool::new(false),
            dies_after_interrupt: true,
            calls_before_death: AtomicU32::new(0),
        };
        stop_service_graceful(&controller, 1).unwrap();
        assert!(controller.interrupted.load(Ordering::SeqCst));
        assert!(!controller.killed.load(Ordering::SeqCst));
    }
}
