/// Platform-specific process control: a soft interrupt first, a hard kill
/// if the process ignores it, and a liveness check used by the stale-owner
/// reaper and the orchestrator's shutdown confirmation.

use anyhow::{anyhow, Result};

pub trait ProcessController: Send + Sync {
    /// Requests the process stop cooperatively (SIGTERM on Unix). No-op
    /// equivalent on platforms without a soft-signal concept.
    fn soft_interrupt(&self, pid: u32) -> Result<()>;

    /// Forcibly terminates the process (SIGKILL on Unix, TerminateProcess
    /// on Windows).
    fn hard_kill(&self, pid: u32) -> Result<()>;

    fn is_alive(&self, pid: u32) -> bool;
}

pub fn platform_controller() -> Box<dyn ProcessController> {
    #[cfg(unix)]
    {
        Box::new(unix::UnixProcessController)
    }
    #[cfg(windows)]
    {
        Box::new(windows::WindowsProcessController)
    }
}

fn is_alive_via_sysinfo(pid: u32) -> bool {
    use sysinfo::{PidExt, System, SystemExt};
    let mut system = System::new();
    system.refresh_processes();
    system.process(sysinfo::Pid::from_u32(pid)).is_some()
}

#[cfg(unix)]
mod unix {
    use super::*;

    pub struct UnixProcessController;

    impl ProcessController for UnixProcessController {
        fn soft_interrupt(&self, pid: u32) -> Result<()> {
            let result = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
            if result != 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::NotFound {
                    return Ok(());
                }
                return Err(anyhow!("SIGTERM {} failed: {}", pid, err));
            }
            Ok(())
        }

        fn hard_kill(&self, pid: u32) -> Result<()> {
            let result = unsafe { libc::kill(pid as libc::pid_t, libc::SIGKILL) };
            if result != 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::NotFound {
                    return Ok(());
                }
                return Err(anyhow!("SIGKILL {} failed: {}", pid, err));
            }
            Ok(())
        }

        fn is_alive(&self, pid: u32) -> bool {
            is_alive_via_sysinfo(pid)
        }
    }
}

#[cfg(windows)]
mod windows {
    use super::*;

    pub struct WindowsProcessController;

    impl ProcessController for WindowsProcessController {
        // Windows has no SIGTERM equivalent reachable without injecting a
        // remote thread or attaching a console; a soft interrupt degrades to
        // an immediate hard kill rather than pretending to be graceful.
        fn soft_interrupt(&self, pid: u32) -> Result<()> {
            self.hard_kill(pid)
        }

        fn hard_kill(&self, pid: u32) -> Result<()> {
            let output = std::process::Command::new("taskkill")
                .args(["/PID", &pid.to_string(), "/F", "/T"])
                .output()
                .map_err(|e| anyhow!("failed to run taskkill: {}", e))?;
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                if stderr.contains("not found") {
                    return Ok(());
                }
                return Err(anyhow!("taskkill {} failed: {}", pid, stderr));
            }
            Ok(())
        }

        fn is_alive(&self, pid: u32) -> bool {
            is_alive_via_sysinfo(pid)
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn soft_interrupt_on_a_missing_pid_is_not_an_error() {
        let controller = platform_controller();
        // A PID this large is virtually guaranteed not to exist.
        assert!(controller.soft_interrupt(999_999).is_ok());
    }

    #[test]
    fn is_alive_reflects_the_current_process() {
        let controller = platform_controller();
        assert!(controller.is_alive(std::process::id()));
    }
}
