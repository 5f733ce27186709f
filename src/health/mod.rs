/// Polls a service's `HealthCheckProfile` until it reports healthy or the
/// configured timeout elapses, backing off between attempts.

use anyhow::{anyhow, Result};
use std::net::TcpStream;
use std::time::{Duration, Instant};

use crate::logs::LogBuffer;
use crate::runtime::{HealthCheckProfile, HealthCheckType};

const BACKOFF_MULTIPLIER: u32 = 2;
const BACKOFF_CAP: Duration = Duration::from_secs(5);

pub struct HealthChecker {
    http_client: reqwest::blocking::Client,
}

impl HealthChecker {
    pub fn new() -> Self {
        Self {
            http_client: reqwest::blocking::Client::builder()
                .timeout(Duration::from_secs(3))
                .build()
                .expect("http client builds with default TLS backend"),
        }
    }

    /// Polls until healthy or `profile.timeout` elapses, doubling the wait
    /// between attempts starting from `profile.interval`, capped at 5s.
    pub fn perform_health_check(
        &self,
        profile: &HealthCheckProfile,
        pid: Option<u32>,
        log_buffer: Option<&LogBuffer>,
    ) -> Result<()> {
        if profile.r#type == HealthCheckType::None {
            return Ok(());
        }

        let deadline = Instant::now() + profile.timeout;
        let mut wait = profile.interval;

        loop {
            if self.check_once(profile, pid, log_buffer)? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(anyhow!(
                    "health check for {:?} did not pass within {:?}",
                    profile.r#type,
                    profile.timeout
                ));
            }
            std::thread::sleep(wait.min(deadline.saturating_duration_since(Instant::now())));
            wait = (wait * BACKOFF_MULTIPLIER).min(BACKOFF_CAP);
        }
    }

    fn check_once(
        &self,
        profile: &HealthCheckProfile,
        pid: Option<u32>,
        log_buffer: Option<&LogBuffer>,
    ) -> Result<bool> {
        match profile.r#type {
            HealthCheckType::None => Ok(true),
            HealthCheckType::Http => Ok(self.check_http(profile)),
            HealthCheckType::Tcp | HealthCheckType::Port => Ok(check_tcp(profile.port)),
            HealthCheckType::Process => Ok(check_process(pid)),
            HealthCheckType::Output => Ok(check_output(profile, log_buffer)),
        }
    }

    fn check_http(&self, profile: &HealthCheckProfile) -> bool {
        let url = format!("http://127.0.0.1:{}{}", profile.port, profile.path);
        self.http_client
            .get(&url)
            .send()
            .map(|resp| resp.status().is_success())
            .unwrap_or(false)
    }
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new()
    }
}

fn check_tcp(port: u16) -> bool {
    TcpStream::connect(("127.0.0.1", port)).is_ok()
}

fn check_process(pid: Option<u32>) -> bool {
    use sysinfo::{PidExt, System, SystemExt};
    let Some(pid) = pid else { return false };
    let mut system = System::new();
    system.refresh_processes();
    system.process(sysinfo::Pid::from_u32(pid)).is_some()
}

fn check_output(profile: &HealthCheckProfile, log_buffer: Option<&LogBuffer>) -> bool {
    let (Some(pattern), Some(buffer)) = (&profile.log_match, log_buffer) else {
        return false;
    };
    buffer.contains_pattern(pattern)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn tcp_check_detects_listening_port() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(check_tcp(port));
        drop(listener);
        assert!(!check_tcp(port));
    }

    #[test]
    fn none_type_is_always_healthy() {
        let checker = HealthChecker::new();
        let profile = HealthCheckProfile {
            r#type: HealthCheckType::None,
            ..Default::default()
        };
        assert!(checker.perform_health_check(&profile, None, None).is_ok());
    }

    #[test]
    fn process_check_reflects_current_process() {
        let pid = std::process::id();
        assert!(check_process(Some(pid)));
        assert!(!check_process(Some(u32::MAX)));
    }

    #[test]
    fn output_check_requires_both_pattern_and_buffer() {
        let profile = HealthCheckProfile {
            r#type: HealthCheckType::Output,
            log_match: Some("ready".to_string()),
            ..Default::default()
        };
        assert!(!check_output(&profile, None));

        let buffer = LogBuffer::new("svc");
        buffer.push("server ready on port 3000", false);
        assert!(check_output(&profile, Some(&buffer)));
    }

    #[test]
    fn timeout_elapses_when_nothing_ever_passes() {
        let checker = HealthChecker::new();
        let profile = HealthCheckProfile {
            r#type: HealthCheckType::Tcp,
            port: 1,
            interval: Duration::from_millis(10),
            timeout: Duration::from_millis(60),
            ..Default::default()
        };
        let result = checker.perform_health_check(&profile, None, None);
        assert!(result.is_err());
    }
}
