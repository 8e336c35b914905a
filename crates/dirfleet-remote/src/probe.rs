//! Port reachability probes
//!
//! A probe runs on one host and checks whether a TCP port on some address
//! accepts connections. When nothing listens on a port yet, a short-lived
//! listener is started on the node so the path between the two hosts can
//! still be verified.

use crate::adapter::RemoteHost;
use crate::classify::StderrAllowList;
use crate::error::Result;
use dirfleet_core::LogLevel;
use std::time::Duration;

/// Ports the product listens on
pub const PRODUCT_PORTS: [u16; 8] = [16379, 443, 4444, 1636, 80, 8989, 7777, 30865];

/// Upper bound on polling attempts
pub const MAX_ATTEMPTS: u32 = 5;

/// Seconds the temporary listener stays up
const LISTENER_SECONDS: u32 = 20;

/// Probes run from one host
pub struct PortProbe<'a> {
    from: &'a RemoteHost,
    attempts: u32,
    interval: Duration,
}

impl<'a> PortProbe<'a> {
    pub fn new(from: &'a RemoteHost) -> Self {
        Self {
            from,
            attempts: MAX_ATTEMPTS,
            interval: Duration::from_millis(100),
        }
    }

    /// Clamped to `1..=MAX_ATTEMPTS`
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.clamp(1, MAX_ATTEMPTS);
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Prints `0` when the port accepts a connection within a second
    pub fn port_status_command(ip: &str, port: u16) -> String {
        format!(
            "timeout 1 bash -c '</dev/tcp/{}/{}' >/dev/null 2>&1; echo $?",
            ip, port
        )
    }

    /// Background listener bound to `ip:port`
    pub fn listener_command(ip: &str, port: u16) -> String {
        format!(
            "nohup python -c \"import time, socket; sock = socket.socket(socket.AF_INET, socket.SOCK_STREAM); sock.bind(('{}', {})); sock.listen(5); time.sleep({})\" >/dev/null 2>&1 &",
            ip, port, LISTENER_SECONDS
        )
    }

    /// Single probe
    pub async fn probe_port(&self, ip: &str, port: u16) -> Result<bool> {
        let output = self
            .from
            .run(
                &Self::port_status_command(ip, port),
                &StderrAllowList::standard(),
                LogLevel::Debug,
            )
            .await?;
        Ok(output.stdout.trim() == "0")
    }

    /// Probe until open or the attempts run out
    pub async fn wait_for_port(&self, ip: &str, port: u16) -> Result<bool> {
        for attempt in 1..=self.attempts {
            if self.probe_port(ip, port).await? {
                return Ok(true);
            }
            if attempt < self.attempts {
                tokio::time::sleep(self.interval).await;
            }
        }
        Ok(false)
    }

    /// Probe `ip:port`, starting a temporary listener on `listener` first
    pub async fn probe_with_listener(
        &self,
        listener: &RemoteHost,
        ip: &str,
        port: u16,
    ) -> Result<bool> {
        listener
            .run(
                &Self::listener_command(ip, port),
                &StderrAllowList::standard(),
                LogLevel::Debug,
            )
            .await?;
        self.wait_for_port(ip, port).await
    }
}
