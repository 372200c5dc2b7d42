//! Device reachability: address syntax check plus a single echo probe.

use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::debug;

/// Last observed connectivity of the configured device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectivityState {
    pub address_valid: bool,
    pub reachable: bool,
}

impl ConnectivityState {
    /// Uploads are only attempted when both halves hold.
    pub fn is_ready(&self) -> bool {
        self.address_valid && self.reachable
    }
}

static IPV4: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)(\.(25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)){3}$")
        .expect("IPv4 pattern is valid")
});

/// Strict dotted-quad check: four octets in [0,255], nothing around them.
pub fn validate_syntax(address: &str) -> bool {
    IPV4.is_match(address)
}

#[async_trait]
pub trait Prober: Send + Sync {
    /// Returns true only on an unambiguous success within `timeout`.
    async fn check_reachable(&self, address: &str, timeout: Duration) -> bool;
}

/// Probes with the system `ping` binary, one echo request.
#[derive(Debug, Default, Clone)]
pub struct PingProber;

impl PingProber {
    fn command(address: &str, timeout: Duration) -> Command {
        let mut cmd = Command::new("ping");

        if cfg!(windows) {
            cmd.args(["-n", "1", "-w"])
                .arg(timeout.as_millis().max(1).to_string());
        } else {
            // -W takes whole seconds on Linux and the BSDs
            let secs = timeout.as_secs().max(1);
            cmd.args(["-c", "1", "-W"]).arg(secs.to_string());
        }

        // Windows output is inspected, see `echo_succeeded`
        let stdout = if cfg!(windows) {
            Stdio::piped()
        } else {
            Stdio::null()
        };
        cmd.arg(address)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

/// Windows `ping` exits 0 on "Destination host unreachable" answers from a
/// router, so only an echo reply (which carries a TTL) counts there.
fn echo_succeeded(success: bool, stdout: &[u8], windows: bool) -> bool {
    success && (!windows || String::from_utf8_lossy(stdout).contains("TTL="))
}

#[async_trait]
impl Prober for PingProber {
    async fn check_reachable(&self, address: &str, timeout: Duration) -> bool {
        let mut cmd = Self::command(address, timeout);

        // ping's own deadline is coarse; the outer bound is what the loop relies on
        let bound = timeout + Duration::from_millis(500);
        match tokio::time::timeout(bound, cmd.output()).await {
            Ok(Ok(output)) => echo_succeeded(output.status.success(), &output.stdout, cfg!(windows)),
            Ok(Err(e)) => {
                debug!(address, error = %e, "Failed to run ping");
                false
            }
            Err(_) => {
                debug!(address, timeout_ms = bound.as_millis() as u64, "Ping timed out");
                false
            }
        }
    }
}

/// Syntax gate first; the network is only touched for a well-formed address.
pub async fn check(prober: &dyn Prober, address: &str, timeout: Duration) -> ConnectivityState {
    let address = address.trim();
    if !validate_syntax(address) {
        return ConnectivityState::default();
    }

    ConnectivityState {
        address_valid: true,
        reachable: prober.check_reachable(address, timeout).await,
    }
}
