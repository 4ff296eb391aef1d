use async_trait::async_trait;
use tracing::{error, info, instrument};

use super::command;
use crate::errors::Error;

const SYSTEMCTL: &str = "/usr/bin/systemctl";

/// Something that can restart the host.
#[async_trait]
pub trait RebootSink: Send + Sync {
    /// Request a reboot. Failures are logged, not returned: the caller has
    /// nothing left to do but wait for the machine to go down.
    async fn reboot(&self, interactive: bool);
}

/// Reboots through systemd-logind via `systemctl`.
pub struct SystemdReboot {
    executable: String,
}

impl SystemdReboot {
    /// Fails when systemctl cannot be run at all.
    #[instrument]
    pub async fn connect() -> Result<Self, Error> {
        let version = command(SYSTEMCTL, &["--version"]).await?;
        info!(version = version.lines().next().unwrap_or_default(), "found systemd");
        Ok(SystemdReboot {
            executable: String::from(SYSTEMCTL),
        })
    }
}

#[async_trait]
impl RebootSink for SystemdReboot {
    #[instrument(skip(self))]
    async fn reboot(&self, interactive: bool) {
        let mut args = vec!["reboot"];
        if !interactive {
            args.push("--no-ask-password");
        }
        if let Err(e) = command(&self.executable, &args).await {
            error!("reboot request failed: {}", e);
        }
    }
}
