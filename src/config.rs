use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::Error;

pub const DEFAULT_APPROVAL_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(30);
pub const DEFAULT_UPDATE_POLL_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_RESERVED_NAMESPACE: &str = "kube-system";

#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// Name of the node this agent runs on, normally injected through the
    /// downward API.
    pub node_name: String,
    /// How long to wait for the operator's `ok-to-reboot`.
    pub approval_timeout: Duration,
    /// Termination grace period given to each deleted pod.
    pub grace_period: Duration,
    /// Pods in this namespace are never deleted.
    pub reserved_namespace: String,
    pub interactive_reboot: bool,
    pub update_poll_interval: Duration,
    /// Where the host filesystem is visible, for os-release and update.conf.
    pub host_root: PathBuf,
}

impl Config {
    pub fn new(node_name: impl Into<String>) -> Self {
        Config {
            node_name: node_name.into(),
            approval_timeout: DEFAULT_APPROVAL_TIMEOUT,
            grace_period: DEFAULT_GRACE_PERIOD,
            reserved_namespace: String::from(DEFAULT_RESERVED_NAMESPACE),
            interactive_reboot: false,
            update_poll_interval: DEFAULT_UPDATE_POLL_INTERVAL,
            host_root: PathBuf::from("/"),
        }
    }

    pub fn from_env() -> Result<Self, Error> {
        Self::from_vars(&std::env::vars().collect())
    }

    fn from_vars(vars: &HashMap<String, String>) -> Result<Self, Error> {
        let node_name = vars
            .get("NODE_NAME")
            .filter(|name| !name.is_empty())
            .ok_or_else(|| Error::Config(String::from("NODE_NAME must be set")))?;
        let mut config = Config::new(node_name.as_str());

        let duration = |key: &str| {
            vars.get(key)
                .map(|v| humanize_rs::duration::parse(v))
                .transpose()
        };
        if let Some(timeout) = duration("REBOOT_AGENT_APPROVAL_TIMEOUT")? {
            config.approval_timeout = timeout;
        }
        if let Some(grace_period) = duration("REBOOT_AGENT_GRACE_PERIOD")? {
            config.grace_period = grace_period;
        }
        if let Some(interval) = duration("REBOOT_AGENT_UPDATE_POLL_INTERVAL")? {
            config.update_poll_interval = interval;
        }
        if let Some(namespace) = vars.get("REBOOT_AGENT_RESERVED_NAMESPACE") {
            config.reserved_namespace = namespace.clone();
        }
        if let Some(interactive) = vars.get("REBOOT_AGENT_INTERACTIVE_REBOOT") {
            config.interactive_reboot = interactive.parse().map_err(|_| {
                Error::Config(format!(
                    "REBOOT_AGENT_INTERACTIVE_REBOOT must be true or false, got {interactive:?}"
                ))
            })?;
        }
        if let Some(root) = vars.get("REBOOT_AGENT_HOST_ROOT") {
            config.host_root = PathBuf::from(root);
        }
        Ok(config)
    }

    pub fn grace_period_seconds(&self) -> u32 {
        u32::try_from(self.grace_period.as_secs()).unwrap_or(u32::MAX)
    }
}
