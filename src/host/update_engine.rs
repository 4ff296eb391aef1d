//! Status of the local update mechanism, as reported by update_engine.

use async_trait::async_trait;
use std::fmt::{Display, Formatter};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, instrument, warn};

use super::{command, parse_key_values};
use crate::errors::Error;

const UPDATE_ENGINE_CLIENT: &str = "/usr/bin/update_engine_client";

/// update_engine's `CURRENT_OP`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operation {
    Idle,
    CheckingForUpdate,
    UpdateAvailable,
    Downloading,
    Verifying,
    Finalizing,
    UpdatedNeedReboot,
    ReportingErrorEvent,
    Unknown(String),
}

impl Operation {
    pub fn parse(s: &str) -> Operation {
        match s {
            "UPDATE_STATUS_IDLE" => Operation::Idle,
            "UPDATE_STATUS_CHECKING_FOR_UPDATE" => Operation::CheckingForUpdate,
            "UPDATE_STATUS_UPDATE_AVAILABLE" => Operation::UpdateAvailable,
            "UPDATE_STATUS_DOWNLOADING" => Operation::Downloading,
            "UPDATE_STATUS_VERIFYING" => Operation::Verifying,
            "UPDATE_STATUS_FINALIZING" => Operation::Finalizing,
            "UPDATE_STATUS_UPDATED_NEED_REBOOT" => Operation::UpdatedNeedReboot,
            "UPDATE_STATUS_REPORTING_ERROR_EVENT" => Operation::ReportingErrorEvent,
            other => Operation::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Operation::Idle => "UPDATE_STATUS_IDLE",
            Operation::CheckingForUpdate => "UPDATE_STATUS_CHECKING_FOR_UPDATE",
            Operation::UpdateAvailable => "UPDATE_STATUS_UPDATE_AVAILABLE",
            Operation::Downloading => "UPDATE_STATUS_DOWNLOADING",
            Operation::Verifying => "UPDATE_STATUS_VERIFYING",
            Operation::Finalizing => "UPDATE_STATUS_FINALIZING",
            Operation::UpdatedNeedReboot => "UPDATE_STATUS_UPDATED_NEED_REBOOT",
            Operation::ReportingErrorEvent => "UPDATE_STATUS_REPORTING_ERROR_EVENT",
            Operation::Unknown(other) => other,
        }
    }
}

impl Display for Operation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Status {
    pub current_operation: Operation,
    /// Unix timestamp, 0 if no check has happened yet.
    pub last_checked_time: i64,
    pub new_version: String,
    pub progress: f64,
    pub new_size: i64,
}

impl Status {
    pub fn reboot_needed(&self) -> bool {
        self.current_operation == Operation::UpdatedNeedReboot
    }

    /// Parse the output of `update_engine_client -status`.
    pub fn parse(output: &str) -> Result<Status, Error> {
        let fields = parse_key_values(output);
        let field = |key: &str| {
            fields
                .get(key)
                .map(String::as_str)
                .ok_or_else(|| Error::UpdateEngine(format!("status output lacks {key}")))
        };
        let number = |key: &str| -> Result<f64, Error> {
            field(key)?
                .parse()
                .map_err(|_| Error::UpdateEngine(format!("{key} is not a number")))
        };

        Ok(Status {
            current_operation: Operation::parse(field("CURRENT_OP")?),
            last_checked_time: number("LAST_CHECKED_TIME")? as i64,
            new_version: field("NEW_VERSION")?.to_string(),
            progress: fields
                .get("PROGRESS")
                .and_then(|p| p.parse().ok())
                .unwrap_or_default(),
            new_size: fields
                .get("NEW_SIZE")
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
        })
    }
}

/// A pending, single-shot "reboot needed" notification.
///
/// The producer is cancelled when the subscription is resolved, cancelled
/// explicitly, or dropped, whichever comes first.
pub struct RebootNeededSubscription {
    receiver: Option<oneshot::Receiver<Result<Status, Error>>>,
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl RebootNeededSubscription {
    pub fn new(
        receiver: oneshot::Receiver<Result<Status, Error>>,
        cancel: impl FnOnce() + Send + 'static,
    ) -> Self {
        RebootNeededSubscription {
            receiver: Some(receiver),
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Resolve once update_engine reports that a reboot is needed.
    pub async fn wait(&mut self) -> Result<Status, Error> {
        let receiver = self.receiver.take().ok_or(Error::SubscriptionClosed)?;
        let result = receiver.await.map_err(|_| Error::SubscriptionClosed);
        self.cancel();
        result?
    }

    pub fn cancel(&mut self) {
        self.receiver = None;
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for RebootNeededSubscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[async_trait]
pub trait UpdateEngine: Send + Sync {
    async fn get_status(&self) -> Result<Status, Error>;

    async fn subscribe_reboot_needed(&self) -> Result<RebootNeededSubscription, Error>;
}

/// [`UpdateEngine`] talking to update_engine through `update_engine_client`.
#[derive(Clone)]
pub struct UpdateEngineClient {
    executable: String,
    poll_interval: Duration,
}

impl UpdateEngineClient {
    /// Fails unless update_engine answers a status request.
    #[instrument]
    pub async fn connect(poll_interval: Duration) -> Result<Self, Error> {
        let client = UpdateEngineClient {
            executable: String::from(UPDATE_ENGINE_CLIENT),
            poll_interval,
        };
        let status = client.get_status().await?;
        info!(operation = %status.current_operation, "connected to update_engine");
        Ok(client)
    }
}

#[async_trait]
impl UpdateEngine for UpdateEngineClient {
    async fn get_status(&self) -> Result<Status, Error> {
        Status::parse(&command(&self.executable, &["-status"]).await?)
    }

    #[instrument(skip(self))]
    async fn subscribe_reboot_needed(&self) -> Result<RebootNeededSubscription, Error> {
        let (sender, receiver) = oneshot::channel();
        let client = self.clone();
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(client.poll_interval);
            loop {
                interval.tick().await;
                match client.get_status().await {
                    Ok(status) if status.reboot_needed() => {
                        info!(
                            version = %status.new_version,
                            size = status.new_size,
                            "update staged"
                        );
                        let _ = sender.send(Ok(status));
                        return;
                    }
                    Ok(status) => debug!(
                        operation = %status.current_operation,
                        progress = status.progress,
                        "no reboot needed yet"
                    ),
                    Err(e) => {
                        warn!("polling update_engine failed: {}", e);
                        let _ = sender.send(Err(e));
                        return;
                    }
                }
            }
        });
        Ok(RebootNeededSubscription::new(receiver, move || task.abort()))
    }
}
