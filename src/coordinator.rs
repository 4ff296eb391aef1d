//! The per-node reboot protocol.
//!
//! A run resets the coordination labels, waits for update_engine to ask for a
//! reboot, asks the operator for permission through `reboot-needed`, waits for
//! `ok-to-reboot`, drains the node and finally reboots it. Every failure aborts
//! the run; the process supervisor restarts it from the reset step.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::config::Config;
use crate::drain::{WorkloadStore, pods_for_deletion};
use crate::errors::Error;
use crate::host::reboot::RebootSink;
use crate::host::release::HostIdentity;
use crate::host::update_engine::{Status, UpdateEngine};
use crate::labels_and_annotations::*;
use crate::node::{
    NodeStore, set_annotations, set_labels, set_schedulable, set_update_status, string_map,
};
use crate::state::{Role, UpdateStatus};
use crate::utils::traits::node::NodeExt;
use crate::utils::traits::pod::PodExt;

/// Handles to everything outside the process the coordinator talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub nodes: Arc<dyn NodeStore>,
    pub workloads: Arc<dyn WorkloadStore>,
    pub update_engine: Arc<dyn UpdateEngine>,
    pub reboot_sink: Arc<dyn RebootSink>,
}

pub struct Coordinator {
    config: Config,
    identity: HostIdentity,
    nodes: Arc<dyn NodeStore>,
    workloads: Arc<dyn WorkloadStore>,
    update_engine: Arc<dyn UpdateEngine>,
    reboot_sink: Arc<dyn RebootSink>,
}

fn status_annotations(status: &Status) -> BTreeMap<String, String> {
    string_map([
        (STATUS_ANNOTATION, status.current_operation.to_string()),
        (LAST_CHECKED_TIME_ANNOTATION, status.last_checked_time.to_string()),
        (NEW_VERSION_ANNOTATION, status.new_version.clone()),
    ])
}

impl Coordinator {
    pub fn new(config: Config, identity: HostIdentity, collaborators: Collaborators) -> Self {
        Coordinator {
            config,
            identity,
            nodes: collaborators.nodes,
            workloads: collaborators.workloads,
            update_engine: collaborators.update_engine,
            reboot_sink: collaborators.reboot_sink,
        }
    }

    fn node_name(&self) -> &str {
        &self.config.node_name
    }

    /// Run the whole protocol. Only returns on error; on success the host
    /// reboots underneath us.
    pub async fn run(&self) -> Result<Infallible, Error> {
        self.prepare().await?;
        Ok(self.reboot().await)
    }

    /// Everything up to, but not including, the reboot itself.
    #[instrument(skip(self), fields(node = %self.config.node_name))]
    pub async fn prepare(&self) -> Result<(), Error> {
        self.reset().await?;
        let status = self.wait_for_reboot_signal().await?;
        self.announce(&status).await?;
        self.wait_for_approval().await?;
        self.mark_in_progress().await?;
        self.drain().await
    }

    /// Put the node back into its idle, schedulable state. Safe to repeat.
    #[instrument(skip(self), fields(node = %self.config.node_name))]
    pub async fn reset(&self) -> Result<(), Error> {
        let node = self.node_name();
        set_labels(
            self.nodes.as_ref(),
            node,
            string_map([
                (REBOOT_IN_PROGRESS_LABEL, FALSE),
                (REBOOT_NEEDED_LABEL, FALSE),
                (ID_LABEL, self.identity.id.as_str()),
                (GROUP_LABEL, self.identity.group.as_str()),
                (VERSION_LABEL, self.identity.version.as_str()),
            ]),
        )
        .await?;

        info!(node, "marking node as schedulable");
        set_schedulable(self.nodes.as_ref(), node, true).await?;

        let status = self.update_engine.get_status().await?;
        set_annotations(self.nodes.as_ref(), node, status_annotations(&status)).await?;

        match self.nodes.get(node).await?.update_status()? {
            // We are back from the reboot the last run started.
            Some(UpdateStatus::UpdateInProgress) | None => {
                set_update_status(
                    self.nodes.as_ref(),
                    node,
                    Role::Agent,
                    UpdateStatus::NoUpdateAvailable,
                )
                .await
            }
            Some(current) => {
                debug!(node, %current, "leaving update status as is");
                Ok(())
            }
        }
    }

    /// Block until update_engine has staged an update that needs a reboot.
    #[instrument(skip(self), fields(node = %self.config.node_name))]
    pub async fn wait_for_reboot_signal(&self) -> Result<Status, Error> {
        let status = self.update_engine.get_status().await?;
        if status.reboot_needed() {
            info!(version = %status.new_version, "update_engine already needs a reboot");
            return Ok(status);
        }

        info!("waiting for reboot signal from update_engine");
        let mut subscription = self.update_engine.subscribe_reboot_needed().await?;
        let status = subscription.wait().await;
        subscription.cancel();
        let status = status?;
        info!(version = %status.new_version, "update_engine needs a reboot");
        Ok(status)
    }

    /// Tell the operator we want to reboot.
    #[instrument(skip(self, status), fields(node = %self.config.node_name))]
    pub async fn announce(&self, status: &Status) -> Result<(), Error> {
        let node = self.node_name();
        set_annotations(self.nodes.as_ref(), node, status_annotations(status)).await?;

        if self.nodes.get(node).await?.update_status()? == Some(UpdateStatus::NoUpdateAvailable) {
            set_update_status(
                self.nodes.as_ref(),
                node,
                Role::Agent,
                UpdateStatus::UpdateAvailable,
            )
            .await?;
        }

        set_labels(self.nodes.as_ref(), node, string_map([(REBOOT_NEEDED_LABEL, TRUE)])).await
    }

    /// Wait for the operator to set `ok-to-reboot`.
    ///
    /// The watch starts at the version we read, so an approval landing between
    /// the read and the watch being established is still seen.
    #[instrument(skip(self), fields(node = %self.config.node_name))]
    pub async fn wait_for_approval(&self) -> Result<(), Error> {
        let node = self.node_name();
        let current = self.nodes.get(node).await?;
        // An approval already on the node is taken as is, including one left
        // over from the previous cycle. Clearing it after a reboot is the
        // operator's job; the watch below only covers later approvals.
        if current.label_is_true(OK_TO_REBOOT_LABEL) {
            info!(node, "reboot already approved");
            return Ok(());
        }

        info!(node, timeout = ?self.config.approval_timeout, "waiting for ok-to-reboot");
        let version = current.resource_version_or_default();
        let approved = |n: &k8s_openapi::api::core::v1::Node| n.label_is_true(OK_TO_REBOOT_LABEL);
        match self
            .nodes
            .watch(node, &version, &approved, self.config.approval_timeout)
            .await
        {
            Ok(approval) => {
                info!(node, version = ?approval.metadata.resource_version, "reboot approved");
                Ok(())
            }
            Err(Error::Timeout(_)) => Err(Error::Timeout(format!(
                "label {OK_TO_REBOOT_LABEL} on node {node} within {:?}",
                self.config.approval_timeout
            ))),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self), fields(node = %self.config.node_name))]
    pub async fn mark_in_progress(&self) -> Result<(), Error> {
        let node = self.node_name();
        // Cordon first so reboot-in-progress=true always implies unschedulable.
        set_schedulable(self.nodes.as_ref(), node, false).await?;
        set_labels(self.nodes.as_ref(), node, string_map([(REBOOT_IN_PROGRESS_LABEL, TRUE)]))
            .await?;

        if self.nodes.get(node).await?.update_status()? == Some(UpdateStatus::UpdateExpected) {
            set_update_status(
                self.nodes.as_ref(),
                node,
                Role::Agent,
                UpdateStatus::UpdateInProgress,
            )
            .await?;
        }
        Ok(())
    }

    /// Cordon the node and delete every evictable pod, one at a time. The
    /// first failed deletion aborts the drain.
    #[instrument(skip(self), fields(node = %self.config.node_name))]
    pub async fn drain(&self) -> Result<(), Error> {
        let node = self.node_name();
        info!(node, "marking node as unschedulable");
        set_schedulable(self.nodes.as_ref(), node, false).await?;

        let pods = pods_for_deletion(
            self.workloads.as_ref(),
            node,
            &self.config.reserved_namespace,
        )
        .await?;

        info!(node, count = pods.len(), "deleting pods");
        let grace_period = self.config.grace_period_seconds();
        for pod in &pods {
            let namespace = pod.namespace_or_default();
            let name = pod.name_or_empty();
            info!(namespace, name, grace_period, "terminating pod");
            self.workloads
                .delete(namespace, name, grace_period)
                .await
                .map_err(|e| Error::DeleteWorkload {
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                    source: Box::new(e),
                })?;
        }
        info!(node, "node drained");
        Ok(())
    }

    /// Ask the host to reboot and wait for it to take us down.
    #[instrument(skip(self), fields(node = %self.config.node_name))]
    pub async fn reboot(&self) -> Infallible {
        info!(interactive = self.config.interactive_reboot, "rebooting");
        self.reboot_sink.reboot(self.config.interactive_reboot).await;
        std::future::pending().await
    }
}
