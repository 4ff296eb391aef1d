use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::errors::Error;
use crate::labels_and_annotations::UPDATE_STATUS_ANNOTATION;
use crate::state::{Role, UpdateStatus, check_transition};
use crate::utils::traits::node::NodeExt;

mod api;

pub use api::KubeNodeStore;

/// How many times a conditional write is re-read and re-validated after the
/// node changed underneath it.
pub const MAX_CONFLICT_RETRIES: usize = 5;

pub type NodePredicate = dyn Fn(&Node) -> bool + Send + Sync;

/// Access to the metadata of cluster nodes.
///
/// All writes are merge patches touching only the given keys, so concurrent
/// writers of unrelated keys are never clobbered.
#[async_trait]
pub trait NodeStore: Send + Sync {
    async fn get(&self, name: &str) -> Result<Node, Error>;

    async fn patch_labels(&self, name: &str, labels: &BTreeMap<String, String>)
        -> Result<(), Error>;

    /// With `resource_version` set, the write only succeeds if the node has
    /// not changed since that version; otherwise a 409 conflict is returned.
    async fn patch_annotations(
        &self,
        name: &str,
        annotations: &BTreeMap<String, String>,
        resource_version: Option<&str>,
    ) -> Result<(), Error>;

    async fn set_unschedulable(&self, name: &str, unschedulable: bool) -> Result<(), Error>;

    /// Block until a version of the node newer than `from_version` satisfies
    /// `predicate`, returning that version. Fails with [`Error::Timeout`]
    /// once `timeout` has elapsed.
    async fn watch(
        &self,
        name: &str,
        from_version: &str,
        predicate: &NodePredicate,
        timeout: Duration,
    ) -> Result<Node, Error>;
}

pub fn string_map<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> BTreeMap<String, String>
where
    K: Into<String>,
    V: Into<String>,
{
    entries
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

#[instrument(skip(store))]
pub async fn set_labels(
    store: &dyn NodeStore,
    node: &str,
    labels: BTreeMap<String, String>,
) -> Result<(), Error> {
    for (key, value) in &labels {
        info!(node, %key, %value, "setting node label");
    }
    store.patch_labels(node, &labels).await
}

#[instrument(skip(store))]
pub async fn set_annotations(
    store: &dyn NodeStore,
    node: &str,
    annotations: BTreeMap<String, String>,
) -> Result<(), Error> {
    for (key, value) in &annotations {
        info!(node, %key, %value, "setting node annotation");
    }
    store.patch_annotations(node, &annotations, None).await
}

#[instrument(skip(store))]
pub async fn set_schedulable(
    store: &dyn NodeStore,
    node: &str,
    schedulable: bool,
) -> Result<(), Error> {
    info!(node, schedulable, "setting node schedulability");
    store.set_unschedulable(node, !schedulable).await
}

/// Move the `update-status` annotation to `to` on behalf of `role`.
///
/// The current value is validated against the role's transition table and the
/// write is conditioned on the version it was read at. If another writer got
/// there first the node is re-read and the move re-validated; a move that is
/// no longer legal surfaces as [`Error::ProtocolViolation`].
#[instrument(skip(store))]
pub async fn set_update_status(
    store: &dyn NodeStore,
    node: &str,
    role: Role,
    to: UpdateStatus,
) -> Result<(), Error> {
    for _ in 0..MAX_CONFLICT_RETRIES {
        let current = store.get(node).await?;
        let from = current.update_status()?.unwrap_or(UpdateStatus::NoUpdateAvailable);
        check_transition(role, from, to)?;

        let version = current.metadata.resource_version.as_deref();
        let annotations = string_map([(UPDATE_STATUS_ANNOTATION, to.as_str())]);
        info!(node, %role, %from, %to, key = UPDATE_STATUS_ANNOTATION, "setting update status");
        match store.patch_annotations(node, &annotations, version).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_conflict() => {
                warn!(node, %from, %to, "update status changed concurrently, re-reading");
            }
            Err(e) => return Err(e),
        }
    }
    Err(Error::Conflict(node.to_string()))
}
