use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::Node;
use kube::api::{Patch, PatchParams, WatchParams};
use kube::core::WatchEvent;
use kube::{Api, Client};
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::{NodePredicate, NodeStore};
use crate::errors::Error;
use crate::utils::traits::node::NodeExt;
use crate::FIELD_MANAGER;

/// Server-side lifetime of a single watch request. Streams are re-established
/// from the last seen version until the caller's timeout runs out.
const WATCH_REQUEST_TIMEOUT_SECS: u32 = 290;

/// [`NodeStore`] backed by the Kubernetes API server.
pub struct KubeNodeStore {
    nodes: Api<Node>,
}

impl KubeNodeStore {
    pub fn new(client: Client) -> Self {
        KubeNodeStore {
            nodes: Api::all(client),
        }
    }

    async fn merge_patch(&self, name: &str, patch: serde_json::Value) -> Result<(), Error> {
        self.nodes
            .patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn watch_until(
        &self,
        name: &str,
        from_version: &str,
        predicate: &NodePredicate,
    ) -> Result<Node, Error> {
        let params = WatchParams::default()
            .fields(&format!("metadata.name={name}"))
            .timeout(WATCH_REQUEST_TIMEOUT_SECS);
        let mut version = from_version.to_string();

        loop {
            let mut stream = self.nodes.watch(&params, &version).await?.boxed();
            while let Some(event) = stream.try_next().await? {
                match event {
                    WatchEvent::Added(node) | WatchEvent::Modified(node) => {
                        version = node.resource_version_or_default();
                        if predicate(&node) {
                            return Ok(node);
                        }
                    }
                    WatchEvent::Deleted(_) => return Err(Error::NodeNotFound(name.to_string())),
                    WatchEvent::Bookmark(bookmark) => {
                        version = bookmark.metadata.resource_version;
                    }
                    WatchEvent::Error(response) if response.code == 410 => {
                        // Our version fell out of the server's history. The
                        // current object reflects everything we missed.
                        warn!(name, %version, "watch version expired, re-reading node");
                        let node = self.get(name).await?;
                        if predicate(&node) {
                            return Ok(node);
                        }
                        version = node.resource_version_or_default();
                        break;
                    }
                    WatchEvent::Error(response) => return Err(kube::Error::Api(response).into()),
                }
            }
            debug!(name, %version, "node watch ended, resuming");
        }
    }
}

#[async_trait]
impl NodeStore for KubeNodeStore {
    #[instrument(skip(self))]
    async fn get(&self, name: &str) -> Result<Node, Error> {
        self.nodes
            .get_opt(name)
            .await?
            .ok_or_else(|| Error::NodeNotFound(name.to_string()))
    }

    #[instrument(skip(self))]
    async fn patch_labels(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), Error> {
        self.merge_patch(name, json!({ "metadata": { "labels": labels } }))
            .await
    }

    #[instrument(skip(self))]
    async fn patch_annotations(
        &self,
        name: &str,
        annotations: &BTreeMap<String, String>,
        resource_version: Option<&str>,
    ) -> Result<(), Error> {
        let mut metadata = json!({ "annotations": annotations });
        if let Some(version) = resource_version {
            metadata["resourceVersion"] = json!(version);
        }
        self.merge_patch(name, json!({ "metadata": metadata })).await
    }

    #[instrument(skip(self))]
    async fn set_unschedulable(&self, name: &str, unschedulable: bool) -> Result<(), Error> {
        self.merge_patch(name, json!({ "spec": { "unschedulable": unschedulable } }))
            .await
    }

    #[instrument(skip(self, predicate))]
    async fn watch(
        &self,
        name: &str,
        from_version: &str,
        predicate: &NodePredicate,
        timeout: Duration,
    ) -> Result<Node, Error> {
        tokio::time::timeout(timeout, self.watch_until(name, from_version, predicate))
            .await
            .map_err(|_| Error::Timeout(format!("watch of node {name} after {timeout:?}")))?
    }
}
