use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{DeleteParams, ListParams};
use kube::{Api, Client};
use tracing::{debug, info, instrument};

use crate::errors::Error;
use crate::utils::traits::pod::PodExt;

/// Listing and deletion of the pods scheduled onto a node.
#[async_trait]
pub trait WorkloadStore: Send + Sync {
    async fn list_by_node(&self, node: &str) -> Result<Vec<Pod>, Error>;

    async fn delete(&self, namespace: &str, name: &str, grace_period_seconds: u32)
        -> Result<(), Error>;
}

pub struct KubeWorkloadStore {
    client: Client,
}

impl KubeWorkloadStore {
    pub fn new(client: Client) -> Self {
        KubeWorkloadStore { client }
    }
}

#[async_trait]
impl WorkloadStore for KubeWorkloadStore {
    #[instrument(skip(self))]
    async fn list_by_node(&self, node: &str) -> Result<Vec<Pod>, Error> {
        let pods: Api<Pod> = Api::all(self.client.clone());
        let list_params = ListParams::default().fields(&format!("spec.nodeName={node}"));
        Ok(pods.list(&list_params).await?.items)
    }

    #[instrument(skip(self))]
    async fn delete(
        &self,
        namespace: &str,
        name: &str,
        grace_period_seconds: u32,
    ) -> Result<(), Error> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let delete_params = DeleteParams {
            grace_period_seconds: Some(grace_period_seconds),
            ..DeleteParams::default()
        };
        pods.delete(name, &delete_params).await?;
        Ok(())
    }
}

/// Whether deleting `pod` moves its work elsewhere.
///
/// Mirror pods and bare pods have no controller to recreate them on another
/// node. Pods in `reserved_namespace` are co-located control plane components
/// and are left alone.
pub fn evictable(pod: &Pod, reserved_namespace: &str) -> bool {
    if pod.is_mirror() {
        debug!(pod = pod.name_or_empty(), "skipping mirror pod");
        return false;
    }
    if !pod.has_controller() {
        debug!(pod = pod.name_or_empty(), "skipping pod without controller");
        return false;
    }
    if pod.namespace_or_default() == reserved_namespace {
        debug!(pod = pod.name_or_empty(), "skipping pod in reserved namespace");
        return false;
    }
    true
}

/// The pods on `node` that must be deleted before it reboots, in the order
/// the API server returned them.
#[instrument(skip(store))]
pub async fn pods_for_deletion(
    store: &dyn WorkloadStore,
    node: &str,
    reserved_namespace: &str,
) -> Result<Vec<Pod>, Error> {
    let pods: Vec<Pod> = store
        .list_by_node(node)
        .await?
        .into_iter()
        .filter(|pod| evictable(pod, reserved_namespace))
        .collect();
    info!(node, count = pods.len(), "selected pods for deletion");
    Ok(pods)
}
