//! In-memory stand-ins for the collaborators, shared by the unit tests.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{oneshot, watch};

use crate::drain::WorkloadStore;
use crate::errors::Error;
use crate::host::reboot::RebootSink;
use crate::host::update_engine::{Operation, RebootNeededSubscription, Status, UpdateEngine};
use crate::labels_and_annotations::MIRROR_POD_ANNOTATION;
use crate::node::{NodePredicate, NodeStore};
use crate::utils::traits::pod::PodExt;

/// Something a collaborator was asked to do, in the order it happened.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    Label(String, String),
    Annotation(String, String),
    Unschedulable(bool),
    /// A watch returned a node matching its predicate.
    Observed,
    Delete(String),
    Reboot,
}

pub type Journal = Arc<Mutex<Vec<Event>>>;

pub fn node_with(name: &str, labels: &[(&str, &str)], annotations: &[(&str, &str)]) -> Node {
    let labels: BTreeMap<_, _> = labels.iter().copied().collect();
    let annotations: BTreeMap<_, _> = annotations.iter().copied().collect();
    serde_json::from_value(json!({
        "metadata": {
            "name": name,
            "resourceVersion": "1",
            "labels": labels,
            "annotations": annotations,
        },
        "spec": {},
    }))
    .unwrap()
}

fn pod(namespace: &str, name: &str, node: &str, metadata: serde_json::Value) -> Pod {
    let mut pod: Pod = serde_json::from_value(json!({
        "metadata": metadata,
        "spec": { "nodeName": node, "containers": [] },
    }))
    .unwrap();
    pod.metadata.namespace = Some(namespace.to_string());
    pod.metadata.name = Some(name.to_string());
    pod
}

pub fn owned_pod(namespace: &str, name: &str, node: &str) -> Pod {
    pod(
        namespace,
        name,
        node,
        json!({
            "ownerReferences": [{
                "apiVersion": "apps/v1",
                "kind": "ReplicaSet",
                "name": format!("{name}-rs"),
                "uid": format!("{name}-uid"),
                "controller": true,
            }],
        }),
    )
}

pub fn bare_pod(namespace: &str, name: &str, node: &str) -> Pod {
    pod(namespace, name, node, json!({}))
}

/// Static pods are owned by their node and carry the mirror annotation.
pub fn mirror_pod(namespace: &str, name: &str, node: &str) -> Pod {
    pod(
        namespace,
        name,
        node,
        json!({
            "annotations": { MIRROR_POD_ANNOTATION: "abc" },
            "ownerReferences": [{
                "apiVersion": "v1",
                "kind": "Node",
                "name": node,
                "uid": "node-uid",
                "controller": true,
            }],
        }),
    )
}

pub fn conflict() -> Error {
    Error::Kube(kube::Error::Api(kube::core::ErrorResponse {
        status: String::from("Failure"),
        message: String::from("the object has been modified"),
        reason: String::from("Conflict"),
        code: 409,
    }))
}

type NodeHook = Box<dyn FnOnce(&mut Node) + Send>;

struct NodeState {
    /// Every version the node went through; the last one is current.
    history: Vec<Node>,
    before_conditional_write: Option<NodeHook>,
    /// Another writer bumps the node before every conditional write.
    always_conflict: bool,
    on_watch: Option<NodeHook>,
}

/// A single node with versioned history, so watches can resume from any
/// version like they do against the API server.
pub struct FakeNodeStore {
    state: Mutex<NodeState>,
    version: watch::Sender<usize>,
    journal: Journal,
}

impl FakeNodeStore {
    pub fn new(node: Node) -> Self {
        Self::with_journal(node, Journal::default())
    }

    pub fn with_journal(node: Node, journal: Journal) -> Self {
        FakeNodeStore {
            state: Mutex::new(NodeState {
                history: vec![node],
                before_conditional_write: None,
                always_conflict: false,
                on_watch: None,
            }),
            version: watch::channel(1).0,
            journal,
        }
    }

    pub fn node(&self) -> Node {
        self.state.lock().unwrap().history.last().cloned().unwrap()
    }

    /// Apply a write as some other party, producing a new version.
    pub fn external_write(&self, change: impl FnOnce(&mut Node)) {
        let mut state = self.state.lock().unwrap();
        Self::commit(&mut state, &self.version, change);
    }

    /// Set a label as another party, e.g. the operator granting a reboot.
    pub fn set_external_label(&self, key: &str, value: &str) {
        self.external_write(|node| {
            node.metadata
                .labels
                .get_or_insert_with(Default::default)
                .insert(key.to_string(), value.to_string());
        });
        self.journal
            .lock()
            .unwrap()
            .push(Event::Label(key.to_string(), value.to_string()));
    }

    /// Run `change` as a concurrent write right before the next write that
    /// carries a resourceVersion precondition.
    pub fn before_next_conditional_write(&self, change: impl FnOnce(&mut Node) + Send + 'static) {
        self.state.lock().unwrap().before_conditional_write = Some(Box::new(change));
    }

    /// Make every conditional write lose the race against another writer.
    pub fn conflict_on_every_conditional_write(&self) {
        self.state.lock().unwrap().always_conflict = true;
    }

    /// Number of versions the node went through, the initial one included.
    pub fn versions(&self) -> usize {
        self.state.lock().unwrap().history.len()
    }

    /// Run `change` as a concurrent write after the watcher read its start
    /// version but before the watch is established.
    pub fn on_next_watch(&self, change: impl FnOnce(&mut Node) + Send + 'static) {
        self.state.lock().unwrap().on_watch = Some(Box::new(change));
    }

    fn commit(
        state: &mut NodeState,
        version: &watch::Sender<usize>,
        change: impl FnOnce(&mut Node),
    ) {
        let mut node = state.history.last().cloned().unwrap();
        change(&mut node);
        let next = state.history.len() + 1;
        node.metadata.resource_version = Some(next.to_string());
        state.history.push(node);
        version.send_replace(next);
    }

    fn write(
        &self,
        name: &str,
        events: Vec<Event>,
        change: impl FnOnce(&mut Node),
    ) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        if state.history.last().and_then(|n| n.metadata.name.as_deref()) != Some(name) {
            return Err(Error::NodeNotFound(name.to_string()));
        }
        Self::commit(&mut state, &self.version, change);
        self.journal.lock().unwrap().extend(events);
        Ok(())
    }

    fn first_match_after(&self, from: usize, predicate: &NodePredicate) -> Option<Node> {
        let state = self.state.lock().unwrap();
        state.history.iter().skip(from).find(|n| predicate(*n)).cloned()
    }
}

#[async_trait]
impl NodeStore for FakeNodeStore {
    async fn get(&self, name: &str) -> Result<Node, Error> {
        let node = self.node();
        if node.metadata.name.as_deref() != Some(name) {
            return Err(Error::NodeNotFound(name.to_string()));
        }
        Ok(node)
    }

    async fn patch_labels(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), Error> {
        let events = labels
            .iter()
            .map(|(k, v)| Event::Label(k.clone(), v.clone()))
            .collect();
        self.write(name, events, |node| {
            node.metadata
                .labels
                .get_or_insert_with(Default::default)
                .extend(labels.clone());
        })
    }

    async fn patch_annotations(
        &self,
        name: &str,
        annotations: &BTreeMap<String, String>,
        resource_version: Option<&str>,
    ) -> Result<(), Error> {
        if let Some(expected) = resource_version {
            let mut state = self.state.lock().unwrap();
            if let Some(hook) = state.before_conditional_write.take() {
                Self::commit(&mut state, &self.version, hook);
            }
            if state.always_conflict {
                Self::commit(&mut state, &self.version, |_| {});
            }
            let current = state.history.last().and_then(|n| n.metadata.resource_version.clone());
            if current.as_deref() != Some(expected) {
                return Err(conflict());
            }
        }
        let events = annotations
            .iter()
            .map(|(k, v)| Event::Annotation(k.clone(), v.clone()))
            .collect();
        self.write(name, events, |node| {
            node.metadata
                .annotations
                .get_or_insert_with(Default::default)
                .extend(annotations.clone());
        })
    }

    async fn set_unschedulable(&self, name: &str, unschedulable: bool) -> Result<(), Error> {
        self.write(name, vec![Event::Unschedulable(unschedulable)], |node| {
            node.spec.get_or_insert_with(Default::default).unschedulable = Some(unschedulable);
        })
    }

    async fn watch(
        &self,
        name: &str,
        from_version: &str,
        predicate: &NodePredicate,
        timeout: Duration,
    ) -> Result<Node, Error> {
        let hook = self.state.lock().unwrap().on_watch.take();
        if let Some(hook) = hook {
            self.external_write(hook);
        }
        let from: usize = from_version.parse().unwrap();
        let mut version = self.version.subscribe();

        let found = tokio::time::timeout(timeout, async {
            loop {
                if let Some(node) = self.first_match_after(from, predicate) {
                    return node;
                }
                if version.changed().await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
        })
        .await
        .map_err(|_| Error::Timeout(format!("watch of node {name}")))?;

        self.journal.lock().unwrap().push(Event::Observed);
        Ok(found)
    }
}

pub struct FakeWorkloadStore {
    pods: Mutex<Vec<Pod>>,
    fail_on: Option<String>,
    journal: Journal,
}

impl FakeWorkloadStore {
    pub fn new(pods: Vec<Pod>) -> Self {
        Self::with_journal(pods, Journal::default())
    }

    pub fn with_journal(pods: Vec<Pod>, journal: Journal) -> Self {
        FakeWorkloadStore {
            pods: Mutex::new(pods),
            fail_on: None,
            journal,
        }
    }

    /// Make deletion of the pod called `name` fail.
    pub fn failing_on(mut self, name: &str) -> Self {
        self.fail_on = Some(name.to_string());
        self
    }

    pub fn remaining(&self) -> Vec<String> {
        self.pods
            .lock()
            .unwrap()
            .iter()
            .map(|p| p.name_or_empty().to_string())
            .collect()
    }
}

#[async_trait]
impl WorkloadStore for FakeWorkloadStore {
    async fn list_by_node(&self, node: &str) -> Result<Vec<Pod>, Error> {
        Ok(self
            .pods
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.spec.as_ref().and_then(|s| s.node_name.as_deref()) == Some(node))
            .cloned()
            .collect())
    }

    async fn delete(
        &self,
        namespace: &str,
        name: &str,
        _grace_period_seconds: u32,
    ) -> Result<(), Error> {
        if self.fail_on.as_deref() == Some(name) {
            return Err(Error::Io(std::io::Error::other("eviction refused")));
        }
        self.pods
            .lock()
            .unwrap()
            .retain(|p| !(p.name_or_empty() == name && p.namespace_or_default() == namespace));
        self.journal
            .lock()
            .unwrap()
            .push(Event::Delete(format!("{namespace}/{name}")));
        Ok(())
    }
}

pub fn status(operation: Operation) -> Status {
    Status {
        current_operation: operation,
        last_checked_time: 1486069614,
        new_version: String::from("1298.1.0"),
        progress: 0.0,
        new_size: 0,
    }
}

pub struct FakeUpdateEngine {
    status: Mutex<Status>,
    pending: Mutex<Option<oneshot::Sender<Result<Status, Error>>>>,
    subscribed: AtomicBool,
    cancelled: Arc<AtomicBool>,
}

impl FakeUpdateEngine {
    pub fn new(operation: Operation) -> Self {
        FakeUpdateEngine {
            status: Mutex::new(status(operation)),
            pending: Mutex::new(None),
            subscribed: AtomicBool::new(false),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// update_engine finished staging an update.
    pub fn finish_update(&self) {
        let status = status(Operation::UpdatedNeedReboot);
        *self.status.lock().unwrap() = status.clone();
        if let Some(sender) = self.pending.lock().unwrap().take() {
            let _ = sender.send(Ok(status));
        }
    }

    pub fn subscribed(&self) -> bool {
        self.subscribed.load(Ordering::SeqCst)
    }

    pub fn cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UpdateEngine for FakeUpdateEngine {
    async fn get_status(&self) -> Result<Status, Error> {
        Ok(self.status.lock().unwrap().clone())
    }

    async fn subscribe_reboot_needed(&self) -> Result<RebootNeededSubscription, Error> {
        let (sender, receiver) = oneshot::channel();
        *self.pending.lock().unwrap() = Some(sender);
        self.subscribed.store(true, Ordering::SeqCst);
        let cancelled = self.cancelled.clone();
        Ok(RebootNeededSubscription::new(receiver, move || {
            cancelled.store(true, Ordering::SeqCst)
        }))
    }
}

pub struct FakeRebootSink {
    journal: Journal,
}

impl FakeRebootSink {
    pub fn new(journal: Journal) -> Self {
        FakeRebootSink { journal }
    }
}

#[async_trait]
impl RebootSink for FakeRebootSink {
    async fn reboot(&self, _interactive: bool) {
        self.journal.lock().unwrap().push(Event::Reboot);
    }
}
