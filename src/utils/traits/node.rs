use crate::errors::Error;
use crate::labels_and_annotations::{TRUE, UPDATE_STATUS_ANNOTATION};
use crate::state::UpdateStatus;
use k8s_openapi::api::core::v1::Node;

pub trait NodeExt {
    fn label(&self, key: &str) -> Option<&str>;
    fn annotation(&self, key: &str) -> Option<&str>;
    fn label_is_true(&self, key: &str) -> bool;
    fn is_unschedulable(&self) -> bool;
    fn update_status(&self) -> Result<Option<UpdateStatus>, Error>;
    fn resource_version_or_default(&self) -> String;
}

impl NodeExt for Node {
    fn label(&self, key: &str) -> Option<&str> {
        self.metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(key))
            .map(String::as_str)
    }

    fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|annotations| annotations.get(key))
            .map(String::as_str)
    }

    fn label_is_true(&self, key: &str) -> bool {
        self.label(key) == Some(TRUE)
    }

    fn is_unschedulable(&self) -> bool {
        self.spec
            .as_ref()
            .and_then(|spec| spec.unschedulable)
            .unwrap_or(false)
    }

    /// `None` when the annotation has never been written.
    fn update_status(&self) -> Result<Option<UpdateStatus>, Error> {
        self.annotation(UPDATE_STATUS_ANNOTATION)
            .map(str::parse)
            .transpose()
    }

    /// "0" asks the API server for "any version" when watching.
    fn resource_version_or_default(&self) -> String {
        self.metadata
            .resource_version
            .clone()
            .unwrap_or_else(|| String::from("0"))
    }
}
