use crate::labels_and_annotations::MIRROR_POD_ANNOTATION;
use k8s_openapi::api::core::v1::Pod;

pub trait PodExt {
    fn is_mirror(&self) -> bool;
    fn has_controller(&self) -> bool;
    fn namespace_or_default(&self) -> &str;
    fn name_or_empty(&self) -> &str;
}

impl PodExt for Pod {
    /// Static pods are represented in the API by mirror pods that the
    /// kubelet recreates; deleting them achieves nothing.
    fn is_mirror(&self) -> bool {
        self.metadata
            .annotations
            .as_ref()
            .is_some_and(|annotations| annotations.contains_key(MIRROR_POD_ANNOTATION))
    }

    fn has_controller(&self) -> bool {
        self.metadata
            .owner_references
            .as_ref()
            .is_some_and(|owners| owners.iter().any(|owner| owner.controller == Some(true)))
    }

    fn namespace_or_default(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or("default")
    }

    fn name_or_empty(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }
}
