// Node annotations
pub const UPDATE_STATUS_ANNOTATION: &str = "container-linux-update.v1.coreos.com/update-status";
pub const STATUS_ANNOTATION: &str = "container-linux-update.v1.coreos.com/status";
pub const LAST_CHECKED_TIME_ANNOTATION: &str =
    "container-linux-update.v1.coreos.com/last-checked-time";
pub const NEW_VERSION_ANNOTATION: &str = "container-linux-update.v1.coreos.com/new-version";

// Node labels: host identity
pub const ID_LABEL: &str = "container-linux-update.v1.coreos.com/id";
pub const GROUP_LABEL: &str = "container-linux-update.v1.coreos.com/group";
pub const VERSION_LABEL: &str = "container-linux-update.v1.coreos.com/version";

// Node labels: reboot coordination
pub const REBOOT_NEEDED_LABEL: &str = "container-linux-update.v1.coreos.com/reboot-needed";
pub const REBOOT_IN_PROGRESS_LABEL: &str =
    "container-linux-update.v1.coreos.com/reboot-in-progress";
pub const OK_TO_REBOOT_LABEL: &str = "container-linux-update.v1.coreos.com/ok-to-reboot";

pub const TRUE: &str = "true";
pub const FALSE: &str = "false";

// Pod annotations
pub const MIRROR_POD_ANNOTATION: &str = "kubernetes.io/config.mirror";
