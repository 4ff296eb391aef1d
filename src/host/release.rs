use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, instrument};

use super::parse_key_values;
use crate::errors::Error;

const OS_RELEASE: &str = "etc/os-release";
const UPDATE_CONF_DEFAULT: &str = "usr/share/coreos/update.conf";
const UPDATE_CONF_OVERRIDE: &str = "etc/coreos/update.conf";

/// Which OS build this host runs, published as node labels so the operator
/// can group nodes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HostIdentity {
    /// `ID` from os-release.
    pub id: String,
    /// Update channel (`GROUP`), the /etc override wins over /usr.
    pub group: String,
    /// `VERSION` from os-release.
    pub version: String,
}

impl HostIdentity {
    /// Read identity files below `root`, which is `/` unless the host
    /// filesystem is mounted elsewhere.
    #[instrument]
    pub fn read(root: &Path) -> Result<HostIdentity, Error> {
        let os_release = parse_key_values(&std::fs::read_to_string(root.join(OS_RELEASE))?);

        let mut update_conf = BTreeMap::new();
        for path in [UPDATE_CONF_DEFAULT, UPDATE_CONF_OVERRIDE] {
            match std::fs::read_to_string(root.join(path)) {
                Ok(contents) => update_conf.extend(parse_key_values(&contents)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(path, "update.conf not present");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(HostIdentity {
            id: os_release.get("ID").cloned().unwrap_or_default(),
            group: update_conf.get("GROUP").cloned().unwrap_or_default(),
            version: os_release.get("VERSION").cloned().unwrap_or_default(),
        })
    }
}
