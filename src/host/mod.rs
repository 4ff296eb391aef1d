use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeMap;
use tokio::process::Command;
use tracing::debug;

use crate::errors::Error;

pub mod reboot;
pub mod release;
pub mod update_engine;

/// Run `executable` and return its stdout, turning a non-zero exit into
/// [`Error::CommandError`].
async fn command(executable: &str, args: &[&str]) -> Result<String, Error> {
    debug!(executable, ?args, "running command");
    let output = Command::new(executable).args(args).output().await?;

    if !output.status.success() {
        let mut argv = vec![executable.to_string()];
        argv.extend(args.iter().map(|s| s.to_string()));
        return Err(Error::CommandError(
            argv,
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Parse `KEY=value` lines as found in os-release, update.conf and the output
/// of `update_engine_client -status`. Surrounding quotes are stripped; blank
/// lines, comments and anything else are ignored.
pub fn parse_key_values(input: &str) -> BTreeMap<String, String> {
    lazy_static! {
        static ref RE: Regex = Regex::new(r#"^\s*([A-Za-z_][A-Za-z0-9_]*)=(.*?)\s*$"#).unwrap();
    }
    input
        .lines()
        .filter_map(|line| RE.captures(line))
        .map(|captures| {
            let value = captures[2].trim_matches(|c| c == '"' || c == '\'');
            (captures[1].to_string(), value.to_string())
        })
        .collect()
}
