/// Build version baked in by build.rs: `<commit count>-<commit hash>`.
pub fn get_version_string() -> String {
    format!("{}-{}", env!("GIT_COUNT"), env!("GIT_HASH"))
}
