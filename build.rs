use regex::Regex;
use std::fs;
use std::process::Command;

/// Run git and return its trimmed stdout, or "undetermined" when building
/// outside of a checkout (e.g. from a source tarball).
fn git(args: &[&str]) -> String {
    Command::new("git")
        .args(args)
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|stdout| stdout.trim().to_string())
        .unwrap_or_else(|| String::from("undetermined"))
}

fn main() {
    println!("cargo:rustc-env=GIT_HASH={}", git(&["rev-parse", "HEAD"]));
    println!("cargo:rustc-env=GIT_COUNT={}", git(&["rev-list", "--count", "HEAD"]));
    println!("cargo:rerun-if-changed=.git/HEAD");

    let Ok(head) = fs::read_to_string(".git/HEAD") else {
        return;
    };
    let re = Regex::new(r"ref: (.*)").expect("static regex");
    if let Some(branch) = re.captures(&head).and_then(|c| c.get(1)) {
        println!("cargo:rerun-if-changed=.git/{}", branch.as_str());
    }
}
