use std::env;
use std::process::Command;

// Embeds `<version> [(<commit>)] <target>` for `cloudsdk --version`.
fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-env-changed=CLOUDSDK_BUILD_COMMIT");

    let mut parts = vec![env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "0.0.0".into())];
    if let Some(commit) = env::var("CLOUDSDK_BUILD_COMMIT")
        .ok()
        .filter(|commit| !commit.is_empty())
        .or_else(head_commit)
    {
        parts.push(format!("({commit})"));
    }
    if let Ok(target) = env::var("TARGET") {
        parts.push(target);
    }

    println!("cargo:rustc-env=CLOUDSDK_VERSION={}", parts.join(" "));
}

fn head_commit() -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--short=10", "HEAD"])
        .output()
        .ok()
        .filter(|output| output.status.success())?;
    let commit = String::from_utf8(output.stdout).ok()?;
    let commit = commit.trim();
    (!commit.is_empty()).then(|| commit.to_string())
}
