use std::env;
use std::process::Command;

const COMMIT_ENV: &str = "DEPSIGHT_GIT_COMMIT";

fn main() {
    println!("cargo:rerun-if-env-changed={COMMIT_ENV}");

    // `env!` in the crate requires the variable to exist on every path.
    let commit = env::var(COMMIT_ENV)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .or_else(|| {
            println!("cargo:rerun-if-changed=.git/HEAD");
            println!("cargo:rerun-if-changed=.git/index");
            head_commit()
        })
        .unwrap_or_else(|| "unknown".to_string());
    println!("cargo:rustc-env={COMMIT_ENV}={commit}");
}

fn git(args: &[&str]) -> Option<String> {
    let out = Command::new("git").args(args).output().ok()?;
    if !out.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&out.stdout).trim().to_string())
}

fn head_commit() -> Option<String> {
    let hash = git(&["rev-parse", "--short=12", "HEAD"]).filter(|s| !s.is_empty())?;
    let dirty = git(&["status", "--porcelain", "--untracked-files=no"]).is_some_and(|s| !s.is_empty());
    Some(if dirty { format!("{hash}-dirty") } else { hash })
}
