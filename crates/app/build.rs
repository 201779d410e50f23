use std::process::Command;

fn git(args: &[&str]) -> Option<String> {
    let out = Command::new("git").args(args).output().ok()?;
    out.status
        .success()
        .then(|| String::from_utf8_lossy(&out.stdout).trim().to_string())
}

fn main() {
    println!("cargo:rerun-if-env-changed=BOXOFFICE_GIT_HASH");
    println!("cargo:rerun-if-changed=../../.git/HEAD");
    println!("cargo:rerun-if-changed=../../.git/index");

    // Release builds outside a checkout pass the hash in.
    if let Ok(hash) = std::env::var("BOXOFFICE_GIT_HASH") {
        println!("cargo:rustc-env=BOXOFFICE_GIT_HASH={hash}");
        return;
    }

    let hash = git(&["rev-parse", "--short", "HEAD"])
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "unknown".to_string());
    let dirty = git(&["status", "--porcelain"]).is_some_and(|s| !s.is_empty());
    let suffix = if dirty { "-dirty" } else { "" };

    println!("cargo:rustc-env=BOXOFFICE_GIT_HASH={hash}{suffix}");
}
