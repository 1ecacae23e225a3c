fn main() {
    // Rerun when git HEAD changes (commit, checkout, etc.)
    println!("cargo:rerun-if-changed=.git/HEAD");

    let output = std::process::Command::new("git")
        .args(["describe", "--always", "--dirty", "--tags"])
        .output();

    // Fall back to the crate version outside a git checkout.
    let version = match output {
        Ok(o) if o.status.success() => String::from_utf8_lossy(&o.stdout).trim().to_string(),
        _ => std::env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "unknown".to_string()),
    };

    println!("cargo:rustc-env=ROTTA_BUILD_VERSION={}", version);
}
