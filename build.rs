use std::env;
use std::path::PathBuf;
use std::process::Command;

fn main() {
    watch_migrations();
    emit_git_commit();
}

fn watch_migrations() {
    let manifest_dir = env::var("CARGO_MANIFEST_DIR").unwrap_or_else(|_| "".into());
    let migrations = PathBuf::from(manifest_dir).join("migrations");
    println!("cargo:rerun-if-changed={}", migrations.display());
}

fn emit_git_commit() {
    let output = Command::new("git").args(["rev-parse", "HEAD"]).output();

    let commit = match output {
        Ok(out) if out.status.success() => {
            let raw = String::from_utf8_lossy(&out.stdout).trim().to_string();
            if raw.is_empty() {
                "unknown".to_string()
            } else {
                raw
            }
        }
        _ => "unknown".to_string(),
    };

    println!("cargo:rustc-env=LEDGERLOAD_GIT_HASH={commit}");
}
