//! Integration test: drive the `layerbox` binary against a scratch store.
//!
//! ```bash
//! cargo test -p layerbox-cli --test cli_commands
//! ```

use std::path::Path;
use std::process::Command;

use tempfile::TempDir;

/// Run `layerbox --root <root> <args>` and return (stdout, stderr, success).
fn run_cmd(root: &Path, args: &[&str]) -> (String, String, bool) {
    let output = Command::new(env!("CARGO_BIN_EXE_layerbox"))
        .arg("--root")
        .arg(root)
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run `layerbox {}`: {}", args.join(" "), e));

    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.success(),
    )
}

fn write_rootfs(path: &Path) {
    use flate2::write::GzEncoder;
    use flate2::Compression;

    let file = std::fs::File::create(path).unwrap();
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    let mut header = tar::Header::new_gnu();
    header.set_size(6);
    header.set_mode(0o644);
    builder.append_data(&mut header, "etc/issue", &b"hello\n"[..]).unwrap();
    builder.into_inner().unwrap().finish().unwrap();
}

#[test]
fn test_import_tag_images_history() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("store");
    let archive = tmp.path().join("rootfs.tar.gz");
    write_rootfs(&archive);

    let (stdout, stderr, ok) = run_cmd(&root, &["import", archive.to_str().unwrap(), "base:1"]);
    assert!(ok, "import failed: {stderr}");
    let id = stdout.split_whitespace().next().unwrap().to_string();
    assert!(id.starts_with("sha256:"));

    let (stdout, stderr, ok) = run_cmd(&root, &["tag", "base:1", "team/base:stable"]);
    assert!(ok, "tag failed: {stderr}");
    assert_eq!(stdout.trim(), "docker.io/team/base:stable");

    let (stdout, _, ok) = run_cmd(&root, &["images", "--quiet"]);
    assert!(ok);
    let ids: Vec<&str> = stdout.lines().collect();
    assert_eq!(ids, vec![id.as_str(), id.as_str()]);

    let (stdout, _, ok) = run_cmd(&root, &["history", "-q", "team/base:stable"]);
    assert!(ok);
    assert_eq!(stdout.trim(), id);
}

#[test]
fn test_unknown_image_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, ok) = run_cmd(tmp.path(), &["history", "missing:1"]);
    assert!(!ok);
    assert!(stderr.contains("Image not found"));
}

#[test]
fn test_cache_prune_on_empty_store() {
    let tmp = TempDir::new().unwrap();
    let (stdout, stderr, ok) = run_cmd(tmp.path(), &["cache", "prune"]);
    assert!(ok, "prune failed: {stderr}");
    assert_eq!(stdout.trim(), "Removed 0 cache entries");
}
