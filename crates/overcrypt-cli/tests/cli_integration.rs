#![allow(deprecated)] // cargo_bin! macro doesn't exist yet in assert_cmd 2.1

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const TEST_PASSWORD: &str = "test-password-123";

fn overcrypt_no_password() -> Command {
    let mut cmd = Command::cargo_bin("overcrypt").unwrap();
    cmd.env_remove("OVERCRYPT_PASSWORD")
        .env_remove("OVERCRYPT_CONFIG")
        .env_remove("OVERCRYPT_BACKEND_ROOT")
        .env_remove("OVERCRYPT_SALT")
        .env_remove("RUST_LOG");
    cmd
}

fn overcrypt() -> Command {
    let mut cmd = overcrypt_no_password();
    cmd.env("OVERCRYPT_PASSWORD", TEST_PASSWORD);
    cmd
}

/// A config file plus an empty backend directory, kept alive with the TempDir.
struct Workspace {
    temp: TempDir,
    config: PathBuf,
    backend: PathBuf,
}

impl Workspace {
    fn new(init_args: &[&str]) -> Self {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let config = temp.path().join("overcrypt.toml");
        let backend = temp.path().join("data");
        fs::create_dir(&backend).unwrap();

        overcrypt()
            .arg("--config")
            .arg(&config)
            .arg("init-config")
            .args(init_args)
            .assert()
            .success();

        Self { temp, config, backend }
    }

    fn cmd(&self) -> Command {
        let mut cmd = overcrypt();
        cmd.arg("--config").arg(&self.config).arg("--backend-root").arg(&self.backend);
        cmd
    }

    fn local_file(&self, name: &str, content: &[u8]) -> PathBuf {
        let path = self.temp.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn put(&self, local: &Path, dest_dir: &str) {
        self.cmd().arg("put").arg(local).arg(dest_dir).assert().success();
    }
}

fn sample_content(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 251) as u8).collect()
}

fn backend_names(dir: &Path) -> Vec<String> {
    fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect()
}

// ============================================================================
// Basic CLI tests
// ============================================================================

#[test]
fn test_help() {
    overcrypt_no_password()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("encrypted storage overlay"))
        .stdout(predicate::str::contains("init-config"))
        .stdout(predicate::str::contains("ls"))
        .stdout(predicate::str::contains("cat"))
        .stdout(predicate::str::contains("rename"));
}

#[test]
fn test_version() {
    overcrypt_no_password()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("overcrypt"));
}

#[test]
fn test_missing_config() {
    let temp = TempDir::new().unwrap();
    overcrypt()
        .arg("--config")
        .arg(temp.path().join("absent.toml"))
        .arg("--backend-root")
        .arg(temp.path())
        .arg("ls")
        .assert()
        .failure()
        .code(66)
        .stderr(predicate::str::contains("Failed to read config"));
}

// ============================================================================
// init-config
// ============================================================================

#[test]
fn test_init_config_obscures_password() {
    let ws = Workspace::new(&["--filename-encryption", "standard"]);
    let text = fs::read_to_string(&ws.config).unwrap();
    assert!(!text.contains(TEST_PASSWORD));
    assert!(text.contains("___Obfuscated___"));
    assert!(text.contains("filename_encryption = \"standard\""));
}

#[test]
fn test_init_config_requires_password() {
    let temp = TempDir::new().unwrap();
    overcrypt_no_password()
        .arg("--config")
        .arg(temp.path().join("overcrypt.toml"))
        .arg("init-config")
        .assert()
        .failure()
        .code(78)
        .stderr(predicate::str::contains("password is required"));
}

#[test]
fn test_init_config_refuses_overwrite() {
    let ws = Workspace::new(&[]);
    overcrypt()
        .arg("--config")
        .arg(&ws.config)
        .arg("init-config")
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));

    overcrypt()
        .arg("--config")
        .arg(&ws.config)
        .arg("init-config")
        .arg("--force")
        .assert()
        .success();
}

#[test]
fn test_hand_written_password_is_obscured_on_first_use() {
    let ws = Workspace::new(&[]);
    fs::write(&ws.config, format!("password = \"{TEST_PASSWORD}\"\n")).unwrap();

    ws.cmd().arg("ls").assert().success();

    let text = fs::read_to_string(&ws.config).unwrap();
    assert!(!text.contains(TEST_PASSWORD));
}

// ============================================================================
// Read and write round trips
// ============================================================================

#[test]
fn test_put_ls_cat_with_encrypted_names() {
    let ws = Workspace::new(&["--filename-encryption", "standard"]);
    let content = sample_content(100_000);
    let local = ws.local_file("report.txt", &content);
    ws.put(&local, "/");

    ws.cmd()
        .arg("ls")
        .assert()
        .success()
        .stdout(predicate::str::contains("report.txt"));

    // Stored name is encrypted, extension kept.
    let names = backend_names(&ws.backend);
    assert_eq!(names.len(), 1);
    assert_ne!(names[0], "report.txt");
    assert!(names[0].ends_with(".txt"));

    ws.cmd().arg("cat").arg("/report.txt").assert().success().stdout(content.clone());
}

#[test]
fn test_cat_range() {
    let ws = Workspace::new(&[]);
    let content = sample_content(100_000);
    let local = ws.local_file("data.bin", &content);
    ws.put(&local, "/");

    ws.cmd()
        .args(["cat", "/data.bin", "--offset", "32760", "--length", "100"])
        .assert()
        .success()
        .stdout(content[32760..32860].to_vec());

    ws.cmd()
        .args(["cat", "/data.bin", "--offset", "99990"])
        .assert()
        .success()
        .stdout(content[99990..].to_vec());
}

#[test]
fn test_stat_reports_plaintext_size() {
    let ws = Workspace::new(&[]);
    let local = ws.local_file("notes.md", &sample_content(5000));
    ws.put(&local, "/");

    ws.cmd()
        .args(["stat", "/notes.md"])
        .assert()
        .success()
        .stdout(predicate::str::contains("5000 bytes"))
        .stdout(predicate::str::contains("file"));
}

#[test]
fn test_ls_json() {
    let ws = Workspace::new(&[]);
    let local = ws.local_file("a.txt", b"hello");
    ws.put(&local, "/");
    ws.cmd().args(["mkdir", "/", "docs"]).assert().success();

    ws.cmd()
        .args(["ls", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"type\": \"directory\""))
        .stdout(predicate::str::contains("\"name\": \"a.txt\""))
        .stdout(predicate::str::contains("\"size\": 5"));
}

#[test]
fn test_unencrypted_content() {
    let ws = Workspace::new(&["--no-encrypted-file"]);
    let local = ws.local_file("plain.txt", b"visible bytes");
    ws.put(&local, "/");

    let stored = fs::read(ws.backend.join("plain.txt")).unwrap();
    assert_eq!(stored, b"visible bytes");

    ws.cmd()
        .args(["cat", "/plain.txt", "--offset", "8"])
        .assert()
        .success()
        .stdout("bytes");
}

// ============================================================================
// Directory and entry management
// ============================================================================

#[test]
fn test_mkdir_mv_rename_cp_rm() {
    let ws = Workspace::new(&["--filename-encryption", "obfuscate", "--directory-name-encryption"]);
    let local = ws.local_file("report.txt", b"quarterly numbers");
    ws.put(&local, "/");

    ws.cmd().args(["mkdir", "/", "docs"]).assert().success();
    ws.cmd().args(["mv", "/report.txt", "/docs"]).assert().success();
    ws.cmd()
        .args(["ls", "/"])
        .assert()
        .success()
        .stdout(predicate::str::contains("docs/"))
        .stdout(predicate::str::contains("report.txt").not());

    ws.cmd().args(["rename", "/docs/report.txt", "summary.txt"]).assert().success();
    ws.cmd().args(["cp", "/docs/summary.txt", "/"]).assert().success();
    ws.cmd().args(["rm", "/docs"]).assert().success();

    ws.cmd()
        .args(["ls", "/"])
        .assert()
        .success()
        .stdout(predicate::str::contains("summary.txt"))
        .stdout(predicate::str::contains("docs").not());
    ws.cmd()
        .args(["cat", "/summary.txt"])
        .assert()
        .success()
        .stdout("quarterly numbers");
}

#[test]
fn test_rename_rejects_separator() {
    let ws = Workspace::new(&[]);
    let local = ws.local_file("a.txt", b"a");
    ws.put(&local, "/");

    ws.cmd()
        .args(["rename", "/a.txt", "sub/b.txt"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid name"));
}

// ============================================================================
// Error exit codes
// ============================================================================

#[test]
fn test_rm_missing_path() {
    let ws = Workspace::new(&[]);
    ws.cmd()
        .args(["rm", "/nope.txt"])
        .assert()
        .failure()
        .code(66)
        .stderr(predicate::str::contains("not found"));

    ws.cmd().args(["rm", "-f", "/nope.txt"]).assert().success();
}

#[test]
fn test_cat_with_wrong_password() {
    let ws = Workspace::new(&[]);
    let local = ws.local_file("secret.txt", b"top secret");
    ws.put(&local, "/");

    ws.cmd()
        .env("OVERCRYPT_PASSWORD", "not-the-password")
        .args(["cat", "/secret.txt"])
        .assert()
        .failure()
        .code(65);
}

#[test]
fn test_backend_root_must_exist() {
    let ws = Workspace::new(&[]);
    overcrypt()
        .arg("--config")
        .arg(&ws.config)
        .arg("--backend-root")
        .arg(ws.temp.path().join("missing"))
        .arg("ls")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Backend root is not a directory"));
}
