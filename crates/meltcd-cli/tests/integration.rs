#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn meltcd(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("meltcd").unwrap();
    cmd.current_dir(dir.path())
        .env("MELTCD_HOME", dir.path())
        .env_remove("RUST_LOG");
    cmd
}

fn write_manifest(dir: &TempDir, name: &str, body: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, body).unwrap();
    path
}

const WEB: &str = "\
services:
  web:
    image: nginx:1.25
    deploy:
      replicas: 3
    ports:
      - \"8080:80\"
  cache:
    image: redis:7
";

// ---------------------------------------------------------------------------
// meltcd manifest check
// ---------------------------------------------------------------------------

#[test]
fn manifest_check_prints_services_in_order() {
    let dir = TempDir::new().unwrap();
    let file = write_manifest(&dir, "web.yaml", WEB);

    let out = meltcd(&dir)
        .args(["manifest", "check"])
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("web_web"))
        .stdout(predicate::str::contains("nginx:1.25"))
        .stdout(predicate::str::contains("8080:80/tcp"))
        .get_output()
        .stdout
        .clone();

    let text = String::from_utf8(out).unwrap();
    let web = text.find("web_web").unwrap();
    let cache = text.find("web_cache").unwrap();
    assert!(web < cache, "declaration order must be kept:\n{text}");
}

#[test]
fn manifest_check_json_uses_app_name() {
    let dir = TempDir::new().unwrap();
    let file = write_manifest(&dir, "web.yaml", WEB);

    let out = meltcd(&dir)
        .args(["manifest", "check", "--app", "shop", "--json"])
        .arg(&file)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let defs: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(defs[0]["name"], "shop_web");
    assert_eq!(defs[0]["replicas"], 3);
    assert_eq!(defs[1]["name"], "shop_cache");
    assert_eq!(defs[1]["replicas"], 1);
}

#[test]
fn manifest_check_rejects_service_without_image() {
    let dir = TempDir::new().unwrap();
    let file = write_manifest(&dir, "bad.yaml", "services:\n  web:\n    replicas: 2\n");

    meltcd(&dir)
        .args(["manifest", "check"])
        .arg(&file)
        .assert()
        .failure()
        .stderr(predicate::str::starts_with("error:"))
        .stderr(predicate::str::contains("web"));
}

#[test]
fn manifest_check_rejects_malformed_yaml() {
    let dir = TempDir::new().unwrap();
    let file = write_manifest(&dir, "bad.yaml", "services: [unclosed");

    meltcd(&dir)
        .args(["manifest", "check"])
        .arg(&file)
        .assert()
        .failure()
        .stderr(predicate::str::contains("malformed"));
}

#[test]
fn manifest_check_missing_file_fails() {
    let dir = TempDir::new().unwrap();
    meltcd(&dir)
        .args(["manifest", "check", "nope.yaml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to read"));
}

// ---------------------------------------------------------------------------
// meltcd apps
// ---------------------------------------------------------------------------

fn add_web(dir: &TempDir) {
    meltcd(dir)
        .args([
            "apps",
            "add",
            "web",
            "--repo",
            "https://example.com/org/repo",
            "--path",
            "deploy/web.yaml",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Added application 'web'"));
}

#[test]
fn apps_list_empty() {
    let dir = TempDir::new().unwrap();
    meltcd(&dir)
        .args(["apps", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No applications."));
}

#[test]
fn apps_add_persists_record() {
    let dir = TempDir::new().unwrap();
    meltcd(&dir)
        .args([
            "apps",
            "add",
            "web",
            "--repo",
            "https://example.com/org/repo",
            "--path",
            "deploy/web.yaml",
            "--revision",
            "release",
            "--refresh",
            "30s",
        ])
        .assert()
        .success();

    let raw = std::fs::read_to_string(dir.path().join("applications.yaml")).unwrap();
    let doc: serde_json::Value = serde_yaml::from_str(&raw).unwrap();
    let app = &doc["applications"][0];
    assert_eq!(app["name"], "web");
    assert_eq!(app["source"]["repo_url"], "https://example.com/org/repo");
    assert_eq!(app["source"]["path"], "deploy/web.yaml");
    assert_eq!(app["source"]["target_revision"], "release");
    assert_eq!(app["refresh_timer"], "30s");

    meltcd(&dir)
        .args(["apps", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("web"))
        .stdout(predicate::str::contains("release"))
        .stdout(predicate::str::contains("30s"));
}

#[test]
fn apps_add_duplicate_fails() {
    let dir = TempDir::new().unwrap();
    add_web(&dir);
    meltcd(&dir)
        .args([
            "apps",
            "add",
            "web",
            "--repo",
            "https://example.com/org/other",
            "--path",
            "web.yaml",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));

    let out = meltcd(&dir)
        .args(["apps", "list", "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let apps: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(apps.as_array().unwrap().len(), 1);
    assert_eq!(apps[0]["source"]["repo_url"], "https://example.com/org/repo");
}

#[test]
fn apps_add_rejects_escaping_path() {
    let dir = TempDir::new().unwrap();
    meltcd(&dir)
        .args([
            "apps",
            "add",
            "web",
            "--repo",
            "https://example.com/org/repo",
            "--path",
            "../secrets.yaml",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid application spec"));
    assert!(!dir.path().join("applications.yaml").exists());
}

#[test]
fn apps_add_warns_on_bad_refresh() {
    let dir = TempDir::new().unwrap();
    meltcd(&dir)
        .args([
            "apps",
            "add",
            "web",
            "--repo",
            "https://example.com/org/repo",
            "--path",
            "web.yaml",
            "--refresh",
            "not-a-duration",
        ])
        .assert()
        .success()
        .stderr(predicate::str::contains("suspended"));
}

#[test]
fn apps_remove() {
    let dir = TempDir::new().unwrap();
    add_web(&dir);
    meltcd(&dir)
        .args(["apps", "remove", "web"])
        .assert()
        .success();
    meltcd(&dir)
        .args(["apps", "remove", "web"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

// ---------------------------------------------------------------------------
// meltcd config / serve
// ---------------------------------------------------------------------------

#[test]
fn config_validate_defaults() {
    let dir = TempDir::new().unwrap();
    meltcd(&dir)
        .args(["config", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Config is valid"));
}

#[test]
fn config_show_includes_defaults() {
    let dir = TempDir::new().unwrap();
    meltcd(&dir)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("http://127.0.0.1:2375"))
        .stdout(predicate::str::contains("timeout_secs: 120"));
}

#[test]
fn serve_refuses_invalid_config() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("config.yaml"),
        "docker:\n  endpoint: unix:///var/run/docker.sock\n",
    )
    .unwrap();

    meltcd(&dir)
        .args(["config", "validate"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("[error]"));
    meltcd(&dir)
        .arg("serve")
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid configuration"));
}

#[test]
fn home_flag_overrides_env() {
    let dir = TempDir::new().unwrap();
    let other = TempDir::new().unwrap();
    meltcd(&dir)
        .args(["--home"])
        .arg(other.path())
        .args([
            "apps",
            "add",
            "api",
            "--repo",
            "https://example.com/org/api",
            "--path",
            "stack.yaml",
        ])
        .assert()
        .success();
    assert!(other.path().join("applications.yaml").exists());
    assert!(!dir.path().join("applications.yaml").exists());
}
