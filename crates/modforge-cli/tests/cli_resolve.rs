use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const PACK: &str = r#"
[pack]
name = "cli-pack"
minecraft = "1.21.1"
loader = "fabric"

[mods]
sodium = "0.5.x"
"#;

const SNAPSHOT: &str = r#"{
    "projects": [
        { "id": "AANobbMI", "slug": "sodium" },
        { "id": "P7dR8mSH", "slug": "fabric-api" },
        { "id": "Orvt0mRa", "slug": "indium" }
    ],
    "versions": [
        { "id": "s2", "project_id": "AANobbMI", "version_number": "0.5.11",
          "date_published": "2024-07-05T00:00:00Z", "loaders": ["fabric"],
          "game_versions": ["1.21.1"],
          "dependencies": [{ "project_id": "P7dR8mSH", "dependency_type": "required" }] },
        { "id": "f1", "project_id": "P7dR8mSH", "version_number": "0.102.0",
          "date_published": "2024-07-01T00:00:00Z", "loaders": ["fabric"],
          "game_versions": ["1.21.1"] },
        { "id": "i1", "project_id": "Orvt0mRa", "version_number": "1.0.35",
          "date_published": "2024-07-02T00:00:00Z", "loaders": ["fabric"],
          "game_versions": ["1.21.1"] }
    ]
}"#;

fn modforge_cmd(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("modforge").unwrap();
    cmd.env("HOME", home).env_remove("MODFORGE_SNAPSHOT");
    cmd
}

fn pack_dir(pack: &str) -> TempDir {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("modforge.toml"), pack).unwrap();
    fs::write(tmp.path().join("registry.json"), SNAPSHOT).unwrap();
    tmp
}

#[test]
fn test_resolve_writes_lockfile() {
    let tmp = pack_dir(PACK);

    modforge_cmd(tmp.path())
        .current_dir(tmp.path())
        .args(["resolve", "--snapshot", "registry.json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("fabric-api 0.102.0 (required by sodium)"))
        .stdout(predicate::str::contains("sodium 0.5.11 (root)"))
        .stderr(predicate::str::contains("Resolved"));

    let lock = fs::read_to_string(tmp.path().join("modforge.lock")).unwrap();
    let api = lock.find("slug = \"fabric-api\"").unwrap();
    let sodium = lock.find("slug = \"sodium\"").unwrap();
    assert!(api < sodium);
}

#[test]
fn test_resolve_from_subdirectory() {
    let tmp = pack_dir(PACK);
    let nested = tmp.path().join("config").join("sodium");
    fs::create_dir_all(&nested).unwrap();

    modforge_cmd(tmp.path())
        .current_dir(&nested)
        .env("MODFORGE_SNAPSHOT", tmp.path().join("registry.json"))
        .args(["resolve"])
        .assert()
        .success();

    assert!(tmp.path().join("modforge.lock").exists());
}

#[test]
fn test_resolve_dry_run_json() {
    let tmp = pack_dir(PACK);

    modforge_cmd(tmp.path())
        .current_dir(tmp.path())
        .args(["resolve", "--snapshot", "registry.json", "--dry-run", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"version_id\": \"s2\""));

    assert!(!tmp.path().join("modforge.lock").exists());
}

#[test]
fn test_resolve_without_pack_fails() {
    let tmp = TempDir::new().unwrap();

    modforge_cmd(tmp.path())
        .current_dir(tmp.path())
        .args(["resolve", "--snapshot", "registry.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No modforge.toml found"));
}

#[test]
fn test_resolve_unsatisfiable_fails() {
    let tmp = pack_dir(&PACK.replace("0.5.x", "0.6.x"));

    modforge_cmd(tmp.path())
        .current_dir(tmp.path())
        .args(["resolve", "--snapshot", "registry.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("sodium"));

    assert!(!tmp.path().join("modforge.lock").exists());
}

#[test]
fn test_tree_why() {
    let tmp = pack_dir(PACK);

    modforge_cmd(tmp.path())
        .current_dir(tmp.path())
        .args(["tree", "--snapshot", "registry.json", "--why", "fabric-api"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Path to fabric-api:"))
        .stdout(predicate::str::contains("  fabric-api@0.102.0"));
}

#[test]
fn test_diff_lists_sub_mods() {
    let tmp = pack_dir(PACK);
    fs::write(
        tmp.path().join("modforge-policy.toml"),
        "[mods.sodium]\nsub-mods = [\"indium\"]\n",
    )
    .unwrap();

    modforge_cmd(tmp.path())
        .current_dir(tmp.path())
        .args(["diff"])
        .assert()
        .success()
        .stdout(predicate::str::contains("+ indium (sub-mod)"));
}

#[test]
fn test_diff_without_policy() {
    let tmp = pack_dir(PACK);

    modforge_cmd(tmp.path())
        .current_dir(tmp.path())
        .args(["diff"])
        .assert()
        .success()
        .stderr(predicate::str::contains("nothing changes"));
}
