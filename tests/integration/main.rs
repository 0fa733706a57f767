//! Integration tests for distrobuild

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::fs;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    fn distrobuild() -> Command {
        cargo_bin_cmd!("distrobuild")
    }

    /// Config file whose store lives inside `dir`
    fn write_config(dir: &Path) -> PathBuf {
        let path = dir.join("config.toml");
        let content = format!(
            "[workspace]\nroot = {:?}\n\n[store]\nroot = \"store\"\n",
            dir.display().to_string()
        );
        fs::write(&path, content).unwrap();
        path
    }

    fn add_entry(dir: &Path, key: &str, file: &str) {
        let data = dir.join("store").join(key).join("data");
        fs::create_dir_all(&data).unwrap();
        fs::write(data.join(file), "artifact").unwrap();
    }

    #[test]
    fn help_displays() {
        distrobuild()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("distribution images"));
    }

    #[test]
    fn version_displays() {
        distrobuild()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("distrobuild"));
    }

    #[test]
    fn build_help() {
        distrobuild()
            .args(["build", "--help"])
            .assert()
            .success()
            .stdout(predicate::str::contains("--debug-image"));
    }

    #[test]
    fn build_missing_manifest() {
        let temp = TempDir::new().unwrap();
        let config = write_config(temp.path());

        distrobuild()
            .arg("-c")
            .arg(&config)
            .args(["build", "does-not-exist.json"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Manifest not found"));
    }

    #[test]
    fn build_invalid_manifest() {
        let temp = TempDir::new().unwrap();
        let config = write_config(temp.path());
        let manifest = temp.path().join("image.json");
        fs::write(&manifest, r#"{"kernel": {"download": "a", "execute": "b"}}"#).unwrap();

        distrobuild()
            .arg("-c")
            .arg(&config)
            .arg("build")
            .arg(&manifest)
            .assert()
            .failure()
            .stderr(predicate::str::contains("only one is allowed"));
    }

    #[test]
    fn config_path() {
        let temp = TempDir::new().unwrap();
        let config = write_config(temp.path());

        distrobuild()
            .env("DISTROBUILD_CONFIG", &config)
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show() {
        let temp = TempDir::new().unwrap();
        let config = write_config(temp.path());

        distrobuild()
            .arg("-c")
            .arg(&config)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[builder]"))
            .stdout(predicate::str::contains("distro_builder"));
    }

    #[test]
    fn invalid_config_fails() {
        let temp = TempDir::new().unwrap();
        let config = temp.path().join("config.toml");
        fs::write(&config, "[store\nroot = 1").unwrap();

        distrobuild()
            .arg("-c")
            .arg(&config)
            .args(["config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"));
    }

    #[test]
    fn cache_list_empty() {
        let temp = TempDir::new().unwrap();
        let config = write_config(temp.path());

        distrobuild()
            .arg("-c")
            .arg(&config)
            .args(["cache", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No stored artifacts"));
    }

    #[test]
    fn cache_list_invalidate_and_clear() {
        let temp = TempDir::new().unwrap();
        let config = write_config(temp.path());
        add_entry(temp.path(), "kernel-abc123", "kernel-6.4.rpms.tar");
        add_entry(temp.path(), "sdk-download-def456", "sdk-1.0.tar");

        distrobuild()
            .arg("-c")
            .arg(&config)
            .args(["cache", "list", "--format", "plain"])
            .assert()
            .success()
            .stdout("kernel-abc123\nsdk-download-def456\n");

        distrobuild()
            .arg("-c")
            .arg(&config)
            .args(["cache", "invalidate", "kernel-abc123"])
            .assert()
            .success();
        assert!(!temp.path().join("store/kernel-abc123").exists());
        assert!(temp.path().join("store/sdk-download-def456").exists());

        distrobuild()
            .arg("-c")
            .arg(&config)
            .args(["cache", "clear", "--yes"])
            .assert()
            .success();
        assert!(!temp.path().join("store").exists());
    }

    #[test]
    fn cache_clear_without_yes_keeps_store() {
        let temp = TempDir::new().unwrap();
        let config = write_config(temp.path());
        add_entry(temp.path(), "kernel-abc123", "kernel-6.4.rpms.tar");

        distrobuild()
            .arg("-c")
            .arg(&config)
            .args(["cache", "clear"])
            .assert()
            .success()
            .stdout(predicate::str::contains("untouched"));
        assert!(temp.path().join("store/kernel-abc123").exists());
    }

    #[test]
    fn cache_list_json() {
        let temp = TempDir::new().unwrap();
        let config = write_config(temp.path());
        add_entry(temp.path(), "kernel-abc123", "kernel-6.4.rpms.tar");

        distrobuild()
            .arg("-c")
            .arg(&config)
            .args(["cache", "list", "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"key\": \"kernel-abc123\""))
            .stdout(predicate::str::contains("\"size_bytes\": 8"));
    }
}
