//! Integration tests for buildstash

use assert_cmd::{cargo::cargo_bin_cmd, Command};
use std::path::Path;
use tempfile::TempDir;

/// Command isolated from the user's config and cache
fn buildstash(temp: &Path) -> Command {
    let mut cmd = cargo_bin_cmd!("buildstash");
    cmd.arg("--config")
        .arg(temp.join("config.toml"))
        .arg("--cache-dir")
        .arg(temp.join("cache"))
        .env_remove("BUILDSTASH_CACHE_DIR");
    cmd
}

mod cli_tests {
    use super::*;
    use predicates::prelude::*;
    use std::fs;

    #[test]
    fn help_displays() {
        cargo_bin_cmd!("buildstash")
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("Local build cache"));
    }

    #[test]
    fn version_displays() {
        cargo_bin_cmd!("buildstash")
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("buildstash"));
    }

    #[test]
    fn put_then_get_round_trip() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("output.bin");
        fs::write(&input, b"compiled bytes").unwrap();

        buildstash(temp.path())
            .args(["put", "--key", "abc123"])
            .arg(&input)
            .assert()
            .success()
            .stdout(predicate::str::contains("abc123"));

        buildstash(temp.path())
            .args(["get", "abc123"])
            .assert()
            .success()
            .stdout("compiled bytes");
    }

    #[test]
    fn put_defaults_to_content_hash() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("hello.txt");
        fs::write(&input, b"hello").unwrap();
        let sha = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

        buildstash(temp.path())
            .arg("put")
            .arg(&input)
            .assert()
            .success()
            .stdout(predicate::str::contains(sha));

        buildstash(temp.path())
            .args(["contains", sha])
            .assert()
            .success()
            .stdout("true\n");
    }

    #[test]
    fn second_put_reports_existing_entry() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("a.bin");
        fs::write(&input, b"first").unwrap();

        buildstash(temp.path())
            .args(["put", "--key", "aa"])
            .arg(&input)
            .assert()
            .success();

        fs::write(&input, b"second").unwrap();
        buildstash(temp.path())
            .args(["put", "--key", "aa"])
            .arg(&input)
            .assert()
            .success()
            .stdout(predicate::str::contains("already cached"));

        buildstash(temp.path())
            .args(["get", "aa"])
            .assert()
            .success()
            .stdout("first");
    }

    #[test]
    fn get_to_output_file() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("in.bin");
        let output = temp.path().join("out.bin");
        fs::write(&input, b"payload").unwrap();

        buildstash(temp.path())
            .args(["put", "--key", "beef"])
            .arg(&input)
            .assert()
            .success();
        buildstash(temp.path())
            .args(["get", "beef", "--output"])
            .arg(&output)
            .assert()
            .success();

        assert_eq!(fs::read(&output).unwrap(), b"payload");
    }

    #[test]
    fn get_miss_fails() {
        let temp = TempDir::new().unwrap();
        let output = temp.path().join("out.bin");

        buildstash(temp.path())
            .args(["get", "cafe", "--output"])
            .arg(&output)
            .assert()
            .failure()
            .stderr(predicate::str::contains("No cache entry for cafe"));

        assert!(!output.exists());
    }

    #[test]
    fn contains_missing_entry() {
        let temp = TempDir::new().unwrap();
        buildstash(temp.path())
            .args(["contains", "cafe"])
            .assert()
            .success()
            .stdout("false\n");
    }

    #[test]
    fn invalid_key_rejected() {
        let temp = TempDir::new().unwrap();
        buildstash(temp.path())
            .args(["contains", "../etc/passwd"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid cache key"));
    }

    #[test]
    fn stats_json_counts_entries() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("in.bin");
        fs::write(&input, b"12345").unwrap();
        for key in ["01", "02"] {
            buildstash(temp.path())
                .args(["--engine", "log-structured", "put", "--key", key])
                .arg(&input)
                .assert()
                .success();
        }

        let out = buildstash(temp.path())
            .args(["--engine", "log-structured", "stats", "--format", "json"])
            .output()
            .unwrap();
        assert!(out.status.success());
        let json: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
        assert_eq!(json["engine"], "log-structured");
        assert_eq!(json["entries"], 2);
        assert_eq!(json["total_bytes"], 10);
    }

    #[test]
    fn cleanup_with_zero_days_removes_entries() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("in.bin");
        fs::write(&input, b"old").unwrap();

        buildstash(temp.path())
            .args(["put", "--key", "0d"])
            .arg(&input)
            .assert()
            .success();

        buildstash(temp.path())
            .args(["cleanup", "--days", "0"])
            .assert()
            .success()
            .stdout(predicate::str::contains("removed 1"));

        buildstash(temp.path())
            .args(["contains", "0d"])
            .assert()
            .success()
            .stdout("false\n");
        assert!(temp.path().join("cache").join("gc.properties").exists());
    }

    #[test]
    fn cleanup_if_due_runs_once() {
        let temp = TempDir::new().unwrap();

        buildstash(temp.path())
            .args(["cleanup", "--if-due"])
            .assert()
            .success();
        buildstash(temp.path())
            .args(["cleanup", "--if-due"])
            .assert()
            .success()
            .stdout(predicate::str::contains("not due"));
    }

    #[test]
    fn cleanup_skipped_for_relational_engine() {
        let temp = TempDir::new().unwrap();
        buildstash(temp.path())
            .args(["--engine", "relational", "cleanup"])
            .assert()
            .success()
            .stdout(predicate::str::contains("only applies to the directory engine"));
    }

    #[test]
    fn cache_dir_from_config_file() {
        let temp = TempDir::new().unwrap();
        let cache_dir = temp.path().join("configured");
        fs::write(
            temp.path().join("config.toml"),
            format!(
                "[cache]\ndir = {:?}\nengine = \"relational\"\n",
                cache_dir.display().to_string()
            ),
        )
        .unwrap();

        cargo_bin_cmd!("buildstash")
            .arg("--config")
            .arg(temp.path().join("config.toml"))
            .args(["stats"])
            .assert()
            .success()
            .stdout(predicate::str::contains("relational"));

        assert!(cache_dir.join("filestore.db").exists());
    }

    #[test]
    fn invalid_config_reports_path() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("config.toml"), "[cache\n").unwrap();

        buildstash(temp.path())
            .arg("stats")
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"))
            .stderr(predicate::str::contains("Hint:"));
    }

    #[test]
    fn config_path() {
        let temp = TempDir::new().unwrap();
        buildstash(temp.path())
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show() {
        let temp = TempDir::new().unwrap();
        buildstash(temp.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[general]"))
            .stdout(predicate::str::contains("remove_unused_entries_after_days = 7"));
    }

    #[test]
    fn config_init_writes_file() {
        let temp = TempDir::new().unwrap();
        buildstash(temp.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration initialized"));

        assert!(temp.path().join("config.toml").exists());
    }
}

mod multi_process_tests {
    use super::*;
    use buildstash::cache::{BuildCacheFactory, CacheKey, CacheSettings};
    use buildstash::engine::EngineKind;
    use std::fs;
    use std::io::Read;
    use std::process::{Command as StdCommand, Stdio};

    const WORKERS: usize = 6;

    /// Start several `put` processes for one key at once and wait for all
    fn race_puts(temp: &Path, engine: &str, key: &str) {
        let children: Vec<_> = (0..WORKERS)
            .map(|i| {
                let input = temp.join(format!("worker-{i}.bin"));
                fs::write(&input, format!("output of worker {i}")).unwrap();
                StdCommand::new(env!("CARGO_BIN_EXE_buildstash"))
                    .arg("--config")
                    .arg(temp.join("config.toml"))
                    .arg("--cache-dir")
                    .arg(temp.join("cache"))
                    .args(["--engine", engine, "put", "--key", key])
                    .arg(&input)
                    .stdout(Stdio::null())
                    .stderr(Stdio::piped())
                    .spawn()
                    .unwrap()
            })
            .collect();

        for child in children {
            let out = child.wait_with_output().unwrap();
            assert!(
                out.status.success(),
                "worker failed: {}",
                String::from_utf8_lossy(&out.stderr)
            );
        }
    }

    fn load(settings: &CacheSettings, key: &CacheKey) -> String {
        let cache = BuildCacheFactory::open(settings).unwrap();
        let mut out = String::new();
        let found = cache
            .load(key, |r: &mut dyn Read| {
                r.read_to_string(&mut out).map(|_| ())
            })
            .unwrap();
        assert!(found);
        out
    }

    #[test]
    fn relational_engine_keeps_one_row() {
        let temp = TempDir::new().unwrap();
        race_puts(temp.path(), "relational", "feed");

        let db = rusqlite::Connection::open(temp.path().join("cache").join("filestore.db"))
            .unwrap();
        let rows: i64 = db
            .query_row(
                "SELECT COUNT(*) FROM filestore WHERE entry_key = 'feed'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(rows, 1);

        let settings = CacheSettings::at(temp.path().join("cache"))
            .with_engine(EngineKind::Relational);
        let key = CacheKey::new("feed").unwrap();
        assert!(load(&settings, &key).starts_with("output of worker"));
    }

    #[test]
    fn directory_engine_keeps_one_file() {
        let temp = TempDir::new().unwrap();
        race_puts(temp.path(), "directory", "d00d");

        let root = temp.path().join("cache");
        let names: Vec<String> = fs::read_dir(&root)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name != "build-cache.lock")
            .collect();
        assert_eq!(names, vec!["d00d".to_string()]);

        let settings = CacheSettings::at(&root);
        let key = CacheKey::new("d00d").unwrap();
        assert!(load(&settings, &key).starts_with("output of worker"));
    }

    #[test]
    fn get_into_closed_pipe_keeps_entry() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("large.bin");
        fs::write(&input, vec![7u8; 2 * 1024 * 1024]).unwrap();

        buildstash(temp.path())
            .args(["put", "--key", "abcd"])
            .arg(&input)
            .assert()
            .success();

        let mut child = StdCommand::new(env!("CARGO_BIN_EXE_buildstash"))
            .arg("--config")
            .arg(temp.path().join("config.toml"))
            .arg("--cache-dir")
            .arg(temp.path().join("cache"))
            .args(["get", "abcd"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();
        drop(child.stdout.take());
        let out = child.wait_with_output().unwrap();
        assert!(!out.status.success());

        let root = temp.path().join("cache");
        assert!(root.join("abcd").exists());
        assert!(!root.join("abcd.failed").exists());
        buildstash(temp.path())
            .args(["contains", "abcd"])
            .assert()
            .success()
            .stdout("true\n");
    }

    #[test]
    fn log_structured_engine_keeps_one_entry() {
        let temp = TempDir::new().unwrap();
        race_puts(temp.path(), "log-structured", "0123");

        let settings = CacheSettings::at(temp.path().join("cache"))
            .with_engine(EngineKind::LogStructured);
        let cache = BuildCacheFactory::open(&settings).unwrap();
        assert_eq!(cache.stats().unwrap().entries, 1);
    }
}
