//! Integration tests for Stratum

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use sha2::{Digest, Sha256};
    use std::fs;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    /// Command with an isolated, non-existent config file
    fn stratum(temp: &TempDir) -> Command {
        let mut cmd = cargo_bin_cmd!("stratum");
        cmd.env("STRATUM_CONFIG", temp.path().join("config.toml"));
        cmd.env("CI", "1");
        cmd
    }

    fn append(builder: &mut tar::Builder<Vec<u8>>, path: &str, kind: tar::EntryType, mode: u32, content: &[u8]) {
        let mut header = tar::Header::new_ustar();
        header.set_entry_type(kind);
        header.set_mode(mode);
        header.set_uid(0);
        header.set_gid(0);
        header.set_mtime(1_700_000_000);
        header.set_size(content.len() as u64);
        builder.append_data(&mut header, path, content).unwrap();
    }

    /// Layer with `app/` and `app/hello.txt`, plus `etc/hosts`
    fn write_layer(dir: &Path, name: &str) -> PathBuf {
        let mut builder = tar::Builder::new(Vec::new());
        append(&mut builder, "app/", tar::EntryType::Directory, 0o755, b"");
        append(&mut builder, "app/hello.txt", tar::EntryType::Regular, 0o644, b"hello\n");
        append(&mut builder, "etc/", tar::EntryType::Directory, 0o755, b"");
        append(&mut builder, "etc/hosts", tar::EntryType::Regular, 0o644, b"127.0.0.1 localhost\n");
        let bytes = builder.into_inner().unwrap();

        let path = dir.join(name);
        fs::write(&path, bytes).unwrap();
        path
    }

    fn chained_key(parts: &[&str]) -> String {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part.as_bytes());
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize())
    }

    #[test]
    fn help_displays() {
        let temp = TempDir::new().unwrap();
        stratum(&temp)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("layer cache"));
    }

    #[test]
    fn version_displays() {
        let temp = TempDir::new().unwrap();
        stratum(&temp)
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("stratum"));
    }

    #[test]
    fn config_path_uses_env() {
        let temp = TempDir::new().unwrap();
        stratum(&temp)
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains(
                temp.path().join("config.toml").display().to_string(),
            ));
    }

    #[test]
    fn config_show() {
        let temp = TempDir::new().unwrap();
        stratum(&temp)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[general]"))
            .stdout(predicate::str::contains("[cache]"));
    }

    #[test]
    fn config_init_writes_file() {
        let temp = TempDir::new().unwrap();
        stratum(&temp).args(["config", "init"]).assert().success();
        let written = fs::read_to_string(temp.path().join("config.toml")).unwrap();
        assert!(written.contains("[build]"));
    }

    #[test]
    fn invalid_config_reports_hint() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("config.toml"), "[build\n").unwrap();
        stratum(&temp)
            .args(["config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"))
            .stderr(predicate::str::contains("config init --force"));

        // Init still works over the broken file
        stratum(&temp)
            .args(["config", "init", "--force"])
            .assert()
            .success();
    }

    #[test]
    fn inspect_isolated_overlay() {
        let temp = TempDir::new().unwrap();
        let layer = write_layer(temp.path(), "base.tar");

        stratum(&temp)
            .args(["inspect", "--isolated", "-f", "plain", "-p", "etc/hosts", "-l"])
            .arg(&layer)
            .args(["/etc/hosts", "/etc", "/app/hello.txt"])
            .assert()
            .success()
            .stdout(predicate::str::is_match(r"/etc/hosts\tcache\t[0-9a-f]{64}").unwrap())
            .stdout(predicate::str::contains("/etc\tancestor\t-"))
            .stdout(predicate::str::contains("/app/hello.txt\tmissing\t-"));
    }

    #[test]
    fn inspect_json_lists_root() {
        let temp = TempDir::new().unwrap();
        let layer = write_layer(temp.path(), "base.tar");

        stratum(&temp)
            .args(["inspect", "--isolated", "-f", "json", "-p", "app", "-l"])
            .arg(&layer)
            .assert()
            .success()
            .stdout(predicate::str::contains("\"path\": \"/app\""))
            .stdout(predicate::str::contains("\"source\": \"cache\""));
    }

    #[test]
    fn extract_writes_layer() {
        let temp = TempDir::new().unwrap();
        let layer = write_layer(temp.path(), "step.tar");
        let root = temp.path().join("root");
        fs::create_dir(&root).unwrap();

        stratum(&temp)
            .args(["extract", "--no-chown", "-l"])
            .arg(&layer)
            .arg("--root")
            .arg(&root)
            .assert()
            .success()
            .stdout(predicate::str::contains("hello.txt"));

        assert_eq!(fs::read_to_string(root.join("app/hello.txt")).unwrap(), "hello\n");
    }

    #[test]
    fn extract_simulate_writes_nothing() {
        let temp = TempDir::new().unwrap();
        let layer = write_layer(temp.path(), "step.tar");
        let root = temp.path().join("root");
        fs::create_dir(&root).unwrap();

        stratum(&temp)
            .args(["extract", "--simulate", "-f", "json", "-l"])
            .arg(&layer)
            .arg("--root")
            .arg(&root)
            .assert()
            .success()
            .stdout(predicate::str::contains("\"state\": \"simulated-hit\""));

        assert!(!root.join("app").exists());
    }

    #[test]
    fn extract_rejects_multiple_layers() {
        let temp = TempDir::new().unwrap();
        let a = write_layer(temp.path(), "a.tar");
        let b = write_layer(temp.path(), "b.tar");
        let root = temp.path().join("root");
        fs::create_dir(&root).unwrap();

        stratum(&temp)
            .args(["extract", "--no-chown", "-l"])
            .arg(&a)
            .arg("-l")
            .arg(&b)
            .arg("--root")
            .arg(&root)
            .assert()
            .failure()
            .stderr(predicate::str::contains("Expected 1 layer(s)"));

        assert!(!root.join("app").exists());
    }

    #[test]
    fn probe_reports_uncached_step() {
        let temp = TempDir::new().unwrap();
        let store = temp.path().join("store");
        fs::create_dir(&store).unwrap();
        let plan = temp.path().join("plan.toml");
        fs::write(
            &plan,
            "base_key = \"base\"\n\n[[steps]]\ncommand = \"RUN make\"\nkind = \"run\"\n",
        )
        .unwrap();

        stratum(&temp)
            .args(["probe", "-p"])
            .arg(&plan)
            .arg("-s")
            .arg(&store)
            .assert()
            .failure()
            .stderr(predicate::str::contains("Uncached step: RUN make"))
            .stderr(predicate::str::contains("Hint:"));
    }

    #[test]
    fn probe_rejects_malformed_plan() {
        let temp = TempDir::new().unwrap();
        let plan = temp.path().join("plan.toml");
        fs::write(&plan, "[[steps]]\ncommand = \"RUN make\"\nkind = \"shell\"\n").unwrap();

        stratum(&temp)
            .args(["probe", "-p"])
            .arg(&plan)
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid build plan"))
            .stderr(predicate::str::contains("kind = \"run\""));
    }

    #[test]
    fn probe_all_cached() {
        let temp = TempDir::new().unwrap();
        let store = temp.path().join("store");
        fs::create_dir(&store).unwrap();
        let first = chained_key(&["base", "RUN make"]);
        let second = chained_key(&[&first, "RUN make install"]);
        write_layer(&store, &format!("{}.tar", first));
        write_layer(&store, &format!("{}.tar", second));

        let plan = temp.path().join("plan.toml");
        fs::write(
            &plan,
            concat!(
                "base_key = \"base\"\n\n",
                "[[steps]]\ncommand = \"RUN make\"\nkind = \"run\"\n\n",
                "[[steps]]\ncommand = \"RUN make install\"\nkind = \"run\"\n",
            ),
        )
        .unwrap();

        stratum(&temp)
            .args(["probe", "-f", "plain", "-p"])
            .arg(&plan)
            .arg("-s")
            .arg(&store)
            .assert()
            .success()
            .stdout(predicate::str::contains(second));
    }

    #[test]
    fn probe_copy_of_cached_run_output() {
        let temp = TempDir::new().unwrap();
        let store = temp.path().join("store");
        fs::create_dir(&store).unwrap();
        let root = temp.path().join("rootfs");

        // app/hello.txt as extracted: -rw-r--r--, uid 0, gid 0, "hello\n"
        let mut hasher = Sha256::new();
        hasher.update(b"-rw-r--r--0,0hello\n");
        let hello = hex::encode(hasher.finalize());

        let run = chained_key(&["base", "RUN gen"]);
        let copy_cmd = format!("COPY {}/app/hello.txt /dst", root.display());
        let copy = chained_key(&[&run, &copy_cmd, &hello]);
        write_layer(&store, &format!("{}.tar", run));
        write_layer(&store, &format!("{}.tar", copy));

        let plan = temp.path().join("plan.toml");
        fs::write(
            &plan,
            format!(
                concat!(
                    "base_key = \"base\"\nroot = \"{root}\"\n\n",
                    "[[steps]]\ncommand = \"RUN gen\"\nkind = \"run\"\n\n",
                    "[[steps]]\ncommand = \"{cmd}\"\nkind = \"copy\"\nsources = [\"{root}/app/hello.txt\"]\n",
                ),
                root = root.display(),
                cmd = copy_cmd,
            ),
        )
        .unwrap();

        stratum(&temp)
            .args(["probe", "-f", "plain", "-p"])
            .arg(&plan)
            .arg("-s")
            .arg(&store)
            .assert()
            .success()
            .stdout(predicate::str::contains(copy));

        assert!(!root.exists());
    }

    #[test]
    fn run_mounts_and_removes_secrets() {
        let temp = TempDir::new().unwrap();
        let work = temp.path().join("work");
        fs::create_dir(&work).unwrap();

        stratum(&temp)
            .args(["run", "--secret", "token=s3cret", "-m", "token,target=creds/token,env=TOKEN", "-w"])
            .arg(&work)
            .args(["--", "sh", "-c", "test \"$(cat creds/token)\" = \"$TOKEN\""])
            .assert()
            .success();

        assert!(!work.join("creds").exists());
    }

    #[test]
    fn run_propagates_exit_status() {
        let temp = TempDir::new().unwrap();

        stratum(&temp)
            .args(["run", "-w"])
            .arg(temp.path())
            .args(["--", "sh", "-c", "exit 4"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("status 4"));
    }

    #[test]
    fn run_rejects_malformed_secret() {
        let temp = TempDir::new().unwrap();

        stratum(&temp)
            .args(["run", "--secret", "novalue", "--", "true"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("expected ID=VALUE"));
    }
}
