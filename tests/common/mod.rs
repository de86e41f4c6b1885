#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub const TEST_SECRET: &str = "integration-test-secret";
pub const TEST_AGE_KEY: &str = "AAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8=";
pub const TEST_USER: &str = "testuser";
pub const TEST_PASSWORD: &str = "testpass123";

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn base_command(cwd: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_attendanced"));
    cmd.current_dir(cwd)
        .env("SECRET_KEY", TEST_SECRET)
        .env("AGE_ENCRYPTION_KEY", TEST_AGE_KEY)
        .env_remove("ATTENDANCE_WORKSPACE")
        .env_remove("ACCESS_TOKEN_EXPIRE_MINUTES")
        .env_remove("SESSION_CLEANUP_MINUTES")
        .env_remove("MAX_DEVICES_PER_USER")
        .env_remove("RUST_LOG");
    cmd
}

/// Runs a one-shot subcommand against `workspace`; true on exit status 0.
pub fn run_cli(workspace: &Path, subcommand: &str, args: &[&str]) -> bool {
    base_command(workspace)
        .arg(subcommand)
        .arg("--workspace")
        .arg(workspace)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .expect("run attendanced subcommand")
        .success()
}

pub fn create_user(workspace: &Path, username: &str, email: &str, password: &str) {
    assert!(
        run_cli(
            workspace,
            "create-user",
            &["--username", username, "--email", email, "--password", password],
        ),
        "create-user failed for {}",
        username
    );
}

pub fn open_db(workspace: &Path) -> rusqlite::Connection {
    rusqlite::Connection::open(workspace.join("attendance.sqlite3")).expect("open db")
}

pub struct Sidecar {
    child: Child,
    stdin: Option<ChildStdin>,
    reader: BufReader<ChildStdout>,
    next_id: u64,
    pub token: Option<String>,
}

impl Sidecar {
    pub fn spawn(workspace: &Path) -> Sidecar {
        Self::spawn_with_env(workspace, &[])
    }

    pub fn spawn_with_env(workspace: &Path, env: &[(&str, &str)]) -> Sidecar {
        let mut cmd = base_command(workspace);
        for (k, v) in env {
            cmd.env(k, v);
        }
        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn attendanced");
        let stdin = child.stdin.take().expect("child stdin");
        let stdout = child.stdout.take().expect("child stdout");
        let mut sidecar = Sidecar {
            child,
            stdin: Some(stdin),
            reader: BufReader::new(stdout),
            next_id: 0,
            token: None,
        };
        sidecar.ok(
            "workspace.select",
            json!({ "path": workspace.to_string_lossy() }),
        );
        sidecar
    }

    pub fn send_line(&mut self, line: &str) -> serde_json::Value {
        let stdin = self.stdin.as_mut().expect("stdin open");
        writeln!(stdin, "{}", line).expect("write request");
        stdin.flush().expect("flush request");

        let mut out = String::new();
        self.reader.read_line(&mut out).expect("read response line");
        assert!(!out.trim().is_empty(), "empty response");
        serde_json::from_str(out.trim()).expect("parse response json")
    }

    pub fn call(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        let mut payload = json!({
            "id": id,
            "method": method,
            "params": params,
        });
        if let Some(t) = &self.token {
            payload["token"] = json!(t);
        }
        let value = self.send_line(&payload.to_string());
        assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
        value
    }

    pub fn ok(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let value = self.call(method, params);
        assert!(
            value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
            "{} failed: {}",
            method,
            value
        );
        value.get("result").cloned().unwrap_or_else(|| json!({}))
    }

    /// Returns the error code of a call that is expected to fail.
    pub fn err_code(&mut self, method: &str, params: serde_json::Value) -> String {
        let value = self.call(method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(false),
            "{} unexpectedly succeeded: {}",
            method,
            value
        );
        value["error"]["code"].as_str().unwrap_or("").to_string()
    }

    pub fn error(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let value = self.call(method, params);
        assert_eq!(value.get("ok").and_then(|v| v.as_bool()), Some(false));
        value["error"].clone()
    }

    pub fn login(&mut self, username: &str, password: &str) -> serde_json::Value {
        let res = self.ok(
            "auth.login",
            json!({ "username": username, "password": password, "deviceName": "test-client" }),
        );
        self.token = res["accessToken"].as_str().map(|s| s.to_string());
        res
    }

    pub fn create_student(&mut self, name: &str, age: i64, level: &str, price: serde_json::Value) -> i64 {
        let res = self.ok(
            "students.create",
            json!({ "name": name, "age": age, "level": level, "pricePerClass": price }),
        );
        res["id"].as_i64().expect("student id")
    }
}

impl Drop for Sidecar {
    fn drop(&mut self) {
        self.stdin.take();
        let _ = self.child.wait();
    }
}

/// Fresh workspace with one login, and a sidecar already authenticated as it.
pub fn logged_in(prefix: &str) -> (PathBuf, Sidecar) {
    let workspace = temp_dir(prefix);
    create_user(&workspace, TEST_USER, "test@example.com", TEST_PASSWORD);
    let mut sidecar = Sidecar::spawn(&workspace);
    sidecar.login(TEST_USER, TEST_PASSWORD);
    (workspace, sidecar)
}
