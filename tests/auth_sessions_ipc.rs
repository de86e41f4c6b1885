mod common;

use common::{create_user, open_db, temp_dir, Sidecar, TEST_PASSWORD, TEST_SECRET, TEST_USER};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::json;
use sha2::{Digest, Sha256};

fn workspace_with_user(prefix: &str) -> std::path::PathBuf {
    let workspace = temp_dir(prefix);
    create_user(&workspace, TEST_USER, "test@example.com", TEST_PASSWORD);
    workspace
}

#[test]
fn login_rejects_bad_credentials() {
    let workspace = workspace_with_user("attendanced-auth-bad");
    let mut sc = Sidecar::spawn(&workspace);

    let e = sc.error(
        "auth.login",
        json!({ "username": TEST_USER, "password": "wrong" }),
    );
    assert_eq!(e["code"], "unauthorized");
    assert_eq!(e["message"], "Incorrect username or password");

    let e = sc.error(
        "auth.login",
        json!({ "username": "nobody", "password": TEST_PASSWORD }),
    );
    assert_eq!(e["message"], "Incorrect username or password");

    assert_eq!(
        sc.err_code("auth.login", json!({ "username": TEST_USER })),
        "bad_params"
    );

    drop(sc);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn login_me_and_logout() {
    let workspace = workspace_with_user("attendanced-auth-me");
    let mut sc = Sidecar::spawn(&workspace);

    let login = sc.login(TEST_USER, TEST_PASSWORD);
    assert_eq!(login["tokenType"], "bearer");
    assert!(login["expiresAt"].as_str().is_some());

    let me = sc.ok("auth.me", json!({}));
    assert_eq!(me["username"], TEST_USER);
    assert_eq!(me["email"], "test@example.com");
    assert_eq!(me["sessionId"], login["sessionId"]);

    let out = sc.ok("auth.logout", json!({}));
    assert_eq!(out["loggedOut"], true);
    assert_eq!(sc.err_code("auth.me", json!({})), "unauthorized");

    // Logging out again is harmless.
    let out = sc.ok("auth.logout", json!({}));
    assert_eq!(out["loggedOut"], false);
    sc.token = None;
    let out = sc.ok("auth.logout", json!({}));
    assert_eq!(out["loggedOut"], false);

    drop(sc);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn device_limit_and_session_revoke() {
    let workspace = workspace_with_user("attendanced-auth-devices");
    let mut first = Sidecar::spawn(&workspace);
    let mut second = Sidecar::spawn(&workspace);
    let mut third = Sidecar::spawn(&workspace);

    first.login(TEST_USER, TEST_PASSWORD);
    let second_login = second.login(TEST_USER, TEST_PASSWORD);

    let e = third.error(
        "auth.login",
        json!({ "username": TEST_USER, "password": TEST_PASSWORD }),
    );
    assert_eq!(e["code"], "too_many_devices");
    assert_eq!(
        e["message"],
        "Maximum number of devices reached. Please logout from another device."
    );
    assert_eq!(e["details"]["maxDevices"], 2);

    let listed = first.ok("sessions.list", json!({}));
    let sessions = listed["sessions"].as_array().expect("sessions");
    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions.iter().filter(|s| s["current"] == true).count(), 1);

    first.ok(
        "sessions.revoke",
        json!({ "sessionId": second_login["sessionId"] }),
    );
    assert_eq!(second.err_code("auth.me", json!({})), "unauthorized");
    assert_eq!(
        first.err_code("sessions.revoke", json!({ "sessionId": 9999 })),
        "not_found"
    );

    third.login(TEST_USER, TEST_PASSWORD);
    third.ok("auth.me", json!({}));

    drop(first);
    drop(second);
    drop(third);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn sessions_of_other_users_cannot_be_revoked() {
    let workspace = workspace_with_user("attendanced-auth-other");
    create_user(&workspace, "other", "other@example.com", "other-pass");
    let mut mine = Sidecar::spawn(&workspace);
    let mut theirs = Sidecar::spawn(&workspace);
    mine.login(TEST_USER, TEST_PASSWORD);
    let other = theirs.login("other", "other-pass");

    assert_eq!(
        mine.err_code("sessions.revoke", json!({ "sessionId": other["sessionId"] })),
        "not_found"
    );
    theirs.ok("auth.me", json!({}));

    drop(mine);
    drop(theirs);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn tokens_from_another_secret_are_rejected() {
    let workspace = workspace_with_user("attendanced-auth-secret");
    let mut a = Sidecar::spawn(&workspace);
    a.login(TEST_USER, TEST_PASSWORD);
    let token = a.token.clone();

    let mut b = Sidecar::spawn_with_env(&workspace, &[("SECRET_KEY", "a-different-secret")]);
    b.token = token;
    assert_eq!(b.err_code("auth.me", json!({})), "unauthorized");

    drop(a);
    drop(b);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn stale_sessions_are_purged_at_login() {
    let workspace = workspace_with_user("attendanced-auth-stale");
    let mut first = Sidecar::spawn(&workspace);
    let mut second = Sidecar::spawn(&workspace);
    let mut third = Sidecar::spawn(&workspace);
    first.login(TEST_USER, TEST_PASSWORD);
    second.login(TEST_USER, TEST_PASSWORD);
    assert_eq!(
        third.err_code(
            "auth.login",
            json!({ "username": TEST_USER, "password": TEST_PASSWORD })
        ),
        "too_many_devices"
    );

    let conn = open_db(&workspace);
    conn.execute(
        "UPDATE sessions SET last_seen = '2000-01-01T00:00:00Z'",
        [],
    )
    .expect("backdate sessions");

    let login = third.login(TEST_USER, TEST_PASSWORD);
    let mut stmt = conn.prepare("SELECT id FROM sessions").expect("prepare");
    let ids: Vec<i64> = stmt
        .query_map([], |r| r.get(0))
        .expect("query sessions")
        .collect::<Result<Vec<_>, _>>()
        .expect("session ids");
    drop(stmt);
    assert_eq!(ids, vec![login["sessionId"].as_i64().expect("sessionId")]);
    drop(conn);

    assert_eq!(first.err_code("auth.me", json!({})), "unauthorized");
    third.ok("auth.me", json!({}));

    drop(first);
    drop(second);
    drop(third);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn inactive_users_cannot_login_or_use_old_tokens() {
    let workspace = workspace_with_user("attendanced-auth-inactive");
    let mut sc = Sidecar::spawn(&workspace);
    sc.login(TEST_USER, TEST_PASSWORD);
    sc.ok("auth.me", json!({}));

    let conn = open_db(&workspace);
    conn.execute(
        "UPDATE users SET is_active = 0 WHERE username = ?",
        [TEST_USER],
    )
    .expect("deactivate user");
    drop(conn);

    assert_eq!(sc.err_code("auth.me", json!({})), "unauthorized");
    let e = sc.error(
        "auth.login",
        json!({ "username": TEST_USER, "password": TEST_PASSWORD }),
    );
    assert_eq!(e["code"], "unauthorized");
    assert_eq!(e["message"], "Inactive user");

    drop(sc);
    let _ = std::fs::remove_dir_all(workspace);
}

#[derive(serde::Serialize)]
struct TestClaims {
    sub: String,
    iat: i64,
    exp: i64,
    jti: String,
}

/// Signs a token for `TEST_USER` and registers a session for it directly.
fn token_with_session(workspace: &std::path::Path, exp_offset_secs: i64, jti: &str) -> String {
    let now = chrono::Utc::now().timestamp();
    let claims = TestClaims {
        sub: TEST_USER.to_string(),
        iat: now - 3600,
        exp: now + exp_offset_secs,
        jti: jti.to_string(),
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(TEST_SECRET.as_bytes()),
    )
    .expect("sign token");

    let conn = open_db(workspace);
    let user_id: i64 = conn
        .query_row(
            "SELECT id FROM users WHERE username = ?",
            [TEST_USER],
            |r| r.get(0),
        )
        .expect("user id");
    let now = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    conn.execute(
        "INSERT INTO sessions(user_id, device_name, token_hash, created_at, last_seen)
         VALUES(?, 'forged', ?, ?, ?)",
        (
            user_id,
            format!("{:x}", Sha256::digest(token.as_bytes())),
            &now,
            &now,
        ),
    )
    .expect("insert session");
    token
}

#[test]
fn expired_tokens_are_rejected_even_with_a_session() {
    let workspace = workspace_with_user("attendanced-auth-expired");
    let mut sc = Sidecar::spawn(&workspace);

    sc.token = Some(token_with_session(&workspace, 600, "live-token"));
    let me = sc.ok("auth.me", json!({}));
    assert_eq!(me["username"], TEST_USER);

    sc.token = Some(token_with_session(&workspace, -120, "expired-token"));
    assert_eq!(sc.err_code("auth.me", json!({})), "unauthorized");

    drop(sc);
    let _ = std::fs::remove_dir_all(workspace);
}
