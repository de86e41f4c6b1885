mod common;

use common::logged_in;
use serde_json::json;

#[test]
fn mark_list_and_delete_attendance() {
    let (workspace, mut sc) = logged_in("attendanced-attendance");
    let a = sc.create_student("Alice", 20, "Beginner", json!(30));
    let b = sc.create_student("Bob", 21, "Beginner", json!(30));

    let first = sc.ok(
        "attendance.mark",
        json!({ "studentId": a, "date": "2024-03-01" }),
    );
    assert_eq!(first["studentId"], a);
    assert_eq!(first["date"], "2024-03-01");
    sc.ok("attendance.mark", json!({ "studentId": a, "date": "2024-03-08" }));
    sc.ok("attendance.mark", json!({ "studentId": b, "date": "2024-03-08" }));

    let dup = sc.error(
        "attendance.mark",
        json!({ "studentId": a, "date": "2024-03-01" }),
    );
    assert_eq!(dup["code"], "already_marked");
    assert_eq!(dup["details"]["attendanceId"], first["id"]);

    assert_eq!(
        sc.err_code("attendance.mark", json!({ "studentId": 9999, "date": "2024-03-01" })),
        "not_found"
    );
    assert_eq!(
        sc.err_code("attendance.mark", json!({ "studentId": a, "date": "01/03/2024" })),
        "bad_params"
    );

    let for_a = sc.ok("attendance.list", json!({ "studentId": a }));
    let dates: Vec<&str> = for_a["attendance"]
        .as_array()
        .expect("attendance")
        .iter()
        .map(|r| r["date"].as_str().expect("date"))
        .collect();
    assert_eq!(dates, vec!["2024-03-08", "2024-03-01"]);

    let ranged = sc.ok(
        "attendance.list",
        json!({ "startDate": "2024-03-05", "endDate": "2024-03-31" }),
    );
    assert_eq!(ranged["attendance"].as_array().expect("attendance").len(), 2);

    assert_eq!(
        sc.err_code(
            "attendance.list",
            json!({ "startDate": "2024-03-31", "endDate": "2024-03-01" })
        ),
        "bad_params"
    );

    let id = first["id"].as_i64().expect("id");
    sc.ok("attendance.delete", json!({ "attendanceId": id }));
    assert_eq!(
        sc.err_code("attendance.delete", json!({ "attendanceId": id })),
        "not_found"
    );
    // The slot is free again.
    sc.ok("attendance.mark", json!({ "studentId": a, "date": "2024-03-01" }));

    drop(sc);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn list_rejects_bounds_that_are_not_date_strings() {
    let (workspace, mut sc) = logged_in("attendanced-attendance-bounds");
    let a = sc.create_student("Alice", 20, "Beginner", json!(30));
    sc.ok("attendance.mark", json!({ "studentId": a, "date": "2024-01-01" }));
    sc.ok("attendance.mark", json!({ "studentId": a, "date": "2024-06-01" }));

    for params in [
        json!({ "studentId": a, "startDate": 20240301 }),
        json!({ "studentId": a, "endDate": 20240301 }),
        json!({ "studentId": a, "startDate": true }),
        json!({ "studentId": a, "endDate": ["2024-03-01"] }),
    ] {
        assert_eq!(
            sc.err_code("attendance.list", params.clone()),
            "bad_params",
            "{}",
            params
        );
    }

    // Null still means "no bound".
    let all = sc.ok(
        "attendance.list",
        json!({ "studentId": a, "startDate": null, "endDate": null }),
    );
    assert_eq!(all["attendance"].as_array().expect("attendance").len(), 2);

    let from_march = sc.ok(
        "attendance.list",
        json!({ "studentId": a, "startDate": "2024-03-01" }),
    );
    let rows = from_march["attendance"].as_array().expect("attendance");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["date"], "2024-06-01");

    drop(sc);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn deleting_a_student_removes_its_marks() {
    let (workspace, mut sc) = logged_in("attendanced-attendance-cascade");
    let a = sc.create_student("Alice", 20, "Beginner", json!(30));
    sc.ok("attendance.mark", json!({ "studentId": a, "date": "2024-03-01" }));
    sc.ok("students.delete", json!({ "studentId": a }));

    let all = sc.ok("attendance.list", json!({}));
    assert!(all["attendance"].as_array().expect("attendance").is_empty());

    drop(sc);
    let _ = std::fs::remove_dir_all(workspace);
}
