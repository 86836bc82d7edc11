use std::process::Command;

fn admin(database: &std::path::Path, args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_course_admin"))
        .arg("--database")
        .arg(database)
        .args(args)
        .output()
        .unwrap()
}

#[test]
fn failures_exit_non_zero() {
    let dir = tempfile::tempdir().unwrap();
    let database = dir.path().join("admin.db");

    let output = admin(&database, &["category", "list"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("Web Development"));

    let output = admin(&database, &["course", "show", "4242"]);
    assert!(!output.status.success());
    let output = admin(&database, &["user", "delete", "4242"]);
    assert!(!output.status.success());
}
