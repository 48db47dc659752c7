use std::process::Command;

fn run_quarry(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_quarry"))
        .args(args)
        .output()
        .unwrap_or_else(|error| panic!("failed to run quarry: {error}"))
}

#[test]
fn config_subcommand_normalises_the_connection_string() {
    let output = run_quarry(&[
        "--connection-string",
        "PORT=1433;hostname=db;Database=app;username=svc",
        "config",
    ]);

    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(
        stdout.trim(),
        "hostname=db;port=1433;database=app;username=svc"
    );
}

#[test]
fn flags_override_connection_string_keys() {
    let output = run_quarry(&[
        "--connection-string",
        "hostname=db;database=app",
        "--database",
        "other",
        "config",
    ]);

    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), "hostname=db;database=other");
}

#[test]
fn missing_connection_input_exits_with_usage_code() {
    let output = run_quarry(&["config"]);

    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("[usage]"));
    assert!(stderr.contains("--connection-string"));
}

#[test]
fn malformed_connection_string_reports_a_config_error() {
    let output = run_quarry(&["--connection-string", "hostname=db;database=app;oops", "config"]);

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("[config]"));
}
