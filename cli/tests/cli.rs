use assert_cmd::Command;
use std::fs;

const PANICKY: &str = "module panicky
declare @runtime._panic(ptr) -> void
define @main(i64) -> i64 {
bb0:
  call @runtime._panic(null)
  ret $0
}
";

fn kiln() -> Command {
    Command::cargo_bin("kiln").unwrap()
}

#[test]
fn opt_writes_a_lowered_module() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("panicky.kir");
    let output = dir.path().join("out.kir");
    fs::write(&input, PANICKY).unwrap();

    kiln()
        .args(["opt", "-O", "1", "-s", "2", "--panic", "trap", "--verify", "-o"])
        .arg(&output)
        .arg(&input)
        .assert()
        .success();

    let lowered = fs::read_to_string(&output).unwrap();
    assert!(lowered.contains("trap"));
    assert!(lowered.contains("optsize"));
    kiln().arg("verify").arg(&output).assert().success();
}

#[test]
fn opt_report_json_lists_phases() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("m.kir");
    fs::write(&input, PANICKY).unwrap();

    let out = kiln().args(["opt", "--report", "json", "--emit", "json"]).arg(&input).output().unwrap();
    assert!(out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("\"phase\": \"LowerTasks\""));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.trim_start().starts_with('{'));
}

#[test]
fn invalid_module_fails_with_exit_code_one() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("bad.kir");
    fs::write(&input, "module bad\ndefine @f() -> i64 {\nbb0:\n  ret\n}\n").unwrap();

    let out = kiln().arg("verify").arg(&input).output().unwrap();
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("KILN | ERROR"));

    let out = kiln().args(["opt", "--verify"]).arg(&input).output().unwrap();
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("input module failed verification"));
}

#[test]
fn missing_input_is_an_error() {
    kiln().args(["opt", "/nonexistent/nothing.kir"]).assert().failure().code(1);
}

#[test]
fn plan_lists_trap_phase_only_when_requested() {
    let out = kiln().args(["plan", "-O", "2"]).output().unwrap();
    let text = String::from_utf8_lossy(&out.stdout).to_string();
    assert!(text.contains("lower-nil-checks"));
    assert!(!text.contains("trap-panics"));

    let out = kiln().args(["plan", "--panic", "trap"]).output().unwrap();
    let text = String::from_utf8_lossy(&out.stdout).to_string();
    assert!(text.contains("trap-panics"));
    assert!(!text.contains("lower-nil-checks"));
}
