use std::io::Write;
use std::process::{Command, Stdio};

fn run_shell(lines: &[&str]) -> std::process::Output {
    let mut child = Command::new(env!("CARGO_BIN_EXE_pssh"))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .env("PSSH_HISTFILE", "")
        .spawn()
        .expect("spawn pssh");

    {
        let stdin = child.stdin.as_mut().expect("stdin");
        for line in lines {
            writeln!(stdin, "{line}").expect("write line");
        }
        writeln!(stdin, "exit").expect("write exit");
    }

    child.wait_with_output().expect("wait output")
}

/// True when some line of `stdout` reads `[id] <pid>...` with numeric pids.
fn has_launch_line(stdout: &str, id: usize) -> bool {
    let prefix = format!("[{id}] ");
    stdout.lines().any(|line| {
        let line = line.rsplit("$ ").next().unwrap_or(line);
        line.strip_prefix(&prefix).is_some_and(|rest| {
            !rest.is_empty() && rest.split(' ').all(|pid| pid.parse::<u32>().is_ok())
        })
    })
}

#[test]
fn background_completion_reported_during_foreground_wait() {
    let output = run_shell(&["sleep 1 &", "sleep 2", "echo AFTER"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(has_launch_line(&stdout, 0), "stdout was: {stdout}");
    assert!(stdout.contains("[0] + done sleep 1"), "stdout was: {stdout}");
    assert_eq!(stdout.matches("+ done").count(), 1, "stdout was: {stdout}");
    let done = stdout.find("[0] + done").unwrap();
    let after = stdout.find("AFTER").expect("AFTER printed");
    assert!(done < after, "stdout was: {stdout}");
}

#[test]
fn piped_background_job_can_be_killed_by_id() {
    let output = run_shell(&["sleep 5 &", "kill %0", "echo AFTER"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(has_launch_line(&stdout, 0), "stdout was: {stdout}");
    assert!(stdout.contains("AFTER\n"), "stdout was: {stdout}");
    assert!(stderr.is_empty(), "stderr was: {stderr}");
}

#[test]
fn foreground_pipeline_completes_silently() {
    let output = run_shell(&["false | true", "echo AFTER"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("AFTER"), "stdout was: {stdout}");
    assert!(!stdout.contains("done"), "stdout was: {stdout}");
}

#[test]
fn job_ids_are_recycled() {
    let output = run_shell(&["sleep 0.1 &", "sleep 0.5", "sleep 5 &", "jobs", "kill -KILL %0"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("[0] + running sleep 5"), "stdout was: {stdout}");
}

#[test]
fn jobs_lists_stopped_and_running_in_id_order() {
    let output = run_shell(&[
        "sleep 5 &",
        "sleep 5 &",
        "kill -STOP %0",
        "sleep 0.3",
        "jobs",
        "kill -KILL %0 %1",
    ]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("[0] + suspended sleep 5"), "stdout was: {stdout}");

    let stopped = stdout.find("[0] + stopped sleep 5").expect("stopped line");
    let running = stdout.find("[1] + running sleep 5").expect("running line");
    assert!(stopped < running, "stdout was: {stdout}");
}

#[test]
fn kill_of_missing_job_is_reported() {
    let output = run_shell(&["kill %0", "echo AFTER"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("pssh: invalid job number: [0]"), "stderr was: {stderr}");
    assert!(stdout.contains("AFTER"), "stdout was: {stdout}");
}

#[test]
fn kill_terminates_background_job() {
    let output = run_shell(&["sleep 5 &", "kill %0", "sleep 0.3", "jobs", "echo AFTER"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("[0] + done sleep 5"), "stdout was: {stdout}");
    assert!(!stdout.contains("running"), "stdout was: {stdout}");
}

#[test]
fn bg_resumes_stopped_job() {
    let output = run_shell(&[
        "sleep 5 &",
        "kill -s STOP %0",
        "sleep 0.3",
        "bg %0",
        "jobs",
        "kill -KILL %0",
    ]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("[0] + continued sleep 5"), "stdout was: {stdout}");
    assert!(stdout.contains("[0] + running sleep 5"), "stdout was: {stdout}");
}

#[test]
fn fg_waits_for_background_job() {
    let started = std::time::Instant::now();
    let output = run_shell(&["sleep 1 &", "fg %0", "echo AFTER"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(stdout.contains("sleep 1\n"), "stdout was: {stdout}");
    assert!(stdout.contains("AFTER"), "stdout was: {stdout}");
    // A job finished in the foreground is not announced.
    assert!(!stdout.contains("+ done"), "stdout was: {stdout}");
    assert!(started.elapsed() >= std::time::Duration::from_millis(900));
}

#[test]
fn fg_resumes_stopped_job() {
    let output = run_shell(&["sleep 0.5 &", "kill -STOP %0", "sleep 0.2", "fg 0", "echo AFTER"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("[0] + suspended sleep 0.5"), "stdout was: {stdout}");
    assert!(stdout.contains("AFTER"), "stdout was: {stdout}");
    assert!(!stdout.contains("+ done"), "stdout was: {stdout}");
}

#[test]
fn fg_and_bg_reject_unknown_jobs() {
    let output = run_shell(&["fg %3", "bg 4", "fg"]);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("pssh: invalid job number: [3]"), "stderr was: {stderr}");
    assert!(stderr.contains("pssh: invalid job number: [4]"), "stderr was: {stderr}");
    assert!(stderr.contains("usage: fg %job"), "stderr was: {stderr}");
}

#[test]
fn exit_hangs_up_remaining_jobs() {
    let dir = std::env::temp_dir().join(format!("pssh_hangup_{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let marker = dir.join("survived");
    let line = format!("sh -c 'sleep 1; touch {}' &", marker.display());

    let output = run_shell(&[line.as_str(), "kill -STOP %0", "sleep 0.2"]);
    assert!(output.status.success(), "shell did not exit cleanly");

    std::thread::sleep(std::time::Duration::from_millis(1500));
    assert!(!marker.exists(), "background job outlived the shell");
    let _ = std::fs::remove_dir_all(&dir);
}
