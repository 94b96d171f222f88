use std::io::Write;

use crate::controller::Controller;
use crate::error::JobError;
use crate::launcher;
use crate::parser::Stage;

/// The list of all builtin command names.
const BUILTINS: &[&str] = &["exit", "which", "jobs", "fg", "bg", "kill"];

/// Signal names accepted by `kill`, without the `SIG` prefix.
const SIGNALS: &[(&str, libc::c_int)] = &[
    ("HUP", libc::SIGHUP),
    ("INT", libc::SIGINT),
    ("QUIT", libc::SIGQUIT),
    ("ILL", libc::SIGILL),
    ("TRAP", libc::SIGTRAP),
    ("ABRT", libc::SIGABRT),
    ("BUS", libc::SIGBUS),
    ("FPE", libc::SIGFPE),
    ("KILL", libc::SIGKILL),
    ("USR1", libc::SIGUSR1),
    ("SEGV", libc::SIGSEGV),
    ("USR2", libc::SIGUSR2),
    ("PIPE", libc::SIGPIPE),
    ("ALRM", libc::SIGALRM),
    ("TERM", libc::SIGTERM),
    ("CHLD", libc::SIGCHLD),
    ("CONT", libc::SIGCONT),
    ("STOP", libc::SIGSTOP),
    ("TSTP", libc::SIGTSTP),
    ("TTIN", libc::SIGTTIN),
    ("TTOU", libc::SIGTTOU),
    ("URG", libc::SIGURG),
    ("XCPU", libc::SIGXCPU),
    ("XFSZ", libc::SIGXFSZ),
    ("VTALRM", libc::SIGVTALRM),
    ("PROF", libc::SIGPROF),
    ("WINCH", libc::SIGWINCH),
    ("IO", libc::SIGIO),
    ("SYS", libc::SIGSYS),
];

#[derive(Debug, PartialEq, Eq)]
pub enum BuiltinAction {
    Continue(i32),
    Exit(i32),
}

/// Returns true if the command name is a shell builtin.
pub fn is_builtin(name: &str) -> bool {
    BUILTINS.contains(&name)
}

/// Execute a builtin command in the shell process, writing output to the
/// provided streams.
pub fn execute(
    stage: &Stage,
    controller: &mut Controller,
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> BuiltinAction {
    let args = stage.args.as_slice();
    let action = match stage.program.as_str() {
        "exit" => BuiltinAction::Exit(0),
        "which" => BuiltinAction::Continue(builtin_which(args, stdout)),
        "jobs" => {
            controller.report_active_jobs(stdout);
            BuiltinAction::Continue(0)
        }
        "fg" => BuiltinAction::Continue(builtin_fg(args, controller, stdout, stderr)),
        "bg" => BuiltinAction::Continue(builtin_bg(args, controller, stdout, stderr)),
        "kill" => BuiltinAction::Continue(builtin_kill(args, controller, stdout, stderr)),
        other => {
            let _ = writeln!(stderr, "pssh: builtin command: {other} (not implemented!)");
            BuiltinAction::Continue(1)
        }
    };
    let _ = stdout.flush();
    action
}

fn builtin_which(args: &[String], stdout: &mut dyn Write) -> i32 {
    let Some(program) = args.first() else {
        let _ = writeln!(stdout, "usage: which command");
        return 1;
    };

    if is_builtin(program) {
        let _ = writeln!(stdout, "{program}: shell built-in command");
        return 0;
    }
    match launcher::resolve_command(program) {
        Some(path) => {
            let _ = writeln!(stdout, "{}", path.display());
            0
        }
        None => 1,
    }
}

// ── Job control builtins ──

fn builtin_fg(
    args: &[String],
    controller: &mut Controller,
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> i32 {
    let Some(job_id) = resolve_job_id("fg", args.first(), stderr) else {
        return 1;
    };
    report(controller.foreground_job(job_id, stdout), stderr)
}

fn builtin_bg(
    args: &[String],
    controller: &mut Controller,
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> i32 {
    let Some(job_id) = resolve_job_id("bg", args.first(), stderr) else {
        return 1;
    };
    report(controller.background_job(job_id, stdout), stderr)
}

fn builtin_kill(
    args: &[String],
    controller: &mut Controller,
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> i32 {
    if args.first().map(String::as_str) == Some("-l") {
        let names: Vec<&str> = SIGNALS.iter().map(|(name, _)| *name).collect();
        let _ = writeln!(stdout, "{}", names.join(" "));
        return 0;
    }

    let (signal, targets) = match parse_kill_args(args) {
        Ok(parsed) => parsed,
        Err(message) => {
            let _ = writeln!(stderr, "pssh: {message}");
            return 1;
        }
    };

    // Every target is attempted even when an earlier one fails.
    let mut exit_code = 0;
    for target in targets {
        if let Err(err) = controller.signal_job_or_pid(target, signal) {
            let _ = writeln!(stderr, "pssh: {err}");
            exit_code = 1;
        }
    }
    exit_code
}

// ── Helpers ──

/// Split `kill` arguments into the signal to send and the targets.
fn parse_kill_args(args: &[String]) -> Result<(libc::c_int, &[String]), String> {
    let usage = || "usage: kill [-s signal | -signal] %job | pid ...".to_string();

    let (signal, targets) = match args {
        [flag, name, rest @ ..] if flag == "-s" => (signal_number(name)?, rest),
        [flag] if flag == "-s" => return Err(usage()),
        [flag, rest @ ..] if flag.len() > 1 && flag.starts_with('-') => {
            (signal_number(&flag[1..])?, rest)
        }
        _ => (libc::SIGTERM, args),
    };

    if targets.is_empty() {
        return Err(usage());
    }
    Ok((signal, targets))
}

/// Resolve a signal given as a number, a name, or a `SIG`-prefixed name.
fn signal_number(name: &str) -> Result<libc::c_int, String> {
    if let Ok(number) = name.parse::<libc::c_int>() {
        if (0..=31).contains(&number) {
            return Ok(number);
        }
        return Err(format!("invalid signal: {name}"));
    }

    let upper = name.to_ascii_uppercase();
    let bare = upper.strip_prefix("SIG").unwrap_or(&upper);
    SIGNALS
        .iter()
        .find(|(known, _)| *known == bare)
        .map(|&(_, number)| number)
        .ok_or_else(|| format!("invalid signal: {name}"))
}

/// Parse a job ID from an argument (accepts `%N` or `N`).
fn resolve_job_id(builtin: &str, arg: Option<&String>, stderr: &mut dyn Write) -> Option<usize> {
    let Some(arg) = arg else {
        let _ = writeln!(stderr, "usage: {builtin} %job");
        return None;
    };
    match arg.strip_prefix('%').unwrap_or(arg).parse::<usize>() {
        Ok(id) => Some(id),
        Err(_) => {
            let _ = writeln!(stderr, "pssh: {}", JobError::InvalidTarget(arg.clone()));
            None
        }
    }
}

fn report(result: Result<(), JobError>, stderr: &mut dyn Write) -> i32 {
    match result {
        Ok(()) => 0,
        Err(err) => {
            let _ = writeln!(stderr, "pssh: {err}");
            1
        }
    }
}
