use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use os_pipe::{PipeReader, PipeWriter};

use crate::builtins;
use crate::error::LaunchError;
use crate::job_control::{self, Pid};
use crate::parser::Pipeline;
use crate::signals;

/// The processes of a freshly launched pipeline.
#[derive(Debug)]
pub struct Launched {
    /// One pid per stage, in launch order.
    pub pids: Vec<Pid>,
    /// Group every stage joined; the first stage's pid.
    pub pgid: Pid,
}

/// Fork one process per stage, wired stage-to-stage through pipes, all in a
/// new process group led by the first stage.
///
/// Every command is resolved before anything is spawned, so a missing
/// command aborts the whole pipeline instead of running part of it.
pub fn launch(pipeline: &Pipeline) -> Result<Launched, LaunchError> {
    for stage in &pipeline.stages {
        if builtins::is_builtin(&stage.program) {
            return Err(LaunchError::BuiltinInPipeline(stage.program.clone()));
        }
        if resolve_command(&stage.program).is_none() {
            return Err(LaunchError::CommandNotFound(stage.program.clone()));
        }
    }

    let mut input = match &pipeline.infile {
        Some(path) => Some(open_input(path)?),
        None => None,
    };
    let mut output = match &pipeline.outfile {
        Some(path) => Some(open_output(path)?),
        None => None,
    };

    let Some(last) = pipeline.stages.len().checked_sub(1) else {
        return Ok(Launched {
            pids: Vec::new(),
            pgid: 0,
        });
    };
    let (mut readers, mut writers) = create_pipes(last)?;
    let mut pids: Vec<Pid> = Vec::with_capacity(pipeline.stages.len());
    let mut pgid: Pid = 0;

    for (index, stage) in pipeline.stages.iter().enumerate() {
        let mut command = Command::new(&stage.program);
        command.args(&stage.args).process_group(pgid);

        let stdin = if index == 0 {
            input.take().map(Stdio::from)
        } else {
            readers[index - 1].take().map(Stdio::from)
        };
        if let Some(stdin) = stdin {
            command.stdin(stdin);
        }

        let stdout = if index == last {
            output.take().map(Stdio::from)
        } else {
            writers[index].take().map(Stdio::from)
        };
        if let Some(stdout) = stdout {
            command.stdout(stdout);
        }

        unsafe {
            command.pre_exec(signals::reset_for_child);
        }

        let child = match command.spawn() {
            Ok(child) => child,
            Err(source) => {
                abort_group(pgid);
                return Err(classify_spawn_error(&stage.program, source));
            }
        };

        let pid = child.id() as Pid;
        if index == 0 {
            pgid = pid;
        }
        // Close the parent's race with the child's own setpgid.
        if let Err(err) = job_control::set_process_group(pid, pgid) {
            tracing::warn!(pid, pgid, %err, "parent setpgid failed");
        }
        tracing::debug!(pid, pgid, program = %stage.program, "stage spawned");
        pids.push(pid);
        // `command` drops here, closing the parent's copies of this stage's
        // pipe ends; the relay reaps the child, so `child` is not waited on.
    }

    Ok(Launched { pids, pgid })
}

/// Locate an executable: a name containing `/` is checked as given,
/// anything else is searched for on `PATH`.
pub fn resolve_command(cmd: &str) -> Option<PathBuf> {
    if cmd.is_empty() {
        return None;
    }
    if cmd.contains('/') {
        let path = PathBuf::from(cmd);
        return is_executable(&path).then_some(path);
    }

    let path_var = std::env::var("PATH").ok()?;
    path_var
        .split(':')
        .filter(|dir| !dir.is_empty())
        .map(|dir| Path::new(dir).join(cmd))
        .find(|candidate| is_executable(candidate))
}

/// Check if a path points to an executable file.
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    let Ok(meta) = path.metadata() else {
        return false;
    };
    meta.is_file() && meta.permissions().mode() & 0o111 != 0
}

fn open_input(path: &str) -> Result<File, LaunchError> {
    File::open(path).map_err(|source| LaunchError::Redirect {
        path: path.to_string(),
        source,
    })
}

pub(crate) fn open_output(path: &str) -> Result<File, LaunchError> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o644)
        .open(path)
        .map_err(|source| LaunchError::Redirect {
            path: path.to_string(),
            source,
        })
}

/// All `count` pipes are created before any child is forked. Each end is
/// close-on-exec, so a stage never keeps another stage's descriptors open.
fn create_pipes(
    count: usize,
) -> Result<(Vec<Option<PipeReader>>, Vec<Option<PipeWriter>>), LaunchError> {
    let mut readers = Vec::with_capacity(count);
    let mut writers = Vec::with_capacity(count);
    for _ in 0..count {
        let (reader, writer) = os_pipe::pipe().map_err(LaunchError::Pipe)?;
        readers.push(Some(reader));
        writers.push(Some(writer));
    }
    Ok((readers, writers))
}

fn classify_spawn_error(program: &str, source: io::Error) -> LaunchError {
    match source.raw_os_error() {
        Some(code) if code == libc::EAGAIN || code == libc::ENOMEM => LaunchError::Fork {
            command: program.to_string(),
            source,
        },
        _ if source.kind() == io::ErrorKind::NotFound => {
            LaunchError::CommandNotFound(program.to_string())
        }
        _ => LaunchError::Exec {
            command: program.to_string(),
            source,
        },
    }
}

/// Kill whatever part of a pipeline already started.
pub(crate) fn abort_group(pgid: Pid) {
    if pgid <= 0 {
        return;
    }
    if let Err(err) = job_control::signal_group(pgid, libc::SIGKILL) {
        tracing::warn!(pgid, %err, "failed to kill partial pipeline");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_pipeline;

    #[test]
    fn resolves_programs_on_path() {
        let path = resolve_command("sh").expect("sh on PATH");
        assert!(path.ends_with("sh"));
    }

    #[test]
    fn absolute_path_is_checked_directly() {
        assert!(resolve_command("/bin/sh").is_some());
        assert!(resolve_command("/no/such/binary").is_none());
        assert!(resolve_command("").is_none());
    }

    #[test]
    fn missing_stage_aborts_before_spawning() {
        let pipeline = parse_pipeline("sh | pssh_no_such_command_xyz").unwrap();
        let err = launch(&pipeline).unwrap_err();
        assert!(matches!(err, LaunchError::CommandNotFound(ref c) if c == "pssh_no_such_command_xyz"));
        assert!(!err.is_fatal());
    }

    #[test]
    fn builtin_inside_pipeline_is_rejected() {
        let pipeline = parse_pipeline("jobs | sort").unwrap();
        assert!(matches!(
            launch(&pipeline),
            Err(LaunchError::BuiltinInPipeline(ref c)) if c == "jobs"
        ));
    }

    #[test]
    fn unreadable_input_file_is_reported() {
        let pipeline = parse_pipeline("sh < /no/such/dir/input.txt").unwrap();
        let err = launch(&pipeline).unwrap_err();
        assert!(matches!(err, LaunchError::Redirect { ref path, .. } if path == "/no/such/dir/input.txt"));
        assert!(!err.is_fatal());
    }

    #[test]
    fn every_stage_joins_the_first_stage_group() {
        let pipeline = parse_pipeline("sleep 1 | sleep 1").unwrap();
        let launched = launch(&pipeline).unwrap();

        assert_eq!(launched.pids.len(), 2);
        assert_eq!(launched.pgid, launched.pids[0]);
        for &pid in &launched.pids {
            assert_eq!(unsafe { libc::getpgid(pid) }, launched.pgid);
        }
        assert_ne!(launched.pgid, job_control::shell_pgid());

        abort_group(launched.pgid);
        for &pid in &launched.pids {
            let mut status = 0;
            unsafe { libc::waitpid(pid, &mut status, 0) };
        }
    }

    #[test]
    fn spawn_errors_are_classified() {
        let err = classify_spawn_error("x", io::Error::from_raw_os_error(libc::EAGAIN));
        assert!(err.is_fatal());
        let err = classify_spawn_error("x", io::Error::from(io::ErrorKind::NotFound));
        assert!(matches!(err, LaunchError::CommandNotFound(_)));
        let err = classify_spawn_error("x", io::Error::from_raw_os_error(libc::EACCES));
        assert!(matches!(err, LaunchError::Exec { .. }));
    }
}
