mod builtins;
mod config;
mod controller;
mod editor;
mod error;
mod expander;
mod job_control;
mod jobs;
mod launcher;
mod parser;
mod redirect;
mod signals;
mod status;

use std::io::{self, Write};
use std::process::ExitCode;

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::builtins::BuiltinAction;
use crate::config::Config;
use crate::controller::Controller;
use crate::editor::LineEditor;
use crate::job_control::Terminal;
use crate::parser::Pipeline;

fn main() -> ExitCode {
    // Diagnostics go to stderr; RUST_LOG picks the level, errors only by default.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("error")))
        .init();

    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("pssh: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> io::Result<ExitCode> {
    let config = Config::from_env();

    let mut terminal = Terminal::new(config.interactive);
    terminal.claim()?;
    signals::install()?;

    let mut controller = Controller::new(config.max_jobs, terminal);
    let mut editor = LineEditor::new(config.history_path.clone());

    if terminal.is_interactive() && config.show_banner {
        print_banner();
    }

    let mut stdout = io::stdout();
    loop {
        controller.sweep_completed(&mut stdout);

        let line = {
            let mut idle = |out: &mut dyn Write| controller.dispatch_pending(out);
            match editor.read_line(&build_prompt(), &mut idle) {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::error!(%e, "reading input failed");
                    break;
                }
            }
        };

        let Some(pipeline) = parser::parse_pipeline(&line) else {
            continue;
        };
        editor.add_to_history(&line);

        if pipeline.invalid_syntax {
            eprintln!("pssh: invalid syntax");
            continue;
        }

        if is_single_builtin(&pipeline) {
            match run_builtin(&pipeline, &mut controller) {
                BuiltinAction::Exit(code) => {
                    controller.hangup_all();
                    return Ok(exit_code(code));
                }
                BuiltinAction::Continue(status) => {
                    tracing::debug!(status, program = %pipeline.stages[0].program, "builtin finished");
                }
            }
            continue;
        }

        if let Err(e) = controller.run(&pipeline, &mut stdout) {
            eprintln!("pssh: {e}");
            if e.is_fatal() {
                controller.hangup_all();
                return Ok(ExitCode::FAILURE);
            }
        }
    }

    controller.hangup_all();
    Ok(ExitCode::SUCCESS)
}

fn is_single_builtin(pipeline: &Pipeline) -> bool {
    matches!(pipeline.stages.as_slice(), [stage] if builtins::is_builtin(&stage.program))
}

/// Run a lone built-in in the shell process, honoring `> file`.
fn run_builtin(pipeline: &Pipeline, controller: &mut Controller) -> BuiltinAction {
    let stage = &pipeline.stages[0];

    let mut stderr = io::stderr();
    match &pipeline.outfile {
        Some(path) => match launcher::open_output(path) {
            Ok(mut file) => builtins::execute(stage, controller, &mut file, &mut stderr),
            Err(e) => {
                let _ = writeln!(stderr, "pssh: {e}");
                BuiltinAction::Continue(1)
            }
        },
        None => builtins::execute(stage, controller, &mut io::stdout(), &mut stderr),
    }
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

/// `<cwd>$ `, or `?$ ` when the working directory cannot be read.
fn build_prompt() -> String {
    match std::env::current_dir() {
        Ok(cwd) => format!("{}$ ", cwd.display()),
        Err(_) => "?$ ".to_string(),
    }
}

fn print_banner() {
    println!("                    ________   ");
    println!("_________________________  /_  ");
    println!("___  __ \\_  ___/_  ___/_  __ \\ ");
    println!("__  /_/ /(__  )_(__  )_  / / / ");
    println!("_  .___//____/ /____/ /_/ /_/  ");
    println!("/_/ Type 'exit' or ctrl+d to quit\n");
}
