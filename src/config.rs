use std::path::PathBuf;

/// Default Job Table capacity.
pub const DEFAULT_MAX_JOBS: usize = 100;

/// Largest accepted `PSSH_MAX_JOBS`.
pub const MAX_JOBS_LIMIT: usize = 4096;

/// Runtime settings read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum number of concurrent jobs.
    pub max_jobs: usize,
    /// Where the line editor persists command history, if anywhere.
    pub history_path: Option<PathBuf>,
    pub show_banner: bool,
    /// stdin is a terminal: take terminal control and use the raw-mode editor.
    pub interactive: bool,
}

impl Config {
    pub fn from_env() -> Self {
        let lookup = |key: &str| std::env::var(key).ok();
        let interactive = unsafe { libc::isatty(libc::STDIN_FILENO) } == 1;
        Self::from_lookup(lookup, interactive)
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>, interactive: bool) -> Self {
        let max_jobs = match lookup("PSSH_MAX_JOBS").map(|v| v.trim().parse::<usize>()) {
            Some(Ok(n)) if n > MAX_JOBS_LIMIT => {
                tracing::warn!(requested = n, limit = MAX_JOBS_LIMIT, "PSSH_MAX_JOBS capped");
                MAX_JOBS_LIMIT
            }
            Some(Ok(n)) if n > 0 => n,
            Some(_) => {
                tracing::warn!("ignoring invalid PSSH_MAX_JOBS");
                DEFAULT_MAX_JOBS
            }
            None => DEFAULT_MAX_JOBS,
        };

        let history_path = match lookup("PSSH_HISTFILE") {
            Some(path) if path.is_empty() => None,
            Some(path) => Some(PathBuf::from(path)),
            None => lookup("HOME").map(|home| PathBuf::from(home).join(".pssh_history")),
        };

        Config {
            max_jobs,
            history_path,
            show_banner: lookup("PSSH_NO_BANNER").is_none(),
            interactive,
        }
    }
}
