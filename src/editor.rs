//! Prompt line editor.
//!
//! On a terminal the editor runs in raw mode and polls for keys, calling an
//! idle hook between polls so job notices can be printed while the user is
//! still typing. Piped input falls back to plain buffered reads.

use std::fs::OpenOptions;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crossterm::{
    cursor,
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{self, ClearType},
    tty::IsTty,
};

const MAX_HISTORY_SIZE: usize = 10_000;

/// How long the editor waits for a key before running the idle hook.
const IDLE_INTERVAL: Duration = Duration::from_millis(100);

/// Called while the editor waits for input; whatever it writes is shown above
/// the prompt, which is then redrawn.
pub type IdleHook<'a> = dyn FnMut(&mut dyn Write) + 'a;

/// Raw mode for as long as the guard lives, restored even on panic.
struct RawModeGuard;

impl RawModeGuard {
    fn enter() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(RawModeGuard)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

// ── Line buffer ──

/// The line being edited, as `char`s so the cursor never splits a code point.
#[derive(Debug, Default)]
struct LineBuffer {
    chars: Vec<char>,
    cursor: usize,
}

impl LineBuffer {
    fn text(&self) -> String {
        self.chars.iter().collect()
    }

    fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    fn replace(&mut self, text: &str) {
        self.chars = text.chars().collect();
        self.cursor = self.chars.len();
    }

    fn clear(&mut self) {
        self.chars.clear();
        self.cursor = 0;
    }

    fn insert(&mut self, c: char) {
        self.chars.insert(self.cursor, c);
        self.cursor += 1;
    }

    /// Returns false when there was nothing to erase.
    fn backspace(&mut self) -> bool {
        if self.cursor == 0 {
            return false;
        }
        self.cursor -= 1;
        self.chars.remove(self.cursor);
        true
    }

    fn delete(&mut self) -> bool {
        if self.cursor >= self.chars.len() {
            return false;
        }
        self.chars.remove(self.cursor);
        true
    }

    fn erase_to_start(&mut self) {
        self.chars.drain(..self.cursor);
        self.cursor = 0;
    }

    fn left(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    fn right(&mut self) {
        self.cursor = (self.cursor + 1).min(self.chars.len());
    }

    fn home(&mut self) {
        self.cursor = 0;
    }

    fn end(&mut self) {
        self.cursor = self.chars.len();
    }
}

// ── History ──

/// Submitted lines, oldest first, optionally mirrored to a file.
#[derive(Debug, Default)]
struct History {
    entries: Vec<String>,
    /// Entry being viewed while browsing; `entries.len()` when not browsing.
    position: usize,
    /// The unsubmitted line to return to after browsing past the newest entry.
    draft: String,
    path: Option<PathBuf>,
}

impl History {
    fn load(path: Option<PathBuf>) -> Self {
        let entries: Vec<String> = path
            .as_deref()
            .and_then(|p| std::fs::read_to_string(p).ok())
            .map(|text| {
                text.lines()
                    .filter(|line| !line.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        History {
            position: entries.len(),
            entries,
            draft: String::new(),
            path,
        }
    }

    /// Record a submitted line. Blank lines and repeats of the newest entry
    /// are skipped.
    fn push(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() || self.entries.last().map(String::as_str) == Some(line) {
            return;
        }
        self.entries.push(line.to_string());
        if self.entries.len() > MAX_HISTORY_SIZE {
            let excess = self.entries.len() - MAX_HISTORY_SIZE;
            self.entries.drain(..excess);
        }
        if let Some(path) = &self.path {
            append_to_file(path, line);
        }
    }

    fn stop_browsing(&mut self) {
        self.position = self.entries.len();
        self.draft.clear();
    }

    /// Step back one entry, remembering `current` when browsing starts.
    fn older(&mut self, current: &str) -> Option<&str> {
        if self.position == 0 {
            return None;
        }
        if self.position == self.entries.len() {
            self.draft = current.to_string();
        }
        self.position -= 1;
        Some(&self.entries[self.position])
    }

    /// Step forward one entry; past the newest entry the draft comes back.
    fn newer(&mut self) -> Option<&str> {
        if self.position >= self.entries.len() {
            return None;
        }
        self.position += 1;
        if self.position == self.entries.len() {
            Some(&self.draft)
        } else {
            Some(&self.entries[self.position])
        }
    }
}

fn append_to_file(path: &Path, line: &str) {
    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(mut file) => {
            let _ = writeln!(file, "{line}");
        }
        Err(err) => tracing::debug!(path = %path.display(), %err, "history not saved"),
    }
}

// ── Editor ──

enum KeyAction {
    Continue,
    Submit(String),
    Eof,
}

/// What the terminal needs after a key was handled.
enum Repaint {
    None,
    Cursor,
    Line,
}

pub struct LineEditor {
    line: LineBuffer,
    history: History,
}

impl LineEditor {
    /// Create an editor, loading any history already in `history_path`.
    pub fn new(history_path: Option<PathBuf>) -> Self {
        LineEditor {
            line: LineBuffer::default(),
            history: History::load(history_path),
        }
    }

    /// Read one line of input after printing `prompt`.
    ///
    /// Returns `Ok(None)` at end of input (Ctrl-D on an empty line, or stdin
    /// closed). While no key is pending, `idle` runs every [`IDLE_INTERVAL`].
    /// When stdin is not a terminal the line is read plainly and `idle` is
    /// never called.
    pub fn read_line(&mut self, prompt: &str, idle: &mut IdleHook<'_>) -> io::Result<Option<String>> {
        if !io::stdin().is_tty() {
            return read_plain_line(prompt);
        }

        self.line.clear();
        self.history.stop_browsing();
        let _raw = RawModeGuard::enter()?;

        // Raw mode disables echo, so the prompt is ours to draw.
        print!("{prompt}");
        io::stdout().flush()?;

        loop {
            let ready = match event::poll(IDLE_INTERVAL) {
                Ok(ready) => ready,
                // A child changing state interrupts the wait.
                Err(e) if e.kind() == io::ErrorKind::Interrupted => false,
                Err(e) => return Err(e),
            };
            if !ready {
                self.run_idle(prompt, idle)?;
                continue;
            }

            let key = match event::read() {
                Ok(Event::Key(key)) if key.kind != KeyEventKind::Release => key,
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };

            match self.handle_key(key, prompt)? {
                KeyAction::Continue => {}
                KeyAction::Submit(line) => return Ok(Some(line)),
                KeyAction::Eof => return Ok(None),
            }
        }
    }

    /// Remember a submitted line.
    pub fn add_to_history(&mut self, line: &str) {
        self.history.push(line);
    }

    fn run_idle(&self, prompt: &str, idle: &mut IdleHook<'_>) -> io::Result<()> {
        let mut notices = Vec::new();
        idle(&mut notices);
        if notices.is_empty() {
            return Ok(());
        }

        execute!(
            io::stdout(),
            cursor::MoveToColumn(0),
            terminal::Clear(ClearType::CurrentLine),
        )?;
        print!("{}", raw_lines(&String::from_utf8_lossy(&notices)));
        self.redraw(prompt)
    }

    fn handle_key(&mut self, key: KeyEvent, prompt: &str) -> io::Result<KeyAction> {
        use KeyCode::*;

        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        let repaint = match key.code {
            Enter => {
                print!("\r\n");
                io::stdout().flush()?;
                return Ok(KeyAction::Submit(self.line.text()));
            }
            Char('d') if ctrl && self.line.is_empty() => {
                print!("\r\n");
                io::stdout().flush()?;
                return Ok(KeyAction::Eof);
            }
            Char('d') if ctrl => {
                self.line.delete();
                Repaint::Line
            }
            Char('c') if ctrl => {
                // ISIG is off in raw mode, so this is a key, not SIGINT.
                print!("^C\r\n");
                self.line.clear();
                self.history.stop_browsing();
                Repaint::Line
            }
            // Nothing to suspend at the prompt.
            Char('z') if ctrl => Repaint::None,
            Char('a') if ctrl => {
                self.line.home();
                Repaint::Cursor
            }
            Char('e') if ctrl => {
                self.line.end();
                Repaint::Cursor
            }
            Char('u') if ctrl => {
                self.line.erase_to_start();
                Repaint::Line
            }
            Home => {
                self.line.home();
                Repaint::Cursor
            }
            End => {
                self.line.end();
                Repaint::Cursor
            }
            Left => {
                self.line.left();
                Repaint::Cursor
            }
            Right => {
                self.line.right();
                Repaint::Cursor
            }
            Up => match self.history.older(&self.line.text()) {
                Some(entry) => {
                    self.line.replace(entry);
                    Repaint::Line
                }
                None => Repaint::None,
            },
            Down => match self.history.newer() {
                Some(entry) => {
                    self.line.replace(entry);
                    Repaint::Line
                }
                None => Repaint::None,
            },
            Backspace if self.line.backspace() => Repaint::Line,
            Delete if self.line.delete() => Repaint::Line,
            Char(c) if !ctrl && !key.modifiers.contains(KeyModifiers::ALT) => {
                self.line.insert(c);
                Repaint::Line
            }
            _ => Repaint::None,
        };

        match repaint {
            Repaint::None => {}
            Repaint::Cursor => self.place_cursor(prompt)?,
            Repaint::Line => self.redraw(prompt)?,
        }
        Ok(KeyAction::Continue)
    }

    /// Repaint the prompt and line, leaving the terminal cursor in place.
    fn redraw(&self, prompt: &str) -> io::Result<()> {
        let mut stdout = io::stdout();
        execute!(
            stdout,
            cursor::MoveToColumn(0),
            terminal::Clear(ClearType::CurrentLine),
        )?;
        write!(stdout, "{prompt}{}", self.line.text())?;
        stdout.flush()?;
        self.place_cursor(prompt)
    }

    fn place_cursor(&self, prompt: &str) -> io::Result<()> {
        let column = prompt.chars().count() + self.line.cursor;
        execute!(io::stdout(), cursor::MoveToColumn(column as u16))
    }
}

/// Non-terminal input: print the prompt and read one line, without its
/// line ending.
fn read_plain_line(prompt: &str) -> io::Result<Option<String>> {
    print!("{prompt}");
    io::stdout().flush()?;
    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line)? {
        0 => Ok(None),
        _ => Ok(Some(strip_line_ending(line))),
    }
}

fn strip_line_ending(mut line: String) -> String {
    if line.ends_with('\n') {
        line.pop();
        if line.ends_with('\r') {
            line.pop();
        }
    }
    line
}

/// Raw mode turns off output post-processing, so a bare `\n` would not
/// return the cursor to column 0.
fn raw_lines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\n', "\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROMPT: &str = "/tmp$ ";

    fn editor_with_history(entries: &[&str]) -> LineEditor {
        let mut e = LineEditor::new(None);
        e.history.entries = entries.iter().map(|s| s.to_string()).collect();
        e.history.stop_browsing();
        e
    }

    fn press(e: &mut LineEditor, code: KeyCode, modifiers: KeyModifiers) -> KeyAction {
        e.handle_key(KeyEvent::new(code, modifiers), PROMPT).unwrap()
    }

    fn type_text(e: &mut LineEditor, text: &str) {
        for c in text.chars() {
            press(e, KeyCode::Char(c), KeyModifiers::NONE);
        }
    }

    #[test]
    fn blank_and_repeated_lines_are_not_recorded() {
        let mut e = editor_with_history(&[]);
        e.add_to_history("");
        e.add_to_history("   ");
        e.add_to_history("jobs");
        e.add_to_history("jobs");
        e.add_to_history("fg %0");
        e.add_to_history("jobs");
        assert_eq!(e.history.entries, vec!["jobs", "fg %0", "jobs"]);
    }

    #[test]
    fn history_is_capped() {
        let mut e = editor_with_history(&[]);
        for i in 0..MAX_HISTORY_SIZE + 5 {
            e.add_to_history(&format!("sleep {i}"));
        }
        assert_eq!(e.history.entries.len(), MAX_HISTORY_SIZE);
        assert_eq!(
            e.history.entries.last().unwrap(),
            &format!("sleep {}", MAX_HISTORY_SIZE + 4)
        );
    }

    #[test]
    fn browsing_returns_to_the_draft() {
        let mut e = editor_with_history(&["sleep 5 &", "jobs"]);
        type_text(&mut e, "kill");

        press(&mut e, KeyCode::Up, KeyModifiers::NONE);
        assert_eq!(e.line.text(), "jobs");
        press(&mut e, KeyCode::Up, KeyModifiers::NONE);
        press(&mut e, KeyCode::Up, KeyModifiers::NONE);
        assert_eq!(e.line.text(), "sleep 5 &");

        press(&mut e, KeyCode::Down, KeyModifiers::NONE);
        press(&mut e, KeyCode::Down, KeyModifiers::NONE);
        assert_eq!(e.line.text(), "kill");
        assert_eq!(e.line.cursor, 4);
        press(&mut e, KeyCode::Down, KeyModifiers::NONE);
        assert_eq!(e.line.text(), "kill");
    }

    #[test]
    fn cursor_keys_edit_mid_line() {
        let mut e = editor_with_history(&[]);
        type_text(&mut e, "bg0");
        press(&mut e, KeyCode::Left, KeyModifiers::NONE);
        type_text(&mut e, " %");
        press(&mut e, KeyCode::Home, KeyModifiers::NONE);
        press(&mut e, KeyCode::Delete, KeyModifiers::NONE);
        type_text(&mut e, "f");
        press(&mut e, KeyCode::Right, KeyModifiers::NONE);
        press(&mut e, KeyCode::Backspace, KeyModifiers::NONE);
        type_text(&mut e, "g");
        press(&mut e, KeyCode::End, KeyModifiers::NONE);

        assert_eq!(e.line.text(), "fg %0");
        assert_eq!(e.line.cursor, 5);
    }

    #[test]
    fn ctrl_u_erases_before_cursor() {
        let mut e = editor_with_history(&[]);
        type_text(&mut e, "sleep 10");
        press(&mut e, KeyCode::Left, KeyModifiers::NONE);
        press(&mut e, KeyCode::Left, KeyModifiers::NONE);
        press(&mut e, KeyCode::Char('u'), KeyModifiers::CONTROL);
        assert_eq!(e.line.text(), "10");
        assert_eq!(e.line.cursor, 0);
    }

    #[test]
    fn ctrl_z_is_ignored_and_ctrl_c_clears() {
        let mut e = editor_with_history(&[]);
        type_text(&mut e, "ls");
        let action = press(&mut e, KeyCode::Char('z'), KeyModifiers::CONTROL);
        assert!(matches!(action, KeyAction::Continue));
        assert_eq!(e.line.text(), "ls");

        press(&mut e, KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert!(e.line.is_empty());
        assert_eq!(e.line.cursor, 0);
    }

    #[test]
    fn enter_submits_and_ctrl_d_ends_input() {
        let mut e = editor_with_history(&[]);
        type_text(&mut e, "jobs");
        match press(&mut e, KeyCode::Enter, KeyModifiers::NONE) {
            KeyAction::Submit(line) => assert_eq!(line, "jobs"),
            _ => panic!("expected submit"),
        }

        e.line.clear();
        assert!(matches!(
            press(&mut e, KeyCode::Char('d'), KeyModifiers::CONTROL),
            KeyAction::Eof
        ));
    }

    #[test]
    fn piped_lines_lose_their_line_ending() {
        assert_eq!(strip_line_ending("sleep 1 &\n".to_string()), "sleep 1 &");
        assert_eq!(strip_line_ending("kill %0\r\n".to_string()), "kill %0");
        assert_eq!(strip_line_ending("exit".to_string()), "exit");
        assert_eq!(strip_line_ending("\n".to_string()), "");
    }

    #[test]
    fn notices_get_carriage_returns() {
        assert_eq!(raw_lines("[0] + done sleep 1\n"), "[0] + done sleep 1\r\n");
        assert_eq!(raw_lines("\n[1] + suspended cat\n"), "\r\n[1] + suspended cat\r\n");
        assert_eq!(raw_lines("a\r\nb"), "a\r\nb");
    }

    #[test]
    fn history_file_is_loaded_and_appended() {
        let path = std::env::temp_dir().join(format!("pssh_history_{}", std::process::id()));
        std::fs::write(&path, "ls\n\nsleep 1 &\n").unwrap();

        let mut e = LineEditor::new(Some(path.clone()));
        assert_eq!(e.history.entries, vec!["ls", "sleep 1 &"]);

        e.add_to_history("jobs");
        let saved = std::fs::read_to_string(&path).unwrap();
        assert!(saved.ends_with("jobs\n"));

        let _ = std::fs::remove_file(&path);
    }
}
