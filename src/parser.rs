use crate::expander;
use crate::redirect::{self, Redirections};

/// A segment of a word, tagged with its quote context.
/// The expander uses this to decide what expansions to apply.
#[derive(Debug, Clone, PartialEq)]
pub enum WordSegment {
    /// Unquoted text: tilde and glob expansion apply
    Unquoted(String),
    /// Double-quoted text: taken literally, whitespace preserved
    DoubleQuoted(String),
    /// Single-quoted text: taken literally
    SingleQuoted(String),
}

/// A single word (argument) made up of one or more segments.
/// Mixed quoting like `he"llo"'world'` produces multiple segments in one word.
pub type Word = Vec<WordSegment>;

/// Pipeline metacharacters recognized outside quotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Pipe,
    Input,
    Output,
    Background,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Word(Word),
    Op(Operator),
}

/// One pipeline stage: program name plus its argument vector.
#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
    pub program: String,
    pub args: Vec<String>,
}

/// A fully parsed command line.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    pub stages: Vec<Stage>,
    pub infile: Option<String>,
    pub outfile: Option<String>,
    pub background: bool,
    pub invalid_syntax: bool,
}

impl Pipeline {
    fn invalid() -> Self {
        Pipeline {
            invalid_syntax: true,
            ..Default::default()
        }
    }

    /// Reconstructed command text used as the job's display name.
    pub fn display_name(&self) -> String {
        let mut name = self
            .stages
            .iter()
            .map(|stage| {
                std::iter::once(stage.program.as_str())
                    .chain(stage.args.iter().map(String::as_str))
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect::<Vec<_>>()
            .join(" | ");
        if let Some(path) = &self.infile {
            name.push_str(&format!(" < {path}"));
        }
        if let Some(path) = &self.outfile {
            name.push_str(&format!(" > {path}"));
        }
        name
    }
}

/// States for the tokenizer state machine.
enum State {
    /// Between tokens: whitespace is skipped
    Normal,
    /// Building an unquoted word: whitespace or an operator ends it
    InWord,
    /// Inside double quotes: whitespace is preserved
    InDoubleQuote,
    /// Inside single quotes: everything is literal
    InSingleQuote,
}

fn operator(ch: char) -> Option<Operator> {
    match ch {
        '|' => Some(Operator::Pipe),
        '<' => Some(Operator::Input),
        '>' => Some(Operator::Output),
        '&' => Some(Operator::Background),
        _ => None,
    }
}

/// Tokenize input into words (with quote context) and operators.
pub fn tokenize(input: &str) -> Vec<Token> {
    let mut tokens: Vec<Token> = Vec::new();
    let mut current_segment = String::new();
    let mut current_word: Word = Vec::new();
    let mut state = State::Normal;
    let mut chars = input.chars().peekable();

    let flush_segment = |segment: &mut String, word: &mut Word| {
        if !segment.is_empty() {
            word.push(WordSegment::Unquoted(std::mem::take(segment)));
        }
    };

    while let Some(ch) = chars.next() {
        match (&state, ch) {
            // ── Normal / InWord: outside quotes ──
            (State::Normal | State::InWord, ' ' | '\t' | '\r' | '\n') => {
                flush_segment(&mut current_segment, &mut current_word);
                if !current_word.is_empty() {
                    tokens.push(Token::Word(std::mem::take(&mut current_word)));
                }
                state = State::Normal;
            }
            (State::Normal | State::InWord, c) if operator(c).is_some() => {
                flush_segment(&mut current_segment, &mut current_word);
                if !current_word.is_empty() {
                    tokens.push(Token::Word(std::mem::take(&mut current_word)));
                }
                if let Some(op) = operator(c) {
                    tokens.push(Token::Op(op));
                }
                state = State::Normal;
            }
            (State::Normal | State::InWord, '"') => {
                flush_segment(&mut current_segment, &mut current_word);
                state = State::InDoubleQuote;
            }
            (State::Normal | State::InWord, '\'') => {
                flush_segment(&mut current_segment, &mut current_word);
                state = State::InSingleQuote;
            }
            (State::Normal | State::InWord, '\\') => {
                // Escaped char is literal, so it goes in a quoted segment
                flush_segment(&mut current_segment, &mut current_word);
                let escaped = chars.next().unwrap_or('\\');
                current_word.push(WordSegment::SingleQuoted(escaped.to_string()));
                state = State::InWord;
            }
            (State::Normal | State::InWord, c) => {
                current_segment.push(c);
                state = State::InWord;
            }

            // ── InDoubleQuote state: inside "..." ──
            (State::InDoubleQuote, '"') => {
                // "" is a valid empty arg, so flush even when empty
                current_word.push(WordSegment::DoubleQuoted(std::mem::take(&mut current_segment)));
                state = State::InWord;
            }
            (State::InDoubleQuote, '\\') => match chars.peek() {
                Some(&next) if matches!(next, '"' | '\\' | '$' | '`') => {
                    chars.next();
                    current_segment.push(next);
                }
                _ => current_segment.push('\\'),
            },
            (State::InDoubleQuote, c) => {
                current_segment.push(c);
            }

            // ── InSingleQuote state: inside '...' ──
            (State::InSingleQuote, '\'') => {
                current_word.push(WordSegment::SingleQuoted(std::mem::take(&mut current_segment)));
                state = State::InWord;
            }
            (State::InSingleQuote, c) => {
                current_segment.push(c);
            }
        }
    }

    // Unclosed quotes keep their quote context.
    match state {
        State::InDoubleQuote if !current_segment.is_empty() => {
            current_word.push(WordSegment::DoubleQuoted(current_segment));
        }
        State::InSingleQuote if !current_segment.is_empty() => {
            current_word.push(WordSegment::SingleQuoted(current_segment));
        }
        _ => flush_segment(&mut current_segment, &mut current_word),
    }
    if !current_word.is_empty() {
        tokens.push(Token::Word(current_word));
    }

    tokens
}

/// Parse a command line into a pipeline descriptor.
///
/// Returns `None` for blank input. Structural problems (empty stages, a
/// misplaced `&`, misplaced or dangling redirections) yield a pipeline with
/// `invalid_syntax` set rather than an error.
pub fn parse_pipeline(input: &str) -> Option<Pipeline> {
    let mut tokens = tokenize(input);
    if tokens.is_empty() {
        return None;
    }

    let background = tokens.last() == Some(&Token::Op(Operator::Background));
    if background {
        tokens.pop();
    }
    if tokens.contains(&Token::Op(Operator::Background)) {
        return Some(Pipeline::invalid());
    }

    let segments: Vec<&[Token]> = tokens
        .split(|token| *token == Token::Op(Operator::Pipe))
        .collect();
    let last = segments.len() - 1;

    let mut pipeline = Pipeline {
        background,
        ..Default::default()
    };

    for (index, segment) in segments.into_iter().enumerate() {
        let Ok((words, Redirections { input, output })) = redirect::extract_redirections(segment)
        else {
            return Some(Pipeline::invalid());
        };
        if (input.is_some() && index != 0) || (output.is_some() && index != last) {
            return Some(Pipeline::invalid());
        }
        if input.is_some() {
            pipeline.infile = input;
        }
        if output.is_some() {
            pipeline.outfile = output;
        }

        let mut argv = expander::expand_words(&words).into_iter();
        let Some(program) = argv.next() else {
            return Some(Pipeline::invalid());
        };
        pipeline.stages.push(Stage {
            program,
            args: argv.collect(),
        });
    }

    Some(pipeline)
}

#[cfg(test)]
fn words_to_strings(tokens: &[Token]) -> Vec<String> {
    tokens
        .iter()
        .filter_map(|token| match token {
            Token::Word(word) => Some(
                word.iter()
                    .map(|seg| match seg {
                        WordSegment::Unquoted(s)
                        | WordSegment::DoubleQuoted(s)
                        | WordSegment::SingleQuoted(s) => s.as_str(),
                    })
                    .collect(),
            ),
            Token::Op(_) => None,
        })
        .collect()
}
