use crate::expander;
use crate::parser::{Operator, Token, Word};

/// File redirections collected from one pipeline stage.
#[derive(Debug, Default, PartialEq)]
pub struct Redirections {
    /// `< path`: read stdin from a file
    pub input: Option<String>,
    /// `> path`: write stdout to a file (truncate)
    pub output: Option<String>,
}

/// Separate redirect operators from a stage's words.
/// Returns (words, redirections) or an error message for syntax errors.
///
/// The redirect target is the single word following the operator; it gets
/// tilde expansion but not globbing. A stage may redirect each stream once.
pub fn extract_redirections(tokens: &[Token]) -> Result<(Vec<Word>, Redirections), String> {
    let mut words = Vec::new();
    let mut redirections = Redirections::default();
    let mut iter = tokens.iter();

    while let Some(token) = iter.next() {
        match token {
            Token::Word(word) => words.push(word.clone()),
            Token::Op(op @ (Operator::Input | Operator::Output)) => {
                let symbol = if *op == Operator::Input { "<" } else { ">" };
                let path = match iter.next() {
                    Some(Token::Word(word)) => expander::expand_path(word),
                    _ => return Err(format!("expected filename after '{symbol}'")),
                };
                let slot = if *op == Operator::Input {
                    &mut redirections.input
                } else {
                    &mut redirections.output
                };
                if slot.replace(path).is_some() {
                    return Err(format!("duplicate '{symbol}' redirection"));
                }
            }
            Token::Op(op) => return Err(format!("unexpected operator {op:?}")),
        }
    }

    Ok((words, redirections))
}
