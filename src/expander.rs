use crate::parser::{Word, WordSegment};

/// Expand a list of parsed words into final argument strings.
/// Applies tilde and glob expansion according to quote context.
pub fn expand_words(words: &[Word]) -> Vec<String> {
    let mut result = Vec::new();
    for word in words {
        result.extend(expand_word(word));
    }
    result
}

/// Expand a redirect target: tilde only, always exactly one path.
pub fn expand_path(word: &Word) -> String {
    word.iter()
        .enumerate()
        .map(|(index, segment)| match segment {
            WordSegment::Unquoted(text) if index == 0 => expand_tilde(text),
            WordSegment::Unquoted(text)
            | WordSegment::DoubleQuoted(text)
            | WordSegment::SingleQuoted(text) => text.clone(),
        })
        .collect()
}

/// Expand a single word (which may have mixed quoting) into one or more strings.
fn expand_word(segments: &[WordSegment]) -> Vec<String> {
    let mut combined = String::new();
    // Quoted glob characters must not be expanded, so keep an escaped copy
    // for the pattern alongside the literal text.
    let mut pattern = String::new();
    let mut is_globbable = false;

    for (index, segment) in segments.iter().enumerate() {
        match segment {
            WordSegment::Unquoted(text) => {
                let expanded = if index == 0 {
                    expand_tilde(text)
                } else {
                    text.clone()
                };
                if contains_glob_chars(&expanded) {
                    is_globbable = true;
                }
                combined.push_str(&expanded);
                pattern.push_str(&expanded);
            }
            WordSegment::DoubleQuoted(text) | WordSegment::SingleQuoted(text) => {
                combined.push_str(text);
                pattern.push_str(&glob::Pattern::escape(text));
            }
        }
    }

    if is_globbable {
        expand_glob(&pattern, combined)
    } else {
        vec![combined]
    }
}

// ── Tilde Expansion ──

fn expand_tilde(token: &str) -> String {
    if token == "~" {
        return home_dir().unwrap_or_else(|| token.to_string());
    }
    if let Some(rest) = token.strip_prefix("~/") {
        if let Some(home) = home_dir() {
            return format!("{home}/{rest}");
        }
    }
    // ~user is not supported; leave it alone
    token.to_string()
}

fn home_dir() -> Option<String> {
    std::env::var("HOME").ok()
}

// ── Glob Expansion ──

fn contains_glob_chars(s: &str) -> bool {
    s.contains(['*', '?', '['])
}

/// Expand `pattern`; with no matches the literal word is passed through.
fn expand_glob(pattern: &str, literal: String) -> Vec<String> {
    let options = glob::MatchOptions {
        case_sensitive: true,
        require_literal_separator: true,
        require_literal_leading_dot: true,
    };

    match glob::glob_with(pattern, options) {
        Ok(paths) => {
            let mut matches: Vec<String> = paths
                .filter_map(Result::ok)
                .map(|p| p.to_string_lossy().into_owned())
                .collect();
            if matches.is_empty() {
                vec![literal]
            } else {
                matches.sort();
                matches
            }
        }
        Err(_) => vec![literal],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unquoted(s: &str) -> Word {
        vec![WordSegment::Unquoted(s.to_string())]
    }

    #[test]
    fn plain_word_unchanged() {
        assert_eq!(expand_words(&[unquoted("hello")]), vec!["hello"]);
    }

    #[test]
    fn quoted_tilde_is_literal() {
        let word = vec![WordSegment::SingleQuoted("~".into())];
        assert_eq!(expand_words(&[word]), vec!["~"]);
    }

    #[test]
    fn tilde_user_form_is_left_alone() {
        assert_eq!(expand_tilde("~someone/x"), "~someone/x");
    }

    #[test]
    fn unmatched_glob_passes_through() {
        let word = unquoted("/definitely/not/here/*.nothing");
        assert_eq!(expand_words(&[word]), vec!["/definitely/not/here/*.nothing"]);
    }

    #[test]
    fn quoted_glob_chars_are_literal() {
        let word = vec![WordSegment::DoubleQuoted("*.rs".into())];
        assert_eq!(expand_words(&[word]), vec!["*.rs"]);
    }

    #[test]
    fn glob_matches_are_sorted() {
        let dir = std::env::temp_dir().join(format!("pssh_glob_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        for name in ["b.txt", "a.txt", "c.log"] {
            std::fs::write(dir.join(name), "").unwrap();
        }

        let pattern = format!("{}/*.txt", dir.display());
        let expanded = expand_words(&[unquoted(&pattern)]);
        assert_eq!(
            expanded,
            vec![
                format!("{}/a.txt", dir.display()),
                format!("{}/b.txt", dir.display()),
            ]
        );

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn redirect_target_is_single_path() {
        let word = vec![
            WordSegment::Unquoted("out".into()),
            WordSegment::DoubleQuoted(" *.txt".into()),
        ];
        assert_eq!(expand_path(&word), "out *.txt");
    }
}
