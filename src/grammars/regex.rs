use std::fmt;
use std::sync::{Arc, OnceLock};

use onig::{Region, SearchOptions};

/// A regex that keeps its source pattern and compiles lazily
pub struct Regex {
    pattern: String,
    compiled: OnceLock<Option<Arc<onig::Regex>>>,
}

impl Clone for Regex {
    fn clone(&self) -> Self {
        Regex::new(self.pattern.clone())
    }
}

impl fmt::Debug for Regex {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.pattern)
    }
}

impl Regex {
    pub fn new(pattern: String) -> Self {
        Self {
            pattern,
            compiled: OnceLock::new(),
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn compiled(&self) -> Option<&Arc<onig::Regex>> {
        self.compiled
            .get_or_init(|| onig::Regex::new(&self.pattern).ok().map(Arc::new))
            .as_ref()
    }

    /// Validate that this regex pattern compiles successfully and returns its number of
    /// groups. Backreferences are replaced by empty strings first since they only get
    /// their values once the begin pattern of a region has matched.
    pub fn validate(&self) -> Result<usize, onig::Error> {
        let re = if self.has_backreferences() {
            onig::Regex::new(&substitute_backreferences(&self.pattern, |_| ""))?
        } else {
            onig::Regex::new(&self.pattern)?
        };
        Ok(re.captures_len())
    }

    pub fn has_backreferences(&self) -> bool {
        let mut found = false;
        substitute_backreferences(&self.pattern, |_| {
            found = true;
            ""
        });
        found
    }

    /// Search from `pos` to the end of `text`.
    /// The whole text is given to the engine so lookbehinds can see what precedes `pos`.
    /// Returns absolute positions of every group, group 0 first.
    pub fn find_at(&self, text: &str, pos: usize) -> Option<Vec<Option<(usize, usize)>>> {
        let re = self.compiled()?;
        let mut region = Region::new();
        re.search_with_options(
            text,
            pos,
            text.len(),
            SearchOptions::SEARCH_OPTION_NONE,
            Some(&mut region),
        )?;
        Some((0..region.len()).map(|i| region.pos(i)).collect())
    }

    /// Whether the pattern matches somewhere in the text
    pub fn is_match(&self, text: &str) -> bool {
        self.find_at(text, 0).is_some()
    }
}

/// Walks the pattern and calls `replacement` for every `\1`..`\9`, copying everything else.
/// Escaped backslashes (`\\1` is a literal backslash followed by `1`) are left alone.
fn substitute_backreferences<'a>(
    pattern: &str,
    mut replacement: impl FnMut(usize) -> &'a str,
) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut chars = pattern.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(d @ '1'..='9') => {
                let index = d as usize - '0' as usize;
                out.push_str(replacement(index));
            }
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }

    out
}

/// Instantiates an end pattern with the text captured by the begin pattern.
/// The captured text is escaped so it is matched literally. A group that did not
/// participate in the match is replaced by an empty string.
pub fn resolve_backreferences(
    pattern: &str,
    text: &str,
    captures: &[Option<(usize, usize)>],
) -> String {
    let escaped: Vec<String> = captures
        .iter()
        .map(|c| match c {
            Some((start, end)) => escape_regex(&text[*start..*end]),
            None => String::new(),
        })
        .collect();

    substitute_backreferences(pattern, |index| {
        escaped.get(index).map(String::as_str).unwrap_or("")
    })
}

/// Escapes the characters that have a meaning in Oniguruma patterns
pub fn escape_regex(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(
            c,
            '\\' | '|'
                | '-'
                | '*'
                | '+'
                | '?'
                | '.'
                | ','
                | '^'
                | '$'
                | '('
                | ')'
                | '['
                | ']'
                | '{'
                | '}'
                | '#'
                | ' '
                | '/'
        ) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
