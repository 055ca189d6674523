//! Turns the pattern strings written in grammar files into plain Oniguruma patterns.
//!
//! Grammar authors can write readable patterns:
//!
//! ```text
//! (?x)
//! {{not_scoped}}       # not a member access
//! \b ( self ) \b
//! ```
//!
//! `{{name}}` placeholders are replaced by the grammar variables and a leading `(?x)`
//! marks the pattern as free-spacing: whitespace and comments are stripped here, before
//! the regex engine ever sees the pattern.

use std::collections::BTreeMap;

use crate::grammars::CompileError;

const FREE_SPACING_PREFIX: &str = "(?x)";

/// Expands the variables and strips free-spacing syntax.
pub fn prepare_pattern(
    raw: &str,
    variables: &BTreeMap<String, String>,
) -> Result<String, CompileError> {
    let expanded = expand_variables(raw, variables)?;
    match expanded.strip_prefix(FREE_SPACING_PREFIX) {
        Some(rest) => Ok(strip_free_spacing(rest)),
        None => Ok(expanded),
    }
}

/// Replaces every `{{name}}` with the value of the variable.
/// Only identifiers are variable names, so a quantifier like `\{{2}}` is left alone.
pub fn expand_variables(
    pattern: &str,
    variables: &BTreeMap<String, String>,
) -> Result<String, CompileError> {
    if !pattern.contains("{{") {
        return Ok(pattern.to_owned());
    }

    let mut out = String::with_capacity(pattern.len());
    let mut rest = pattern;

    while let Some(start) = rest.find("{{") {
        let Some(len) = rest[start + 2..].find("}}") else {
            break;
        };
        let name = &rest[start + 2..start + 2 + len];
        if !is_variable_name(name) {
            out.push_str(&rest[..start + 1]);
            rest = &rest[start + 1..];
            continue;
        }
        let value = variables
            .get(name)
            .ok_or_else(|| CompileError::UnknownVariable {
                name: name.to_owned(),
            })?;
        out.push_str(&rest[..start]);
        out.push_str(value);
        rest = &rest[start + 2 + len + 2..];
    }
    out.push_str(rest);

    Ok(out)
}

/// Expands variables that reference other variables, whatever order they are declared in.
/// Each pass expands the variables whose references are all resolved already and the
/// passes stop once everything is expanded. A pass that resolves nothing means a cycle or
/// an unknown name, which is an error.
pub fn expand_variable_table(
    raw: BTreeMap<String, String>,
) -> Result<BTreeMap<String, String>, CompileError> {
    let mut out = BTreeMap::new();
    let mut pending: Vec<(String, String)> = raw.into_iter().collect();

    // Keep going while at least one variable resolves per pass
    while !pending.is_empty() {
        let before = pending.len();
        let mut unresolved = Vec::new();
        let mut last_error = None;

        for (name, value) in pending {
            match expand_variables(&value, &out) {
                Ok(expanded) => {
                    out.insert(name, expanded);
                }
                Err(e) => {
                    last_error = Some(e);
                    unresolved.push((name, value));
                }
            }
        }

        if unresolved.len() == before {
            if let Some(e) = last_error {
                return Err(e);
            }
        }
        pending = unresolved;
    }

    Ok(out)
}

fn is_variable_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Removes unescaped whitespace and `#` comments outside character classes.
/// Character classes are copied verbatim, as Oniguruma does in extended mode.
pub fn strip_free_spacing(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut chars = pattern.chars().peekable();
    // nesting depth of `[...]`, Oniguruma allows `[a-z&&[^aeiou]]`
    let mut class_depth = 0usize;

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                out.push(c);
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            }
            '[' => {
                out.push(c);
                class_depth += 1;
                // `]` right after `[` or `[^` is a literal
                if chars.peek() == Some(&'^') {
                    out.push('^');
                    chars.next();
                }
                if chars.peek() == Some(&']') {
                    out.push(']');
                    chars.next();
                }
            }
            ']' if class_depth > 0 => {
                out.push(c);
                class_depth -= 1;
            }
            _ if class_depth > 0 => out.push(c),
            '#' => {
                for skipped in chars.by_ref() {
                    if skipped == '\n' {
                        break;
                    }
                }
            }
            c if c.is_whitespace() => {}
            c => out.push(c),
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn strips_whitespace_and_comments() {
        let pattern = "\\b ( nil | true ) \\b  # constants\n| \\.{3}";
        assert_eq!(strip_free_spacing(pattern), r"\b(nil|true)\b|\.{3}");
    }

    #[test]
    fn keeps_escaped_characters() {
        assert_eq!(strip_free_spacing(r"\# | \  x"), r"\#|\ x");
        assert_eq!(strip_free_spacing(r"\\ #c"), r"\\");
    }

    #[test]
    fn keeps_character_classes_verbatim() {
        assert_eq!(strip_free_spacing("[ #a ] b"), "[ #a ]b");
        assert_eq!(strip_free_spacing("[] ] x"), "[] ]x");
        assert_eq!(strip_free_spacing("[^] ] x"), "[^] ]x");
        assert_eq!(strip_free_spacing("[a[ b]] c"), "[a[ b]]c");
    }

    #[test]
    fn only_free_spacing_patterns_are_stripped() {
        let empty = BTreeMap::new();
        assert_eq!(prepare_pattern("a b", &empty).unwrap(), "a b");
        assert_eq!(prepare_pattern("(?x) a b # c", &empty).unwrap(), "ab");
    }

    #[test]
    fn expands_variables() {
        let variables = vars(&[("name", r"[a-zA-Z_]\w*")]);
        assert_eq!(
            expand_variables(r"\b({{name}})\b", &variables).unwrap(),
            r"\b([a-zA-Z_]\w*)\b"
        );
        // quantifiers are left alone
        assert_eq!(expand_variables(r"\|{2}", &variables).unwrap(), r"\|{2}");
        assert_eq!(expand_variables(r"\{{2}}", &variables).unwrap(), r"\{{2}}");
        assert_eq!(
            expand_variables(r"\{{{name}}}", &variables).unwrap(),
            r"\{[a-zA-Z_]\w*}"
        );
    }

    #[test]
    fn unknown_variable_is_an_error() {
        let err = expand_variables("{{nope}}", &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, CompileError::UnknownVariable { name } if name == "nope"));
    }

    #[test]
    fn variables_can_reference_each_other() {
        let table = expand_variable_table(vars(&[
            ("b_call", "{{a_name}}\\("),
            ("a_name", "\\w+"),
            ("c_both", "{{b_call}}|{{a_name}}"),
        ]))
        .unwrap();
        assert_eq!(table["c_both"], r"\w+\(|\w+");

        let err = expand_variable_table(vars(&[("a", "{{b}}"), ("b", "{{a}}")])).unwrap_err();
        assert!(matches!(err, CompileError::UnknownVariable { .. }));
    }
}
