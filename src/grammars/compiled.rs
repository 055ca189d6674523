use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::ops::{Deref, Index};

use crate::grammars::pattern::{expand_variable_table, prepare_pattern};
use crate::grammars::raw::{Captures, RawGrammar, RawRule};
use crate::grammars::regex::Regex;
use crate::scope::Scope;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct RuleId(pub u16);

impl RuleId {
    #[inline]
    pub fn as_index(self) -> usize {
        self.0 as usize
    }
}

impl Deref for RuleId {
    type Target = u16;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// The root rule list is always the first rule compiled
pub const ROOT_RULE_ID: RuleId = RuleId(0);
/// Marker used in matches for the end pattern of the current region
pub const END_RULE_ID: RuleId = RuleId(u16::MAX);

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct RegexId(u16);

impl Deref for RegexId {
    type Target = u16;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Named rules that can be included from anywhere in the grammar
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct Repository(HashMap<String, RuleId>);

impl Repository {
    pub fn get(&self, name: &str) -> Option<RuleId> {
        self.0.get(name).copied()
    }
}

/// Allowed include values:
///  * `#name`: an entry of the repository
///  * `$self` and `$base`: the root rule list. There is only one grammar involved so
///    they are the same thing.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Reference {
    Self_,
    Local(String),
}

impl TryFrom<&str> for Reference {
    type Error = CompileError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "$self" | "$base" => Ok(Self::Self_),
            s if s.len() > 1 && s.starts_with('#') => Ok(Self::Local(s[1..].to_owned())),
            _ => Err(CompileError::UnresolvedInclude {
                include: value.to_owned(),
            }),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Self_ => f.write_str("$self"),
            Reference::Local(name) => write!(f, "#{name}"),
        }
    }
}

/// Includes are kept by name and only looked up when collecting the patterns of a rule
/// list, which keeps recursive grammars representable.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum RuleIdOrReference {
    RuleId(RuleId),
    Reference(Reference),
}

/// A rule matching a single span
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Match {
    pub id: RuleId,
    pub scope: Option<Scope>,
    pub regex_id: RegexId,
    /// Scope per group index, `None` for groups without a scope
    pub captures: Vec<Option<Scope>>,
}

/// A region delimited by a begin and an end pattern
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct BeginEnd {
    pub id: RuleId,
    pub scope: Option<Scope>,
    pub begin: RegexId,
    pub begin_captures: Vec<Option<Scope>>,
    /// A template if `end_has_backrefs` is set: it needs the begin captures to be usable
    pub end: RegexId,
    pub end_has_backrefs: bool,
    pub end_captures: Vec<Option<Scope>>,
    /// Whether the end pattern wins ties against the region rules.
    /// By default it comes after them.
    pub end_pattern_first: bool,
    pub patterns: Vec<RuleIdOrReference>,
}

/// A list of rules without a pattern of its own: the root and repository containers
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct IncludeOnly {
    pub id: RuleId,
    pub patterns: Vec<RuleIdOrReference>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Rule {
    Match(Match),
    BeginEnd(BeginEnd),
    IncludeOnly(IncludeOnly),
    Noop,
}

impl Rule {
    /// The rules that are active inside this one
    pub fn patterns(&self) -> &[RuleIdOrReference] {
        match self {
            Rule::BeginEnd(b) => &b.patterns,
            Rule::IncludeOnly(i) => &i.patterns,
            Rule::Match(_) | Rule::Noop => &[],
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompiledGrammar {
    pub name: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub scope_name: String,
    pub scope: Scope,
    /// Kept as metadata, lucerna does not pick grammars by file
    pub file_types: Vec<String>,
    pub first_line_match: Option<String>,
    pub regexes: Vec<Regex>,
    pub rules: Vec<Rule>,
    pub repository: Repository,
    /// Variables after expansion, needed while compiling only
    variables: BTreeMap<String, String>,
}

impl Index<RuleId> for Vec<Rule> {
    type Output = Rule;

    fn index(&self, index: RuleId) -> &Self::Output {
        &self[index.as_index()]
    }
}

impl Index<RegexId> for Vec<Regex> {
    type Output = Regex;

    fn index(&self, index: RegexId) -> &Self::Output {
        &self[*index as usize]
    }
}

impl CompiledGrammar {
    pub fn from_raw_grammar(raw: RawGrammar) -> Result<Self, CompileError> {
        let mut grammar = Self {
            scope: Scope::new(&raw.scope_name),
            name: raw.name,
            display_name: raw.display_name,
            description: raw.description,
            scope_name: raw.scope_name,
            file_types: raw.file_types,
            first_line_match: raw.first_line_match,
            regexes: Vec::new(),
            rules: Vec::new(),
            repository: Repository::default(),
            variables: expand_variable_table(raw.variables)?,
        };

        // Reserve the root spot so it always gets ROOT_RULE_ID
        grammar.rules.push(Rule::Noop);
        let patterns = grammar.compile_patterns(raw.patterns)?;
        grammar.rules[ROOT_RULE_ID.as_index()] = Rule::IncludeOnly(IncludeOnly {
            id: ROOT_RULE_ID,
            patterns,
        });

        // Sorted so rule ids do not depend on the hashmap order
        let mut entries: Vec<_> = raw.repository.into_iter().collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        let mut repository = HashMap::with_capacity(entries.len());
        for (name, raw_rule) in entries {
            repository.insert(name, grammar.compile_rule(raw_rule)?);
        }
        grammar.repository = Repository(repository);

        grammar.check_references()?;
        grammar.variables.clear();

        Ok(grammar)
    }

    fn compile_rule(&mut self, raw_rule: RawRule) -> Result<RuleId, CompileError> {
        let id = RuleId(self.rules.len() as u16);

        // push a no-op to reserve its spot
        self.rules.push(Rule::Noop);
        let scope = raw_rule.name.as_deref().map(Scope::new);

        let rule = if let Some(pat) = raw_rule.match_ {
            let (regex_id, groups) = self.compile_regex(pat)?;
            Rule::Match(Match {
                id,
                scope,
                regex_id,
                captures: self.compile_captures(raw_rule.captures, regex_id, groups)?,
            })
        } else if let Some(begin_pat) = raw_rule.begin {
            let (begin, begin_groups) = self.compile_regex(begin_pat)?;
            let begin_captures = if raw_rule.begin_captures.is_empty() {
                raw_rule.captures.clone()
            } else {
                raw_rule.begin_captures
            };
            let begin_captures = self.compile_captures(begin_captures, begin, begin_groups)?;

            if let Some(end_pat) = raw_rule.end {
                let (end, end_groups) = self.compile_regex(end_pat)?;
                let end_captures = if raw_rule.end_captures.is_empty() {
                    raw_rule.captures
                } else {
                    raw_rule.end_captures
                };
                let end_captures = self.compile_captures(end_captures, end, end_groups)?;
                Rule::BeginEnd(BeginEnd {
                    id,
                    scope,
                    begin,
                    begin_captures,
                    end,
                    end_has_backrefs: self.regexes[end].has_backreferences(),
                    end_captures,
                    end_pattern_first: raw_rule.apply_end_pattern_last == Some(0),
                    patterns: self.compile_patterns(raw_rule.patterns)?,
                })
            } else {
                // a rule that has begin without end is just a match, probably a typo
                Rule::Match(Match {
                    id,
                    scope,
                    regex_id: begin,
                    captures: begin_captures,
                })
            }
        } else if let Some(include) = raw_rule.include {
            Rule::IncludeOnly(IncludeOnly {
                id,
                patterns: vec![RuleIdOrReference::Reference(include.as_str().try_into()?)],
            })
        } else if raw_rule.patterns.is_empty() {
            Rule::Noop
        } else {
            Rule::IncludeOnly(IncludeOnly {
                id,
                patterns: self.compile_patterns(raw_rule.patterns)?,
            })
        };

        self.rules[id.as_index()] = rule;
        Ok(id)
    }

    /// Prepares, validates and stores a pattern.
    /// Returns its id and the number of groups it has.
    fn compile_regex(&mut self, raw_pattern: String) -> Result<(RegexId, usize), CompileError> {
        let pattern = prepare_pattern(&raw_pattern, &self.variables)?;
        let re = Regex::new(pattern);
        let groups = re
            .validate()
            .map_err(|error| CompileError::InvalidRegex {
                pattern: re.pattern().to_owned(),
                error,
            })?;

        let regex_id = RegexId(self.regexes.len() as u16);
        self.regexes.push(re);
        Ok((regex_id, groups))
    }

    fn compile_captures(
        &self,
        captures: Captures,
        regex_id: RegexId,
        groups: usize,
    ) -> Result<Vec<Option<Scope>>, CompileError> {
        let Some(&max_index) = captures.0.keys().max() else {
            return Ok(Vec::new());
        };

        if max_index > groups {
            return Err(CompileError::InvalidCaptureIndex {
                pattern: self.regexes[regex_id].pattern().to_owned(),
                index: max_index,
            });
        }

        let mut out = vec![None; max_index + 1];
        for (index, capture) in captures.0 {
            out[index] = capture.name.as_deref().map(Scope::new);
        }
        Ok(out)
    }

    fn compile_patterns(
        &mut self,
        rules: Vec<RawRule>,
    ) -> Result<Vec<RuleIdOrReference>, CompileError> {
        let mut out = Vec::with_capacity(rules.len());

        for r in rules {
            if let Some(include) = &r.include {
                // other fields of a rule with an include are ignored
                out.push(RuleIdOrReference::Reference(include.as_str().try_into()?));
            } else {
                out.push(RuleIdOrReference::RuleId(self.compile_rule(r)?));
            }
        }

        Ok(out)
    }

    /// Every `#name` must point to an existing repository entry
    fn check_references(&self) -> Result<(), CompileError> {
        for rule in &self.rules {
            for pattern in rule.patterns() {
                if let RuleIdOrReference::Reference(reference) = pattern
                    && self.resolve_reference(reference).is_none()
                {
                    return Err(CompileError::UnresolvedInclude {
                        include: reference.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn resolve_reference(&self, reference: &Reference) -> Option<RuleId> {
        match reference {
            Reference::Self_ => Some(ROOT_RULE_ID),
            Reference::Local(name) => self.repository.get(name),
        }
    }

    /// Flattens the rule list active inside `rule_id` into `(rule, pattern)` pairs, in
    /// declaration order. Containers are expanded in place, at most once each, so a
    /// list including itself terminates.
    pub fn collect_patterns(&self, rule_id: RuleId) -> Vec<(RuleId, &str)> {
        let mut out = Vec::new();
        let mut visited = HashSet::from([rule_id]);
        self.collect_patterns_into(self.rules[rule_id].patterns(), &mut visited, &mut out);
        out
    }

    fn collect_patterns_into<'a>(
        &'a self,
        patterns: &'a [RuleIdOrReference],
        visited: &mut HashSet<RuleId>,
        out: &mut Vec<(RuleId, &'a str)>,
    ) {
        for pattern in patterns {
            let rule_id = match pattern {
                RuleIdOrReference::RuleId(id) => *id,
                RuleIdOrReference::Reference(reference) => {
                    match self.resolve_reference(reference) {
                        Some(id) => id,
                        // checked when compiling
                        None => continue,
                    }
                }
            };

            match &self.rules[rule_id] {
                Rule::Match(m) => out.push((rule_id, self.regexes[m.regex_id].pattern())),
                Rule::BeginEnd(b) => out.push((rule_id, self.regexes[b.begin].pattern())),
                Rule::IncludeOnly(i) => {
                    if visited.insert(rule_id) {
                        self.collect_patterns_into(&i.patterns, visited, out);
                    }
                }
                Rule::Noop => {}
            }
        }
    }
}

/// Errors that can occur during grammar compilation
#[derive(Debug)]
pub enum CompileError {
    InvalidRegex { pattern: String, error: onig::Error },
    UnresolvedInclude { include: String },
    UnknownVariable { name: String },
    InvalidCaptureIndex { pattern: String, index: usize },
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::InvalidRegex { pattern, error } => {
                write!(f, "Invalid regex pattern '{}': {}", pattern, error)
            }
            CompileError::UnresolvedInclude { include } => {
                write!(f, "Unresolved include '{}'", include)
            }
            CompileError::UnknownVariable { name } => {
                write!(f, "Unknown variable '{{{{{}}}}}'", name)
            }
            CompileError::InvalidCaptureIndex { pattern, index } => {
                write!(
                    f,
                    "Capture {} does not exist in pattern '{}'",
                    index, pattern
                )
            }
        }
    }
}

impl std::error::Error for CompileError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(json: &str) -> Result<CompiledGrammar, CompileError> {
        RawGrammar::load_from_str(json).unwrap().compile()
    }

    #[test]
    fn can_compile_bundled_grammar() {
        let grammar = compile(crate::registry::BUILTIN_LUA_GRAMMAR).unwrap();
        assert_eq!(grammar.scope_name, "source.lua");
        assert_eq!(grammar.file_types, vec!["lua"]);
        assert!(grammar.repository.get("escaped_chars").is_some());
        assert!(matches!(grammar.rules[ROOT_RULE_ID], Rule::IncludeOnly(_)));
    }

    #[test]
    fn rejects_unresolved_includes() {
        let err = compile(
            r##"{"name": "t", "scopeName": "source.t", "patterns": [{"include": "#missing"}]}"##,
        )
        .unwrap_err();
        assert!(matches!(err, CompileError::UnresolvedInclude { include } if include == "#missing"));

        let err = compile(
            r#"{"name": "t", "scopeName": "source.t", "patterns": [{"include": "source.js"}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, CompileError::UnresolvedInclude { .. }));
    }

    #[test]
    fn rejects_invalid_patterns() {
        let err = compile(
            r#"{"name": "t", "scopeName": "source.t", "patterns": [{"match": "(a", "name": "a"}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, CompileError::InvalidRegex { pattern, .. } if pattern == "(a"));
    }

    #[test]
    fn rejects_captures_of_missing_groups() {
        let err = compile(
            r#"{"name": "t", "scopeName": "source.t",
                "patterns": [{"match": "(a)", "captures": {"2": {"name": "b"}}}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, CompileError::InvalidCaptureIndex { index: 2, .. }));
    }

    #[test]
    fn brace_quantifiers_are_not_variables() {
        let grammar = compile(
            r#"{"name": "t", "scopeName": "source.t", "patterns": [{"match": "\\{{2}}", "name": "b"}]}"#,
        )
        .unwrap();
        assert_eq!(grammar.collect_patterns(ROOT_RULE_ID), vec![(RuleId(1), r"\{{2}}")]);
    }

    #[test]
    fn applies_variables_and_free_spacing() {
        let grammar = compile(
            r#"{
                "name": "t",
                "scopeName": "source.t",
                "variables": {"ident": "[a-z]+"},
                "patterns": [{"match": ["(?x)", "\\b {{ident}} \\b  # a word"], "name": "w"}]
            }"#,
        )
        .unwrap();
        assert_eq!(grammar.collect_patterns(ROOT_RULE_ID), vec![(RuleId(1), r"\b[a-z]+\b")]);
    }

    #[test]
    fn collects_recursive_includes_once() {
        let grammar = compile(
            r##"{
                "name": "t",
                "scopeName": "source.t",
                "patterns": [{"include": "#a"}, {"include": "$self"}],
                "repository": {
                    "a": {"patterns": [{"match": "a", "name": "a"}, {"include": "#b"}]},
                    "b": {"patterns": [{"match": "b", "name": "b"}, {"include": "#a"}]},
                    "paren": {
                        "begin": "\\(",
                        "end": "\\)",
                        "patterns": [{"include": "#paren"}, {"include": "$self"}]
                    }
                }
            }"##,
        )
        .unwrap();

        let root: Vec<&str> = grammar
            .collect_patterns(ROOT_RULE_ID)
            .into_iter()
            .map(|(_, p)| p)
            .collect();
        assert_eq!(root, vec!["a", "b"]);

        let paren = grammar.repository.get("paren").unwrap();
        let inside: Vec<&str> = grammar
            .collect_patterns(paren)
            .into_iter()
            .map(|(_, p)| p)
            .collect();
        assert_eq!(inside, vec![r"\(", "a", "b"]);
    }

    #[test]
    fn region_captures_fall_back_to_captures() {
        let grammar = compile(
            r#"{
                "name": "t",
                "scopeName": "source.t",
                "patterns": [{
                    "begin": "(<)",
                    "end": "(>)",
                    "captures": {"1": {"name": "punct"}},
                    "endCaptures": {"0": {"name": "end"}}
                }]
            }"#,
        )
        .unwrap();
        let Rule::BeginEnd(region) = &grammar.rules[RuleId(1)] else {
            panic!("expected a region");
        };
        assert_eq!(region.begin_captures, vec![None, Some(Scope::new("punct"))]);
        assert_eq!(region.end_captures, vec![Some(Scope::new("end"))]);
        assert!(!region.end_has_backrefs);
        assert!(!region.end_pattern_first);
    }
}
