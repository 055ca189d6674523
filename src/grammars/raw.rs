use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer};

use super::compiled::{CompileError, CompiledGrammar};
use crate::error::LucernaResult;

/// Patterns can be written as a single string or as an array of lines, which is a lot
/// more readable for free-spacing patterns with comments:
///
/// ```json
/// "match": [
///   "(?x)",
///   "{{not_scoped}}   # not a member access",
///   "\\b ( self ) \\b"
/// ]
/// ```
pub(crate) fn deserialize_pattern<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    struct PatternVisitor;

    impl<'de> Visitor<'de> for PatternVisitor {
        type Value = Option<String>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a pattern string or an array of pattern lines")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Some(value.to_owned()))
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: SeqAccess<'de>,
        {
            let mut lines = Vec::new();
            while let Some(line) = seq.next_element::<String>()? {
                lines.push(line);
            }
            Ok(Some(lines.join("\n")))
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }
    }

    deserializer.deserialize_any(PatternVisitor)
}

/// A scope assigned to one numbered group of a match.
///
/// ```json
/// { "name": "entity.name.function.lua" }
/// ```
///
/// An empty object is allowed and assigns nothing, which is handy in the array form of
/// captures to skip a group.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawCapture {
    #[serde(default)]
    pub name: Option<String>,
}

/// Group index -> capture.
///
/// Accepts both the TextMate map form and an array form where the index in the array is
/// the group number:
///
/// ```json
/// "beginCaptures": { "1": { "name": "keyword.control.lua" } }
/// "beginCaptures": [ {}, { "name": "keyword.control.lua" } ]
/// ```
#[derive(Debug, Clone, Default)]
pub struct Captures(pub BTreeMap<usize, RawCapture>);

impl Captures {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'de> Deserialize<'de> for Captures {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct CapturesVisitor;

        impl<'de> Visitor<'de> for CapturesVisitor {
            type Value = Captures;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a map of group index to capture or an array of captures")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut out = BTreeMap::new();
                while let Some((key, capture)) = map.next_entry::<String, RawCapture>()? {
                    let index = key.parse::<usize>().map_err(|_| {
                        de::Error::custom(format!("capture key '{key}' is not a group index"))
                    })?;
                    out.insert(index, capture);
                }
                Ok(Captures(out))
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: SeqAccess<'de>,
            {
                let mut out = BTreeMap::new();
                let mut index = 0;
                while let Some(capture) = seq.next_element::<RawCapture>()? {
                    if capture.name.is_some() {
                        out.insert(index, capture);
                    }
                    index += 1;
                }
                Ok(Captures(out))
            }
        }

        deserializer.deserialize_any(CapturesVisitor)
    }
}

/// A single entry of a rule list. Depending on which fields are set it is:
///
/// - a simple rule: `match`
/// - a region: `begin` + `end`
/// - an include: `include`, every other field is then ignored
/// - a container: only `patterns`, typical for repository entries
///
/// ```json
/// {
///   "name": "string.quoted.double.lua",
///   "begin": "\"",
///   "end": "\"",
///   "patterns": [{ "include": "#escaped_chars" }]
/// }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all(deserialize = "camelCase"))]
pub struct RawRule {
    /// Scope given to everything the rule matches
    pub name: Option<String>,
    /// Free text, ignored
    pub comment: Option<String>,
    #[serde(rename(deserialize = "match"), deserialize_with = "deserialize_pattern")]
    pub match_: Option<String>,
    #[serde(deserialize_with = "deserialize_pattern")]
    pub begin: Option<String>,
    /// Can reference groups of `begin` with `\1`..`\9`
    #[serde(deserialize_with = "deserialize_pattern")]
    pub end: Option<String>,
    /// For simple rules, the captures. For regions, the fallback of both
    /// `begin_captures` and `end_captures`.
    pub captures: Captures,
    pub begin_captures: Captures,
    pub end_captures: Captures,
    /// Rules active inside a region, or the rules of a container
    pub patterns: Vec<RawRule>,
    /// `#name`, `$self` or `$base`
    pub include: Option<String>,
    /// 0 puts the end pattern before the region's rules when two matches start at the
    /// same position. Anything else (or nothing) puts it after them.
    pub apply_end_pattern_last: Option<u32>,
}

/// Top-level structure of a grammar file
///
/// ```json
/// {
///   "name": "Garry's Mod Lua",
///   "scopeName": "source.lua",
///   "fileTypes": ["lua"],
///   "firstLineMatch": "\\A#!.*?\\blua\\b",
///   "variables": { "identifier": "[a-zA-Z_]\\w*" },
///   "patterns": [{ "include": "#comments" }],
///   "repository": { "comments": { "patterns": [] } }
/// }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all(deserialize = "camelCase"))]
pub struct RawGrammar {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    pub scope_name: String,
    #[serde(default)]
    pub file_types: Vec<String>,
    #[serde(default)]
    pub first_line_match: Option<String>,
    /// Reusable pattern fragments, inserted with `{{name}}`
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    #[serde(default)]
    pub patterns: Vec<RawRule>,
    #[serde(default)]
    pub repository: HashMap<String, RawRule>,
}

impl RawGrammar {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> LucernaResult<Self> {
        let file = File::open(path)?;
        let raw_grammar = serde_json::from_reader(BufReader::new(file))?;
        Ok(raw_grammar)
    }

    pub fn load_from_str(content: &str) -> LucernaResult<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Compile this raw grammar, validating every pattern and include
    pub fn compile(self) -> Result<CompiledGrammar, CompileError> {
        CompiledGrammar::from_raw_grammar(self)
    }
}
