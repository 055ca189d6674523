//! Editor settings attached to a scope selector: the line comment token and the two
//! indentation hints.
//!
//! ```json
//! {
//!   ".source.lua": {
//!     "editor": {
//!       "commentStart": "-- ",
//!       "increaseIndentPattern": "\\b(then|do)\\b((?!\\bend\\b).)*$",
//!       "decreaseIndentPattern": "^\\s*(end|else)\\b"
//!     }
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::Deserialize;

use crate::error::LucernaResult;
use crate::grammars::{CompileError, Regex, deserialize_pattern, prepare_pattern};
use crate::scope::Scope;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all(deserialize = "camelCase"))]
pub struct RawEditorSettings {
    pub comment_start: Option<String>,
    #[serde(deserialize_with = "deserialize_pattern")]
    pub increase_indent_pattern: Option<String>,
    #[serde(deserialize_with = "deserialize_pattern")]
    pub decrease_indent_pattern: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawSettingsEntry {
    #[serde(default)]
    pub editor: RawEditorSettings,
}

/// Selector -> settings, as found in a settings file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct RawSettings(pub BTreeMap<String, RawSettingsEntry>);

impl RawSettings {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> LucernaResult<Self> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    pub fn load_from_str(content: &str) -> LucernaResult<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Validates every pattern. One invalid pattern rejects the whole file.
    pub fn compile(self) -> Result<Vec<EditorSettings>, CompileError> {
        self.0
            .into_iter()
            .map(|(selector, entry)| EditorSettings::from_raw(&selector, entry.editor))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct EditorSettings {
    /// Scope these settings apply to, along with every scope it is a prefix of
    pub selector: Scope,
    /// What to insert at the start of a line to comment it out
    pub comment_start: Option<String>,
    increase_indent: Option<Regex>,
    decrease_indent: Option<Regex>,
}

impl EditorSettings {
    fn from_raw(selector: &str, raw: RawEditorSettings) -> Result<Self, CompileError> {
        Ok(Self {
            selector: Scope::new(selector.trim_start_matches('.')),
            comment_start: raw.comment_start,
            increase_indent: compile_indent_pattern(raw.increase_indent_pattern)?,
            decrease_indent: compile_indent_pattern(raw.decrease_indent_pattern)?,
        })
    }

    pub fn applies_to(&self, scope: Scope) -> bool {
        self.selector.is_prefix_of(scope)
    }

    /// Whether the line after this one should be indented one more level
    pub fn suggests_indent_increase(&self, line: &str) -> bool {
        self.increase_indent
            .as_ref()
            .is_some_and(|re| re.is_match(line))
    }

    /// Whether this line should be indented one level less than the previous one
    pub fn suggests_indent_decrease(&self, line: &str) -> bool {
        self.decrease_indent
            .as_ref()
            .is_some_and(|re| re.is_match(line))
    }
}

fn compile_indent_pattern(raw: Option<String>) -> Result<Option<Regex>, CompileError> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let re = Regex::new(prepare_pattern(&raw, &BTreeMap::new())?);
    re.validate().map_err(|error| CompileError::InvalidRegex {
        pattern: re.pattern().to_owned(),
        error,
    })?;
    Ok(Some(re))
}
