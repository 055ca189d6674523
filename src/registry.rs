use std::collections::HashMap;
use std::ops::Index;
use std::path::Path;

use crate::error::{Error, LucernaResult};
use crate::grammars::{CompiledGrammar, RawGrammar};
use crate::scope::Scope;
use crate::settings::{EditorSettings, RawSettings};
use crate::tokenizer::{Token, Tokenizer};

pub(crate) const BUILTIN_LUA_GRAMMAR: &str = include_str!("../grammars/gmod-lua.json");
pub(crate) const BUILTIN_LUA_SETTINGS: &str = include_str!("../grammars/gmod-lua.settings.json");

/// Names the bundled grammar answers to, on top of its own name and scope name
const BUILTIN_LUA_ALIASES: &[&str] = &["lua", "glua", "gmod-lua"];

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct GrammarId(pub u16);

impl GrammarId {
    #[inline]
    pub fn as_index(self) -> usize {
        self.0 as usize
    }
}

impl Index<GrammarId> for Vec<CompiledGrammar> {
    type Output = CompiledGrammar;

    fn index(&self, index: GrammarId) -> &Self::Output {
        &self[index.as_index()]
    }
}

/// The main struct in lucerna.
///
/// Holds the compiled grammars and the editor settings. Grammars can be looked up by
/// name, scope name or alias.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    // Vector of compiled grammars for ID-based access
    grammars: Vec<CompiledGrammar>,
    // grammar scope name -> grammar ID
    grammar_id_by_scope_name: HashMap<String, GrammarId>,
    // grammar name or alias -> grammar ID
    grammar_id_by_name: HashMap<String, GrammarId>,
    settings: Vec<EditorSettings>,
}

impl Registry {
    /// A registry with the bundled Garry's Mod Lua grammar and its settings
    pub fn builtin() -> LucernaResult<Self> {
        let mut registry = Self::default();
        let grammar_id = registry.add_grammar_from_str(BUILTIN_LUA_GRAMMAR)?;
        let name = registry.grammars[grammar_id].name.clone();
        for alias in BUILTIN_LUA_ALIASES {
            registry.add_alias(&name, alias);
        }
        registry.add_settings_from_str(BUILTIN_LUA_SETTINGS)?;
        Ok(registry)
    }

    /// Compiles and registers a grammar. A grammar with the same scope name replaces the
    /// one already registered, keeping its aliases.
    fn add_grammar_from_raw(&mut self, raw_grammar: RawGrammar) -> LucernaResult<GrammarId> {
        // Nothing gets registered if the grammar doesn't compile
        let grammar = raw_grammar.compile()?;

        let grammar_id = match self.grammar_id_by_scope_name.get(&grammar.scope_name) {
            Some(&id) => {
                self.grammars[id.as_index()] = grammar;
                id
            }
            None => {
                let id = GrammarId(self.grammars.len() as u16);
                self.grammar_id_by_scope_name
                    .insert(grammar.scope_name.clone(), id);
                self.grammars.push(grammar);
                id
            }
        };

        self.grammar_id_by_name
            .insert(self.grammars[grammar_id].name.clone(), grammar_id);
        Ok(grammar_id)
    }

    pub fn add_grammar_from_str(&mut self, content: &str) -> LucernaResult<GrammarId> {
        let raw_grammar = RawGrammar::load_from_str(content)?;
        self.add_grammar_from_raw(raw_grammar)
    }

    /// Reads the file and add it as a grammar.
    pub fn add_grammar_from_path(&mut self, path: impl AsRef<Path>) -> LucernaResult<GrammarId> {
        let raw_grammar = RawGrammar::load_from_file(path)?;
        self.add_grammar_from_raw(raw_grammar)
    }

    pub fn add_settings_from_str(&mut self, content: &str) -> LucernaResult<()> {
        let raw_settings = RawSettings::load_from_str(content)?;
        self.settings.extend(raw_settings.compile()?);
        Ok(())
    }

    /// Reads the file and add its settings.
    pub fn add_settings_from_path(&mut self, path: impl AsRef<Path>) -> LucernaResult<()> {
        let raw_settings = RawSettings::load_from_file(path)?;
        self.settings.extend(raw_settings.compile()?);
        Ok(())
    }

    /// Adds an alias for the given grammar, does nothing if the grammar is unknown
    pub fn add_alias(&mut self, grammar_name: &str, alias: &str) {
        if let Some(grammar_id) = self.grammar_id(grammar_name) {
            self.grammar_id_by_name
                .insert(alias.to_string(), grammar_id);
        }
    }

    fn grammar_id(&self, name: &str) -> Option<GrammarId> {
        self.grammar_id_by_name
            .get(name)
            .or_else(|| self.grammar_id_by_scope_name.get(name))
            .copied()
    }

    /// Finds a grammar by name, alias or scope name
    pub fn grammar(&self, name: &str) -> Option<&CompiledGrammar> {
        self.grammar_id(name).map(|id| &self.grammars[id])
    }

    /// Checks whether the given name is a known grammar name, alias or scope name
    pub fn contains_grammar(&self, name: &str) -> bool {
        self.grammar_id(name).is_some()
    }

    fn get_grammar(&self, name: &str) -> LucernaResult<&CompiledGrammar> {
        self.grammar(name)
            .ok_or_else(|| Error::GrammarNotFound(name.to_string()))
    }

    /// Tokenizes the whole text with the given grammar
    pub fn tokenize(&self, grammar_name: &str, text: &str) -> LucernaResult<Vec<Token>> {
        let grammar = self.get_grammar(grammar_name)?;
        Tokenizer::new(grammar).tokenize(text)
    }

    /// Tokenizes the text line by line, see [`Tokenizer::tokenize_lines`]
    pub fn tokenize_lines(
        &self,
        grammar_name: &str,
        text: &str,
    ) -> LucernaResult<Vec<Vec<Token>>> {
        let grammar = self.get_grammar(grammar_name)?;
        Tokenizer::new(grammar).tokenize_lines(text)
    }

    /// The most specific settings whose selector is a prefix of `scope_name`.
    /// Between equally specific selectors, the last added wins.
    pub fn settings_for(&self, scope_name: &str) -> Option<&EditorSettings> {
        let scope = Scope::new(scope_name);
        self.settings
            .iter()
            .filter(|s| s.applies_to(scope))
            .max_by_key(|s| s.selector.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammars::CompileError;

    fn format_tokens(text: &str, tokens: &[Token]) -> String {
        let mut out = String::new();
        for token in tokens {
            let scopes: Vec<String> = token.scopes.iter().map(|s| s.to_string()).collect();
            out.push_str(&format!("{:?} {}\n", token.text(text), scopes.join(" ")));
        }
        out
    }

    #[test]
    fn can_load_builtin() {
        let registry = Registry::builtin().unwrap();
        for name in ["Garry's Mod Lua", "source.lua", "lua", "glua", "gmod-lua"] {
            assert!(registry.contains_grammar(name), "{name}");
        }
        assert_eq!(registry.grammar("lua").unwrap().scope_name, "source.lua");
        assert!(!registry.contains_grammar("javascript"));
    }

    #[test]
    fn unknown_grammar_is_an_error() {
        let registry = Registry::builtin().unwrap();
        let err = registry.tokenize("javascript", "x").unwrap_err();
        assert!(matches!(err, Error::GrammarNotFound(name) if name == "javascript"));
    }

    #[test]
    fn invalid_grammars_are_not_registered() {
        let mut registry = Registry::default();
        let err = registry
            .add_grammar_from_str(
                r#"{"name": "bad", "scopeName": "source.bad", "patterns": [{"match": "(", "name": "x"}]}"#,
            )
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Compile(CompileError::InvalidRegex { .. })
        ));
        assert!(!registry.contains_grammar("bad"));
        assert!(!registry.contains_grammar("source.bad"));

        let err = registry.add_grammar_from_str("{").unwrap_err();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn can_load_from_path() {
        let mut registry = Registry::default();
        registry
            .add_grammar_from_path("grammars/gmod-lua.json")
            .unwrap();
        registry
            .add_settings_from_path("grammars/gmod-lua.settings.json")
            .unwrap();
        assert!(registry.contains_grammar("source.lua"));
        assert!(registry.settings_for("source.lua").is_some());

        let err = registry.add_grammar_from_path("grammars/nope.json").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn same_scope_name_replaces_grammar() {
        let mut registry = Registry::default();
        let first = registry
            .add_grammar_from_str(r#"{"name": "one", "scopeName": "source.t"}"#)
            .unwrap();
        registry.add_alias("one", "t");
        let second = registry
            .add_grammar_from_str(r#"{"name": "two", "scopeName": "source.t"}"#)
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(registry.grammar("t").unwrap().name, "two");
    }

    #[test]
    fn picks_most_specific_settings() {
        let mut registry = Registry::builtin().unwrap();
        registry
            .add_settings_from_str(r#"{"source.lua.embedded": {"editor": {"commentStart": "//"}}}"#)
            .unwrap();

        let settings = registry.settings_for("source.lua").unwrap();
        assert_eq!(settings.comment_start.as_deref(), Some("-- "));
        let settings = registry.settings_for("source.lua.embedded.html").unwrap();
        assert_eq!(settings.comment_start.as_deref(), Some("//"));
        assert!(registry.settings_for("source.js").is_none());
    }

    #[test]
    fn can_tokenize_gmod_lua() {
        let registry = Registry::builtin().unwrap();
        let text = r#"local ply = LocalPlayer()
if IsValid(ply) && ply:Alive() then
    print("hp: " .. ply:Health()) // debug
end"#;
        let tokens = registry.tokenize("lua", text).unwrap();
        insta::assert_snapshot!(format_tokens(text, &tokens), @r#"
        "local" source.lua keyword.control.lua
        " ply " source.lua
        "=" source.lua keyword.operator.lua
        " " source.lua
        "LocalPlayer" source.lua support.function.any-method.lua
        "()\n" source.lua
        "if" source.lua keyword.control.lua
        " " source.lua
        "IsValid" source.lua support.function.any-method.lua
        "(ply) " source.lua
        "&&" source.lua keyword.operator.lua
        " ply:" source.lua
        "Alive" source.lua variable.other.lua
        "() " source.lua
        "then" source.lua keyword.control.lua
        "\n    " source.lua
        "print" source.lua support.function.library.lua
        "(" source.lua
        "\"hp: \"" source.lua string.quoted.double.lua
        " " source.lua
        ".." source.lua keyword.operator.lua
        " ply:" source.lua
        "Health" source.lua variable.other.lua
        "()) " source.lua
        "// debug\n" source.lua comment.line.double-slash.lua
        "end" source.lua keyword.control.lua
        "#);
    }

    #[test]
    fn can_tokenize_lines() {
        let registry = Registry::builtin().unwrap();
        let lines = registry
            .tokenize_lines("lua", "--[[ a\nb ]] x")
            .unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1][0].span, 0..4);
        assert_eq!(lines[1][0].scopes.last(), Some(&Scope::new("comment.block.lua")));
    }
}
