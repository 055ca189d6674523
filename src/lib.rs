//! A TextMate-style tokenizer: grammars made of regex rules and nested regions are
//! compiled once, then used to split text into tokens carrying a stack of scope names.
//!
//! A Garry's Mod Lua grammar and its editor settings are bundled:
//!
//! ```
//! let registry = lucerna::Registry::builtin().unwrap();
//! let tokens = registry.tokenize("lua", "local x = 1 -- one").unwrap();
//! assert_eq!(tokens.last().unwrap().scopes[1].to_string(), "comment.line.double-dash.lua");
//! ```

mod error;
pub mod grammars;
mod registry;
mod scope;
mod settings;
mod tokenizer;

pub use error::Error;
pub use grammars::{CompileError, CompiledGrammar, RawGrammar};
pub use registry::{GrammarId, Registry};
pub use scope::Scope;
pub use settings::{EditorSettings, RawSettings};
pub use tokenizer::{EndMatcher, ScopeFrame, ScopeStack, Token, Tokenizer};
