mod compiled;
mod pattern;
mod pattern_set;
mod raw;
mod regex;

pub use compiled::*;
pub(crate) use pattern::prepare_pattern;
pub use pattern_set::{PatternSet, PatternSetMatch};
pub use raw::{Captures, RawCapture, RawGrammar, RawRule};
pub(crate) use raw::deserialize_pattern;
pub use regex::{Regex, escape_regex, resolve_backreferences};
