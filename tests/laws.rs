//! Property-based tests for the tokenizer laws, using the bundled grammar.
//!
//! Whatever the input, tokens must cover the text exactly once, and regions that are
//! closed in the text must be closed on the stack.

use proptest::prelude::*;
use lucerna::{Registry, Scope, Token, Tokenizer};

fn registry() -> Registry {
    Registry::builtin().expect("the bundled grammar compiles")
}

/// Helper: checks tokens are contiguous, non-empty, cover the whole text and that no two
/// neighbours share the same scopes
fn check_partition(text: &str, tokens: &[Token]) -> Result<(), TestCaseError> {
    let mut pos = 0;
    for (i, token) in tokens.iter().enumerate() {
        prop_assert_eq!(token.span.start, pos);
        prop_assert!(token.span.end > token.span.start);
        prop_assert_eq!(token.scopes[0], Scope::new("source.lua"));
        if i > 0 {
            prop_assert_ne!(&tokens[i - 1].scopes, &token.scopes);
        }
        pos = token.span.end;
    }
    prop_assert_eq!(pos, text.len());
    Ok(())
}

/// Lua-ish snippets that are complete on their own
fn closed_fragment() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("local x = 1".to_string()),
        Just("[[x]]".to_string()),
        Just("--[==[ y ]] ]==]".to_string()),
        Just("\"s\\n\"".to_string()),
        Just("'q\\z'".to_string()),
        Just("f(a, b)".to_string()),
        Just("function t.g(x, ...) return x end".to_string()),
        Just("-- c\n".to_string()),
        Just("/* z */".to_string()),
        Just("// w\n".to_string()),
        Just("self.v = t:m() .. 0x1F".to_string()),
        "[a-z_]{1,8}",
    ]
}

proptest! {
    #[test]
    fn tokens_partition_printable_text(text in "[ -~\n\t]{0,120}") {
        let tokens = registry().tokenize("lua", &text).unwrap();
        check_partition(&text, &tokens)?;
    }

    #[test]
    fn tokens_partition_any_text(text in "\\PC{0,64}") {
        let tokens = registry().tokenize("lua", &text).unwrap();
        check_partition(&text, &tokens)?;
    }

    #[test]
    fn lines_partition_each_line(text in "[ -~\n]{0,120}") {
        let lines = registry().tokenize_lines("lua", &text).unwrap();
        let line_texts: Vec<&str> = text.split_inclusive('\n').collect();
        prop_assert_eq!(lines.len(), line_texts.len());
        for (line, tokens) in line_texts.iter().zip(&lines) {
            check_partition(line, tokens)?;
        }
    }

    #[test]
    fn closed_regions_leave_stack_balanced(
        fragments in prop::collection::vec(closed_fragment(), 0..12),
        newlines in any::<bool>(),
    ) {
        let text = fragments.join(if newlines { "\n" } else { " " });
        let registry = registry();
        let grammar = registry.grammar("lua").unwrap();
        let mut tokenizer = Tokenizer::new(grammar);
        let (tokens, stack) = tokenizer
            .tokenize_from(&text, tokenizer.initial_stack())
            .unwrap();
        check_partition(&text, &tokens)?;
        prop_assert_eq!(stack.depth(), 0);
    }

    #[test]
    fn long_brackets_close_on_their_own_level(
        open in 0usize..5,
        close in 0usize..5,
        body in "[a-z =\\[]{0,12}",
    ) {
        let text = format!("[{}[{body}]{}]", "=".repeat(open), "=".repeat(close));
        let registry = registry();
        let grammar = registry.grammar("lua").unwrap();
        let mut tokenizer = Tokenizer::new(grammar);
        let (tokens, stack) = tokenizer
            .tokenize_from(&text, tokenizer.initial_stack())
            .unwrap();
        prop_assert_eq!(tokens.len(), 1);
        prop_assert_eq!(stack.depth(), usize::from(open != close));
    }
}
