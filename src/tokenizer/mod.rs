//! The scanning loop: at each position, find the rule that fires first, emit the text
//! before it and move the stack of open regions accordingly.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::ops::Range;
use std::sync::Arc;

use serde::Serialize;

use crate::error::{Error, LucernaResult};
use crate::grammars::{
    BeginEnd, CompiledGrammar, END_RULE_ID, PatternSet, PatternSetMatch, Regex, Rule, RuleId,
    resolve_backreferences,
};
use crate::scope::Scope;

mod stack;

pub use stack::{EndMatcher, ScopeFrame, ScopeStack};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Token {
    /// Byte span within the scanned text (start inclusive, end exclusive, 0-based)
    pub span: Range<usize>,
    /// Scope names from outermost to innermost, the grammar scope always comes first
    pub scopes: Vec<Scope>,
}

impl Token {
    /// The text covered by this token
    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        &source[self.span.clone()]
    }
}

/// Small wrapper so we only produce valid tokens.
/// Called in the tokenizer a few times and easier to use a struct than pass
/// mutable vec and usize everywhere
#[derive(Debug, Clone, Default)]
struct TokenAccumulator {
    tokens: Vec<Token>,
    /// Position up to which tokens have been generated
    /// (start of next token to be produced)
    last_end_pos: usize,
}

impl TokenAccumulator {
    fn produce(&mut self, end_pos: usize, scopes: &[Scope]) {
        // Skip empty tokens (can happen with zero-width matches)
        if self.last_end_pos >= end_pos {
            return;
        }

        #[cfg(feature = "debug")]
        log::trace!(
            "[produce]: [{}..{end_pos}] {}",
            self.last_end_pos,
            scopes
                .iter()
                .map(|s| s.to_string())
                .collect::<Vec<_>>()
                .join(" ")
        );

        // Two adjacent pieces with the same scopes are a single token
        match self.tokens.last_mut() {
            Some(last) if last.span.end == self.last_end_pos && last.scopes == scopes => {
                last.span.end = end_pos;
            }
            _ => self.tokens.push(Token {
                span: self.last_end_pos..end_pos,
                scopes: scopes.to_vec(),
            }),
        }

        self.last_end_pos = end_pos;
    }
}

#[derive(Debug)]
pub struct Tokenizer<'g> {
    grammar: &'g CompiledGrammar,
    /// Runtime pattern cache by rule ID
    pattern_cache: HashMap<RuleId, PatternSet>,
    /// End patterns by their final source. Patterns with backreferences exist in one
    /// version per distinct captured text.
    end_regex_cache: HashMap<String, Arc<Regex>>,
}

impl<'g> Tokenizer<'g> {
    pub fn new(grammar: &'g CompiledGrammar) -> Self {
        Self {
            grammar,
            pattern_cache: HashMap::new(),
            end_regex_cache: HashMap::new(),
        }
    }

    pub fn grammar(&self) -> &'g CompiledGrammar {
        self.grammar
    }

    /// A stack holding only the root frame
    pub fn initial_stack(&self) -> ScopeStack {
        ScopeStack::new(self.grammar.scope)
    }

    fn get_or_create_pattern_set(&mut self, rule_id: RuleId) -> LucernaResult<&PatternSet> {
        match self.pattern_cache.entry(rule_id) {
            Entry::Occupied(e) => Ok(&*e.into_mut()),
            Entry::Vacant(e) => {
                let patterns = self.grammar.collect_patterns(rule_id);
                #[cfg(feature = "debug")]
                log::debug!(
                    "[get_or_create_pattern_set] rule {} has {} active patterns",
                    rule_id.0,
                    patterns.len()
                );
                let set = PatternSet::new(patterns).map_err(Error::TokenizeRegex)?;
                Ok(&*e.insert(set))
            }
        }
    }

    /// Builds the end matcher of a region that just opened, filling the backreferences
    /// with the text the begin pattern captured.
    fn create_end_matcher(
        &mut self,
        region: &BeginEnd,
        text: &str,
        captures: &[Option<(usize, usize)>],
    ) -> LucernaResult<EndMatcher> {
        let template = self.grammar.regexes[region.end].pattern();
        let pattern = if region.end_has_backrefs {
            resolve_backreferences(template, text, captures)
        } else {
            template.to_owned()
        };

        let regex = match self.end_regex_cache.get(&pattern) {
            Some(re) => re.clone(),
            None => {
                let re = Arc::new(Regex::new(pattern.clone()));
                if re.compiled().is_none() {
                    return Err(Error::TokenizeRegex(format!(
                        "End pattern '{pattern}' does not compile"
                    )));
                }
                #[cfg(feature = "debug")]
                log::debug!("[create_end_matcher] new end pattern {pattern:?}");
                self.end_regex_cache.insert(pattern, re.clone());
                re
            }
        };

        Ok(EndMatcher::new(regex, region.end_pattern_first))
    }

    /// The earliest match among the active rules of the top frame and its end pattern.
    /// On a tie the rules win unless the region asked for its end pattern to go first.
    fn find_next_match(
        &mut self,
        stack: &ScopeStack,
        text: &str,
        pos: usize,
    ) -> LucernaResult<Option<PatternSetMatch>> {
        let frame = stack.top();
        let rule_match = self
            .get_or_create_pattern_set(frame.rule_id)?
            .find_at(text, pos);

        let end_match = frame.end.as_ref().and_then(|end| {
            let capture_pos = end.regex().find_at(text, pos)?;
            let (start, end_pos) = capture_pos.first().copied().flatten()?;
            let m = PatternSetMatch {
                rule_id: END_RULE_ID,
                start,
                end: end_pos,
                capture_pos,
            };
            Some((end.is_first(), m))
        });

        Ok(match (rule_match, end_match) {
            (None, None) => None,
            (Some(r), None) => Some(r),
            (None, Some((_, e))) => Some(e),
            (Some(r), Some((first, e))) => {
                if e.start < r.start || (e.start == r.start && first) {
                    Some(e)
                } else {
                    Some(r)
                }
            }
        })
    }

    /// Emits the groups of a match that have a scope. Groups can nest so a small stack
    /// keeps the scopes of the groups still open. Groups are clamped to the overall match
    /// since lookarounds can capture outside of it.
    fn resolve_captures(
        base_scopes: &[Scope],
        rule_captures: &[Option<Scope>],
        m: &PatternSetMatch,
        accumulator: &mut TokenAccumulator,
    ) {
        if rule_captures.is_empty() {
            return;
        }

        // (scopes, end_pos)[]
        let mut local_stack: Vec<(Vec<Scope>, usize)> = Vec::with_capacity(2);

        for (i, scope) in rule_captures.iter().enumerate() {
            let Some(scope) = scope else {
                continue;
            };
            let Some(Some((cap_start, cap_end))) = m.capture_pos.get(i) else {
                continue;
            };
            let cap_start = (*cap_start).clamp(m.start, m.end);
            let cap_end = (*cap_end).clamp(m.start, m.end);
            // Nothing captured
            if cap_start >= cap_end {
                continue;
            }

            while let Some((scopes, end_pos)) = local_stack.last()
                && *end_pos <= cap_start
            {
                accumulator.produce(*end_pos, scopes);
                local_stack.pop();
            }

            let mut scopes = match local_stack.last() {
                Some((scopes, _)) => scopes.clone(),
                None => base_scopes.to_vec(),
            };
            accumulator.produce(cap_start, &scopes);
            scopes.push(*scope);
            local_stack.push((scopes, cap_end));
        }

        while let Some((scopes, end_pos)) = local_stack.pop() {
            accumulator.produce(end_pos, &scopes);
        }
    }

    /// Emits the character at `pos` with the current scopes and returns the position
    /// after it, or `None` at the end of the text.
    fn skip_char(
        text: &str,
        pos: usize,
        scopes: &[Scope],
        accumulator: &mut TokenAccumulator,
    ) -> Option<usize> {
        let c = text[pos..].chars().next()?;
        let next = pos + c.len_utf8();
        accumulator.produce(pos, scopes);
        accumulator.produce(next, scopes);
        Some(next)
    }

    fn scan(
        &mut self,
        text: &str,
        mut stack: ScopeStack,
        accumulator: &mut TokenAccumulator,
    ) -> LucernaResult<ScopeStack> {
        let grammar = self.grammar;
        let mut pos = 0;

        loop {
            #[cfg(feature = "debug")]
            log::trace!("[scan] Scanning {pos}: |{:?}|", &text[pos..]);

            let Some(m) = self.find_next_match(&stack, text, pos)? else {
                #[cfg(feature = "debug")]
                log::debug!("[scan] no more matches");
                break;
            };
            let has_advanced = m.end > pos;

            if m.rule_id == END_RULE_ID {
                let frame_rule = stack.top().rule_id;
                #[cfg(feature = "debug")]
                log::debug!(
                    "[scan] end of rule {} at [{}..{}]",
                    frame_rule.0,
                    m.start,
                    m.end
                );

                accumulator.produce(m.start, stack.scopes());
                if let Rule::BeginEnd(region) = &grammar.rules[frame_rule] {
                    Self::resolve_captures(stack.scopes(), &region.end_captures, &m, accumulator);
                }
                accumulator.produce(m.end, stack.scopes());

                if let Some(popped) = stack.pop()
                    && !has_advanced
                    && popped.enter_position == Some(pos)
                {
                    // Opened and closed at the same spot without consuming anything:
                    // keep the region open and step over one character instead
                    #[cfg(feature = "debug")]
                    log::warn!("[scan] rule {} did not advance, skipping", frame_rule.0);
                    stack.restore(popped);
                    match Self::skip_char(text, pos, stack.scopes(), accumulator) {
                        Some(next) => {
                            pos = next;
                            continue;
                        }
                        None => break,
                    }
                }
            } else {
                match &grammar.rules[m.rule_id] {
                    Rule::Match(rule) => {
                        if !has_advanced {
                            #[cfg(feature = "debug")]
                            log::warn!("[scan] match rule {} is empty, skipping", rule.id.0);
                            match Self::skip_char(text, pos, stack.scopes(), accumulator) {
                                Some(next) => {
                                    pos = next;
                                    continue;
                                }
                                None => break,
                            }
                        }

                        #[cfg(feature = "debug")]
                        log::debug!(
                            "[scan] match rule {} at [{}..{}]",
                            rule.id.0,
                            m.start,
                            m.end
                        );
                        accumulator.produce(m.start, stack.scopes());
                        let mut scopes = stack.scopes().to_vec();
                        scopes.extend(rule.scope);
                        Self::resolve_captures(&scopes, &rule.captures, &m, accumulator);
                        accumulator.produce(m.end, &scopes);
                    }
                    Rule::BeginEnd(region) => {
                        if !has_advanced && stack.entered_at(region.id, m.start) {
                            #[cfg(feature = "debug")]
                            log::warn!("[scan] region {} re-entered, skipping", region.id.0);
                            match Self::skip_char(text, pos, stack.scopes(), accumulator) {
                                Some(next) => {
                                    pos = next;
                                    continue;
                                }
                                None => break,
                            }
                        }

                        #[cfg(feature = "debug")]
                        log::debug!(
                            "[scan] begin rule {} at [{}..{}]",
                            region.id.0,
                            m.start,
                            m.end
                        );
                        accumulator.produce(m.start, stack.scopes());
                        let end = self.create_end_matcher(region, text, &m.capture_pos)?;
                        stack.push(region.id, region.scope, end, m.start);
                        Self::resolve_captures(
                            stack.scopes(),
                            &region.begin_captures,
                            &m,
                            accumulator,
                        );
                        accumulator.produce(m.end, stack.scopes());
                    }
                    Rule::IncludeOnly(_) | Rule::Noop => {
                        unreachable!("pattern sets only hold match and region rules")
                    }
                }
            }

            if has_advanced {
                pos = m.end;
            }
        }

        accumulator.produce(text.len(), stack.scopes());
        Ok(stack)
    }

    /// Tokenizes `text` starting from a given stack and returns the tokens and the stack
    /// as it is at the end of the text. Regions still open are left open.
    pub fn tokenize_from(
        &mut self,
        text: &str,
        stack: ScopeStack,
    ) -> LucernaResult<(Vec<Token>, ScopeStack)> {
        let mut accumulator = TokenAccumulator::default();
        let stack = self.scan(text, stack, &mut accumulator)?;
        Ok((accumulator.tokens, stack))
    }

    /// Tokenizes a whole buffer. Regions left open at the end of the text are closed,
    /// their scopes covering everything up to the end.
    pub fn tokenize(&mut self, text: &str) -> LucernaResult<Vec<Token>> {
        let (tokens, mut stack) = self.tokenize_from(text, self.initial_stack())?;

        while let Some(_frame) = stack.pop() {
            #[cfg(feature = "debug")]
            log::debug!(
                "[tokenize] rule {} still open at the end of the text",
                _frame.rule_id.0
            );
        }

        Ok(tokens)
    }

    /// Tokenizes line by line, carrying the stack over from one line to the next.
    /// Lines keep their `\n` and spans are relative to the start of their line.
    pub fn tokenize_lines(&mut self, text: &str) -> LucernaResult<Vec<Vec<Token>>> {
        let mut stack = self.initial_stack();
        let mut lines = Vec::new();

        for line in text.split_inclusive('\n') {
            let (tokens, mut next) = self.tokenize_from(line, stack)?;
            next.reset();
            lines.push(tokens);
            stack = next;
        }

        Ok(lines)
    }
}
