use std::fmt;
use std::sync::Arc;

use crate::grammars::{ROOT_RULE_ID, Regex, RuleId};
use crate::scope::Scope;

/// The end pattern of one open region, with the begin backreferences already
/// substituted. Built once when the region opens and never changed afterwards.
#[derive(Clone)]
pub struct EndMatcher {
    regex: Arc<Regex>,
    /// Whether the end pattern wins ties against the rules of the region
    first: bool,
}

impl EndMatcher {
    pub fn new(regex: Arc<Regex>, first: bool) -> Self {
        Self { regex, first }
    }

    pub fn regex(&self) -> &Regex {
        &self.regex
    }

    pub fn pattern(&self) -> &str {
        self.regex.pattern()
    }

    pub fn is_first(&self) -> bool {
        self.first
    }
}

impl fmt::Debug for EndMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EndMatcher({:?}, first={})", self.pattern(), self.first)
    }
}

#[derive(Clone, Debug)]
pub struct ScopeFrame {
    /// The region rule that opened this frame, `ROOT_RULE_ID` for the root frame
    pub rule_id: RuleId,
    /// Scopes from the grammar scope down to this region's scope
    pub scopes: Vec<Scope>,
    /// `None` only for the root frame
    pub end: Option<EndMatcher>,
    /// Where the begin match started, used to detect regions that neither consume
    /// anything nor let the scanner advance
    pub enter_position: Option<usize>,
}

/// The regions currently open, root first.
///
/// Saving a clone of the stack at the end of each line is all that's needed to restart
/// tokenization from that line later.
#[derive(Clone)]
pub struct ScopeStack {
    frames: Vec<ScopeFrame>,
}

impl ScopeStack {
    pub fn new(grammar_scope: Scope) -> Self {
        Self {
            frames: vec![ScopeFrame {
                rule_id: ROOT_RULE_ID,
                scopes: vec![grammar_scope],
                end: None,
                enter_position: None,
            }],
        }
    }

    /// Enters a region
    pub fn push(
        &mut self,
        rule_id: RuleId,
        scope: Option<Scope>,
        end: EndMatcher,
        enter_position: usize,
    ) {
        let mut scopes = self.top().scopes.clone();
        scopes.extend(scope);
        self.frames.push(ScopeFrame {
            rule_id,
            scopes,
            end: Some(end),
            enter_position: Some(enter_position),
        });
    }

    /// Exits the current region. The root frame is never popped.
    pub fn pop(&mut self) -> Option<ScopeFrame> {
        if self.frames.len() > 1 {
            self.frames.pop()
        } else {
            None
        }
    }

    /// Pushes back a frame that was just popped
    pub(crate) fn restore(&mut self, frame: ScopeFrame) {
        self.frames.push(frame);
    }

    /// Number of open regions, the root frame is not counted
    pub fn depth(&self) -> usize {
        self.frames.len() - 1
    }

    pub fn top(&self) -> &ScopeFrame {
        self.frames.last().expect("stack never empty")
    }

    /// The scopes applying to text at the current position
    pub fn scopes(&self) -> &[Scope] {
        &self.top().scopes
    }

    /// Whether `rule_id` was entered at `pos` and is still open
    pub(crate) fn entered_at(&self, rule_id: RuleId, pos: usize) -> bool {
        self.frames
            .iter()
            .any(|f| f.rule_id == rule_id && f.enter_position == Some(pos))
    }

    /// Forgets the enter positions. Positions are relative to the text being scanned so
    /// they mean nothing once the stack is carried over to another line.
    pub fn reset(&mut self) {
        for frame in &mut self.frames {
            frame.enter_position = None;
        }
    }
}

impl fmt::Debug for ScopeStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ScopeStack:")?;

        for (depth, frame) in self.frames.iter().enumerate() {
            write!(f, "{}rule={}", "  ".repeat(depth), frame.rule_id.0)?;
            if let Some(scope) = frame.scopes.last() {
                write!(f, " scope={}", scope)?;
            }
            if let Some(end) = &frame.end {
                write!(f, ", end_pattern=\"{}\"", end.pattern())?;
            }
            if let Some(pos) = frame.enter_position {
                write!(f, ", enter_pos={}", pos)?;
            }
            writeln!(f)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn end(pattern: &str) -> EndMatcher {
        EndMatcher::new(Arc::new(Regex::new(pattern.to_owned())), false)
    }

    #[test]
    fn push_extends_parent_scopes() {
        let mut stack = ScopeStack::new(Scope::new("source.lua"));
        assert_eq!(stack.depth(), 0);

        stack.push(RuleId(3), Some(Scope::new("string.quoted.double.lua")), end("\""), 4);
        stack.push(RuleId(5), None, end("x"), 6);
        assert_eq!(stack.depth(), 2);
        assert_eq!(
            stack.scopes(),
            &[Scope::new("source.lua"), Scope::new("string.quoted.double.lua")]
        );
        assert!(stack.entered_at(RuleId(3), 4));
        assert!(!stack.entered_at(RuleId(3), 5));
    }

    #[test]
    fn never_pops_the_root() {
        let mut stack = ScopeStack::new(Scope::new("source.lua"));
        stack.push(RuleId(1), None, end("b"), 0);
        assert_eq!(stack.pop().map(|f| f.rule_id), Some(RuleId(1)));
        assert!(stack.pop().is_none());
        assert_eq!(stack.depth(), 0);
        assert_eq!(stack.top().rule_id, ROOT_RULE_ID);
    }

    #[test]
    fn reset_forgets_positions() {
        let mut stack = ScopeStack::new(Scope::new("source.lua"));
        stack.push(RuleId(1), None, end("b"), 7);
        stack.reset();
        assert_eq!(stack.top().enter_position, None);
        assert_eq!(stack.top().end.as_ref().unwrap().pattern(), "b");
    }
}
