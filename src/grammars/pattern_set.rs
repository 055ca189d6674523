use std::fmt::{Debug, Formatter};

use onig::{RegSet, RegexOptions, SearchOptions};

use crate::grammars::RuleId;

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct PatternSetMatch {
    /// The rule that matched, or `END_RULE_ID` for the end pattern of the current region
    pub rule_id: RuleId,
    pub start: usize,
    pub end: usize,
    /// Absolute positions of every group, group 0 first
    pub capture_pos: Vec<Option<(usize, usize)>>,
}

/// All the patterns of a rule list compiled into a single onig RegSet.
/// Searching returns the leftmost match and, among matches starting at the same
/// position, the one declared first.
pub struct PatternSet {
    rule_ids: Vec<RuleId>,
    regset: Option<RegSet>,
}

impl PatternSet {
    pub fn new(items: Vec<(RuleId, &str)>) -> Result<Self, String> {
        if items.is_empty() {
            return Ok(Self {
                rule_ids: Vec::new(),
                regset: None,
            });
        }

        let (rule_ids, patterns): (Vec<_>, Vec<_>) = items.into_iter().unzip();

        let regset = RegSet::with_options(&patterns, RegexOptions::REGEX_OPTION_CAPTURE_GROUP)
            .map_err(|e| {
                format!(
                    "Failed to compile pattern set with {} patterns: {:?}",
                    patterns.len(),
                    e
                )
            })?;

        Ok(Self {
            rule_ids,
            regset: Some(regset),
        })
    }

    pub fn find_at(&self, text: &str, pos: usize) -> Option<PatternSetMatch> {
        let regset = self.regset.as_ref()?;

        // The full text is given, not a slice, so lookbehinds see what precedes `pos`
        let (pattern_index, captures) = regset.captures_with_options(
            text,
            pos,
            text.len(),
            onig::RegSetLead::Position,
            SearchOptions::SEARCH_OPTION_NONE,
        )?;
        let (start, end) = captures.pos(0)?;

        Some(PatternSetMatch {
            rule_id: self.rule_ids[pattern_index],
            start,
            end,
            capture_pos: (0..captures.len()).map(|i| captures.pos(i)).collect(),
        })
    }
}

impl Debug for PatternSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "PatternSet({} rules)", self.rule_ids.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leftmost_match_wins() {
        let set = PatternSet::new(vec![(RuleId(1), "b"), (RuleId(2), "a")]).unwrap();
        let m = set.find_at("xab", 0).unwrap();
        assert_eq!(m.rule_id, RuleId(2));
        assert_eq!((m.start, m.end), (1, 2));
    }

    #[test]
    fn first_declared_wins_ties() {
        let set = PatternSet::new(vec![
            (RuleId(1), r"\w+(?=\()"),
            (RuleId(2), r"(?<=\.)\w+"),
        ])
        .unwrap();
        let m = set.find_at("t.foo(", 0).unwrap();
        assert_eq!(m.rule_id, RuleId(1));
        assert_eq!((m.start, m.end), (2, 5));

        let set = PatternSet::new(vec![
            (RuleId(2), r"(?<=\.)\w+"),
            (RuleId(1), r"\w+(?=\()"),
        ])
        .unwrap();
        assert_eq!(set.find_at("t.foo(", 0).unwrap().rule_id, RuleId(2));
    }

    #[test]
    fn reports_group_positions() {
        let set = PatternSet::new(vec![(RuleId(3), r"\[(=*)\[")]).unwrap();
        let m = set.find_at("x = [==[", 0).unwrap();
        assert_eq!(m.capture_pos, vec![Some((4, 8)), Some((5, 7))]);
    }

    #[test]
    fn empty_set_never_matches() {
        let set = PatternSet::new(vec![]).unwrap();
        assert!(set.find_at("anything", 0).is_none());
    }
}
