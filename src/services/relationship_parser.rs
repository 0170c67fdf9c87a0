//! Regex heuristics that turn issue text into relationship references.
//!
//! Recognised forms, case-insensitive, one or more `#N` after the keyword:
//! - `blocked by`, `depends on`, `requires`, `waiting on`
//! - `blocks`, `blocking`, `required by`
//! - `related to`, `relates to`, `see also`
//! - task list items (`- [ ] #12`, `* [x] #12`) as subtasks

use regex::Regex;
use std::sync::LazyLock;

use crate::domain::models::{RelationKind, RelationshipRef};
use crate::domain::ports::{RelationshipParse, RelationshipParser};

static KEYWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:(?P<blocked_by>blocked\s+by|depends\s+on|requires|waiting\s+on)|(?P<blocks>blocks|blocking|required\s+by)|(?P<related>related\s+to|relates\s+to|see\s+also))\b:?",
    )
    .expect("keyword pattern is valid")
});

static ISSUE_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#(\d+)\b").expect("issue reference pattern is valid"));

static TASK_ITEM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*[-*]\s+\[[ xX]\]\s+(?:[^#\n]*?)#(\d+)\b").expect("task item pattern is valid")
});

/// Default [`RelationshipParser`].
#[derive(Debug, Clone, Default)]
pub struct RegexRelationshipParser;

impl RegexRelationshipParser {
    pub fn new() -> Self {
        Self
    }

    fn parse_line(&self, line: &str, self_number: u64, out: &mut RelationshipParse) {
        if let Some(caps) = TASK_ITEM.captures(line) {
            if let Some(n) = caps.get(1).and_then(|m| m.as_str().parse::<u64>().ok()) {
                push_ref(out, RelationKind::Subtask, n, self_number);
            }
        }

        let matches: Vec<_> = KEYWORD.captures_iter(line).collect();
        for (i, caps) in matches.iter().enumerate() {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            let kind = if caps.name("blocked_by").is_some() {
                RelationKind::BlockedBy
            } else if caps.name("blocks").is_some() {
                RelationKind::Blocks
            } else {
                RelationKind::Related
            };

            // References run until the next keyword on the same line.
            let end = matches
                .get(i + 1)
                .and_then(|next| next.get(0))
                .map_or(line.len(), |m| m.start());
            let segment = &line[whole.end()..end];

            let mut found = false;
            for number in ISSUE_REF
                .captures_iter(segment)
                .filter_map(|c| c.get(1)?.as_str().parse::<u64>().ok())
            {
                found = true;
                push_ref(out, kind, number, self_number);
            }
            if !found {
                out.malformed.push(line.trim().to_string());
            }
        }
    }
}

fn push_ref(out: &mut RelationshipParse, kind: RelationKind, number: u64, self_number: u64) {
    if number == self_number {
        return;
    }
    let reference = RelationshipRef::new(kind, number);
    if !out.references.contains(&reference) {
        out.references.push(reference);
    }
}

impl RelationshipParser for RegexRelationshipParser {
    fn parse(&self, issue_number: u64, text: &str) -> RelationshipParse {
        let mut out = RelationshipParse::default();
        for line in text.lines() {
            self.parse_line(line, issue_number, &mut out);
        }
        out
    }
}
