//! Session Memory
//!
//! An append-only record of what a session has executed. Each successful
//! invocation becomes one [`MemoryEntry`]; failures are kept apart as
//! incidents so a failed chain link never counts as work done. Memory lives
//! as long as its session and is never written anywhere.
//!
//! `summarize` is lossy by construction: only the newest entries are shown
//! and each is cut to a fixed character budget. It bounds what goes back to
//! the classifier on every replanning call; the full text stays here.

use crate::conductor::types::{InvocationResult, PlanStep};
use chrono::{DateTime, Utc};
use sdk::types::Identifier;
use serde::Serialize;
use std::collections::HashSet;

const TRUNCATION_MARKER: &str = "…[truncated]";

/// One executed invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemoryEntry {
    /// The step as executed, holding exactly one bound argument set
    pub step: PlanStep,
    /// Result text, bounded when recorded
    pub summary: String,
    pub identifiers: Vec<Identifier>,
    pub timestamp: DateTime<Utc>,
    /// Position among all entries and incidents of the session
    pub sequence: u64,
}

/// A failed invocation, kept verbatim
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Incident {
    pub step: PlanStep,
    pub error: String,
    pub timestamp: DateTime<Utc>,
    pub sequence: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Memory {
    entries: Vec<MemoryEntry>,
    incidents: Vec<Incident>,
    #[serde(skip)]
    consumed: HashSet<(String, String)>,
    #[serde(skip)]
    next_sequence: u64,
    #[serde(skip)]
    result_chars: usize,
}

impl Memory {
    /// `result_chars` bounds the text stored per entry
    pub fn new(result_chars: usize) -> Self {
        Self {
            entries: Vec::new(),
            incidents: Vec::new(),
            consumed: HashSet::new(),
            next_sequence: 0,
            result_chars,
        }
    }

    fn advance(&mut self) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        sequence
    }

    /// Append an entry; its `sequence` is assigned here
    pub fn append(&mut self, mut entry: MemoryEntry) {
        entry.sequence = self.advance();
        self.entries.push(entry);
    }

    /// Record a successful invocation of `step`
    pub fn record(&mut self, step: &PlanStep, result: &InvocationResult) {
        let executed = PlanStep {
            arguments: vec![result.arguments.clone()],
            ..step.clone()
        };
        self.append(MemoryEntry {
            step: executed,
            summary: truncate(&result.text, self.result_chars),
            identifiers: result.identifiers.clone(),
            timestamp: Utc::now(),
            sequence: 0,
        });
    }

    pub fn record_incident(&mut self, step: &PlanStep, error: impl Into<String>) {
        let sequence = self.advance();
        self.incidents.push(Incident {
            step: step.clone(),
            error: error.into(),
            timestamp: Utc::now(),
            sequence,
        });
    }

    pub fn entries(&self) -> &[MemoryEntry] {
        &self.entries
    }

    pub fn incidents(&self) -> &[Incident] {
        &self.incidents
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.incidents.is_empty()
    }

    /// Identifiers of `kind` not returned by any earlier call, in the order
    /// first seen. Returned values are marked consumed.
    pub fn extract(&mut self, kind: &str) -> Vec<String> {
        let fresh = self.pending(kind);
        for value in &fresh {
            self.consume(kind, value);
        }
        fresh
    }

    /// Unconsumed identifiers of `kind` in first-seen order, without
    /// consuming them
    pub fn pending(&self, kind: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        self.entries
            .iter()
            .flat_map(|e| e.identifiers.iter())
            .filter(|i| i.kind == kind)
            .filter(|i| !self.consumed.contains(&(i.kind.clone(), i.value.clone())))
            .filter(|i| seen.insert(i.value.as_str()))
            .map(|i| i.value.clone())
            .collect()
    }

    /// Mark one identifier consumed; later `pending`/`extract` calls skip it
    pub fn consume(&mut self, kind: &str, value: &str) {
        self.consumed.insert((kind.to_string(), value.to_string()));
    }

    /// Newest `max_entries` entries and their incidents, each cut to
    /// `max_chars` characters
    pub fn summarize(&self, max_entries: usize, max_chars: usize) -> String {
        if self.is_empty() {
            return "(nothing executed yet)".to_string();
        }

        let mut lines = Vec::new();
        let skip = self.entries.len().saturating_sub(max_entries);
        if skip > 0 {
            lines.push(format!("({} earlier steps omitted)", skip));
        }

        let mut shown: Vec<(u64, String)> = Vec::new();
        for (index, entry) in self.entries.iter().enumerate().skip(skip) {
            let mut line = format!(
                "{}. {} -> {}",
                index + 1,
                entry.step.render(),
                truncate(&entry.summary, max_chars)
            );
            if !entry.identifiers.is_empty() {
                let ids: Vec<String> = entry
                    .identifiers
                    .iter()
                    .map(|i| format!("{}={}", i.kind, i.value))
                    .collect();
                line.push_str(&format!(" [ids: {}]", ids.join(", ")));
            }
            shown.push((entry.sequence, line));
        }

        let skip = self.incidents.len().saturating_sub(max_entries);
        for incident in self.incidents.iter().skip(skip) {
            shown.push((
                incident.sequence,
                format!(
                    "FAILED {} -> {}",
                    incident.step.render(),
                    truncate(&incident.error, max_chars)
                ),
            ));
        }

        // Chronological, successes and failures interleaved
        shown.sort_by_key(|(sequence, _)| *sequence);
        lines.extend(shown.into_iter().map(|(_, line)| line));
        lines.join("\n")
    }
}

/// Cut `text` to at most `max_chars` characters, marking the cut
pub(crate) fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars).collect();
    cut.push_str(TRUNCATION_MARKER);
    cut
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdk::descriptor::Arguments;

    fn result(text: &str, ids: &[(&str, &str)]) -> InvocationResult {
        InvocationResult {
            arguments: Arguments::new(),
            text: text.to_string(),
            identifiers: ids.iter().map(|(k, v)| Identifier::new(*k, *v)).collect(),
            effects: vec![],
        }
    }

    fn step() -> PlanStep {
        PlanStep::new("mail:fetch", Arguments::new())
    }

    #[test]
    fn test_extract_never_repeats() {
        let mut memory = Memory::new(100);
        memory.record(&step(), &result("two mails", &[("message", "a"), ("message", "b")]));

        assert_eq!(memory.extract("message"), vec!["a", "b"]);
        assert!(memory.extract("message").is_empty());

        memory.record(&step(), &result("more", &[("message", "b"), ("message", "c")]));
        assert_eq!(memory.extract("message"), vec!["c"]);
    }

    #[test]
    fn test_extract_is_per_kind() {
        let mut memory = Memory::new(100);
        memory.record(&step(), &result("x", &[("message", "1"), ("thread", "1")]));
        assert_eq!(memory.extract("thread"), vec!["1"]);
        assert_eq!(memory.extract("message"), vec!["1"]);
    }

    #[test]
    fn test_record_truncates_stored_text() {
        let mut memory = Memory::new(5);
        memory.record(&step(), &result("abcdefghij", &[]));
        assert_eq!(memory.entries()[0].summary, "abcde…[truncated]");
    }

    #[test]
    fn test_summarize_is_bounded() {
        let mut memory = Memory::new(1000);
        for i in 0..5 {
            memory.record(&step(), &result(&format!("result number {}", i), &[]));
        }
        memory.record_incident(&step(), "connection refused");

        let summary = memory.summarize(2, 8);
        assert!(summary.starts_with("(3 earlier steps omitted)"));
        assert!(summary.contains("4. mail:fetch -> result n…[truncated]"));
        assert!(summary.contains("5. mail:fetch -> result n…[truncated]"));
        assert!(!summary.contains("3. mail:fetch"));
        assert!(summary.contains("FAILED mail:fetch -> connecti…[truncated]"));
    }

    #[test]
    fn test_pending_does_not_consume() {
        let mut memory = Memory::new(100);
        memory.record(&step(), &result("x", &[("message", "a"), ("message", "b"), ("message", "a")]));

        assert_eq!(memory.pending("message"), vec!["a", "b"]);
        memory.consume("message", "a");
        assert_eq!(memory.pending("message"), vec!["b"]);
        assert_eq!(memory.extract("message"), vec!["b"]);
        assert!(memory.pending("message").is_empty());
    }

    #[test]
    fn test_summarize_keeps_failures_in_order() {
        let mut memory = Memory::new(100);
        memory.record(&step(), &result("first", &[]));
        memory.record_incident(&PlanStep::new("mail:send", Arguments::new()), "refused");
        memory.record(&step(), &result("second", &[]));

        let summary = memory.summarize(5, 50);
        let lines: Vec<&str> = summary.lines().collect();
        assert_eq!(
            lines,
            vec![
                "1. mail:fetch -> first",
                "FAILED mail:send -> refused",
                "2. mail:fetch -> second",
            ]
        );
    }

    #[test]
    fn test_summarize_deterministic_and_empty() {
        let memory = Memory::new(10);
        assert_eq!(memory.summarize(5, 5), "(nothing executed yet)");

        let mut memory = Memory::new(100);
        memory.record(&step(), &result("ok", &[("message", "9")]));
        assert_eq!(memory.summarize(5, 50), memory.summarize(5, 50));
        assert!(memory.summarize(5, 50).contains("[ids: message=9]"));
    }
}
