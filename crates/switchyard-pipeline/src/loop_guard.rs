//! Stagnation detection over the run history.
//!
//! Pure functions, no state: the engine hands in the history it already owns.
//! Detection is advisory — the step ceiling, not this signal, is what bounds
//! cyclic traversal.

use std::collections::HashMap;

use switchyard_types::HistoryEntry;

/// Diagnostic summary of build activity in a history. Never gates execution.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopStatistics {
    pub total_build_events: usize,
    pub macro_counts: HashMap<String, usize>,
    /// Longest run of consecutive build events using the same macro.
    pub longest_streak: usize,
    pub last_macro: Option<String>,
}

/// Build executions are the entries that carry a macro; only the selector's
/// choices are subject to stagnation analysis.
fn build_entries(history: &[HistoryEntry]) -> impl Iterator<Item = &HistoryEntry> {
    history.iter().filter(|e| e.macro_name.is_some())
}

/// Flag unproductive repetition: the same macro ran `window` consecutive
/// build times and no consecutive pair improved its score by more than
/// `epsilon`.
///
/// Fewer than `window` build entries is insufficient evidence and returns
/// `false`, as does any macro change or meaningful improvement inside the
/// window.
pub fn detect_loop(history: &[HistoryEntry], window: usize, epsilon: f64) -> bool {
    if window == 0 {
        return false;
    }
    let builds: Vec<&HistoryEntry> = build_entries(history).collect();
    if builds.len() < window {
        return false;
    }

    let tail = &builds[builds.len() - window..];
    let first_macro = tail[0].macro_name.as_deref();
    if !tail.iter().all(|e| e.macro_name.as_deref() == first_macro) {
        return false;
    }

    for pair in tail.windows(2) {
        let prev = pair[0].score.unwrap_or(0.0);
        let next = pair[1].score.unwrap_or(0.0);
        if next - prev > epsilon {
            return false;
        }
    }
    true
}

/// Summarize build activity for observability and reporting.
pub fn loop_statistics(history: &[HistoryEntry]) -> LoopStatistics {
    let mut macro_counts: HashMap<String, usize> = HashMap::new();
    let mut longest_streak = 0usize;
    let mut current_streak = 0usize;
    let mut previous: Option<&str> = None;
    let mut last_macro = None;
    let mut total = 0usize;

    for entry in build_entries(history) {
        let Some(ref name) = entry.macro_name else {
            continue;
        };
        total += 1;
        *macro_counts.entry(name.clone()).or_default() += 1;
        if previous == Some(name.as_str()) {
            current_streak += 1;
        } else {
            current_streak = 1;
        }
        longest_streak = longest_streak.max(current_streak);
        previous = Some(name.as_str());
        last_macro = Some(name.clone());
    }

    LoopStatistics {
        total_build_events: total,
        macro_counts,
        longest_streak,
        last_macro,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_types::NodeStatus;

    fn build(macro_name: &str, score: f64) -> HistoryEntry {
        HistoryEntry::build("build", macro_name, score, false)
    }

    #[test]
    fn flat_scores_with_one_macro_is_a_loop() {
        let history = vec![
            build("m", 0.75),
            build("m", 0.76),
            build("m", 0.76),
        ];
        assert!(detect_loop(&history, 3, 0.02));
    }

    #[test]
    fn improving_scores_are_not_a_loop() {
        let history = vec![
            build("m", 0.70),
            build("m", 0.76),
            build("m", 0.80),
        ];
        assert!(!detect_loop(&history, 3, 0.02));
    }

    #[test]
    fn fewer_entries_than_window_is_insufficient_evidence() {
        let history = vec![build("m", 0.5), build("m", 0.5)];
        assert!(!detect_loop(&history, 3, 0.02));
    }

    #[test]
    fn mixed_macros_in_window_are_not_a_loop() {
        let history = vec![
            build("m", 0.5),
            build("other", 0.5),
            build("m", 0.5),
        ];
        assert!(!detect_loop(&history, 3, 0.02));
    }

    #[test]
    fn single_improvement_inside_window_clears_the_flag() {
        let history = vec![
            build("m", 0.50),
            build("m", 0.50),
            build("m", 0.60),
        ];
        assert!(!detect_loop(&history, 3, 0.02));
    }

    #[test]
    fn only_the_trailing_window_matters() {
        // Early varied activity, then three stagnant runs of "m".
        let history = vec![
            build("a", 0.2),
            build("b", 0.9),
            build("m", 0.4),
            build("m", 0.4),
            build("m", 0.41),
        ];
        assert!(detect_loop(&history, 3, 0.02));
    }

    #[test]
    fn non_build_entries_are_ignored() {
        let history = vec![
            HistoryEntry::node("intake", NodeStatus::Success),
            build("m", 0.5),
            HistoryEntry::node("review", NodeStatus::Success),
            build("m", 0.5),
            HistoryEntry::node("review", NodeStatus::Retry),
            build("m", 0.5),
        ];
        assert!(detect_loop(&history, 3, 0.02));
    }

    #[test]
    fn zero_window_never_flags() {
        let history = vec![build("m", 0.5)];
        assert!(!detect_loop(&history, 0, 0.02));
    }

    #[test]
    fn statistics_summarize_build_activity() {
        let history = vec![
            HistoryEntry::node("intake", NodeStatus::Success),
            build("a", 0.3),
            build("a", 0.4),
            build("b", 0.5),
            build("a", 0.6),
            build("a", 0.6),
            build("a", 0.6),
        ];
        let stats = loop_statistics(&history);
        assert_eq!(stats.total_build_events, 6);
        assert_eq!(stats.macro_counts["a"], 5);
        assert_eq!(stats.macro_counts["b"], 1);
        assert_eq!(stats.longest_streak, 3);
        assert_eq!(stats.last_macro.as_deref(), Some("a"));
    }

    #[test]
    fn statistics_for_empty_history() {
        let stats = loop_statistics(&[]);
        assert_eq!(stats.total_build_events, 0);
        assert!(stats.macro_counts.is_empty());
        assert_eq!(stats.longest_streak, 0);
        assert!(stats.last_macro.is_none());
    }
}
