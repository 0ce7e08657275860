//! CI feedback ingestion: turns post-hoc test/CI outcomes into bandit rewards
//! and keeps a success-rate ranking for reporting.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use switchyard_types::Result;

use crate::selector::BanditSelector;

/// One post-hoc CI outcome for a macro.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CiResult {
    /// Distinct result id; when supplied, ingestion is idempotent per id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "macro")]
    pub macro_name: String,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// Aggregated outcomes for one macro.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MacroRecord {
    pub successes: u64,
    pub attempts: u64,
}

impl MacroRecord {
    pub fn success_rate(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.successes as f64 / self.attempts as f64
        }
    }
}

/// Translates external CI outcomes into bandit reward updates.
pub struct CiFeedbackProcessor {
    selector: BanditSelector,
    inner: tokio::sync::Mutex<FeedbackInner>,
}

#[derive(Default)]
struct FeedbackInner {
    seen_ids: HashSet<String>,
    records: HashMap<String, MacroRecord>,
}

impl CiFeedbackProcessor {
    pub fn new(selector: BanditSelector) -> Self {
        Self {
            selector,
            inner: tokio::sync::Mutex::new(FeedbackInner::default()),
        }
    }

    /// Ingest one CI result. Returns `false` when the result id was already
    /// processed (the reward is not applied twice); otherwise applies exactly
    /// one reward update and returns `true`.
    pub async fn ingest(&self, result: &CiResult) -> Result<bool> {
        let mut guard = self.inner.lock().await;
        if let Some(ref id) = result.id {
            if guard.seen_ids.contains(id) {
                tracing::debug!(id = %id, macro_name = %result.macro_name, "Duplicate CI result skipped");
                return Ok(false);
            }
        }

        self.selector
            .record_reward(&result.macro_name, result.passed)
            .await?;

        if let Some(ref id) = result.id {
            guard.seen_ids.insert(id.clone());
        }
        let record = guard.records.entry(result.macro_name.clone()).or_default();
        record.attempts += 1;
        if result.passed {
            record.successes += 1;
        }
        Ok(true)
    }

    /// Macro rankings by aggregated success rate, best first. Ties break on
    /// attempt count, then name, so the order is deterministic.
    pub async fn rankings(&self) -> Vec<(String, f64)> {
        let guard = self.inner.lock().await;
        let mut rows: Vec<(String, MacroRecord)> = guard
            .records
            .iter()
            .map(|(name, record)| (name.clone(), *record))
            .collect();
        rows.sort_by(|(a_name, a), (b_name, b)| {
            b.success_rate()
                .partial_cmp(&a.success_rate())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.attempts.cmp(&a.attempts))
                .then(a_name.cmp(b_name))
        });
        rows.into_iter()
            .map(|(name, record)| (name, record.success_rate()))
            .collect()
    }

    /// Snapshot of the per-macro aggregates.
    pub async fn records(&self) -> HashMap<String, MacroRecord> {
        self.inner.lock().await.records.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_memory::MemoryStore;

    fn processor() -> CiFeedbackProcessor {
        CiFeedbackProcessor::new(BanditSelector::new(MemoryStore::in_memory()))
    }

    fn result(id: Option<&str>, macro_name: &str, passed: bool) -> CiResult {
        CiResult {
            id: id.map(String::from),
            macro_name: macro_name.to_string(),
            passed,
            score: None,
        }
    }

    #[tokio::test]
    async fn each_ingest_is_one_reward_event() {
        let store = MemoryStore::in_memory();
        let selector = BanditSelector::new(store);
        let processor = CiFeedbackProcessor::new(selector.clone());

        processor.ingest(&result(None, "m1", true)).await.unwrap();
        processor.ingest(&result(None, "m1", true)).await.unwrap();
        processor.ingest(&result(None, "m1", false)).await.unwrap();

        let stats = selector.stats().await;
        assert_eq!((stats["m1"].alpha, stats["m1"].beta), (3.0, 2.0));

        let records = processor.records().await;
        assert_eq!(records["m1"].attempts, 3);
        assert_eq!(records["m1"].successes, 2);
    }

    #[tokio::test]
    async fn duplicate_ids_are_skipped() {
        let store = MemoryStore::in_memory();
        let selector = BanditSelector::new(store);
        let processor = CiFeedbackProcessor::new(selector.clone());

        assert!(processor
            .ingest(&result(Some("run-42"), "m1", true))
            .await
            .unwrap());
        assert!(!processor
            .ingest(&result(Some("run-42"), "m1", true))
            .await
            .unwrap());

        let stats = selector.stats().await;
        assert_eq!((stats["m1"].alpha, stats["m1"].beta), (2.0, 1.0));
        assert_eq!(processor.records().await["m1"].attempts, 1);
    }

    #[tokio::test]
    async fn distinct_ids_both_apply() {
        let processor = processor();
        assert!(processor
            .ingest(&result(Some("a"), "m1", true))
            .await
            .unwrap());
        assert!(processor
            .ingest(&result(Some("b"), "m1", false))
            .await
            .unwrap());
        assert_eq!(processor.records().await["m1"].attempts, 2);
    }

    #[tokio::test]
    async fn rankings_order_by_success_rate() {
        let processor = processor();
        for passed in [true, true, true, false] {
            processor.ingest(&result(None, "solid", passed)).await.unwrap();
        }
        for passed in [true, false, false, false] {
            processor.ingest(&result(None, "flaky", passed)).await.unwrap();
        }
        processor.ingest(&result(None, "fresh", true)).await.unwrap();

        let rankings = processor.rankings().await;
        assert_eq!(rankings[0].0, "fresh");
        assert_eq!(rankings[0].1, 1.0);
        assert_eq!(rankings[1].0, "solid");
        assert_eq!(rankings[1].1, 0.75);
        assert_eq!(rankings[2].0, "flaky");
        assert_eq!(rankings[2].1, 0.25);
    }

    #[tokio::test]
    async fn empty_processor_ranks_nothing() {
        assert!(processor().rankings().await.is_empty());
    }
}
