//! Thompson-sampling macro selector with persisted per-macro statistics.

use std::collections::HashMap;

use rand_distr::{Beta, Distribution};
use serde::{Deserialize, Serialize};

use switchyard_memory::MemoryStore;
use switchyard_types::{Result, SwitchyardError};

/// Store key under which the selector persists its statistics.
pub const DEFAULT_STORE_KEY: &str = "bandit.macro_stats";

/// Beta-distribution posterior for one macro.
///
/// Persisted on the wire as a two-element `[alpha, beta]` array.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "(f64, f64)", into = "(f64, f64)")]
pub struct MacroStats {
    pub alpha: f64,
    pub beta: f64,
}

impl MacroStats {
    /// Uniform prior used for macros never seen before.
    pub fn prior() -> Self {
        Self {
            alpha: 1.0,
            beta: 1.0,
        }
    }

    /// Posterior mean success rate.
    pub fn mean(&self) -> f64 {
        self.alpha / (self.alpha + self.beta)
    }

    /// Fold one observed outcome into the posterior.
    pub fn record(&mut self, success: bool) {
        if success {
            self.alpha += 1.0;
        } else {
            self.beta += 1.0;
        }
    }

    /// Replace unusable parameters (non-finite or non-positive, e.g. from a
    /// hand-edited store file) with the uniform prior.
    fn sanitized(self, macro_name: &str) -> Self {
        let usable = self.alpha.is_finite()
            && self.beta.is_finite()
            && self.alpha > 0.0
            && self.beta > 0.0;
        if usable {
            self
        } else {
            tracing::warn!(
                macro_name,
                alpha = self.alpha,
                beta = self.beta,
                "Unusable macro statistics; resetting to uniform prior"
            );
            Self::prior()
        }
    }
}

impl From<(f64, f64)> for MacroStats {
    fn from((alpha, beta): (f64, f64)) -> Self {
        Self { alpha, beta }
    }
}

impl From<MacroStats> for (f64, f64) {
    fn from(stats: MacroStats) -> (f64, f64) {
        (stats.alpha, stats.beta)
    }
}

/// Thompson-sampling selector over named macros.
///
/// Statistics live in an injected [`MemoryStore`] handle; the store's lock
/// serializes every read-modify-write, so selectors sharing one store never
/// lose reward updates. The selector holds no state of its own — dropping it
/// loses nothing.
#[derive(Clone)]
pub struct BanditSelector {
    store: MemoryStore,
    store_key: String,
}

impl BanditSelector {
    /// Create a selector persisting under [`DEFAULT_STORE_KEY`].
    pub fn new(store: MemoryStore) -> Self {
        Self::with_key(store, DEFAULT_STORE_KEY)
    }

    /// Create a selector persisting under a caller-chosen key.
    pub fn with_key(store: MemoryStore, store_key: impl Into<String>) -> Self {
        Self {
            store,
            store_key: store_key.into(),
        }
    }

    /// Pick one macro from `candidates` by Thompson sampling: draw one sample
    /// from each candidate's Beta posterior and return the highest draw.
    ///
    /// Unseen macros sample from the uniform prior `(1, 1)`, so with no
    /// history the choice is close to uniformly random — exploration and
    /// exploitation balance without separate phases.
    pub async fn choose(&self, candidates: &[String]) -> Result<String> {
        if candidates.is_empty() {
            return Err(SwitchyardError::EmptyCandidates);
        }
        let stats = self.stats().await;
        let mut rng = rand::thread_rng();
        let mut best: Option<(&str, f64)> = None;
        for name in candidates {
            let s = stats
                .get(name)
                .copied()
                .unwrap_or_else(MacroStats::prior)
                .sanitized(name);
            let dist = Beta::new(s.alpha, s.beta).map_err(|_| SwitchyardError::InvalidStats {
                macro_name: name.clone(),
                alpha: s.alpha,
                beta: s.beta,
            })?;
            let sample = dist.sample(&mut rng);
            if best.map_or(true, |(_, top)| sample > top) {
                best = Some((name, sample));
            }
        }
        let Some((name, sample)) = best else {
            return Err(SwitchyardError::EmptyCandidates);
        };
        tracing::debug!(macro_name = name, sample, "Macro selected");
        Ok(name.to_string())
    }

    /// Fold one gated outcome into the macro's posterior and persist it.
    ///
    /// `success` is defined by the caller, conventionally
    /// `score >= ci.minimum_score`. Returns the updated statistics.
    pub async fn record_reward(&self, macro_name: &str, success: bool) -> Result<MacroStats> {
        let mut applied = MacroStats::prior();
        self.store
            .update(&self.store_key, |current| {
                let mut stats = parse_stats(current);
                let entry = stats
                    .entry(macro_name.to_string())
                    .or_insert_with(MacroStats::prior);
                entry.record(success);
                applied = *entry;
                match serde_json::to_value(&stats) {
                    Ok(value) => value,
                    Err(err) => {
                        tracing::error!(%err, "Failed to serialize macro statistics");
                        serde_json::Value::Object(serde_json::Map::new())
                    }
                }
            })
            .await?;
        tracing::debug!(
            macro_name,
            success,
            alpha = applied.alpha,
            beta = applied.beta,
            "Reward recorded"
        );
        Ok(applied)
    }

    /// Snapshot of all persisted macro statistics.
    pub async fn stats(&self) -> HashMap<String, MacroStats> {
        parse_stats(self.store.get(&self.store_key).await)
    }

    /// Drop all persisted statistics; every macro reverts to the prior.
    pub async fn reset(&self) -> Result<()> {
        self.store.remove(&self.store_key).await?;
        Ok(())
    }
}

/// Decode the persisted `macro -> [alpha, beta]` map. Corrupt state is not
/// fatal: the selector falls back to fresh uniform priors.
fn parse_stats(value: Option<serde_json::Value>) -> HashMap<String, MacroStats> {
    match value {
        Some(raw) => match serde_json::from_value(raw) {
            Ok(stats) => stats,
            Err(err) => {
                tracing::warn!(%err, "Corrupt macro statistics; starting from uniform priors");
                HashMap::new()
            }
        },
        None => HashMap::new(),
    }
}
