//! The correction channel between replay and whatever learns from failures.
//!
//! Failures go out as [`FailureDescriptor`]s. Corrections come back as whole replacement
//! bundles; suggestions are extra strategies appended to the recorded bundle.

use async_trait::async_trait;
use retrace_common::locator::{LocatorBundle, LocatorStrategy};
use retrace_common::result::FailureDescriptor;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

#[async_trait]
pub trait CorrectionSink: Send + Sync {
    async fn report_failure(&self, descriptor: FailureDescriptor);

    /// Advisory only; replay never waits on it.
    async fn suggest_strategy(&self, step_key: &str, strategy: LocatorStrategy);

    /// A bundle supplied to replace the recorded one for `step_key`.
    async fn correction(&self, step_key: &str) -> Option<LocatorBundle>;

    async fn suggestions(&self, step_key: &str) -> Vec<LocatorStrategy>;
}

/// Drops everything. For replays that do not learn.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

#[async_trait]
impl CorrectionSink for NullSink {
    async fn report_failure(&self, _descriptor: FailureDescriptor) {}

    async fn suggest_strategy(&self, _step_key: &str, _strategy: LocatorStrategy) {}

    async fn correction(&self, _step_key: &str) -> Option<LocatorBundle> {
        None
    }

    async fn suggestions(&self, _step_key: &str) -> Vec<LocatorStrategy> {
        Vec::new()
    }
}

#[derive(Debug, Default)]
struct Entries {
    failures: Vec<FailureDescriptor>,
    corrections: HashMap<String, LocatorBundle>,
    suggestions: HashMap<String, Vec<LocatorStrategy>>,
}

/// In-memory store keyed by step key.
#[derive(Debug, Clone, Default)]
pub struct CorrectionStore {
    entries: Arc<Mutex<Entries>>,
}

impl CorrectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Supply a replacement bundle for a step.
    pub fn correct(&self, step_key: impl Into<String>, bundle: LocatorBundle) {
        self.with(|e| {
            e.corrections.insert(step_key.into(), bundle);
        });
    }

    pub fn failures(&self) -> Vec<FailureDescriptor> {
        self.with(|e| e.failures.clone())
    }

    pub fn failures_for(&self, step_key: &str) -> Vec<FailureDescriptor> {
        self.with(|e| {
            e.failures
                .iter()
                .filter(|f| f.step_key == step_key)
                .cloned()
                .collect()
        })
    }

    pub fn clear(&self) {
        self.with(|e| *e = Entries::default());
    }

    fn with<T>(&self, f: impl FnOnce(&mut Entries) -> T) -> T {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut entries)
    }
}

#[async_trait]
impl CorrectionSink for CorrectionStore {
    async fn report_failure(&self, descriptor: FailureDescriptor) {
        self.with(|e| e.failures.push(descriptor));
    }

    async fn suggest_strategy(&self, step_key: &str, strategy: LocatorStrategy) {
        debug!("Suggestion for {}: {} {}", step_key, strategy.kind, strategy.value);
        self.with(|e| {
            let list = e.suggestions.entry(step_key.to_string()).or_default();
            if !list.iter().any(|s| s.same_query(&strategy)) {
                list.push(strategy);
            }
        });
    }

    async fn correction(&self, step_key: &str) -> Option<LocatorBundle> {
        self.with(|e| e.corrections.get(step_key).cloned())
    }

    async fn suggestions(&self, step_key: &str) -> Vec<LocatorStrategy> {
        self.with(|e| e.suggestions.get(step_key).cloned().unwrap_or_default())
    }
}
