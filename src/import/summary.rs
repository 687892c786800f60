use serde::Serialize;
use uuid::Uuid;

use super::bundle::BundleKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum BundleState {
    Applied,
    SkippedAlreadyApplied,
    DeferredDependencyMissing,
    Failed,
}

impl BundleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BundleState::Applied => "applied",
            BundleState::SkippedAlreadyApplied => "skipped",
            BundleState::DeferredDependencyMissing => "deferred",
            BundleState::Failed => "failed",
        }
    }
}

/// Terminal result for one file in a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleOutcome {
    /// Path relative to the scanned root.
    pub file: String,
    /// Bundle name, or the relative path when the file never parsed.
    pub bundle_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<BundleKind>,
    pub state: BundleState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub pass: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleFailure {
    pub bundle_name: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub run_id: Uuid,
    pub files_discovered: usize,
    pub applied_count: usize,
    pub skipped_count: usize,
    pub skipped: Vec<String>,
    pub failures: Vec<BundleFailure>,
    pub outcomes: Vec<BundleOutcome>,
    pub cancelled: bool,
}

impl ImportSummary {
    pub fn new(run_id: Uuid, files_discovered: usize) -> Self {
        Self {
            run_id,
            files_discovered,
            applied_count: 0,
            skipped_count: 0,
            skipped: Vec::new(),
            failures: Vec::new(),
            outcomes: Vec::new(),
            cancelled: false,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn nothing_to_do(&self) -> bool {
        self.files_discovered == 0
    }

    pub(crate) fn record_skip(&mut self, name: String) {
        self.skipped_count += 1;
        self.skipped.push(name);
    }

    pub(crate) fn record(&mut self, outcome: BundleOutcome) {
        match outcome.state {
            BundleState::Applied => self.applied_count += 1,
            BundleState::Failed => self.failures.push(BundleFailure {
                bundle_name: outcome.bundle_name.clone(),
                reason: outcome.reason.clone().unwrap_or_default(),
            }),
            BundleState::SkippedAlreadyApplied | BundleState::DeferredDependencyMissing => {}
        }
        self.outcomes.push(outcome);
    }
}
