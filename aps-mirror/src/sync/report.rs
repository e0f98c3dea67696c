use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    Succeeded,
    PartiallySucceeded,
    Failed,
}

/// One unit of a sync that did not make it into the mirror.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncFailure {
    /// What was being synced, e.g. `hub b.123` or `folder urn:...`.
    pub scope: String,
    pub error: String,
}

impl SyncFailure {
    pub fn new(scope: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self {
            scope: scope.into(),
            error: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub hubs: usize,
    pub projects: usize,
    pub contents: usize,
    pub failures: Vec<SyncFailure>,
}

impl SyncReport {
    pub fn written(&self) -> usize {
        self.hubs + self.projects + self.contents
    }

    pub fn outcome(&self) -> SyncOutcome {
        match (self.failures.is_empty(), self.written()) {
            (true, _) => SyncOutcome::Succeeded,
            (false, 0) => SyncOutcome::Failed,
            (false, _) => SyncOutcome::PartiallySucceeded,
        }
    }

    pub fn record_failure(&mut self, scope: impl Into<String>, error: impl std::fmt::Display) {
        let failure = SyncFailure::new(scope, error);
        tracing::warn!(scope = %failure.scope, error = %failure.error, "sync unit failed");
        self.failures.push(failure);
    }
}
