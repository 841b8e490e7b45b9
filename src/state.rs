use chrono::{DateTime, Utc};
use serde::Serialize;

/// Phase of an attempt sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Running,
    Committing,
    Done,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Idle => write!(f, "idle"),
            Phase::Running => write!(f, "running"),
            Phase::Committing => write!(f, "committing"),
            Phase::Done => write!(f, "done"),
        }
    }
}

/// Why a sequence stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishType {
    /// Tests passed
    Complete,
    /// Gave up after `loop.max_iterations` patches
    MaxIterations,
}

impl std::fmt::Display for FinishType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FinishType::Complete => write!(f, "complete"),
            FinishType::MaxIterations => write!(f, "max_iterations"),
        }
    }
}

/// Bookkeeping for one attempt sequence. Never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct SequenceState {
    pub phase: Phase,
    pub boundary: Option<String>,
    /// Patch requests made so far
    pub iteration: u32,
    pub test_runs: u32,
    pub commits_created: u32,
    pub squashed: bool,
    pub finish_type: Option<FinishType>,
    pub started_at: DateTime<Utc>,
    pub duration: u64,
}

impl Default for SequenceState {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            boundary: None,
            iteration: 0,
            test_runs: 0,
            commits_created: 0,
            squashed: false,
            finish_type: None,
            started_at: Utc::now(),
            duration: 0,
        }
    }
}

impl SequenceState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idle → Running, remembering the boundary revision
    pub fn start(&mut self, boundary: String) {
        self.boundary = Some(boundary);
        self.phase = Phase::Running;
        self.started_at = Utc::now();
    }

    pub fn record_test_run(&mut self) {
        self.test_runs += 1;
    }

    pub fn start_iteration(&mut self) {
        self.iteration += 1;
    }

    pub fn record_commit(&mut self) {
        self.commits_created += 1;
    }

    pub fn begin_committing(&mut self) {
        self.phase = Phase::Committing;
    }

    pub fn update_duration(&mut self) {
        self.duration = (Utc::now() - self.started_at).num_seconds().max(0) as u64;
    }

    pub fn finish(&mut self, finish_type: FinishType) {
        self.finish_type = Some(finish_type);
        self.phase = Phase::Done;
        self.update_duration();
    }

    /// Has the iteration cap been reached? 0 = unlimited
    pub fn at_limit(&self, max_iterations: u32) -> bool {
        max_iterations > 0 && self.iteration >= max_iterations
    }
}
