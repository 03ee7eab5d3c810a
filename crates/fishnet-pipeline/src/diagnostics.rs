//! Run diagnostics: per-node timing, attempts, and outcome.
//!
//! Every [`Pipeline`](crate::engine::Pipeline) records one
//! [`NodeDiagnostics`] per node it runs. Time is read through the
//! [`Clock`] trait so tests can supply a fixed clock.
//!
//! Durations are serialized as fractional seconds (`f64`) for JSON
//! compatibility, since `std::time::Duration` does not implement serde
//! traits.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::types::PipelineError;

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs)
            .map_err(|_| serde::de::Error::custom("duration must be finite and non-negative"))
    }
}

/// Source of elapsed time.
pub trait Clock {
    /// Opaque timestamp.
    type Instant;

    /// The current time.
    fn now(&self) -> Self::Instant;

    /// Time since `since`.
    fn elapsed(&self, since: &Self::Instant) -> Duration;
}

/// [`Clock`] backed by [`std::time::Instant`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StdClock;

impl Clock for StdClock {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn elapsed(&self, since: &Instant) -> Duration {
        since.elapsed()
    }
}

/// How a node ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// Produced its output.
    Success,
    /// Ended without output.
    Abandoned,
    /// Could not start.
    RequirementsUnmet,
}

impl OutcomeKind {
    const fn label(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Abandoned => "abandoned",
            Self::RequirementsUnmet => "requirements unmet",
        }
    }
}

/// Diagnostics for one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDiagnostics {
    /// Node title.
    pub title: String,
    /// Registry name of the node's output.
    pub output_name: String,
    /// How the node ended.
    pub outcome: OutcomeKind,
    /// Times `process` ran.
    pub attempts: usize,
    /// Wall-clock duration including operator time (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Output description or missing requirement names.
    pub detail: String,
}

/// Diagnostics for a whole run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunDiagnostics {
    /// Nodes in the order they ran.
    pub nodes: Vec<NodeDiagnostics>,
    /// Wall-clock duration of the run (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
}

/// A run that stopped early, with the diagnostics gathered until then.
#[derive(Debug, thiserror::Error)]
#[error("pipeline stopped after {} node(s)", .diagnostics.nodes.len())]
pub struct RunFailure {
    /// Nodes that ran before the run stopped.
    pub diagnostics: RunDiagnostics,
    /// Why it stopped.
    #[source]
    pub error: PipelineError,
}

impl RunDiagnostics {
    /// Whether every node that ran had its requirements.
    #[must_use]
    pub fn completed(&self) -> bool {
        self.nodes
            .iter()
            .all(|n| n.outcome != OutcomeKind::RequirementsUnmet)
    }

    /// Human-readable table.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();
        lines.push(format!("Pipeline Diagnostics Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration)
        ));
        lines.push(String::new());
        lines.push(format!(
            "{:<24} {:>10} {:>8}  {:<20} {}",
            "Node", "Duration", "Attempts", "Outcome", "Details"
        ));
        lines.push("-".repeat(80));
        for node in &self.nodes {
            lines.push(format!(
                "{:<24} {:>8.3}ms {:>8}  {:<20} {}",
                node.title,
                duration_ms(node.duration),
                node.attempts,
                node.outcome.label(),
                node.detail,
            ));
        }
        lines.join("\n")
    }
}

/// Convert a `Duration` to fractional milliseconds.
fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}
