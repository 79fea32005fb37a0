//! Eventual-Consistency Poller
//!
//! Repeatedly invokes a probe until its observations land in the target set
//! for a number of consecutive probes, or a deadline passes. A single
//! favorable observation is not trusted: the management API does not
//! guarantee read-your-writes across replicas, so visibility can flap.
//!
//! Classifying raw probe results (e.g. turning a 404 into a pending label) is
//! the probe's job. Labels outside both the pending and target sets are fatal.

use std::collections::HashSet;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Observation label for presence-based waits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Presence {
    Found,
    NotFound,
}

/// What to wait for
#[derive(Debug, Clone)]
pub struct WaitSpec<L> {
    pub pending: HashSet<L>,
    pub target: HashSet<L>,
    pub required_hits: u32,
    pub min_interval: Duration,
}

impl<L: Eq + Hash> WaitSpec<L> {
    pub fn new(
        pending: impl IntoIterator<Item = L>,
        target: impl IntoIterator<Item = L>,
        required_hits: u32,
        min_interval: Duration,
    ) -> Self {
        Self {
            pending: pending.into_iter().collect(),
            target: target.into_iter().collect(),
            required_hits,
            min_interval,
        }
    }

    /// Labels listed as both pending and target; must be empty
    pub fn overlap(&self) -> Vec<&L> {
        self.pending.intersection(&self.target).collect()
    }
}

impl WaitSpec<Presence> {
    /// A just-created resource may 404 for a while
    pub fn visibility(required_hits: u32, min_interval: Duration) -> Self {
        Self::new(
            [Presence::NotFound],
            [Presence::Found],
            required_hits,
            min_interval,
        )
    }

    /// A just-deleted resource may stay visible for a while
    pub fn deletion(required_hits: u32, min_interval: Duration) -> Self {
        Self::new(
            [Presence::Found],
            [Presence::NotFound],
            required_hits,
            min_interval,
        )
    }
}

/// Result of a wait that converged
#[derive(Debug)]
pub struct Converged<T> {
    /// Value returned with the final target observation
    pub value: T,
    pub probes: u32,
    pub elapsed: Duration,
}

#[derive(Debug, Error)]
pub enum PollError<L, E> {
    #[error("state did not converge within {elapsed:?} ({probes} probes, last observed {last:?})")]
    Timeout {
        elapsed: Duration,
        probes: u32,
        last: Option<L>,
    },

    #[error("observed unexpected state {label:?}")]
    UnexpectedLabel { label: L },

    #[error("wait was cancelled")]
    Cancelled,

    #[error("labels {labels:?} are both pending and target")]
    OverlappingLabels { labels: Vec<L> },

    #[error("probe failed: {0}")]
    Probe(E),
}

#[derive(Debug, PartialEq, Eq)]
enum Step {
    Converged,
    Continue,
    Unexpected,
}

/// Per-wait counters, owned by a single [`wait_for`] call
#[derive(Debug, Default)]
struct PollState {
    consecutive_hits: u32,
    probes: u32,
}

impl PollState {
    fn observe<L: Eq + Hash>(&mut self, spec: &WaitSpec<L>, label: &L) -> Step {
        self.probes += 1;

        if spec.target.contains(label) {
            self.consecutive_hits += 1;
            if self.consecutive_hits >= spec.required_hits.max(1) {
                return Step::Converged;
            }
            Step::Continue
        } else if spec.pending.contains(label) {
            self.consecutive_hits = 0;
            Step::Continue
        } else {
            Step::Unexpected
        }
    }
}

/// Drive `probe` until it converges on the target, the deadline passes, or
/// `cancel` fires. The sleep between probes is raced against cancellation;
/// the deadline is checked after every observation.
pub async fn wait_for<L, T, E, F, Fut>(
    spec: &WaitSpec<L>,
    deadline: Instant,
    cancel: &CancellationToken,
    mut probe: F,
) -> Result<Converged<T>, PollError<L, E>>
where
    L: Eq + Hash + Clone + Debug,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(L, T), E>>,
{
    let overlap = spec.overlap();
    if !overlap.is_empty() {
        return Err(PollError::OverlappingLabels {
            labels: overlap.into_iter().cloned().collect(),
        });
    }

    let started = Instant::now();
    let mut state = PollState::default();

    loop {
        if cancel.is_cancelled() {
            return Err(PollError::Cancelled);
        }

        let (label, value) = probe().await.map_err(PollError::Probe)?;
        let step = state.observe(spec, &label);
        debug!(
            label = ?label,
            hits = state.consecutive_hits,
            required = spec.required_hits,
            probes = state.probes,
            "Poll observation"
        );

        match step {
            Step::Converged => {
                return Ok(Converged {
                    value,
                    probes: state.probes,
                    elapsed: started.elapsed(),
                })
            }
            Step::Unexpected => return Err(PollError::UnexpectedLabel { label }),
            Step::Continue => {}
        }

        if Instant::now() >= deadline {
            return Err(PollError::Timeout {
                elapsed: started.elapsed(),
                probes: state.probes,
                last: Some(label),
            });
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(PollError::Cancelled),
            _ = tokio::time::sleep(spec.min_interval) => {}
        }
    }
}
