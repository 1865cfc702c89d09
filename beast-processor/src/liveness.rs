//! Stall detection: no successful merge for longer than the timeout.

/// Transition reported by [`LivenessMonitor::check`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LivenessEvent {
    /// No merge for `silent_for` seconds.
    Stalled { silent_for: f64 },
    /// Merges resumed after `silent_for` seconds of silence.
    Recovered { silent_for: f64 },
}

impl LivenessEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LivenessEvent::Stalled { .. } => "stalled",
            LivenessEvent::Recovered { .. } => "recovered",
        }
    }

    pub fn silent_for(&self) -> f64 {
        match *self {
            LivenessEvent::Stalled { silent_for } | LivenessEvent::Recovered { silent_for } => {
                silent_for
            }
        }
    }
}

/// Reports each stall once, and each recovery once.
#[derive(Debug)]
pub struct LivenessMonitor {
    timeout: f64,
    /// Last merge time seen when the stall was declared.
    stalled_since: Option<f64>,
}

impl LivenessMonitor {
    pub fn new(timeout: f64) -> Self {
        LivenessMonitor {
            timeout,
            stalled_since: None,
        }
    }

    /// `last_merge` is `None` until the first merge; silence is then measured
    /// from `started_at`.
    pub fn check(
        &mut self,
        last_merge: Option<f64>,
        started_at: f64,
        now: f64,
    ) -> Option<LivenessEvent> {
        let reference = last_merge.unwrap_or(started_at);
        let silent_for = now - reference;

        match self.stalled_since {
            None if silent_for > self.timeout => {
                self.stalled_since = Some(reference);
                Some(LivenessEvent::Stalled { silent_for })
            }
            Some(since) if reference > since => {
                self.stalled_since = None;
                Some(LivenessEvent::Recovered {
                    silent_for: reference - since,
                })
            }
            _ => None,
        }
    }

    pub fn is_stalled(&self) -> bool {
        self.stalled_since.is_some()
    }
}
