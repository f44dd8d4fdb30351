// ABOUTME: Per-turn routing decision for the agent loop
// ABOUTME: Stops on completion, on the soft limit once files exist, or unconditionally at the hard limit

use crate::state::RunState;
use tracing::{debug, info};

pub const DEFAULT_SOFT_LIMIT: u32 = 12;
pub const DEFAULT_HARD_LIMIT: u32 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterConfig {
    /// Calls after which the run stops as soon as any file exists
    pub soft_limit: u32,
    /// Calls after which the run always stops
    pub hard_limit: u32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            soft_limit: DEFAULT_SOFT_LIMIT,
            hard_limit: DEFAULT_HARD_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoneReason {
    Completed,
    SoftLimit,
    HardLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterDecision {
    Continue,
    Done(DoneReason),
}

#[derive(Debug)]
pub struct Router {
    config: RouterConfig,
    calls: u32,
}

impl Router {
    pub fn new(config: RouterConfig) -> Self {
        Self { config, calls: 0 }
    }

    /// Number of times `decide` has been called
    pub fn calls(&self) -> u32 {
        self.calls
    }

    /// Decide whether the agent gets another turn. Every call counts as one iteration.
    pub fn decide(&mut self, state: &RunState) -> RouterDecision {
        self.calls += 1;
        let limit = self.config.hard_limit;

        debug!(
            "Router called ({}/{}) - summary: {}, files: {}",
            self.calls,
            limit,
            state.summary.is_some(),
            state.files.len()
        );

        let decision = if state.is_complete() {
            RouterDecision::Done(DoneReason::Completed)
        } else if self.calls >= self.config.soft_limit && state.has_files() {
            RouterDecision::Done(DoneReason::SoftLimit)
        } else if self.calls >= limit {
            RouterDecision::Done(DoneReason::HardLimit)
        } else {
            RouterDecision::Continue
        };

        if let RouterDecision::Done(reason) = decision {
            info!("Router stopping after {} calls: {:?}", self.calls, reason);
        }

        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_file() -> RunState {
        let mut state = RunState::new();
        state.record_file("app/page.tsx", "export default 1");
        state
    }

    #[test]
    fn test_stops_at_hard_limit_without_summary() {
        let mut router = Router::new(RouterConfig::default());
        let state = RunState::new();

        let mut decisions = Vec::new();
        loop {
            let decision = router.decide(&state);
            decisions.push(decision);
            if decision != RouterDecision::Continue {
                break;
            }
        }

        assert_eq!(decisions.len(), 15);
        assert_eq!(
            decisions.last(),
            Some(&RouterDecision::Done(DoneReason::HardLimit))
        );
    }

    #[test]
    fn test_completed_state_stops_on_next_check() {
        let mut router = Router::new(RouterConfig::default());
        let mut state = with_file();

        for _ in 0..3 {
            assert_eq!(router.decide(&state), RouterDecision::Continue);
        }

        state.summary = Some("<task_summary>todo app</task_summary>".to_string());
        assert_eq!(
            router.decide(&state),
            RouterDecision::Done(DoneReason::Completed)
        );
    }

    #[test]
    fn test_soft_limit_requires_files() {
        let mut router = Router::new(RouterConfig::default());
        let state = with_file();

        for call in 1..12 {
            assert_eq!(router.decide(&state), RouterDecision::Continue, "call {}", call);
        }
        assert_eq!(
            router.decide(&state),
            RouterDecision::Done(DoneReason::SoftLimit)
        );
    }

    #[test]
    fn test_summary_without_files_keeps_going() {
        let mut router = Router::new(RouterConfig::default());
        let state = RunState {
            summary: Some("<task_summary>nothing</task_summary>".to_string()),
            ..RunState::default()
        };

        for _ in 0..12 {
            assert_eq!(router.decide(&state), RouterDecision::Continue);
        }
        assert_eq!(router.calls(), 12);
    }

    #[test]
    fn test_custom_limits() {
        let mut router = Router::new(RouterConfig {
            soft_limit: 1,
            hard_limit: 2,
        });
        assert_eq!(router.decide(&RunState::new()), RouterDecision::Continue);
        assert_eq!(
            router.decide(&RunState::new()),
            RouterDecision::Done(DoneReason::HardLimit)
        );
    }
}
