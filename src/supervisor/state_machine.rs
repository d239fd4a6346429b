use thiserror::Error;

/// Per-service supervision state, kept across ticks.
///
/// It follows the outcome of liveness checks, not the spawns: a freshly
/// spawned instance leaves the state alone until a later check passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// Not seen healthy since the supervisor started watching it.
    Unknown,
    /// The last liveness check passed.
    Healthy,
    /// Failed a check after being healthy. The outage has been reported;
    /// the service is respawned until a check passes again.
    Down,
}

#[derive(Error, Debug)]
pub enum TransitionError {
    #[error("invalid transition: {0:?} -> {1:?}")]
    InvalidTransition(ServiceState, ServiceState),
}

#[derive(Debug)]
pub struct StateMachine {
    pub state: ServiceState,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self { state: ServiceState::Unknown }
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn can_transition(&self, to: &ServiceState) -> bool {
        matches!(
            (&self.state, to),
            (ServiceState::Unknown, ServiceState::Healthy)
                | (ServiceState::Healthy, ServiceState::Down)
                | (ServiceState::Down, ServiceState::Healthy)
        )
    }

    pub fn transition(&mut self, to: ServiceState) -> Result<(), TransitionError> {
        if self.can_transition(&to) {
            tracing::debug!("State transition: {:?} -> {:?}", self.state, to);
            self.state = to;
            Ok(())
        } else {
            Err(TransitionError::InvalidTransition(self.state, to))
        }
    }

    /// Feeds one liveness result. Returns the new state if it changed.
    pub fn observe(&mut self, healthy: bool) -> Option<ServiceState> {
        let to = match (self.state, healthy) {
            (ServiceState::Unknown | ServiceState::Down, true) => ServiceState::Healthy,
            (ServiceState::Healthy, false) => ServiceState::Down,
            _ => return None,
        };
        self.transition(to).ok()?;
        Some(to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outage_cycle() {
        let mut sm = StateMachine::new();
        assert_eq!(sm.observe(true), Some(ServiceState::Healthy));
        assert_eq!(sm.observe(true), None);
        assert_eq!(sm.observe(false), Some(ServiceState::Down));
        // still down: no new change to report
        assert_eq!(sm.observe(false), None);
        assert_eq!(sm.observe(true), Some(ServiceState::Healthy));
    }

    #[test]
    fn never_healthy_stays_unknown() {
        let mut sm = StateMachine::new();
        for _ in 0..3 {
            assert_eq!(sm.observe(false), None);
        }
        assert_eq!(sm.state, ServiceState::Unknown);
    }

    #[test]
    fn invalid_transition() {
        let mut sm = StateMachine::new();
        // a service never seen healthy cannot go down
        let res = sm.transition(ServiceState::Down);
        assert!(res.is_err());
        assert_eq!(sm.state, ServiceState::Unknown);
    }
}
