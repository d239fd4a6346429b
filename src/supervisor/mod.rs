pub mod error;
pub mod process;
pub mod report;
pub mod state_machine;
pub mod tracker;

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use crate::config::{ServiceDescriptor, ServiceSource};
use crate::probe::Prober;
use process::ProcessControl;
use report::{Reporter, Transition};
use state_machine::{ServiceState, StateMachine};
use tracker::{ProcessTracker, TrackedProcess};

/// Result of one timer callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// The check interval has not elapsed yet.
    Skipped,
    /// The service list could not be loaded; nothing was touched.
    Aborted,
    Completed(Vec<Transition>),
}

/// Reconciles configured services against what is actually alive.
pub struct Supervisor {
    services: Box<dyn ServiceSource>,
    controller: Box<dyn ProcessControl>,
    prober: Box<dyn Prober>,
    reporter: Reporter,
    tracker: ProcessTracker,
    /// Keyed by command line, like the tracker, but survives failed spawns.
    states: HashMap<String, StateMachine>,
    check_interval: Duration,
    last_check: Option<Instant>,
}

impl Supervisor {
    pub fn new(
        services: impl ServiceSource + 'static,
        controller: impl ProcessControl + 'static,
        prober: impl Prober + 'static,
        check_interval: Duration,
    ) -> Self {
        Self {
            services: Box::new(services),
            controller: Box::new(controller),
            prober: Box::new(prober),
            reporter: Reporter::new(),
            tracker: ProcessTracker::new(),
            states: HashMap::new(),
            check_interval,
            last_check: None,
        }
    }

    pub fn with_reporter(mut self, reporter: Reporter) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn tracker(&self) -> &ProcessTracker {
        &self.tracker
    }

    pub fn service_state(&self, command_line: &str) -> ServiceState {
        self.states
            .get(command_line)
            .map_or(ServiceState::Unknown, |machine| machine.state)
    }

    pub fn check_interval(&self) -> Duration {
        self.check_interval
    }

    /// Timer callback. Runs a reconciliation tick when at least one check
    /// interval has passed since the previous tick.
    pub fn on_timer(&mut self, now: Instant) -> TickOutcome {
        if let Some(last) = self.last_check {
            if now < last + self.check_interval {
                return TickOutcome::Skipped;
            }
        }

        let services = match self.services.load_services() {
            Ok(services) => services,
            Err(e) => {
                tracing::error!("load services failed: {}", e);
                return TickOutcome::Aborted;
            }
        };

        let services = last_wins(services);
        let configured: HashSet<String> = services.iter().map(ServiceDescriptor::command_line).collect();
        // services dropped from the config start over if they come back
        self.states.retain(|command_line, _| configured.contains(command_line));

        let mut transitions = Vec::new();
        for service in &services {
            self.reconcile(service, &mut transitions);
        }

        self.last_check = Some(now);
        TickOutcome::Completed(transitions)
    }

    fn reconcile(&mut self, service: &ServiceDescriptor, transitions: &mut Vec<Transition>) {
        let command_line = service.command_line();
        let healthy = self.is_healthy(service, &command_line);

        let machine = self.states.entry(command_line.clone()).or_default();
        let previous = machine.state;
        match machine.observe(healthy) {
            Some(ServiceState::Down) => {
                tracing::warn!("service {{{}}} went down", command_line);
                self.emit(Transition::WentDown { command_line: command_line.clone() }, transitions);
            }
            Some(ServiceState::Healthy) if previous == ServiceState::Down => {
                tracing::info!("service {{{}}} recovered", command_line);
                self.emit(Transition::Recovered { command_line: command_line.clone() }, transitions);
            }
            _ => {}
        }

        if healthy {
            return;
        }

        // Erase before respawn: a failed spawn leaves nothing tracked.
        if let Some(stale) = self.tracker.untrack(&command_line) {
            tracing::debug!("stop service {{{}}} begin", command_line);
            if !self.controller.terminate(stale.process_id, &stale.process_name) {
                tracing::warn!(
                    "process [{}:{}] could not be confirmed stopped, starting {{{}}} anyway",
                    stale.process_id,
                    stale.process_name,
                    command_line
                );
            }
            tracing::debug!("stop service {{{}}} end", command_line);
            self.emit(
                Transition::Stopped {
                    command_line: command_line.clone(),
                    process_id: stale.process_id,
                },
                transitions,
            );
        }

        match self.controller.spawn(service) {
            Ok(spawned) => {
                tracing::info!("start service {{{}}} success, pid {}", command_line, spawned.process_id);
                let process_id = spawned.process_id;
                self.tracker.track(&command_line, TrackedProcess::from(spawned));
                self.emit(Transition::Started { command_line, process_id }, transitions);
            }
            Err(e) => {
                tracing::error!("start service {{{}}} failure: {}", command_line, e);
                self.emit(Transition::StartFailed { command_line }, transitions);
            }
        }
    }

    /// Ports configured: every port must accept a connection, checked in
    /// order and stopping at the first failure. No ports: the process must
    /// be in the process table.
    fn is_healthy(&self, service: &ServiceDescriptor, command_line: &str) -> bool {
        if service.ports.is_empty() {
            let process_name = self
                .tracker
                .get(command_line)
                .map(|tracked| tracked.process_name.clone())
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| service.fallback_process_name());

            let alive = self.controller.is_running(&process_name);
            if !alive {
                tracing::debug!("service {{{}}} is not alive", command_line);
            }
            return alive;
        }

        for port in &service.ports {
            if !self.prober.probe(&service.host, port) {
                tracing::debug!(
                    "service {{{}}} can not be connected on port {}",
                    command_line,
                    port
                );
                return false;
            }
        }
        true
    }

    fn emit(&self, transition: Transition, transitions: &mut Vec<Transition>) {
        self.reporter.report(&transition);
        transitions.push(transition);
    }
}

/// Descriptors sharing a command line are one service; the last one wins
/// and takes the position of the first.
fn last_wins(services: Vec<ServiceDescriptor>) -> Vec<ServiceDescriptor> {
    let mut order: Vec<String> = Vec::with_capacity(services.len());
    let mut latest: HashMap<String, ServiceDescriptor> = HashMap::with_capacity(services.len());
    for service in services {
        let key = service.command_line();
        if latest.insert(key.clone(), service).is_none() {
            order.push(key);
        }
    }
    order
        .into_iter()
        .filter_map(|key| latest.remove(&key))
        .collect()
}
