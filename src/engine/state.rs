use std::fmt;

use serde::Serialize;

use crate::container::{ContainerID, ContainerName};
use crate::runtime::RuntimeState;

/// Lifecycle state of an engine as tracked by the manager.
///
/// ```text
/// Requested -> Pulling -> Created -> Running -> Stopping -> Stopped
///     \__________\___________\__________\__________\____-> Failed
/// ```
///
/// `Stopped` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    Requested,
    Pulling,
    Created,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl EngineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, EngineState::Stopped | EngineState::Failed)
    }

    pub fn can_transition_to(self, next: EngineState) -> bool {
        use EngineState::*;

        match (self, next) {
            (from, Failed) => !from.is_terminal(),
            (Requested, Pulling)
            | (Pulling, Created)
            | (Created, Running)
            | (Running, Stopping)
            | (Stopping, Stopped) => true,
            _ => false,
        }
    }

    /// Maps the runtime's raw state onto the lifecycle.
    pub fn from_runtime(state: RuntimeState) -> Self {
        match state {
            RuntimeState::Created => EngineState::Created,
            RuntimeState::Running | RuntimeState::Restarting | RuntimeState::Paused => {
                EngineState::Running
            }
            RuntimeState::Removing => EngineState::Stopping,
            RuntimeState::Exited => EngineState::Stopped,
            RuntimeState::Dead | RuntimeState::Unknown => EngineState::Failed,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EngineState::Requested => "requested",
            EngineState::Pulling => "pulling",
            EngineState::Created => "created",
            EngineState::Running => "running",
            EngineState::Stopping => "stopping",
            EngineState::Stopped => "stopped",
            EngineState::Failed => "failed",
        }
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid engine state transition for `{name}`: {from} -> {to}")]
pub struct InvalidTransition {
    pub name: ContainerName,
    pub from: EngineState,
    pub to: EngineState,
}

/// The manager's view of one engine, keyed by container name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineHandle {
    name: ContainerName,
    id: Option<ContainerID>,
    state: EngineState,
}

impl EngineHandle {
    pub(crate) fn requested(name: ContainerName) -> Self {
        Self {
            name,
            id: None,
            state: EngineState::Requested,
        }
    }

    /// A handle for a container found through the runtime rather than created by this call.
    pub(crate) fn observed(name: ContainerName, id: ContainerID, state: EngineState) -> Self {
        Self {
            name,
            id: Some(id),
            state,
        }
    }

    pub fn name(&self) -> &ContainerName {
        &self.name
    }

    /// Runtime id, present once the container has been created.
    pub fn id(&self) -> Option<&ContainerID> {
        self.id.as_ref()
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub(crate) fn set_id(&mut self, id: ContainerID) {
        self.id = Some(id);
    }

    pub(crate) fn transition(&mut self, next: EngineState) -> Result<(), InvalidTransition> {
        if !self.state.can_transition_to(next) {
            return Err(InvalidTransition {
                name: self.name.clone(),
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Moves the handle to `Failed` unless it already is terminal.
    pub(crate) fn fail(&mut self) {
        if !self.state.is_terminal() {
            self.state = EngineState::Failed;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    /// No container with that name existed, or it was not running.
    AlreadyStopped,
}

/// One managed engine as seen by [`list_engines`](super::LifecycleManager::list_engines).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineSummary {
    pub name: ContainerName,
    pub id: ContainerID,
    pub image: String,
    pub state: EngineState,
    pub runtime_state: RuntimeState,
}

#[cfg(test)]
mod tests {
    use super::*;
    use EngineState::*;

    const ALL: [EngineState; 7] = [Requested, Pulling, Created, Running, Stopping, Stopped, Failed];

    #[test]
    fn test_happy_path_transitions() {
        let mut handle = EngineHandle::requested(ContainerName::new("c1").unwrap());
        for next in [Pulling, Created, Running, Stopping, Stopped] {
            handle.transition(next).unwrap();
        }
        assert_eq!(handle.state(), Stopped);
    }

    #[test]
    fn test_terminal_states_reject_transitions() {
        for from in [Stopped, Failed] {
            for to in ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_failed_reachable_from_non_terminal() {
        for from in [Requested, Pulling, Created, Running, Stopping] {
            assert!(from.can_transition_to(Failed));
        }
    }

    #[test]
    fn test_invalid_transition() {
        let mut handle = EngineHandle::requested(ContainerName::new("c1").unwrap());
        let err = handle.transition(Running).unwrap_err();
        assert_eq!(err.from, Requested);
        assert_eq!(err.to, Running);
        assert_eq!(handle.state(), Requested);
    }

    #[test]
    fn test_fail_keeps_terminal_state() {
        let id = ContainerID::new("abc").unwrap();
        let mut handle = EngineHandle::observed(ContainerName::new("c1").unwrap(), id, Stopped);
        handle.fail();
        assert_eq!(handle.state(), Stopped);

        let mut handle = EngineHandle::requested(ContainerName::new("c1").unwrap());
        handle.fail();
        assert_eq!(handle.state(), Failed);
    }

    #[test]
    fn test_from_runtime() {
        assert_eq!(EngineState::from_runtime(RuntimeState::Running), Running);
        assert_eq!(EngineState::from_runtime(RuntimeState::Exited), Stopped);
        assert_eq!(EngineState::from_runtime(RuntimeState::Created), Created);
        assert_eq!(EngineState::from_runtime(RuntimeState::Dead), Failed);
    }

    #[test]
    fn test_handle_serializes_to_json() {
        let id = ContainerID::new("abc123").unwrap();
        let handle = EngineHandle::observed(ContainerName::new("c1").unwrap(), id, Running);
        let json = serde_json::to_value(&handle).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"name": "c1", "id": "abc123", "state": "running"})
        );
    }
}
