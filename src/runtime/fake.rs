//! In-memory [`EngineRuntime`] with failure injection.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::{ContainerConfig, ContainerSummary, EngineRuntime, Error, Result, RuntimeState};
use crate::container::ContainerID;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Failure {
    NotFound,
    Unauthorized,
    Conflict,
    Server,
    Transport,
}

impl Failure {
    fn into_error(self, what: &str) -> Error {
        let message = format!("injected failure: {what}");
        match self {
            Failure::NotFound => Error::NotFound(message),
            Failure::Unauthorized => Error::Unauthorized(message),
            Failure::Conflict => Error::Conflict(message),
            Failure::Server => Error::Server {
                status: 500,
                message,
            },
            Failure::Transport => Error::Transport(message.into()),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct Calls {
    pub(crate) pulls: usize,
    pub(crate) creates: usize,
    pub(crate) starts: usize,
    pub(crate) stops: usize,
    pub(crate) removes: usize,
}

#[derive(Debug, Default)]
struct State {
    containers: Vec<ContainerSummary>,
    next_id: u64,
    calls: Calls,
    pull_failures: VecDeque<Failure>,
    create_failure: Option<Failure>,
    start_failure: Option<Failure>,
    stop_failure: Option<Failure>,
    remove_failure: Option<Failure>,
    list_failure: Option<Failure>,
}

#[derive(Debug, Default)]
pub(crate) struct FakeRuntime {
    state: Mutex<State>,
    pull_delay: Duration,
}

impl FakeRuntime {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Makes every pull sleep for `delay` before answering.
    pub(crate) fn with_pull_delay(mut self, delay: Duration) -> Self {
        self.pull_delay = delay;
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The next `times` pulls fail with `failure`.
    pub(crate) fn fail_pulls(&self, failure: Failure, times: usize) {
        self.state()
            .pull_failures
            .extend(std::iter::repeat_n(failure, times));
    }

    pub(crate) fn fail_next_create(&self, failure: Failure) {
        self.state().create_failure = Some(failure);
    }

    pub(crate) fn fail_next_start(&self, failure: Failure) {
        self.state().start_failure = Some(failure);
    }

    pub(crate) fn fail_next_stop(&self, failure: Failure) {
        self.state().stop_failure = Some(failure);
    }

    pub(crate) fn fail_next_remove(&self, failure: Failure) {
        self.state().remove_failure = Some(failure);
    }

    pub(crate) fn fail_next_list(&self, failure: Failure) {
        self.state().list_failure = Some(failure);
    }

    /// Registers a container that was not created through this runtime.
    pub(crate) fn insert_container(&self, summary: ContainerSummary) {
        self.state().containers.push(summary);
    }

    /// Changes the state of a container behind the manager's back.
    pub(crate) fn set_state(&self, name: &str, state: RuntimeState) {
        if let Some(container) = self
            .state()
            .containers
            .iter_mut()
            .find(|c| c.has_name(name))
        {
            container.state = state;
        }
    }

    pub(crate) fn container(&self, name: &str) -> Option<ContainerSummary> {
        self.state()
            .containers
            .iter()
            .find(|c| c.has_name(name))
            .cloned()
    }

    pub(crate) fn container_count(&self) -> usize {
        self.state().containers.len()
    }

    pub(crate) fn calls<T>(&self, f: impl FnOnce(&Calls) -> T) -> T {
        f(&self.state().calls)
    }
}

fn matches(container: &ContainerSummary, name_or_id: &str) -> bool {
    container.id.as_str() == name_or_id || container.has_name(name_or_id)
}

impl EngineRuntime for FakeRuntime {
    async fn pull_image(&self, image: &str) -> Result<()> {
        if !self.pull_delay.is_zero() {
            tokio::time::sleep(self.pull_delay).await;
        }
        let mut state = self.state();
        state.calls.pulls += 1;
        match state.pull_failures.pop_front() {
            Some(failure) => Err(failure.into_error(image)),
            None => Ok(()),
        }
    }

    async fn create_container(&self, config: &ContainerConfig) -> Result<ContainerID> {
        let mut state = self.state();
        state.calls.creates += 1;
        if let Some(failure) = state.create_failure.take() {
            return Err(failure.into_error(config.name.as_str()));
        }
        if state
            .containers
            .iter()
            .any(|c| c.has_name(config.name.as_str()))
        {
            return Err(Error::Conflict(format!(
                "container name `{}` is already in use",
                config.name
            )));
        }

        state.next_id += 1;
        let id = ContainerID::new(format!("fake{:08x}", state.next_id))
            .map_err(|err| Error::InvalidResponse(err.to_string()))?;
        state.containers.push(ContainerSummary {
            id: id.clone(),
            names: vec![config.name.to_string()],
            image: config.image.clone(),
            state: RuntimeState::Created,
            labels: config.labels.clone(),
        });
        Ok(id)
    }

    async fn start_container(&self, id: &ContainerID) -> Result<()> {
        let mut state = self.state();
        state.calls.starts += 1;
        if let Some(failure) = state.start_failure.take() {
            return Err(failure.into_error(id.as_str()));
        }
        match state.containers.iter_mut().find(|c| &c.id == id) {
            Some(container) if container.state == RuntimeState::Running => {
                Err(Error::NotModified(format!("container {id} already started")))
            }
            Some(container) => {
                container.state = RuntimeState::Running;
                Ok(())
            }
            None => Err(Error::NotFound(format!("no such container: {id}"))),
        }
    }

    async fn stop_container(&self, name: &str, _grace: Duration) -> Result<()> {
        let mut state = self.state();
        state.calls.stops += 1;
        if let Some(failure) = state.stop_failure.take() {
            return Err(failure.into_error(name));
        }
        match state.containers.iter_mut().find(|c| c.has_name(name)) {
            Some(container) if container.state.is_active() => {
                container.state = RuntimeState::Exited;
                Ok(())
            }
            Some(_) => Err(Error::NotModified(format!("container {name} already stopped"))),
            None => Err(Error::NotFound(format!("no such container: {name}"))),
        }
    }

    async fn remove_container(&self, name_or_id: &str) -> Result<()> {
        let mut state = self.state();
        state.calls.removes += 1;
        if let Some(failure) = state.remove_failure.take() {
            return Err(failure.into_error(name_or_id));
        }
        let before = state.containers.len();
        state.containers.retain(|c| !matches(c, name_or_id));
        if state.containers.len() == before {
            return Err(Error::NotFound(format!("no such container: {name_or_id}")));
        }
        Ok(())
    }

    async fn list_containers(&self) -> Result<Vec<ContainerSummary>> {
        let mut state = self.state();
        if let Some(failure) = state.list_failure.take() {
            return Err(failure.into_error("list"));
        }
        Ok(state.containers.clone())
    }
}
