//! Engine lifecycle management.
//!
//! [`LifecycleManager`] turns an [`EngineSpec`] into a running container: reconcile against the
//! runtime, pull the image, create, start, and later stop. Failures leave no half-created
//! container behind when cleanup succeeds, and are reported as [`Error`] variants that name the
//! step that failed.

mod error;
mod keyed_lock;
mod manager;
pub mod spec;
mod state;

pub use error::{Error, Result};
pub use keyed_lock::{KeyedAsyncLock, KeyedLockGuard};
pub use manager::{
    ExistingContainerPolicy, LABEL_ENGINE_SPEC, LABEL_MANAGED_BY, LifecycleManager,
    ManagerConfig, RetryPolicy,
};
pub use spec::{
    BindMount, ContainerPort, EngineSpec, EngineSpecBuilder, GpuAllocation, Protocol,
    ResourceLimits,
};
pub use state::{EngineHandle, EngineState, EngineSummary, InvalidTransition, StopOutcome};
