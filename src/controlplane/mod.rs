//! Lifecycle Control Plane
//!
//! The phase orchestrator and the pieces it coordinates: the version and
//! readiness gates, consumer provisioning, the object gateway, teardown, and
//! the persisted run context tying separate invocations together.

pub mod backends;
pub mod context;
pub mod gateway;
pub mod orchestrator;
pub mod platform;
pub mod provisioner;
pub mod readiness;
pub mod teardown;
pub mod version;

pub use backends::*;
pub use context::{RunContext, RunStateStore};
pub use gateway::GatewayProvisioner;
pub use orchestrator::*;
pub use platform::*;
pub use provisioner::{ConsumerProvisioner, ConsumerReport};
pub use readiness::ReadinessGate;
pub use teardown::{CleanupStrategy, TeardownCoordinator, TeardownReport};
pub use version::{ReleaseBucket, VersionGate};
