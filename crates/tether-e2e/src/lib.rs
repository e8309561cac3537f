//! End-to-end harness for the Tether channel.
//!
//! The crate ships `tether-stub-worker`, a scriptable worker built on
//! [`tether_worker`], and the fixtures the integration tests use to point a
//! host at it. The stub reads a [`StubPlan`] from the file passed as its
//! entrypoint, so each test decides how its worker misbehaves.

pub mod fixtures;
pub mod plan;
pub mod stub;

pub use fixtures::StubWorkspace;
pub use plan::{PlanError, StubPlan};
pub use stub::{STUB_TARGET, StubHandler, run};
