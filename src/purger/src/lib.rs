//! Escalating teardown of workload state in a Kubernetes cluster.
//!
//! A purge runs four strictly ordered stages: package-manager releases,
//! custom resources (and their definitions), pods, and finally namespaces.
//! Within a stage every resource is handled by its own task through
//! [`fanout::FanOut`]; the first unrecoverable error cancels the siblings
//! and stops the purge before the next stage starts.

pub mod cancel;
pub mod cluster;
pub mod deleter;
pub mod error;
pub mod fanout;
pub mod namespaces;
pub mod orchestrator;
pub mod releases;
pub mod resource;
pub mod stages;
pub mod wait;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use cancel::CancelToken;
pub use cluster::{ClusterApi, DeleteOptions};
pub use deleter::{DeletionOutcome, EscalatingDeleter};
pub use error::{ClusterError, ErrorClass, PurgeError, Stage};
pub use fanout::FanOut;
pub use namespaces::NamespaceSet;
pub use orchestrator::{PurgeSettings, Purger};
pub use releases::ReleaseManager;
pub use resource::{CustomKind, ResourceKind, ResourceRef, SchemaDescriptor};
pub use wait::{WaitOutcome, WaitPolicy, await_absence};
