//! The four teardown stages, in the order a purge runs them.

pub mod custom_resources;
pub mod namespaces;
pub mod releases;
pub mod workloads;

pub use custom_resources::teardown_custom_resources;
pub use namespaces::teardown_namespaces;
pub use releases::teardown_releases;
pub use workloads::teardown_workloads;
