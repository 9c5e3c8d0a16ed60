use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::resource::ResourceRef;

/// How a backend failure affects the deletion protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The object is absent. Deleting it again is a no-op.
    NotFound,
    /// A concurrent writer got there first.
    Conflict,
    Other,
}

/// Implemented once per backend binding to map its native errors onto [`ErrorClass`].
pub trait Classify {
    fn class(&self) -> ErrorClass;
}

/// Error returned by a control-plane or package-manager call.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl ClusterError {
    pub fn other(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        ClusterError::Other(err.into())
    }

    pub fn is_not_found(&self) -> bool {
        self.class() == ErrorClass::NotFound
    }
}

impl Classify for ClusterError {
    fn class(&self) -> ErrorClass {
        match self {
            ClusterError::NotFound(_) => ErrorClass::NotFound,
            ClusterError::Conflict(_) => ErrorClass::Conflict,
            ClusterError::Other(_) => ErrorClass::Other,
        }
    }
}

/// The strictly ordered phases of a purge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Releases,
    CustomResources,
    Workloads,
    Namespaces,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Releases => write!(f, "release teardown"),
            Stage::CustomResources => write!(f, "custom resource teardown"),
            Stage::Workloads => write!(f, "workload teardown"),
            Stage::Namespaces => write!(f, "namespace teardown"),
        }
    }
}

#[derive(Debug, Error)]
pub enum PurgeError {
    #[error("{context}")]
    Cluster {
        context: String,
        #[source]
        source: ClusterError,
    },

    #[error("{resource} did not terminate in time")]
    Timeout { resource: ResourceRef },

    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid custom resource definition {name}: {reason}")]
    InvalidSchema { name: String, reason: String },

    #[error("wait timeout ({timeout:?}) must be greater than poll interval ({poll_interval:?}) and both non-zero")]
    InvalidPolicy {
        timeout: Duration,
        poll_interval: Duration,
    },

    #[error("namespaces still present after {waited:?}: {}", remaining.join(", "))]
    NamespacesRemain {
        remaining: Vec<String>,
        waited: Duration,
    },

    #[error("{context}")]
    Context {
        context: String,
        #[source]
        source: Box<PurgeError>,
    },

    #[error("{stage} failed")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<PurgeError>,
    },
}

impl PurgeError {
    /// Adapter for `map_err` that attaches a description of the failed call.
    pub fn cluster(context: impl Into<String>) -> impl FnOnce(ClusterError) -> PurgeError {
        let context = context.into();
        move |source| PurgeError::Cluster { context, source }
    }

    pub fn within(self, context: impl Into<String>) -> PurgeError {
        PurgeError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// True when the error only reports that the task was told to stop.
    pub fn is_cancelled(&self) -> bool {
        match self {
            PurgeError::Cancelled => true,
            PurgeError::Context { source, .. } | PurgeError::Stage { source, .. } => {
                source.is_cancelled()
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_classification() {
        assert_eq!(ClusterError::NotFound("pod a".into()).class(), ErrorClass::NotFound);
        assert_eq!(ClusterError::Conflict("pod a".into()).class(), ErrorClass::Conflict);
        assert_eq!(ClusterError::other("connection reset").class(), ErrorClass::Other);
        assert!(!ClusterError::other("boom").is_not_found());
    }

    #[test]
    fn test_context_chain_keeps_cause() {
        let err = Err::<(), _>(ClusterError::other("connection reset"))
            .map_err(PurgeError::cluster("failed to delete pod team-a/web"))
            .unwrap_err()
            .within("error deleting pods");

        assert_eq!(err.to_string(), "error deleting pods");
        let cause = err.source().unwrap();
        assert_eq!(cause.to_string(), "failed to delete pod team-a/web");
        assert_eq!(cause.source().unwrap().to_string(), "connection reset");
    }

    #[test]
    fn test_cancellation_seen_through_wrappers() {
        let err = PurgeError::Stage {
            stage: Stage::Releases,
            source: Box::new(PurgeError::Cancelled.within("release r1")),
        };
        assert!(err.is_cancelled());
        assert!(!PurgeError::InvalidSchema {
            name: "x".into(),
            reason: "y".into()
        }
        .is_cancelled());
    }
}
