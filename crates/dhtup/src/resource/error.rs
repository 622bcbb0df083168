use std::fmt;

use crate::record::RecordError;
use crate::scope::ScopeError;
use crate::store::StoreError;
use crate::swarm::{ContentId, SwarmError};
use crate::target::Target;

/// How a caller polling a resource should react to an outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    /// Success, carry on
    None,
    /// Worth retrying after a backoff: the network, a deadline or a
    ///  record that may not exist yet
    Transient,
    /// Retrying will not help until something changes externally,
    ///  typically a re-publish
    Permanent,
}

impl FailureClass {
    pub fn of<T>(result: &Result<T, ResourceError>) -> Self {
        match result {
            Ok(_) => FailureClass::None,
            Err(e) => e.failure_class(),
        }
    }
}

/// Stage of an operation, carried by errors for context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    FetchRecord,
    Publish,
    ResolveContent,
    AwaitManifest,
    OpenFile,
    Read,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Step::FetchRecord => "fetching record",
            Step::Publish => "publishing record",
            Step::ResolveContent => "resolving content",
            Step::AwaitManifest => "waiting for manifest",
            Step::OpenFile => "opening file",
            Step::Read => "reading file",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    /// A publisher operation was invoked on a consumer resource
    #[error("{operation} requires a publisher resource")]
    Role { operation: &'static str },
    #[error("refusing to publish the zero content id to {target}")]
    InvalidContentId { target: Target },
    #[error("encoding record for {target}: {source}")]
    Encode { target: Target, source: RecordError },
    #[error("looking up target {target}: {}", lookup_cause(.source))]
    Lookup {
        target: Target,
        #[source]
        source: Option<StoreError>,
    },
    #[error("decoding record at target {target}: {source}")]
    Decode { target: Target, source: RecordError },
    #[error("verifying record at target {target}: {source}")]
    Verify { target: Target, source: RecordError },
    #[error("{step} for target {target}: {source}")]
    Scope {
        step: Step,
        target: Target,
        source: ScopeError,
    },
    #[error("publishing to target {target}: {source}")]
    Publish { target: Target, source: StoreError },
    #[error("{step} for content {content_id}: {source}")]
    Swarm {
        step: Step,
        content_id: ContentId,
        source: SwarmError,
    },
    #[error("file {path} not found in content {content_id}")]
    NotFound { path: String, content_id: ContentId },
    #[error("reading {path} from content {content_id}: {source}")]
    Read {
        path: String,
        content_id: ContentId,
        source: std::io::Error,
    },
}

fn lookup_cause(source: &Option<StoreError>) -> String {
    match source {
        Some(e) => e.to_string(),
        None => "no record found".to_string(),
    }
}

impl ResourceError {
    pub fn failure_class(&self) -> FailureClass {
        match self {
            ResourceError::Role { .. }
            | ResourceError::InvalidContentId { .. }
            | ResourceError::Encode { .. }
            | ResourceError::NotFound { .. } => FailureClass::Permanent,
            ResourceError::Lookup { .. }
            | ResourceError::Decode { .. }
            | ResourceError::Verify { .. }
            | ResourceError::Scope { .. }
            | ResourceError::Publish { .. }
            | ResourceError::Swarm { .. }
            | ResourceError::Read { .. } => FailureClass::Transient,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.failure_class() == FailureClass::Transient
    }

    pub fn is_permanent(&self) -> bool {
        self.failure_class() == FailureClass::Permanent
    }
}
