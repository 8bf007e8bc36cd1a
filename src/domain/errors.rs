//! Resolution error taxonomy.
//!
//! Every error is turned into a well-formed DNS response by the router; none
//! of these escape to the transport.

use crate::domain::value_objects::LookupType;
use hickory_proto::op::ResponseCode;
use std::time::Duration;

/// Coarse classification of how a question failed to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    MalformedQuestion,
    NotAuthoritative,
    InvalidRequest,
    NameNotFound,
    NoData,
    UpstreamFailure,
    ResolutionLoop,
    Timeout,
}

/// Rejection raised by a fetcher's `validate_request`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("name must not be empty")]
    EmptyName,
    #[error("peer and datacenter are mutually exclusive")]
    PeerWithDatacenter,
    #[error("{0} lookups do not accept a tag")]
    TagNotSupported(LookupType),
    #[error("{0}")]
    Other(String),
}

/// Failure reported by a fetcher's `fetch_endpoints`.
///
/// "No endpoints" is not an error; see [`crate::domain::entities::Endpoints::NoData`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// The subject does not exist in the catalog.
    #[error("{0} not found")]
    NotFound(String),
    /// The backend could not be reached or failed.
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// Failure to resolve a question.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("malformed question {name}: {reason}")]
    MalformedQuestion { name: String, reason: String },
    #[error("{0} is not within a served domain")]
    NotAuthoritative(String),
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] ValidationError),
    #[error("name not found: {0}")]
    NameNotFound(String),
    #[error("upstream failure: {0}")]
    UpstreamFailure(String),
    #[error("alias loop while resolving {name} (depth {depth})")]
    ResolutionLoop { name: String, depth: usize },
    #[error("resolution exceeded deadline of {0:?}")]
    Timeout(Duration),
}

impl ResolveError {
    pub fn malformed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedQuestion {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MalformedQuestion { .. } => ErrorKind::MalformedQuestion,
            Self::NotAuthoritative(_) => ErrorKind::NotAuthoritative,
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::NameNotFound(_) => ErrorKind::NameNotFound,
            Self::UpstreamFailure(_) => ErrorKind::UpstreamFailure,
            Self::ResolutionLoop { .. } => ErrorKind::ResolutionLoop,
            Self::Timeout(_) => ErrorKind::Timeout,
        }
    }

    /// The response code a client sees for this failure.
    pub fn response_code(&self) -> ResponseCode {
        match self.kind() {
            ErrorKind::MalformedQuestion | ErrorKind::NameNotFound => ResponseCode::NXDomain,
            ErrorKind::NotAuthoritative => ResponseCode::Refused,
            ErrorKind::InvalidRequest => ResponseCode::FormErr,
            ErrorKind::NoData => ResponseCode::NoError,
            ErrorKind::UpstreamFailure | ErrorKind::ResolutionLoop | ErrorKind::Timeout => {
                ResponseCode::ServFail
            }
        }
    }

    /// Whether the response carries the zone SOA in the authority section.
    pub fn attaches_soa(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::MalformedQuestion | ErrorKind::NameNotFound | ErrorKind::Timeout
        )
    }
}

impl From<FetchError> for ResolveError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::NotFound(name) => Self::NameNotFound(name),
            FetchError::Unavailable(reason) => Self::UpstreamFailure(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_codes() {
        let cases = vec![
            (ResolveError::malformed("x.consul.", "no kind"), ResponseCode::NXDomain),
            (ResolveError::NotAuthoritative("example.com.".into()), ResponseCode::Refused),
            (ValidationError::EmptyName.into(), ResponseCode::FormErr),
            (ResolveError::NameNotFound("web".into()), ResponseCode::NXDomain),
            (ResolveError::UpstreamFailure("down".into()), ResponseCode::ServFail),
            (
                ResolveError::ResolutionLoop { name: "a".into(), depth: 2 },
                ResponseCode::ServFail,
            ),
            (ResolveError::Timeout(Duration::from_millis(5)), ResponseCode::ServFail),
        ];

        for (err, expected) in cases {
            assert_eq!(err.response_code(), expected, "Failed for: {}", err);
        }
    }

    #[test]
    fn test_fetch_error_conversion() {
        let not_found: ResolveError = FetchError::NotFound("web".into()).into();
        assert_eq!(not_found.kind(), ErrorKind::NameNotFound);

        let unavailable: ResolveError = FetchError::Unavailable("timeout".into()).into();
        assert_eq!(unavailable.kind(), ErrorKind::UpstreamFailure);
    }

    #[test]
    fn test_soa_attachment() {
        assert!(ResolveError::NameNotFound("web".into()).attaches_soa());
        assert!(ResolveError::Timeout(Duration::from_secs(1)).attaches_soa());
        assert!(!ResolveError::UpstreamFailure("x".into()).attaches_soa());
        assert!(!ResolveError::NotAuthoritative("x".into()).attaches_soa());
    }

    #[test]
    fn test_error_display() {
        let err = ResolveError::ResolutionLoop { name: "alias".into(), depth: 10 };
        assert_eq!(err.to_string(), "alias loop while resolving alias (depth 10)");

        let err: ResolveError = ValidationError::PeerWithDatacenter.into();
        assert_eq!(
            err.to_string(),
            "invalid request: peer and datacenter are mutually exclusive"
        );
    }
}
