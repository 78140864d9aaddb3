use usage_client::SeriesError;

use crate::{session::AuthState, transport::TransportError};

#[derive(thiserror::Error, Debug)]
pub enum AuthError {
    #[error("failed to login: {0}")]
    Rejected(String),
    #[error("provider requires a one-time code but none was supplied")]
    MissingChallengeCode,
    #[error("one-time code was not confirmed by the provider")]
    ChallengeFailed,
    #[error("login response is missing required field '{0}'")]
    MissingField(&'static str),
    #[error("illegal session transition {from:?} -> {to:?}")]
    InvalidTransition { from: AuthState, to: AuthState },
    #[error("session is not authorized (state {0:?})")]
    NotAuthorized(AuthState),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    #[error("identity cache io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("identity cache json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum ResolutionError {
    #[error("unable to determine the account id: no electricity service account")]
    NoAccount,
    #[error("unable to determine the account id: account entry has no id")]
    MissingAccountId,
    #[error("unable to determine the meter id: no meters on account")]
    NoMeter,
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("session has no resolved account/meter")]
    NotResolved,
    #[error("malformed usage payload: {0}")]
    Malformed(String),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Cycle-level failure surfaced to the process boundary.
#[derive(thiserror::Error, Debug)]
pub enum IngestError {
    #[error("authentication failed: {0}")]
    Authentication(#[from] AuthError),
    #[error("identity resolution failed: {0}")]
    Resolution(#[from] ResolutionError),
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("provider returned no usable readings")]
    EmptyData,
    #[error("failed to persist series: {0}")]
    Persistence(#[from] SeriesError),
    #[error("identity cache failure: {0}")]
    IdentityCache(#[from] CacheError),
    #[error("transport setup failed: {0}")]
    Transport(#[from] TransportError),
}

impl IngestError {
    /// Short label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Authentication(_) => "authentication",
            Self::Resolution(_) => "resolution",
            Self::Fetch(_) => "fetch",
            Self::EmptyData => "empty_data",
            Self::Persistence(_) => "persistence",
            Self::IdentityCache(_) => "identity_cache",
            Self::Transport(_) => "transport",
        }
    }
}
