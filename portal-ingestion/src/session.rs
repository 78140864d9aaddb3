//! Per-account provider session.
//!
//! A `Session` owns the transport (and its cookie jar), the bearer token once
//! one is issued, and the resolved account/meter ids. Its authentication
//! progress is tracked as an explicit state machine:
//!
//! ```text
//! Unauthenticated -> CredentialsSubmitted -> ChallengeRequired -> ChallengeVerified -> TokenAcquired
//!                                  \________________________________________________/
//! ```
//!
//! with `AuthFailed` reachable from every non-terminal state. Only a session
//! in `TokenAcquired` may be used for identity resolution or fetching.

use std::fmt;

use tracing::debug;

use crate::{
    error::AuthError,
    transport::{HttpRequest, HttpResponse, Method, Transport, TransportError},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    CredentialsSubmitted,
    ChallengeRequired,
    ChallengeVerified,
    TokenAcquired,
    AuthFailed,
}

impl AuthState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::TokenAcquired | Self::AuthFailed)
    }

    fn can_advance_to(self, next: AuthState) -> bool {
        use AuthState::*;

        match (self, next) {
            (from, AuthFailed) => !from.is_terminal(),
            (Unauthenticated, CredentialsSubmitted) => true,
            (CredentialsSubmitted, ChallengeRequired) => true,
            (CredentialsSubmitted, TokenAcquired) => true,
            (ChallengeRequired, ChallengeVerified) => true,
            (ChallengeVerified, TokenAcquired) => true,
            _ => false,
        }
    }
}

pub struct Session {
    transport: Box<dyn Transport>,
    default_headers: Vec<(String, String)>,
    bearer_token: Option<String>,
    state: AuthState,
    account_id: Option<String>,
    meter_id: Option<String>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("has_token", &self.bearer_token.is_some())
            .field("account_id", &self.account_id)
            .field("meter_id", &self.meter_id)
            .finish()
    }
}

impl Session {
    pub fn new(transport: Box<dyn Transport>, default_headers: Vec<(String, String)>) -> Self {
        Self {
            transport,
            default_headers,
            bearer_token: None,
            state: AuthState::Unauthenticated,
            account_id: None,
            meter_id: None,
        }
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    /// Moves to `next`, rejecting edges the login flow does not allow.
    pub fn advance(&mut self, next: AuthState) -> Result<(), AuthError> {
        if !self.state.can_advance_to(next) {
            return Err(AuthError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }

        debug!(from = ?self.state, to = ?next, "session transition");
        self.state = next;
        Ok(())
    }

    /// Marks the session failed and hands the error back for propagation.
    pub fn fail(&mut self, err: AuthError) -> AuthError {
        if !self.state.is_terminal() {
            self.state = AuthState::AuthFailed;
        }
        err
    }

    /// Stores the bearer token and completes the login flow.
    pub fn acquire_token(&mut self, token: String) -> Result<(), AuthError> {
        self.advance(AuthState::TokenAcquired)?;
        self.bearer_token = Some(token);
        Ok(())
    }

    pub fn is_authorized(&self) -> bool {
        self.state == AuthState::TokenAcquired && self.bearer_token.is_some()
    }

    pub fn require_authorized(&self) -> Result<(), AuthError> {
        if self.is_authorized() {
            Ok(())
        } else {
            Err(AuthError::NotAuthorized(self.state))
        }
    }

    pub fn account_id(&self) -> Option<&str> {
        self.account_id.as_deref().filter(|s| !s.is_empty())
    }

    pub fn set_account_id(&mut self, account_id: String) {
        self.account_id = Some(account_id);
    }

    pub fn meter_id(&self) -> Option<&str> {
        self.meter_id.as_deref().filter(|s| !s.is_empty())
    }

    pub fn set_meter_id(&mut self, meter_id: String) {
        self.meter_id = Some(meter_id);
    }

    /// Account and meter ids, once both are known.
    pub fn resolved_ids(&self) -> Option<(&str, &str)> {
        Some((self.account_id()?, self.meter_id()?))
    }

    /// Shared request primitive: GET without a body, JSON POST with one.
    ///
    /// Non-2xx responses become `TransportError::Status`. Works before a token
    /// exists; once one does it is sent as `Authorization: Bearer <token>`.
    pub async fn request(
        &self,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<HttpResponse, TransportError> {
        let method = if body.is_some() { Method::Post } else { Method::Get };

        let mut headers = self.default_headers.clone();
        if let Some(token) = &self.bearer_token {
            headers.push(("Authorization".to_string(), format!("Bearer {token}")));
        }

        debug!(?method, url, "portal request");
        metrics::counter!("portal_requests_total").increment(1);

        let response = self
            .transport
            .send(HttpRequest {
                method,
                url: url.to_string(),
                headers,
                body: body.cloned(),
            })
            .await?;

        debug!(url, status = response.status, json = response.is_json(), "portal response");

        if !response.is_success() {
            metrics::counter!("portal_request_errors_total").increment(1);
            return Err(TransportError::Status {
                url: url.to_string(),
                status: response.status,
            });
        }

        Ok(response)
    }

    pub async fn get(&self, url: &str) -> Result<HttpResponse, TransportError> {
        self.request(url, None).await
    }

    pub async fn post(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<HttpResponse, TransportError> {
        self.request(url, Some(body)).await
    }
}
