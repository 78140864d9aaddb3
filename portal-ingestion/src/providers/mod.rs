//! Utility providers.
//!
//! Each provider implements the portal-specific protocol (login flow,
//! identity discovery, usage endpoint) on top of the shared `Session`,
//! `IdentityResolver` and `SeriesStore` machinery.

pub mod coned;

use std::sync::Arc;

use serde::Deserialize;
use usage_client::ReadingsBatch;

use crate::{
    credentials::CredentialSupplier,
    error::{AuthError, FetchError, ResolutionError},
    identity::IdentityResolver,
    session::Session,
};

pub use coned::ConEdProvider;

#[async_trait::async_trait]
pub trait UtilityProvider: Send + Sync {
    /// Human-readable provider name, also the basis of file naming.
    fn display_name(&self) -> &str;

    /// Display name with whitespace removed, lowercased.
    fn slug(&self) -> String {
        self.display_name()
            .chars()
            .filter(|c| !c.is_whitespace())
            .flat_map(char::to_lowercase)
            .collect()
    }

    /// Headers sent on every request of a session with this provider.
    fn default_headers(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    /// Drives `session` from `Unauthenticated` to `TokenAcquired`, or leaves
    /// it in `AuthFailed` and returns the cause.
    async fn login(
        &self,
        session: &mut Session,
        supplier: &dyn CredentialSupplier,
    ) -> Result<(), AuthError>;

    async fn discover_account_id(&self, session: &Session) -> Result<String, ResolutionError>;

    async fn discover_meter_id(
        &self,
        session: &Session,
        account_id: &str,
    ) -> Result<String, ResolutionError>;

    /// Readings currently offered by the provider for the resolved account/meter.
    async fn fetch_current_window(&self, session: &Session) -> Result<ReadingsBatch, FetchError>;

    async fn ensure_resolved(
        &self,
        session: &mut Session,
        resolver: &IdentityResolver,
    ) -> Result<(), ResolutionError> {
        resolver.ensure_resolved(self, session).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Coned,
}

/// Optional endpoint overrides, mainly for staging portals.
#[derive(Debug, Clone, Default)]
pub struct Endpoints {
    pub portal_base_url: Option<String>,
    pub opower_base_url: Option<String>,
}

pub fn build_provider(kind: ProviderKind, endpoints: &Endpoints) -> Arc<dyn UtilityProvider> {
    match kind {
        ProviderKind::Coned => {
            let mut provider = ConEdProvider::default();
            if let Some(url) = &endpoints.portal_base_url {
                provider = provider.with_portal_base_url(url);
            }
            if let Some(url) = &endpoints.opower_base_url {
                provider = provider.with_opower_base_url(url);
            }
            Arc::new(provider)
        }
    }
}
