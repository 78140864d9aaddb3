use tracing::info;

use super::cache::{IdentityCache, IdentityField};
use crate::{error::ResolutionError, providers::UtilityProvider, session::Session};

/// Guarantees a session knows its account and meter ids, consulting the
/// cache before asking the provider and caching anything it discovers.
#[derive(Debug, Clone)]
pub struct IdentityResolver {
    cache: IdentityCache,
    username: String,
}

impl IdentityResolver {
    pub fn new(cache: IdentityCache, username: impl Into<String>) -> Self {
        Self {
            cache,
            username: username.into(),
        }
    }

    /// Forgets the cached ids so the next resolution asks the provider again.
    pub async fn invalidate(&self) -> Result<(), ResolutionError> {
        self.cache.invalidate(&self.username).await?;
        Ok(())
    }

    /// On success both ids are set on `session`; on failure the caller must
    /// treat the session as unresolved.
    pub async fn ensure_resolved<P>(
        &self,
        provider: &P,
        session: &mut Session,
    ) -> Result<(), ResolutionError>
    where
        P: UtilityProvider + ?Sized,
    {
        session.require_authorized()?;

        if session.resolved_ids().is_some() {
            return Ok(());
        }

        let cached = self.cache.load(&self.username).await?;

        let account_id = match session.account_id() {
            Some(id) => id.to_string(),
            None => match cached.account_id.filter(|id| !id.is_empty()) {
                Some(id) => id,
                None => {
                    info!("fetching account id");
                    let id = provider.discover_account_id(session).await?;
                    metrics::counter!("identity_resolutions_total", "field" => "account_id")
                        .increment(1);
                    self.cache
                        .save(&self.username, IdentityField::AccountId, &id)
                        .await?;
                    id
                }
            },
        };
        session.set_account_id(account_id.clone());

        let meter_id = match session.meter_id() {
            Some(id) => id.to_string(),
            None => match cached.meter_id.filter(|id| !id.is_empty()) {
                Some(id) => id,
                None => {
                    info!("fetching meter id");
                    let id = provider.discover_meter_id(session, &account_id).await?;
                    metrics::counter!("identity_resolutions_total", "field" => "meter_id")
                        .increment(1);
                    self.cache
                        .save(&self.username, IdentityField::MeterId, &id)
                        .await?;
                    id
                }
            },
        };
        session.set_meter_id(meter_id);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use usage_client::ReadingsBatch;

    use super::*;
    use crate::{
        credentials::CredentialSupplier,
        error::{AuthError, FetchError},
        session::AuthState,
        transport::scripted::ScriptedTransport,
    };

    #[derive(Default)]
    struct CountingProvider {
        account_calls: AtomicUsize,
        meter_calls: AtomicUsize,
        no_meters: bool,
    }

    #[async_trait::async_trait]
    impl UtilityProvider for CountingProvider {
        fn display_name(&self) -> &str {
            "Test Utility"
        }

        async fn login(
            &self,
            session: &mut Session,
            _supplier: &dyn CredentialSupplier,
        ) -> Result<(), AuthError> {
            session.advance(AuthState::CredentialsSubmitted)?;
            session.acquire_token("tok".to_string())
        }

        async fn discover_account_id(&self, _session: &Session) -> Result<String, ResolutionError> {
            self.account_calls.fetch_add(1, Ordering::SeqCst);
            Ok("acct-1".to_string())
        }

        async fn discover_meter_id(
            &self,
            _session: &Session,
            account_id: &str,
        ) -> Result<String, ResolutionError> {
            assert_eq!(account_id, "acct-1");
            self.meter_calls.fetch_add(1, Ordering::SeqCst);
            if self.no_meters {
                return Err(ResolutionError::NoMeter);
            }
            Ok("meter-7".to_string())
        }

        async fn fetch_current_window(&self, _session: &Session) -> Result<ReadingsBatch, FetchError> {
            Ok(ReadingsBatch::empty())
        }
    }

    fn authorized_session() -> Session {
        let mut session = Session::new(Box::new(ScriptedTransport::new()), Vec::new());
        session.advance(AuthState::CredentialsSubmitted).unwrap();
        session.acquire_token("tok".to_string()).unwrap();
        session
    }

    #[tokio::test]
    async fn second_resolution_comes_entirely_from_cache() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = IdentityResolver::new(IdentityCache::new(dir.path().join("id.json")), "someone");
        let provider = CountingProvider::default();

        let mut first = authorized_session();
        resolver.ensure_resolved(&provider, &mut first).await.unwrap();
        let mut second = authorized_session();
        resolver.ensure_resolved(&provider, &mut second).await.unwrap();

        assert_eq!(provider.account_calls.load(Ordering::SeqCst), 1);
        assert_eq!(provider.meter_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.resolved_ids(), Some(("acct-1", "meter-7")));
    }

    #[tokio::test]
    async fn unauthorized_session_is_rejected_before_any_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = IdentityResolver::new(IdentityCache::new(dir.path().join("id.json")), "someone");
        let provider = CountingProvider::default();
        let mut session = Session::new(Box::new(ScriptedTransport::new()), Vec::new());

        let err = resolver.ensure_resolved(&provider, &mut session).await.unwrap_err();

        assert!(matches!(err, ResolutionError::Auth(AuthError::NotAuthorized(_))));
        assert_eq!(provider.account_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn meter_failure_keeps_cached_account_and_reports_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = IdentityCache::new(dir.path().join("id.json"));
        let resolver = IdentityResolver::new(cache.clone(), "someone");
        let provider = CountingProvider {
            no_meters: true,
            ..CountingProvider::default()
        };
        let mut session = authorized_session();

        let err = resolver.ensure_resolved(&provider, &mut session).await.unwrap_err();

        assert!(matches!(err, ResolutionError::NoMeter));
        assert!(session.resolved_ids().is_none());
        let cached = cache.load("someone").await.unwrap();
        assert_eq!(cached.account_id.as_deref(), Some("acct-1"));
        assert_eq!(cached.meter_id, None);
    }
}
