//! One polling cycle: login -> resolve identity -> fetch window -> merge.
//!
//! The pipeline never retries inside a cycle. A failed cycle is returned to
//! the caller so the process exits non-zero and the supervising service
//! manager applies its own restart/backoff policy.

use std::{sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use usage_client::{MergeSummary, ReadingsBatch, SeriesError, SeriesStore};

use crate::{
    config::AppConfig,
    credentials::{ConfiguredCredentials, CredentialSupplier},
    error::IngestError,
    identity::{IdentityCache, IdentityResolver},
    providers::{build_provider, UtilityProvider},
    session::Session,
    transport::{ReqwestTransport, TransportFactory},
};

#[derive(Debug, Clone, Copy)]
pub struct CycleOptions {
    /// Persist fetched readings into the series store.
    pub merge: bool,
    /// Fail the cycle on an empty fetch even when merging.
    pub fail_on_empty: bool,
}

impl Default for CycleOptions {
    fn default() -> Self {
        Self {
            merge: true,
            fail_on_empty: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CycleOutcome {
    pub fetched: usize,
    /// `None` when nothing was written.
    pub merge: Option<MergeSummary>,
}

pub struct IngestionPipeline {
    provider: Arc<dyn UtilityProvider>,
    supplier: Arc<dyn CredentialSupplier>,
    resolver: IdentityResolver,
    store: SeriesStore,
    transports: TransportFactory,
    options: CycleOptions,
}

impl IngestionPipeline {
    pub fn new(
        provider: Arc<dyn UtilityProvider>,
        supplier: Arc<dyn CredentialSupplier>,
        resolver: IdentityResolver,
        store: SeriesStore,
        transports: TransportFactory,
        options: CycleOptions,
    ) -> Self {
        Self {
            provider,
            supplier,
            resolver,
            store,
            transports,
            options,
        }
    }

    /// Wires the configured provider, credentials, cache and store.
    pub fn from_config(cfg: &AppConfig, merge: bool) -> Self {
        let provider = build_provider(cfg.provider.kind, &cfg.provider.endpoints());
        let supplier = Arc::new(ConfiguredCredentials::new(
            cfg.provider.username.clone(),
            cfg.provider.password.clone(),
            cfg.provider.one_time_code.clone(),
        ));
        let cache = IdentityCache::for_provider(&cfg.storage.cache_dir(), &provider.slug());
        let resolver = IdentityResolver::new(cache, cfg.provider.username.clone());
        let store = SeriesStore::for_account(
            &cfg.storage.data_dir(),
            provider.display_name(),
            &cfg.provider.username,
        );

        Self::new(
            provider,
            supplier,
            resolver,
            store,
            ReqwestTransport::factory(cfg.http_timeout()),
            CycleOptions {
                merge,
                fail_on_empty: cfg.fail_on_empty,
            },
        )
    }

    pub fn store(&self) -> &SeriesStore {
        &self.store
    }

    /// Drops cached account/meter ids so the next cycle re-resolves them.
    pub async fn refresh_identity(&self) -> Result<(), IngestError> {
        self.resolver.invalidate().await?;
        info!("identity cache cleared");
        Ok(())
    }

    /// Logs in with a fresh session, resolves ids and fetches the current window.
    pub async fn fetch_window(&self) -> Result<ReadingsBatch, IngestError> {
        let transport = (self.transports)()?;
        let mut session = Session::new(transport, self.provider.default_headers());

        self.provider
            .login(&mut session, self.supplier.as_ref())
            .await?;
        self.provider
            .ensure_resolved(&mut session, &self.resolver)
            .await?;
        let batch = self.provider.fetch_current_window(&session).await?;

        Ok(batch)
    }

    pub async fn run_cycle(&self) -> Result<CycleOutcome, IngestError> {
        let result = self.cycle().await;

        match &result {
            Ok(outcome) => {
                metrics::counter!("ingest_cycles_total", "outcome" => "ok").increment(1);
                info!(
                    fetched = outcome.fetched,
                    added = outcome.merge.map(|m| m.added),
                    replaced = outcome.merge.map(|m| m.replaced),
                    total = outcome.merge.map(|m| m.total),
                    "cycle complete"
                );
            }
            Err(e) => {
                metrics::counter!("ingest_cycles_total", "outcome" => e.kind()).increment(1);
                error!(error = %e, kind = e.kind(), "cycle failed");
            }
        }

        result
    }

    async fn cycle(&self) -> Result<CycleOutcome, IngestError> {
        let batch = self.fetch_window().await?;
        let fetched = batch.len();

        if batch.is_empty() {
            if !self.options.merge || self.options.fail_on_empty {
                return Err(IngestError::EmptyData);
            }
            warn!("no new readings this cycle, store left unchanged");
            return Ok(CycleOutcome {
                fetched,
                merge: None,
            });
        }

        if !self.options.merge {
            info!(fetched, "merge disabled, skipping store");
            return Ok(CycleOutcome {
                fetched,
                merge: None,
            });
        }

        let store = self.store.clone();
        let summary = tokio::task::spawn_blocking(move || store.merge_and_persist(&batch))
            .await
            .map_err(|e| SeriesError::from(std::io::Error::other(e)))??;
        metrics::counter!("series_rows_merged_total").increment(summary.incoming as u64);
        metrics::gauge!("series_rows").set(summary.total as f64);
        info!(path = %self.store.path().display(), "store updated");

        Ok(CycleOutcome {
            fetched,
            merge: Some(summary),
        })
    }

    /// Runs cycles until `shutdown` fires, sleeping `poll_interval` between them.
    ///
    /// Shutdown only interrupts the sleep; a cycle in flight runs to completion.
    /// The first failed cycle ends the loop with its error.
    pub async fn run_continuous(
        &self,
        poll_interval: Duration,
        shutdown: CancellationToken,
    ) -> Result<(), IngestError> {
        loop {
            self.run_cycle().await?;

            info!(sleep_secs = poll_interval.as_secs(), "going to sleep");
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("shutdown requested, stopping");
                    return Ok(());
                }
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }
    }
}
