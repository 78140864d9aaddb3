use std::{
    collections::BTreeMap,
    io,
    path::{Path, PathBuf},
};

use tracing::{debug, warn};
use usage_client::AccountIdentity;

use crate::error::CacheError;

type CacheContents = BTreeMap<String, AccountIdentity>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityField {
    AccountId,
    MeterId,
}

/// JSON file mapping username to its discovered account/meter ids.
///
/// One file per provider, so entries are effectively keyed by provider and
/// username. Assumes a single writer at a time.
#[derive(Debug, Clone)]
pub struct IdentityCache {
    path: PathBuf,
}

impl IdentityCache {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn for_provider(cache_dir: &Path, provider_slug: &str) -> Self {
        Self::new(cache_dir.join(format!("{provider_slug}-identity.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing file and unparsable file both read as empty.
    async fn read_all(&self) -> Result<CacheContents, CacheError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(CacheContents::new()),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str(&raw) {
            Ok(contents) => Ok(contents),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "identity cache unreadable, ignoring it");
                Ok(CacheContents::new())
            }
        }
    }

    async fn write_all(&self, contents: &CacheContents) -> Result<(), CacheError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_string_pretty(contents)?;
        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, json).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }

    pub async fn load(&self, username: &str) -> Result<AccountIdentity, CacheError> {
        let mut contents = self.read_all().await?;
        Ok(contents.remove(username).unwrap_or_default())
    }

    /// Upserts one field for `username`, leaving the other field as it was.
    pub async fn save(
        &self,
        username: &str,
        field: IdentityField,
        value: &str,
    ) -> Result<(), CacheError> {
        let mut contents = self.read_all().await?;
        let entry = contents.entry(username.to_string()).or_default();

        match field {
            IdentityField::AccountId => entry.account_id = Some(value.to_string()),
            IdentityField::MeterId => entry.meter_id = Some(value.to_string()),
        }

        self.write_all(&contents).await?;
        debug!(path = %self.path.display(), ?field, "identity cached");
        Ok(())
    }

    /// Drops everything cached for `username`.
    pub async fn invalidate(&self, username: &str) -> Result<(), CacheError> {
        let mut contents = self.read_all().await?;
        if contents.remove(username).is_some() {
            self.write_all(&contents).await?;
            debug!(path = %self.path.display(), "identity cache entry invalidated");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache_in(dir: &tempfile::TempDir) -> IdentityCache {
        IdentityCache::new(dir.path().join("nested").join("identity.json"))
    }

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let identity = cache_in(&dir).load("someone").await.unwrap();
        assert_eq!(identity, AccountIdentity::default());
    }

    #[tokio::test]
    async fn save_does_not_clobber_other_field() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(&dir);

        cache.save("someone", IdentityField::AccountId, "acct-1").await.unwrap();
        cache.save("someone", IdentityField::MeterId, "meter-9").await.unwrap();
        cache.save("someone", IdentityField::AccountId, "acct-1").await.unwrap();

        let identity = cache.load("someone").await.unwrap();
        assert_eq!(identity.account_id.as_deref(), Some("acct-1"));
        assert_eq!(identity.meter_id.as_deref(), Some("meter-9"));
    }

    #[tokio::test]
    async fn entries_are_per_username_and_camel_cased_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(&dir);

        cache.save("a", IdentityField::AccountId, "acct-a").await.unwrap();
        cache.save("b", IdentityField::MeterId, "meter-b").await.unwrap();

        assert_eq!(cache.load("a").await.unwrap().meter_id, None);
        assert_eq!(cache.load("b").await.unwrap().account_id, None);

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(cache.path()).unwrap()).unwrap();
        assert_eq!(raw["a"]["accountId"], "acct-a");
        assert_eq!(raw["b"]["meterId"], "meter-b");
    }

    #[tokio::test]
    async fn corrupted_file_is_replaced_on_save() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(&dir);
        std::fs::create_dir_all(cache.path().parent().unwrap()).unwrap();
        std::fs::write(cache.path(), "{not json").unwrap();

        assert_eq!(cache.load("someone").await.unwrap(), AccountIdentity::default());

        cache.save("someone", IdentityField::MeterId, "m").await.unwrap();
        assert_eq!(cache.load("someone").await.unwrap().meter_id.as_deref(), Some("m"));
    }

    #[tokio::test]
    async fn invalidate_removes_only_that_user() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(&dir);
        cache.save("a", IdentityField::AccountId, "acct-a").await.unwrap();
        cache.save("b", IdentityField::AccountId, "acct-b").await.unwrap();

        cache.invalidate("a").await.unwrap();

        assert_eq!(cache.load("a").await.unwrap(), AccountIdentity::default());
        assert_eq!(cache.load("b").await.unwrap().account_id.as_deref(), Some("acct-b"));
    }
}
