//! Shared operation context.
//!
//! Groups the handles every operation needs - layout, metadata DB, store,
//! profiles, state file, HTTP client, sandbox policy - so command handlers
//! build one context and pass it down.

use std::sync::Arc;
use std::time::Duration;

use crate::core::builder::Builder;
use crate::core::catalog::Catalog;
use crate::core::sandbox::Policy;
use crate::io::cache::CacheClient;
use crate::io::fetch::Fetcher;
use crate::ops::OpError;
use crate::paths::Layout;
use crate::store::db::MetaDb;
use crate::store::generations::Profiles;
use crate::store::lock::RootLock;
use crate::store::state::StateFile;
use crate::store::Store;

/// How long a publish waits on a sibling invocation before `LockHeld`.
const LOCK_WAIT: Duration = Duration::from_secs(5);

pub struct OpContext {
    pub layout: Layout,
    pub db: MetaDb,
    pub fetcher: Fetcher,
    pub store: Arc<Store>,
    pub profiles: Profiles,
    pub state: StateFile,
    pub client: reqwest::Client,
    pub policy: Policy,
    pub cache: Option<Arc<CacheClient>>,
}

impl OpContext {
    pub fn new(
        layout: Layout,
        policy: Policy,
        cache_url: Option<String>,
    ) -> Result<Self, OpError> {
        let db = MetaDb::open_at(&layout.db_path())?;
        let fetcher = Fetcher::new(layout.sources_dir());
        let store = Arc::new(Store::new(layout.store_dir()));
        let profiles = Profiles::new(layout.profiles_dir());
        let state = StateFile::new(layout.state_file());

        let client = reqwest::Client::builder()
            .tcp_nodelay(true)
            .build()
            .map_err(|e| OpError::Io(std::io::Error::other(e)))?;

        let cache = cache_url
            .or_else(|| std::env::var(crate::CACHE_URL_ENV).ok())
            .map(|url| Arc::new(CacheClient::new(url, client.clone())));

        Ok(Self {
            layout,
            db,
            fetcher,
            store,
            profiles,
            state,
            client,
            policy,
            cache,
        })
    }

    pub fn catalog(&self) -> Catalog<'_> {
        Catalog::new(self.layout.repos_dir(), &self.db, &self.fetcher)
    }

    pub fn builder(&self) -> Builder {
        Builder::new(
            self.layout.clone(),
            self.store.clone(),
            self.fetcher.clone(),
            self.cache.clone(),
            self.policy.clone(),
        )
    }

    /// Exclusive root lock for the allocate -> publish -> state-write span.
    pub fn lock(&self) -> Result<RootLock, OpError> {
        Ok(RootLock::acquire(&self.layout.lock_path(), LOCK_WAIT)?)
    }

    /// Artifact keys composed into the current generation.
    pub fn current_artifacts(&self) -> Vec<String> {
        self.profiles
            .current()
            .and_then(|n| self.profiles.manifest(n).ok())
            .map(|m| m.artifacts)
            .unwrap_or_default()
    }
}
