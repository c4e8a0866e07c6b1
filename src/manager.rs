//! Trust store lifecycle: bootstrap, periodic refresh and snapshot
//! publication for one issuer.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ValidatorConfig;
use crate::crypto;
use crate::error::Error;
use crate::fetch::ArtifactFetcher;
use crate::rules::BusinessRules;
use crate::source::{self, ArtifactEndpoints, Issuer, TrustSource, TrustStrategy};
use crate::store::{Artifact, ArtifactStore};
use crate::trust_store::{SharedTrustStore, TrustStore};

const FAILURE_CHANNEL_CAPACITY: usize = 16;

/// Default bound on a single artifact download.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Lifecycle of the managed trust store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ManagerState {
    Unloaded = 0,
    Loading = 1,
    Valid = 2,
    Refreshing = 3,
}

impl ManagerState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => ManagerState::Loading,
            2 => ManagerState::Valid,
            3 => ManagerState::Refreshing,
            _ => ManagerState::Unloaded,
        }
    }
}

/// A failed background refresh. The previous trust store stays in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshFailure {
    pub issuer: Issuer,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Restores the state a writer started from unless the writer finishes.
/// A refresh dropped mid-fetch must not leave the manager `Refreshing`.
struct StateGuard<'a> {
    state: &'a AtomicU8,
    prior: ManagerState,
    finished: bool,
}

impl<'a> StateGuard<'a> {
    fn enter(state: &'a AtomicU8, next: ManagerState) -> Self {
        let prior = ManagerState::from_u8(state.swap(next as u8, Ordering::AcqRel));
        Self {
            state,
            prior,
            finished: false,
        }
    }

    fn finish(mut self, state: ManagerState) {
        self.state.store(state as u8, Ordering::Release);
        self.finished = true;
    }
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.state.store(self.prior as u8, Ordering::Release);
        }
    }
}

pub struct TrustStoreManager {
    source: Arc<dyn TrustSource>,
    fetcher: Arc<dyn ArtifactFetcher>,
    cache: ArtifactStore,
    shared: SharedTrustStore,
    rules: ArcSwapOption<BusinessRules>,
    state: AtomicU8,
    writer: Mutex<()>,
    failures: broadcast::Sender<RefreshFailure>,
    fetch_timeout: Duration,
}

impl std::fmt::Debug for TrustStoreManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustStoreManager")
            .field("issuer", &self.source.issuer())
            .field("cache", &self.cache)
            .field("state", &self.state())
            .field("generation", &self.shared.current().generation())
            .finish()
    }
}

impl TrustStoreManager {
    pub fn new(
        source: Arc<dyn TrustSource>,
        fetcher: Arc<dyn ArtifactFetcher>,
        cache: ArtifactStore,
    ) -> Self {
        let (failures, _) = broadcast::channel(FAILURE_CHANNEL_CAPACITY);
        Self {
            source,
            fetcher,
            cache,
            shared: SharedTrustStore::default(),
            rules: ArcSwapOption::empty(),
            state: AtomicU8::new(ManagerState::Unloaded as u8),
            writer: Mutex::new(()),
            failures,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    pub fn from_config(
        config: &ValidatorConfig,
        fetcher: Arc<dyn ArtifactFetcher>,
    ) -> Result<Self, Error> {
        config.validate()?;
        let source = source::source_for(config)?;
        Ok(Self::new(source, fetcher, ArtifactStore::new(&config.cache_dir))
            .with_fetch_timeout(config.fetch_timeout()))
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn issuer(&self) -> Issuer {
        self.source.issuer()
    }

    pub fn state(&self) -> ManagerState {
        ManagerState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Handle for readers. Clones share the same published snapshot.
    pub fn shared(&self) -> SharedTrustStore {
        self.shared.clone()
    }

    /// Latest published trust store. Never blocks on a refresh.
    pub fn current_snapshot(&self) -> Arc<TrustStore> {
        self.shared.current()
    }

    pub fn business_rules(&self) -> Option<Arc<BusinessRules>> {
        self.rules.load_full()
    }

    /// Receive a message for every failed background refresh.
    pub fn subscribe_failures(&self) -> broadcast::Receiver<RefreshFailure> {
        self.failures.subscribe()
    }

    /// Load the initial trust store: embedded keys, then the cache, then the
    /// network. Business rules are loaded afterwards when the issuer
    /// publishes any; their failure is not fatal.
    ///
    /// # Errors
    ///
    /// Fails when no authenticated trust list can be obtained. The store
    /// then stays empty and every credential is rejected.
    pub async fn bootstrap(&self) -> Result<Arc<TrustStore>, Error> {
        let _guard = self.writer.lock().await;
        let state = StateGuard::enter(&self.state, ManagerState::Loading);

        match self.bootstrap_locked().await {
            Ok(store) => {
                state.finish(ManagerState::Valid);
                self.load_rules_locked().await;
                Ok(store)
            }
            Err(e) => {
                drop(state);
                log::error!("Could not load the {} trust list: {}", self.issuer(), e);
                Err(e)
            }
        }
    }

    async fn bootstrap_locked(&self) -> Result<Arc<TrustStore>, Error> {
        if let Some(keys) = self.source.embedded_keys()? {
            let store = self.shared.publish(TrustStore::from_keys(keys));
            log::info!(
                "Loaded {} embedded {} signing keys (generation {})",
                store.len(),
                self.issuer(),
                store.generation()
            );
            return Ok(store);
        }

        match self.load_cached() {
            Ok(Some(store)) => {
                let store = self.shared.publish(store);
                log::info!(
                    "Loaded {} {} signing keys from cache (generation {})",
                    store.len(),
                    self.issuer(),
                    store.generation()
                );
                return Ok(store);
            }
            Ok(None) => {
                log::info!("No cached {} trust list; downloading", self.issuer());
            }
            Err(e) => {
                log::warn!(
                    "Cached {} trust list rejected, downloading a fresh one: {}",
                    self.issuer(),
                    e
                );
            }
        }

        self.download_locked().await
    }

    fn load_cached(&self) -> Result<Option<TrustStore>, Error> {
        let artifact = match self.cache.read(self.source.cache_name())? {
            Some(artifact) => artifact,
            None => return Ok(None),
        };
        self.source.verify_artifact(&artifact)?;
        let keys = self.source.parse_keys(&artifact.data)?;
        Ok(Some(TrustStore::from_keys(keys)))
    }

    /// Download, authenticate, cache and publish a fresh trust list.
    pub async fn download_and_verify(&self) -> Result<Arc<TrustStore>, Error> {
        let _guard = self.writer.lock().await;
        self.download_locked().await
    }

    async fn download_locked(&self) -> Result<Arc<TrustStore>, Error> {
        let endpoints = self.source.trust_list_endpoints().ok_or_else(|| {
            Error::TrustFetch(format!("{} trust list has no download location", self.issuer()))
        })?;
        let artifact = self.fetch_artifact(&endpoints).await?;
        self.source.verify_artifact(&artifact)?;
        if self.source.strategy() == TrustStrategy::FlatList {
            log::warn!(
                "{} signing keys are trusted as published, without an anchor signature",
                self.issuer()
            );
        }
        let keys = self.source.parse_keys(&artifact.data)?;
        let store = TrustStore::from_keys(keys);

        if let Err(e) = self.cache.write(self.source.cache_name(), &artifact) {
            log::warn!("Could not cache the {} trust list: {}", self.issuer(), e);
        }

        let store = self.shared.publish(store);
        log::info!(
            "Published {} {} signing keys from {} (generation {}, sha256 {})",
            store.len(),
            self.issuer(),
            endpoints.data_url,
            store.generation(),
            hex::encode(crypto::sha256(&artifact.data))
        );
        Ok(store)
    }

    async fn fetch_artifact(&self, endpoints: &ArtifactEndpoints) -> Result<Artifact, Error> {
        let data = self.fetch(&endpoints.data_url).await?;
        let signature = match &endpoints.signature_url {
            Some(url) => Some(self.fetch(url).await?),
            None => None,
        };
        self.source.unpack_download(data, signature)
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, Error> {
        tokio::time::timeout(self.fetch_timeout, self.fetcher.fetch(url))
            .await
            .map_err(|_| {
                Error::TrustFetch(format!(
                    "Timed out after {:?} fetching {}",
                    self.fetch_timeout, url
                ))
            })?
    }

    /// Replace the trust store with a freshly downloaded one.
    ///
    /// On failure the previous store stays published, the failure is logged
    /// and broadcast to subscribers, and the error is returned.
    pub async fn refresh(&self) -> Result<Arc<TrustStore>, Error> {
        if self.source.trust_list_endpoints().is_none() {
            return Ok(self.current_snapshot());
        }

        let _guard = self.writer.lock().await;
        let state = StateGuard::enter(&self.state, ManagerState::Refreshing);

        match self.download_locked().await {
            Ok(store) => {
                state.finish(ManagerState::Valid);
                Ok(store)
            }
            Err(e) => {
                drop(state);
                let current = self.current_snapshot();
                log::warn!(
                    "Refreshing the {} trust list failed; keeping generation {}: {}",
                    self.issuer(),
                    current.generation(),
                    e
                );
                // No subscribers is fine.
                let _ = self.failures.send(RefreshFailure {
                    issuer: self.issuer(),
                    message: e.to_string(),
                    at: Utc::now(),
                });
                Err(e)
            }
        }
    }

    /// Load business rules from cache or network. Returns the rules in
    /// effect afterwards; a failure keeps the previous rules.
    pub async fn load_rules(&self) -> Option<Arc<BusinessRules>> {
        let _guard = self.writer.lock().await;
        self.load_rules_locked().await
    }

    async fn load_rules_locked(&self) -> Option<Arc<BusinessRules>> {
        let (Some(endpoints), Some(cache_name)) =
            (self.source.rules_endpoints(), self.source.rules_cache_name())
        else {
            return self.business_rules();
        };

        let cached = match self.cache.read(cache_name) {
            Ok(Some(artifact)) => match self.source.verify_rules(&artifact) {
                Ok(()) => Some(artifact),
                Err(e) => {
                    log::warn!("Cached {} rules rejected: {}", self.issuer(), e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                log::warn!("Could not read cached {} rules: {}", self.issuer(), e);
                None
            }
        };

        let artifact = match cached {
            Some(artifact) => artifact,
            None => match self.download_rules(&endpoints, cache_name).await {
                Ok(artifact) => artifact,
                Err(e) => {
                    log::warn!("Could not load {} business rules: {}", self.issuer(), e);
                    return self.business_rules();
                }
            },
        };

        let rules = Arc::new(BusinessRules::from_verified(artifact.data));
        self.rules.store(Some(Arc::clone(&rules)));
        log::info!("Loaded {} business rules", self.issuer());
        Some(rules)
    }

    async fn download_rules(
        &self,
        endpoints: &ArtifactEndpoints,
        cache_name: &str,
    ) -> Result<Artifact, Error> {
        let data = self.fetch(&endpoints.data_url).await?;
        let signature = match &endpoints.signature_url {
            Some(url) => Some(self.fetch(url).await?),
            None => None,
        };
        let artifact = Artifact::new(data, signature);
        self.source.verify_rules(&artifact)?;
        if let Err(e) = self.cache.write(cache_name, &artifact) {
            log::warn!("Could not cache the {} rules: {}", self.issuer(), e);
        }
        Ok(artifact)
    }

    /// Run [`refresh`](Self::refresh) every `interval` until `token` is
    /// cancelled. The first refresh happens one interval after the call.
    pub fn spawn_refresh_task(
        self: &Arc<Self>,
        interval: Duration,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        tokio::select! {
                            _ = token.cancelled() => break,
                            // Failures are logged and broadcast by refresh().
                            _ = manager.refresh() => {}
                        }
                    }
                }
            }
            log::info!("Stopped the {} trust list refresh task", manager.issuer());
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::OfflineFetcher;
    use crate::source::{AustrianTrustList, DutchTrustList, FixedTrustList, GermanTrustList};
    use crate::test_support::{austrian_trust_list, sign_digest, MapFetcher, TestKey};
    use crate::types::cert_list::CertificateList;
    use base64::{engine::general_purpose::STANDARD, Engine};
    use tempfile::TempDir;

    const LIST_URL: &str = "https://trust.test/trustlist";
    const SIG_URL: &str = "https://trust.test/trustlistsig";
    const RULES_URL: &str = "https://trust.test/rules";
    const RULES_SIG_URL: &str = "https://trust.test/rulessig";

    struct Fixture {
        root: TestKey,
        fetcher: Arc<MapFetcher>,
        dir: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                root: TestKey::generate(),
                fetcher: Arc::new(MapFetcher::default()),
                dir: TempDir::new().unwrap(),
            }
        }

        /// Serve a correctly signed trust list with the given DSCs.
        fn serve_list(&self, dscs: &[&TestKey]) -> Vec<u8> {
            let data = austrian_trust_list(dscs);
            self.fetcher.insert(LIST_URL, data.clone());
            self.fetcher.insert(SIG_URL, sign_digest(&self.root, &data));
            data
        }

        fn manager(&self) -> Arc<TrustStoreManager> {
            self.manager_with_timeout(Duration::from_secs(1))
        }

        fn manager_with_timeout(&self, timeout: Duration) -> Arc<TrustStoreManager> {
            let source = AustrianTrustList::new(
                Issuer::At,
                self.root.anchor(Issuer::At),
                "https://trust.test",
            );
            Arc::new(
                TrustStoreManager::new(
                    Arc::new(source),
                    self.fetcher.clone(),
                    ArtifactStore::new(self.dir.path()),
                )
                .with_fetch_timeout(timeout),
            )
        }

        fn cache(&self) -> ArtifactStore {
            ArtifactStore::new(self.dir.path())
        }
    }

    #[tokio::test]
    async fn test_bootstrap_downloads_when_cache_empty() {
        let fx = Fixture::new();
        let dsc = TestKey::generate();
        let data = fx.serve_list(&[&dsc]);
        let manager = fx.manager();
        assert_eq!(manager.state(), ManagerState::Unloaded);

        let store = manager.bootstrap().await.unwrap();
        assert_eq!(manager.state(), ManagerState::Valid);
        assert_eq!(store.generation(), 1);
        assert!(store.contains(dsc.kid().as_bytes()));

        let cached = fx.cache().read("at_trustlist").unwrap().unwrap();
        assert_eq!(cached.data, data);
        assert!(cached.signature.is_some());
    }

    #[tokio::test]
    async fn test_bootstrap_prefers_valid_cache() {
        let fx = Fixture::new();
        let dsc = TestKey::generate();
        fx.serve_list(&[&dsc]);
        fx.manager().bootstrap().await.unwrap();
        let calls = fx.fetcher.calls(LIST_URL);

        let manager = fx.manager();
        let store = manager.bootstrap().await.unwrap();
        assert!(store.contains(dsc.kid().as_bytes()));
        assert_eq!(fx.fetcher.calls(LIST_URL), calls);
    }

    #[tokio::test]
    async fn test_tampered_cache_falls_back_to_network() {
        let fx = Fixture::new();
        let cached_dsc = TestKey::generate();
        let data = austrian_trust_list(&[&cached_dsc]);
        let mut tampered = data.clone();
        let last = tampered.len() - 1;
        tampered[last] ^= 0x01;
        fx.cache()
            .write(
                "at_trustlist",
                &Artifact::signed(tampered, sign_digest(&fx.root, &data)),
            )
            .unwrap();

        let served_dsc = TestKey::generate();
        let served = fx.serve_list(&[&served_dsc]);

        let store = fx.manager().bootstrap().await.unwrap();
        assert!(store.contains(served_dsc.kid().as_bytes()));
        assert!(!store.contains(cached_dsc.kid().as_bytes()));
        assert_eq!(fx.cache().read("at_trustlist").unwrap().unwrap().data, served);
    }

    #[tokio::test]
    async fn test_cache_without_signature_is_a_miss() {
        let fx = Fixture::new();
        let dsc = TestKey::generate();
        fx.cache()
            .write("at_trustlist", &Artifact::unsigned(austrian_trust_list(&[&dsc])))
            .unwrap();
        fx.serve_list(&[&dsc]);

        fx.manager().bootstrap().await.unwrap();
        assert_eq!(fx.fetcher.calls(LIST_URL), 1);
    }

    #[tokio::test]
    async fn test_bootstrap_network_failure_is_fatal() {
        let fx = Fixture::new();
        let manager = fx.manager();

        let err = manager.bootstrap().await.unwrap_err();
        assert!(matches!(err, Error::TrustFetch(_)));
        assert_eq!(manager.state(), ManagerState::Unloaded);
        assert!(manager.current_snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_unauthenticated_download_is_never_adopted() {
        let fx = Fixture::new();
        let attacker = TestKey::generate();
        let data = austrian_trust_list(&[&attacker]);
        fx.fetcher.insert(LIST_URL, data.clone());
        fx.fetcher.insert(SIG_URL, sign_digest(&attacker, &data));

        let manager = fx.manager();
        let err = manager.bootstrap().await.unwrap_err();
        assert!(matches!(err, Error::TrustVerify(_)));
        assert!(manager.current_snapshot().is_empty());
        assert_eq!(fx.cache().read("at_trustlist").unwrap(), None);
    }

    #[tokio::test]
    async fn test_digest_substitution_is_never_adopted() {
        let fx = Fixture::new();
        let good = austrian_trust_list(&[&TestKey::generate()]);
        let evil = austrian_trust_list(&[&TestKey::generate()]);
        fx.fetcher.insert(LIST_URL, evil);
        fx.fetcher.insert(SIG_URL, sign_digest(&fx.root, &good));

        let manager = fx.manager();
        assert!(manager.bootstrap().await.is_err());
        assert!(manager.current_snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_success_publishes_new_generation() {
        let fx = Fixture::new();
        let old = TestKey::generate();
        fx.serve_list(&[&old]);
        let manager = fx.manager();
        manager.bootstrap().await.unwrap();

        let new = TestKey::generate();
        fx.serve_list(&[&new]);
        let store = manager.refresh().await.unwrap();
        assert_eq!(store.generation(), 2);
        assert!(store.contains(new.kid().as_bytes()));
        assert!(!store.contains(old.kid().as_bytes()));
        assert_eq!(manager.state(), ManagerState::Valid);
    }

    #[tokio::test]
    async fn test_refresh_failure_keeps_previous_store() {
        let fx = Fixture::new();
        let dsc = TestKey::generate();
        fx.serve_list(&[&dsc]);
        let manager = fx.manager();
        manager.bootstrap().await.unwrap();
        let mut failures = manager.subscribe_failures();

        fx.fetcher.remove(LIST_URL);
        assert!(manager.refresh().await.is_err());

        let current = manager.current_snapshot();
        assert_eq!(current.generation(), 1);
        assert!(current.contains(dsc.kid().as_bytes()));
        assert_eq!(manager.state(), ManagerState::Valid);

        let failure = failures.recv().await.unwrap();
        assert_eq!(failure.issuer, Issuer::At);
        assert!(failure.message.contains(LIST_URL));
    }

    #[tokio::test]
    async fn test_refresh_with_bad_signature_keeps_previous_store() {
        let fx = Fixture::new();
        let dsc = TestKey::generate();
        fx.serve_list(&[&dsc]);
        let manager = fx.manager();
        manager.bootstrap().await.unwrap();

        let attacker = TestKey::generate();
        let data = austrian_trust_list(&[&attacker]);
        fx.fetcher.insert(LIST_URL, data.clone());
        fx.fetcher.insert(SIG_URL, sign_digest(&attacker, &data));

        assert!(matches!(
            manager.refresh().await,
            Err(Error::TrustVerify(_))
        ));
        assert!(manager.current_snapshot().contains(dsc.kid().as_bytes()));
        assert!(!manager.current_snapshot().contains(attacker.kid().as_bytes()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_timeout_is_fatal_at_bootstrap() {
        let fx = Fixture::new();
        fx.serve_list(&[&TestKey::generate()]);
        fx.fetcher.set_delay(Duration::from_secs(60));

        let err = fx.manager().bootstrap().await.unwrap_err();
        assert!(matches!(err, Error::TrustFetch(ref m) if m.contains("Timed out")));
    }

    #[tokio::test]
    async fn test_fixed_source_needs_no_network() {
        let dir = TempDir::new().unwrap();
        let manager = TrustStoreManager::new(
            Arc::new(FixedTrustList::at_test_dsc().unwrap()),
            Arc::new(OfflineFetcher),
            ArtifactStore::new(dir.path()),
        );

        let store = manager.bootstrap().await.unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(manager.refresh().await.unwrap().generation(), 1);
        assert!(manager.business_rules().is_none());
    }

    #[tokio::test]
    async fn test_rules_are_loaded_after_bootstrap() {
        let fx = Fixture::new();
        fx.serve_list(&[&TestKey::generate()]);
        let rules = b"\xa1\x61r\x80".to_vec();
        fx.fetcher.insert(RULES_URL, rules.clone());
        fx.fetcher.insert(RULES_SIG_URL, sign_digest(&fx.root, &rules));

        let manager = fx.manager();
        manager.bootstrap().await.unwrap();
        assert_eq!(manager.business_rules().unwrap().raw(), rules.as_slice());
        assert!(fx.cache().read("at_rules").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unverified_rules_are_not_adopted() {
        let fx = Fixture::new();
        fx.serve_list(&[&TestKey::generate()]);
        let attacker = TestKey::generate();
        fx.fetcher.insert(RULES_URL, b"\xa0".to_vec());
        fx.fetcher.insert(RULES_SIG_URL, sign_digest(&attacker, b"\xa0"));

        let manager = fx.manager();
        manager.bootstrap().await.unwrap();
        assert!(manager.business_rules().is_none());
        assert!(manager.load_rules().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_task_runs_until_cancelled() {
        let fx = Fixture::new();
        fx.serve_list(&[&TestKey::generate()]);
        let manager = fx.manager();
        manager.bootstrap().await.unwrap();
        let calls = fx.fetcher.calls(LIST_URL);

        let token = CancellationToken::new();
        let handle = manager.spawn_refresh_task(Duration::from_secs(3600), token.clone());

        tokio::time::sleep(Duration::from_secs(3600 * 2 + 60)).await;
        assert_eq!(fx.fetcher.calls(LIST_URL), calls + 2);
        assert_eq!(manager.current_snapshot().generation(), 3);

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_refresh_task_restores_state() {
        let fx = Fixture::new();
        let dsc = TestKey::generate();
        fx.serve_list(&[&dsc]);
        let manager = fx.manager_with_timeout(Duration::from_secs(3600));
        manager.bootstrap().await.unwrap();

        fx.fetcher.set_delay(Duration::from_secs(600));
        let token = CancellationToken::new();
        let handle = manager.spawn_refresh_task(Duration::from_secs(60), token.clone());

        tokio::time::sleep(Duration::from_secs(90)).await;
        assert_eq!(manager.state(), ManagerState::Refreshing);

        token.cancel();
        handle.await.unwrap();
        assert_eq!(manager.state(), ManagerState::Valid);
        assert_eq!(manager.current_snapshot().generation(), 1);
        assert!(manager.current_snapshot().contains(dsc.kid().as_bytes()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_refresh_restores_state() {
        let fx = Fixture::new();
        fx.serve_list(&[&TestKey::generate()]);
        let manager = fx.manager_with_timeout(Duration::from_secs(3600));
        manager.bootstrap().await.unwrap();

        fx.fetcher.set_delay(Duration::from_secs(600));
        let abandoned = tokio::time::timeout(Duration::from_secs(10), manager.refresh()).await;
        assert!(abandoned.is_err());
        assert_eq!(manager.state(), ManagerState::Valid);

        // The writer lock was released with the dropped future.
        fx.fetcher.set_delay(Duration::ZERO);
        assert_eq!(manager.refresh().await.unwrap().generation(), 2);
    }

    #[tokio::test]
    async fn test_german_list_round_trips_through_cache() {
        const DE_URL: &str = "https://trust.test/de/DSC/";
        let root = TestKey::generate();
        let dsc = TestKey::generate();
        let dir = TempDir::new().unwrap();
        let fetcher = Arc::new(MapFetcher::default());

        let json = serde_json::to_vec(&CertificateList {
            certificates: vec![dsc.certificate_entry()],
        })
        .unwrap();
        let mut body = STANDARD.encode(root.sign_raw(&json)).into_bytes();
        body.push(b'\n');
        body.extend_from_slice(&json);
        fetcher.insert(DE_URL, body);

        let manager = |fetcher: Arc<MapFetcher>| {
            TrustStoreManager::new(
                Arc::new(GermanTrustList::new(root.anchor(Issuer::De)).with_url(DE_URL)),
                fetcher,
                ArtifactStore::new(dir.path()),
            )
        };

        let store = manager(fetcher.clone()).bootstrap().await.unwrap();
        assert!(store.contains(dsc.kid().as_bytes()));
        let cached = ArtifactStore::new(dir.path()).read("de.json").unwrap().unwrap();
        assert_eq!(cached.data, json);
        assert!(cached.signature.is_some());

        // Reload from cache with the network gone.
        fetcher.remove(DE_URL);
        let reloaded = manager(fetcher.clone()).bootstrap().await.unwrap();
        assert!(reloaded.contains(dsc.kid().as_bytes()));
        assert_eq!(fetcher.calls(DE_URL), 1);

        // A tampered cache is rejected by the anchor and not adopted.
        let mut tampered = json.clone();
        tampered.extend_from_slice(b" ");
        ArtifactStore::new(dir.path())
            .write("de.json", &Artifact::new(tampered, cached.signature.clone()))
            .unwrap();
        let offline = manager(fetcher.clone());
        assert!(matches!(offline.bootstrap().await, Err(Error::TrustFetch(_))));
        assert!(offline.current_snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_dutch_list_round_trips_through_cache() {
        const NL_URL: &str = "https://trust.test/nl/public_keys";
        let dsc = TestKey::generate();
        let dir = TempDir::new().unwrap();
        let fetcher = Arc::new(MapFetcher::default());

        let payload = serde_json::json!({"certificates": [dsc.certificate_entry()]});
        let envelope = serde_json::json!({
            "payload": STANDARD.encode(payload.to_string()),
            "signature": STANDARD.encode(b"pkcs7"),
        });
        fetcher.insert(NL_URL, envelope.to_string().into_bytes());

        let manager = |fetcher: Arc<MapFetcher>| {
            TrustStoreManager::new(
                Arc::new(DutchTrustList::new().with_url(NL_URL)),
                fetcher,
                ArtifactStore::new(dir.path()),
            )
        };

        let first = manager(fetcher.clone());
        let store = first.bootstrap().await.unwrap();
        assert!(store.contains(dsc.kid().as_bytes()));
        assert_eq!(first.state(), ManagerState::Valid);
        let cached = ArtifactStore::new(dir.path()).read("nl.json").unwrap().unwrap();
        assert_eq!(cached.data, payload.to_string().into_bytes());

        fetcher.remove(NL_URL);
        let reloaded = manager(fetcher.clone()).bootstrap().await.unwrap();
        assert!(reloaded.contains(dsc.kid().as_bytes()));
        assert_eq!(fetcher.calls(NL_URL), 1);
    }
}
