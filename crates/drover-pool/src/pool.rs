//! Offer pool: the live, score-ordered set of usable offers.
//!
//! The pool owns three background workers under one shutdown signal:
//!
//! - **ingest**: drains offer batches from a bounded queue, validates,
//!   scores, and enriches them, then inserts each batch under a single
//!   write-lock acquisition
//! - **expiry**: on a fixed tick, invalidates offers past their life period
//!   and purges (and declines) them once the decline grace has passed
//! - **decline**: hands offer ids back to the resource manager, one RPC per
//!   offer, logging failures without retry
//!
//! Readers take the list lock shared and get [`Offer`] copies; claiming an
//! offer with [`OfferPool::use_offer`] takes it exclusively. The lost-slave
//! registry sits behind its own lock so host-loss events do not contend
//! with offer reads.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use tokio::sync::{Mutex, RwLock, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use drover_core::{
    AgentInfo, AgentSchedInfo, ClientError, ClientResult, DroverConfig, OfferResources,
    PluginConfig, PoolConfig, ResourceOffer, SchedulerClient, Store,
};

use crate::enrich::{apply_agent_setting, apply_external_attributes, fetch_external_attributes};
use crate::error::{PoolError, PoolResult};
use crate::list::{Offer, OfferEntry, OfferList};
use crate::lost::LostSlaves;

/// An incoming offer after the lock-free preparation steps.
enum Staged {
    Ready(Prepared),
    Rejected { offer_id: String, hostname: String },
}

struct Prepared {
    offer: ResourceOffer,
    ip: String,
    point: f64,
    delta: AgentSchedInfo,
}

impl Staged {
    fn rejected(offer: &ResourceOffer) -> Self {
        Staged::Rejected {
            offer_id: offer.id.clone(),
            hostname: offer.hostname.clone(),
        }
    }

    fn identity(&self) -> (&str, &str) {
        match self {
            Staged::Ready(p) => (&p.offer.id, &p.offer.hostname),
            Staged::Rejected { offer_id, hostname } => (offer_id, hostname),
        }
    }
}

/// State shared between the pool handle and its workers.
pub(crate) struct PoolShared {
    config: PoolConfig,
    plugin: PluginConfig,
    offers: RwLock<OfferList>,
    lost_slaves: Mutex<LostSlaves>,
    next_id: AtomicI64,
    decline_tx: mpsc::Sender<String>,
    client: Arc<dyn SchedulerClient>,
    store: Arc<dyn Store>,
}

impl PoolShared {
    fn new(
        config: &DroverConfig,
        client: Arc<dyn SchedulerClient>,
        store: Arc<dyn Store>,
        decline_tx: mpsc::Sender<String>,
    ) -> Self {
        Self {
            config: config.pool.clone(),
            plugin: config.plugin.clone(),
            offers: RwLock::new(OfferList::default()),
            lost_slaves: Mutex::new(LostSlaves::new(config.pool.lost_slave_grace_period())),
            next_id: AtomicI64::new(1),
            decline_tx,
            client,
            store,
        }
    }

    /// Process one batch: prepare every offer, then insert under one lock.
    pub(crate) async fn ingest(&self, batch: Vec<ResourceOffer>) {
        let mut staged = Vec::with_capacity(batch.len());
        for offer in batch {
            staged.push(self.prepare(offer).await);
        }

        let ips: Vec<String> = staged
            .iter()
            .filter_map(|s| match s {
                Staged::Ready(p) => Some(p.ip.clone()),
                Staged::Rejected { .. } => None,
            })
            .collect();
        let external = fetch_external_attributes(&self.client, &self.plugin, &ips).await;

        let mut ready = Vec::with_capacity(staged.len());
        for s in staged {
            let s = match s {
                Staged::Ready(mut p) => {
                    apply_external_attributes(
                        &mut p.offer,
                        &p.ip,
                        &external,
                        &self.plugin.default_attributes,
                    );
                    match self.fetch_delta(&p.offer.hostname).await {
                        Ok(delta) => {
                            p.delta = delta;
                            Staged::Ready(p)
                        }
                        Err(e) => {
                            warn!(offer_id = %p.offer.id, hostname = %p.offer.hostname, error = %e, "failed to fetch agent sched info, declining offer");
                            Staged::rejected(&p.offer)
                        }
                    }
                }
                rejected => rejected,
            };
            ready.push(s);
        }

        let declines = self.commit(ready).await;
        self.decline_all(declines).await;
    }

    /// Validate, score, and apply internal attributes to one offer.
    async fn prepare(&self, mut offer: ResourceOffer) -> Staged {
        let resources = offer.resources();
        if resources.cpu <= self.config.min_offer_cpu {
            debug!(offer_id = %offer.id, hostname = %offer.hostname, cpu = resources.cpu, "offer below cpu floor, declining");
            return Staged::rejected(&offer);
        }

        if !self
            .lost_slaves
            .lock()
            .await
            .admit(&offer.hostname, Instant::now())
        {
            info!(offer_id = %offer.id, hostname = %offer.hostname, "host is within lost-slave grace, declining offer");
            return Staged::rejected(&offer);
        }

        let Some(ip) = offer.inner_ip().map(str::to_string) else {
            warn!(offer_id = %offer.id, hostname = %offer.hostname, "offer has no InnerIP attribute, declining");
            return Staged::rejected(&offer);
        };

        let setting = match self.store.fetch_agent_setting(&ip) {
            Ok(setting) => setting,
            Err(e) => {
                warn!(offer_id = %offer.id, %ip, error = %e, "failed to fetch agent setting, declining offer");
                return Staged::rejected(&offer);
            }
        };
        if setting.as_ref().is_some_and(|s| s.disabled) {
            info!(offer_id = %offer.id, %ip, "agent is disabled, declining offer");
            return Staged::rejected(&offer);
        }

        let agent = match self.store.fetch_agent(&ip) {
            Ok(agent) => agent,
            Err(e) => {
                warn!(offer_id = %offer.id, %ip, error = %e, "agent lookup failed, requesting agent refresh");
                self.client.update_mesos_agents();
                return Staged::rejected(&offer);
            }
        };
        let point = score(&resources, &agent);

        if let Some(setting) = &setting {
            apply_agent_setting(&mut offer, setting, self.store.as_ref());
        }

        Staged::Ready(Prepared {
            offer,
            ip,
            point,
            delta: AgentSchedInfo::default(),
        })
    }

    async fn fetch_delta(&self, hostname: &str) -> ClientResult<AgentSchedInfo> {
        match self.client.fetch_agent_sched_info(hostname).await {
            Ok(Some(info)) => Ok(info),
            Ok(None) | Err(ClientError::NotFound(_)) => Ok(AgentSchedInfo::default()),
            Err(e) => Err(e),
        }
    }

    /// Insert a prepared batch. Returns the offer ids to decline.
    ///
    /// Lock order is offers then lost slaves, matching
    /// [`OfferPool::add_lost_slave`].
    async fn commit(&self, staged: Vec<Staged>) -> Vec<String> {
        let mut declines = Vec::new();
        let mut offers = self.offers.write().await;
        let mut lost = self.lost_slaves.lock().await;
        let now = Instant::now();

        for s in staged {
            let (offer_id, hostname) = s.identity();
            if offers.has_host(hostname) {
                let old = offers.take_host(hostname);
                warn!(%offer_id, %hostname, replaced = old.len(), "host already has an offer, declining old and new");
                declines.extend(old.into_iter().map(|e| e.offer_id));
                declines.push(offer_id.to_string());
                continue;
            }

            match s {
                Staged::Rejected { offer_id, .. } => declines.push(offer_id),
                // The host may have been lost while this offer was being enriched.
                Staged::Ready(p) if !lost.admit(&p.offer.hostname, now) => {
                    info!(offer_id = %p.offer.id, hostname = %p.offer.hostname, "host lost during ingestion, declining offer");
                    declines.push(p.offer.id);
                }
                Staged::Ready(p) => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    debug!(id, offer_id = %p.offer.id, hostname = %p.offer.hostname, ip = %p.ip, point = p.point, "offer added to pool");
                    offers.insert(OfferEntry {
                        id,
                        offer_id: p.offer.id.clone(),
                        hostname: p.offer.hostname.clone(),
                        ip: p.ip,
                        is_valid: true,
                        created_at: now,
                        delta_cpu: p.delta.delta_cpu,
                        delta_mem: p.delta.delta_mem,
                        delta_disk: p.delta.delta_disk,
                        point: p.point,
                        offer: Arc::new(p.offer),
                    });
                }
            }
        }
        declines
    }

    /// Run one expiry pass at `now`.
    pub(crate) async fn expire(&self, now: Instant) {
        let purged = {
            let mut offers = self.offers.write().await;
            offers.sweep(
                now,
                self.config.offer_life_period(),
                self.config.decline_grace_period(),
            )
        };
        if purged.is_empty() {
            return;
        }
        for entry in &purged {
            info!(offer_id = %entry.offer_id, hostname = %entry.hostname, ip = %entry.ip, "offer expired, declining");
        }
        self.decline_all(purged.into_iter().map(|e| e.offer_id).collect())
            .await;
    }

    async fn decline_all(&self, offer_ids: Vec<String>) {
        for offer_id in offer_ids {
            if self.decline_tx.send(offer_id).await.is_err() {
                debug!("decline worker stopped, dropping remaining declines");
                return;
            }
        }
    }
}

/// `offered_cpu / total_cpu + offered_mem / total_mem` for the agent.
fn score(resources: &OfferResources, agent: &AgentInfo) -> f64 {
    let cpu = if agent.cpu_total > 0.0 {
        resources.cpu / agent.cpu_total
    } else {
        0.0
    };
    let mem = if agent.mem_total > 0.0 {
        resources.mem / agent.mem_total
    } else {
        0.0
    };
    cpu + mem
}

/// Handle to a running offer pool.
pub struct OfferPool {
    shared: Arc<PoolShared>,
    ingest_tx: mpsc::Sender<Vec<ResourceOffer>>,
    shutdown_tx: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl OfferPool {
    /// Create the pool and spawn its ingest, expiry, and decline workers.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start(
        config: &DroverConfig,
        client: Arc<dyn SchedulerClient>,
        store: Arc<dyn Store>,
    ) -> Self {
        let (decline_tx, decline_rx) = mpsc::channel(config.pool.decline_queue_capacity.max(1));
        let (ingest_tx, ingest_rx) = mpsc::channel(config.pool.ingest_queue_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shared = Arc::new(PoolShared::new(config, Arc::clone(&client), store, decline_tx));

        let workers = vec![
            tokio::spawn(run_ingest_loop(
                Arc::clone(&shared),
                ingest_rx,
                shutdown_rx.clone(),
            )),
            tokio::spawn(run_expiry_loop(Arc::clone(&shared), shutdown_rx.clone())),
            tokio::spawn(run_decline_loop(client, decline_rx, shutdown_rx)),
        ];

        info!(
            offer_life = ?config.pool.offer_life_period(),
            decline_grace = ?config.pool.decline_grace_period(),
            "offer pool started"
        );

        Self {
            shared,
            ingest_tx,
            shutdown_tx,
            workers: Mutex::new(workers),
        }
    }

    /// Queue a batch of offers for ingestion.
    ///
    /// Waits only when the ingest queue is full.
    pub async fn add_offers(&self, offers: Vec<ResourceOffer>) -> PoolResult<()> {
        debug!(count = offers.len(), "offers queued for ingestion");
        self.ingest_tx
            .send(offers)
            .await
            .map_err(|_| PoolError::Closed)
    }

    pub async fn get_first_offer(&self) -> Option<Offer> {
        self.shared.offers.read().await.first_valid()
    }

    /// The valid offer after `current`, or the first one if `current` is gone.
    pub async fn get_next_offer(&self, current: &Offer) -> Option<Offer> {
        self.shared.offers.read().await.next_valid(current.id)
    }

    pub async fn get_all_offers(&self) -> Vec<Offer> {
        self.shared.offers.read().await.all_valid()
    }

    /// Claim an offer. `false` means it was taken, expired, or invalidated.
    pub async fn use_offer(&self, offer: &Offer) -> bool {
        let taken = self
            .shared
            .offers
            .write()
            .await
            .take_valid(&offer.offer_id);
        match taken {
            Some(entry) => {
                debug!(offer_id = %entry.offer_id, hostname = %entry.hostname, "offer used");
                true
            }
            None => {
                debug!(offer_id = %offer.offer_id, "offer no longer available");
                false
            }
        }
    }

    /// Mark a host lost and decline all of its current offers.
    pub async fn add_lost_slave(&self, hostname: &str) {
        let removed = {
            let mut offers = self.shared.offers.write().await;
            self.shared.lost_slaves.lock().await.mark(hostname);
            offers.take_host(hostname)
        };
        info!(%hostname, removed = removed.len(), "slave lost, offers removed");
        self.shared
            .decline_all(removed.into_iter().map(|e| e.offer_id).collect())
            .await;
    }

    /// Offers currently held, including expired ones awaiting decline.
    pub async fn offer_count(&self) -> usize {
        self.shared.offers.read().await.len()
    }

    pub async fn lost_slave_count(&self) -> usize {
        self.shared.lost_slaves.lock().await.len()
    }

    /// Signal the workers to exit and wait for all of them.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        let workers = std::mem::take(&mut *self.workers.lock().await);
        for handle in workers {
            if let Err(e) = handle.await {
                warn!(error = %e, "offer pool worker failed");
            }
        }
        info!("offer pool stopped");
    }
}

async fn run_ingest_loop(
    shared: Arc<PoolShared>,
    mut batches: mpsc::Receiver<Vec<ResourceOffer>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            batch = batches.recv() => match batch {
                Some(batch) => shared.ingest(batch).await,
                None => break,
            },
            _ = shutdown.changed() => break,
        }
    }
    debug!("ingest worker exiting");
}

async fn run_expiry_loop(shared: Arc<PoolShared>, mut shutdown: watch::Receiver<bool>) {
    let mut tick = tokio::time::interval(shared.config.expiry_tick());
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = tick.tick() => shared.expire(Instant::now()).await,
            _ = shutdown.changed() => break,
        }
    }
    debug!("expiry worker exiting");
}

async fn run_decline_loop(
    client: Arc<dyn SchedulerClient>,
    mut declines: mpsc::Receiver<String>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            offer_id = declines.recv() => {
                let Some(offer_id) = offer_id else { break };
                match client.decline_resource(&offer_id).await {
                    Ok(()) => debug!(%offer_id, "offer declined"),
                    Err(e) => warn!(%offer_id, error = %e, "failed to decline offer"),
                }
            }
            _ = shutdown.changed() => break,
        }
    }
    debug!("decline worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use drover_core::{AgentSetting, Attribute, BoxFuture, HostAttributes, Resource};
    use drover_state::StateStore;

    #[derive(Default, Clone, Copy, PartialEq)]
    enum PluginMode {
        #[default]
        Ok,
        Fail,
        Hang,
    }

    #[derive(Default)]
    struct FakeClient {
        declined: std::sync::Mutex<Vec<String>>,
        host_attributes: HashMap<String, HostAttributes>,
        plugin: PluginMode,
        sched_info: HashMap<String, AgentSchedInfo>,
        sched_failures: Vec<String>,
        agent_refreshes: AtomicUsize,
    }

    impl FakeClient {
        fn declined(&self) -> Vec<String> {
            self.declined.lock().unwrap().clone()
        }
    }

    impl SchedulerClient for FakeClient {
        fn decline_resource<'a>(&'a self, offer_id: &'a str) -> BoxFuture<'a, ClientResult<()>> {
            Box::pin(async move {
                self.declined.lock().unwrap().push(offer_id.to_string());
                Ok(())
            })
        }

        fn get_host_attributes<'a>(
            &'a self,
            _ips: &'a [String],
            _cluster_id: &'a str,
        ) -> BoxFuture<'a, ClientResult<HashMap<String, HostAttributes>>> {
            Box::pin(async move {
                match self.plugin {
                    PluginMode::Ok => Ok(self.host_attributes.clone()),
                    PluginMode::Fail => Err(ClientError::Rpc("plugin unavailable".to_string())),
                    PluginMode::Hang => {
                        tokio::time::sleep(Duration::from_secs(3600)).await;
                        Ok(HashMap::new())
                    }
                }
            })
        }

        fn fetch_agent_sched_info<'a>(
            &'a self,
            hostname: &'a str,
        ) -> BoxFuture<'a, ClientResult<Option<AgentSchedInfo>>> {
            Box::pin(async move {
                if self.sched_failures.iter().any(|h| h == hostname) {
                    return Err(ClientError::Rpc("store unavailable".to_string()));
                }
                match self.sched_info.get(hostname) {
                    Some(info) => Ok(Some(info.clone())),
                    None => Err(ClientError::NotFound(hostname.to_string())),
                }
            })
        }

        fn cluster_id(&self) -> String {
            "cluster-test".to_string()
        }

        fn update_mesos_agents(&self) {
            self.agent_refreshes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn make_offer(offer_id: &str, host: &str, ip: &str, cpu: f64, mem: f64) -> ResourceOffer {
        ResourceOffer {
            id: offer_id.to_string(),
            agent_id: format!("agent-{host}"),
            hostname: host.to_string(),
            resources: vec![Resource::scalar("cpus", cpu), Resource::scalar("mem", mem)],
            attributes: vec![Attribute::text("InnerIP", ip)],
        }
    }

    fn seed_agent(store: &StateStore, ip: &str, host: &str, cpu_total: f64, mem_total: f64) {
        store
            .put_agent(&AgentInfo {
                ip: ip.to_string(),
                hostname: host.to_string(),
                cpu_total,
                mem_total,
                disk_total: 100_000.0,
            })
            .unwrap();
    }

    fn seeded_store(hosts: usize) -> StateStore {
        let store = StateStore::open_in_memory().unwrap();
        for i in 0..hosts {
            seed_agent(&store, &format!("10.0.0.{i}"), &format!("host-{i}"), 10.0, 1000.0);
        }
        store
    }

    /// A pool without workers; the test owns the decline queue.
    fn idle_pool(
        config: DroverConfig,
        client: Arc<FakeClient>,
        store: StateStore,
    ) -> (OfferPool, mpsc::Receiver<String>) {
        let (decline_tx, decline_rx) = mpsc::channel(64);
        let (ingest_tx, _) = mpsc::channel(1);
        let (shutdown_tx, _) = watch::channel(false);
        let shared = PoolShared::new(&config, client, Arc::new(store), decline_tx);
        let pool = OfferPool {
            shared: Arc::new(shared),
            ingest_tx,
            shutdown_tx,
            workers: Mutex::new(Vec::new()),
        };
        (pool, decline_rx)
    }

    fn drain(rx: &mut mpsc::Receiver<String>) -> Vec<String> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    #[tokio::test]
    async fn first_offer_has_the_highest_point() {
        let client = Arc::new(FakeClient::default());
        let (pool, _declines) = idle_pool(DroverConfig::default(), client, seeded_store(2));

        pool.shared
            .ingest(vec![
                make_offer("small", "host-0", "10.0.0.0", 1.0, 0.0),
                make_offer("big", "host-1", "10.0.0.1", 10.0, 0.0),
            ])
            .await;

        let first = pool.get_first_offer().await.unwrap();
        assert_eq!(first.offer_id, "big");
        let second = pool.get_next_offer(&first).await.unwrap();
        assert_eq!(second.offer_id, "small");
        assert!(pool.get_next_offer(&second).await.is_none());
    }

    #[test]
    fn score_is_relative_to_agent_capacity() {
        let agent = AgentInfo {
            ip: "10.0.0.0".to_string(),
            hostname: "host-0".to_string(),
            cpu_total: 10.0,
            mem_total: 1000.0,
            disk_total: 0.0,
        };
        let full = OfferResources { cpu: 10.0, ..OfferResources::default() };
        let tenth = OfferResources { cpu: 1.0, ..OfferResources::default() };
        assert!((score(&full, &agent) - 1.0).abs() < 1e-9);
        assert!((score(&tenth, &agent) - 0.1).abs() < 1e-9);

        let mixed = OfferResources { cpu: 5.0, mem: 500.0, ..OfferResources::default() };
        assert!((score(&mixed, &agent) - 1.0).abs() < 1e-9);

        let empty_agent = AgentInfo { cpu_total: 0.0, mem_total: 0.0, ..agent };
        assert_eq!(score(&full, &empty_agent), 0.0);
    }

    #[tokio::test]
    async fn traversal_is_descending_by_point_and_idempotent() {
        let client = Arc::new(FakeClient::default());
        let (pool, _declines) = idle_pool(DroverConfig::default(), client, seeded_store(6));

        let cpus = [3.0, 9.0, 1.0, 5.0, 7.0, 2.0];
        let batch = cpus
            .iter()
            .enumerate()
            .map(|(i, cpu)| make_offer(&format!("o{i}"), &format!("host-{i}"), &format!("10.0.0.{i}"), *cpu, 100.0))
            .collect();
        pool.shared.ingest(batch).await;

        let all = pool.get_all_offers().await;
        let cpus_in_order: Vec<f64> = all.iter().map(|o| o.offer.resources().cpu).collect();
        assert_eq!(cpus_in_order, vec![9.0, 7.0, 5.0, 3.0, 2.0, 1.0]);

        let again: Vec<i64> = pool.get_all_offers().await.iter().map(|o| o.id).collect();
        assert_eq!(again, all.iter().map(|o| o.id).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn use_offer_succeeds_exactly_once() {
        let client = Arc::new(FakeClient::default());
        let (pool, mut declines) = idle_pool(DroverConfig::default(), client, seeded_store(1));
        pool.shared
            .ingest(vec![make_offer("o1", "host-0", "10.0.0.0", 4.0, 100.0)])
            .await;
        let pool = Arc::new(pool);
        let offer = pool.get_first_offer().await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = Arc::clone(&pool);
            let offer = offer.clone();
            handles.push(tokio::spawn(async move { pool.use_offer(&offer).await }));
        }
        let mut wins = 0;
        for handle in handles {
            if handle.await.unwrap() {
                wins += 1;
            }
        }

        assert_eq!(wins, 1);
        assert!(!pool.use_offer(&offer).await);
        assert_eq!(pool.offer_count().await, 0);
        // Used offers are never declined.
        assert!(drain(&mut declines).is_empty());
    }

    #[tokio::test]
    async fn stale_handle_restarts_from_the_front() {
        let client = Arc::new(FakeClient::default());
        let (pool, _declines) = idle_pool(DroverConfig::default(), client, seeded_store(3));
        pool.shared
            .ingest(vec![
                make_offer("a", "host-0", "10.0.0.0", 9.0, 0.0),
                make_offer("b", "host-1", "10.0.0.1", 5.0, 0.0),
                make_offer("c", "host-2", "10.0.0.2", 1.0, 0.0),
            ])
            .await;

        let b = pool.get_next_offer(&pool.get_first_offer().await.unwrap()).await.unwrap();
        assert_eq!(b.offer_id, "b");
        assert!(pool.use_offer(&b).await);

        let next = pool.get_next_offer(&b).await.unwrap();
        assert_eq!(next.offer_id, "a");
    }

    #[tokio::test]
    async fn duplicate_host_declines_old_and_new_offers() {
        let client = Arc::new(FakeClient::default());
        let (pool, mut declines) = idle_pool(DroverConfig::default(), client, seeded_store(1));

        pool.shared
            .ingest(vec![make_offer("old", "host-0", "10.0.0.0", 4.0, 100.0)])
            .await;
        pool.shared
            .ingest(vec![make_offer("new", "host-0", "10.0.0.0", 6.0, 100.0)])
            .await;

        assert_eq!(pool.offer_count().await, 0);
        assert_eq!(drain(&mut declines), vec!["old", "new"]);
    }

    #[tokio::test]
    async fn validation_failures_are_declined() {
        let client = Arc::new(FakeClient::default());
        let store = seeded_store(3);
        store
            .put_agent_setting(&AgentSetting {
                inner_ip: "10.0.0.1".to_string(),
                disabled: true,
                ..AgentSetting::default()
            })
            .unwrap();
        let (pool, mut declines) = idle_pool(DroverConfig::default(), client, store);

        let mut no_ip = make_offer("no-ip", "host-2", "10.0.0.2", 4.0, 100.0);
        no_ip.attributes.clear();
        pool.shared
            .ingest(vec![
                make_offer("tiny", "host-0", "10.0.0.0", 0.05, 100.0),
                make_offer("disabled", "host-1", "10.0.0.1", 4.0, 100.0),
                no_ip,
            ])
            .await;

        assert_eq!(pool.offer_count().await, 0);
        assert_eq!(drain(&mut declines), vec!["tiny", "disabled", "no-ip"]);
    }

    #[tokio::test]
    async fn unknown_agent_triggers_refresh_and_decline() {
        let client = Arc::new(FakeClient::default());
        let (pool, mut declines) = idle_pool(DroverConfig::default(), Arc::clone(&client), seeded_store(0));

        pool.shared
            .ingest(vec![make_offer("o1", "host-9", "10.0.0.9", 4.0, 100.0)])
            .await;

        assert_eq!(pool.offer_count().await, 0);
        assert_eq!(drain(&mut declines), vec!["o1"]);
        assert_eq!(client.agent_refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sched_info_not_found_defaults_to_zero_but_errors_decline() {
        let client = Arc::new(FakeClient {
            sched_info: HashMap::from([(
                "host-0".to_string(),
                AgentSchedInfo {
                    hostname: "host-0".to_string(),
                    delta_cpu: 0.5,
                    delta_mem: 64.0,
                    delta_disk: 0.0,
                },
            )]),
            sched_failures: vec!["host-2".to_string()],
            ..FakeClient::default()
        });
        let (pool, mut declines) = idle_pool(DroverConfig::default(), client, seeded_store(3));

        pool.shared
            .ingest(vec![
                make_offer("with-delta", "host-0", "10.0.0.0", 8.0, 100.0),
                make_offer("no-delta", "host-1", "10.0.0.1", 4.0, 100.0),
                make_offer("broken", "host-2", "10.0.0.2", 2.0, 100.0),
            ])
            .await;

        let all = pool.get_all_offers().await;
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].delta_cpu, 0.5);
        assert_eq!(all[0].delta_mem, 64.0);
        assert_eq!(all[1].delta_cpu, 0.0);
        assert_eq!(drain(&mut declines), vec!["broken"]);
    }

    #[tokio::test]
    async fn plugin_failure_applies_default_attributes() {
        let client = Arc::new(FakeClient {
            plugin: PluginMode::Fail,
            ..FakeClient::default()
        });
        let mut config = DroverConfig::default();
        config.plugin.default_attributes = vec![Attribute::text("netflow", "unknown")];
        let (pool, _declines) = idle_pool(config, client, seeded_store(1));

        pool.shared
            .ingest(vec![make_offer("o1", "host-0", "10.0.0.0", 4.0, 100.0)])
            .await;

        let offer = pool.get_first_offer().await.unwrap();
        assert_eq!(
            offer.offer.attribute("netflow").unwrap().value.as_text(),
            Some("unknown")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn plugin_timeout_does_not_block_ingestion() {
        let client = Arc::new(FakeClient {
            plugin: PluginMode::Hang,
            ..FakeClient::default()
        });
        let mut config = DroverConfig::default();
        config.plugin.default_attributes = vec![Attribute::text("netflow", "unknown")];
        let (pool, _declines) = idle_pool(config, client, seeded_store(1));

        let started = Instant::now();
        pool.shared
            .ingest(vec![make_offer("o1", "host-0", "10.0.0.0", 4.0, 100.0)])
            .await;

        assert!(started.elapsed() < Duration::from_secs(6));
        let offer = pool.get_first_offer().await.unwrap();
        assert!(offer.offer.attribute("netflow").is_some());
    }

    #[tokio::test]
    async fn plugin_attributes_are_merged_by_ip() {
        let client = Arc::new(FakeClient {
            host_attributes: HashMap::from([(
                "10.0.0.0".to_string(),
                HostAttributes {
                    attributes: vec![Attribute::text("rack", "r7")],
                },
            )]),
            ..FakeClient::default()
        });
        let (pool, _declines) = idle_pool(DroverConfig::default(), client, seeded_store(1));

        pool.shared
            .ingest(vec![make_offer("o1", "host-0", "10.0.0.0", 4.0, 100.0)])
            .await;

        let offer = pool.get_first_offer().await.unwrap();
        assert_eq!(offer.offer.attribute("rack").unwrap().value.as_text(), Some("r7"));
    }

    #[tokio::test(start_paused = true)]
    async fn lost_slave_refuses_offers_until_grace_elapses() {
        let client = Arc::new(FakeClient::default());
        let mut config = DroverConfig::default();
        config.pool.lost_slave_grace_period_secs = 30;
        let (pool, mut declines) = idle_pool(config, client, seeded_store(2));

        pool.shared
            .ingest(vec![
                make_offer("o1", "host-0", "10.0.0.0", 4.0, 100.0),
                make_offer("o2", "host-1", "10.0.0.1", 4.0, 100.0),
            ])
            .await;
        pool.add_lost_slave("host-0").await;

        assert_eq!(pool.offer_count().await, 1);
        assert_eq!(pool.lost_slave_count().await, 1);
        assert_eq!(drain(&mut declines), vec!["o1"]);

        pool.shared
            .ingest(vec![make_offer("o3", "host-0", "10.0.0.0", 4.0, 100.0)])
            .await;
        assert_eq!(drain(&mut declines), vec!["o3"]);

        tokio::time::advance(Duration::from_secs(20)).await;
        pool.shared
            .ingest(vec![make_offer("o4", "host-0", "10.0.0.0", 4.0, 100.0)])
            .await;
        assert_eq!(drain(&mut declines), vec!["o4"]);

        tokio::time::advance(Duration::from_secs(11)).await;
        pool.shared
            .ingest(vec![make_offer("o5", "host-0", "10.0.0.0", 4.0, 100.0)])
            .await;
        assert!(drain(&mut declines).is_empty());
        assert_eq!(pool.offer_count().await, 2);
        assert_eq!(pool.lost_slave_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn host_lost_during_enrichment_is_not_committed() {
        let client = Arc::new(FakeClient {
            plugin: PluginMode::Hang,
            ..FakeClient::default()
        });
        let (pool, mut declines) = idle_pool(DroverConfig::default(), client, seeded_store(2));

        let shared = Arc::clone(&pool.shared);
        let ingest = tokio::spawn(async move {
            shared
                .ingest(vec![
                    make_offer("o1", "host-0", "10.0.0.0", 4.0, 100.0),
                    make_offer("o2", "host-1", "10.0.0.1", 4.0, 100.0),
                ])
                .await
        });
        // Let the batch get past validation and park on the plugin call.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        pool.add_lost_slave("host-0").await;
        assert!(drain(&mut declines).is_empty());

        ingest.await.unwrap();

        let hosts: Vec<String> = pool.get_all_offers().await.into_iter().map(|o| o.hostname).collect();
        assert_eq!(hosts, vec!["host-1"]);
        assert_eq!(drain(&mut declines), vec!["o1"]);
        // The refusal at insert time starts the grace window.
        assert_eq!(pool.lost_slave_count().await, 1);
        pool.shared
            .ingest(vec![make_offer("o3", "host-0", "10.0.0.0", 4.0, 100.0)])
            .await;
        assert_eq!(drain(&mut declines), vec!["o3"]);
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_invalidates_then_purges_with_one_decline() {
        let client = Arc::new(FakeClient::default());
        let mut config = DroverConfig::default();
        config.pool.offer_life_period_secs = 10;
        config.pool.decline_grace_period_secs = 5;
        let (pool, mut declines) = idle_pool(config, client, seeded_store(1));

        pool.shared
            .ingest(vec![make_offer("o1", "host-0", "10.0.0.0", 4.0, 100.0)])
            .await;
        let t0 = Instant::now();
        let offer = pool.get_first_offer().await.unwrap();

        pool.shared.expire(t0 + Duration::from_secs(9)).await;
        assert_eq!(pool.get_all_offers().await.len(), 1);

        pool.shared.expire(t0 + Duration::from_secs(10)).await;
        assert!(pool.get_all_offers().await.is_empty());
        assert_eq!(pool.offer_count().await, 1);
        assert!(!pool.use_offer(&offer).await);
        assert!(drain(&mut declines).is_empty());

        pool.shared.expire(t0 + Duration::from_secs(15)).await;
        assert_eq!(pool.offer_count().await, 0);
        pool.shared.expire(t0 + Duration::from_secs(30)).await;
        assert_eq!(drain(&mut declines), vec!["o1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn workers_ingest_expire_and_decline() {
        let client = Arc::new(FakeClient::default());
        let mut config = DroverConfig::default();
        config.pool.offer_life_period_secs = 2;
        config.pool.decline_grace_period_secs = 1;
        let pool = OfferPool::start(&config, client.clone(), Arc::new(seeded_store(1)));

        pool.add_offers(vec![make_offer("o1", "host-0", "10.0.0.0", 4.0, 100.0)])
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(pool.offer_count().await, 1);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(pool.offer_count().await, 0);
        assert_eq!(client.declined(), vec!["o1"]);

        pool.stop().await;
        assert!(matches!(
            pool.add_offers(Vec::new()).await,
            Err(PoolError::Closed)
        ));
    }
}
