//! Controller-side sync engine
//!
//! [`SyncEngine`] owns the live [`DeviceState`] of every known device and is
//! the only thing that mutates it. User intents are applied optimistically,
//! then confirmed against the daemon through a [`StatusApi`]:
//!
//! - volume changes are debounced per device, so a burst of intents results in
//!   a single write carrying the last value;
//! - a confirmed write clears the device's error without touching the
//!   optimistic value;
//! - a failed write records the error and resynchronizes every device.
//!
//! Device lifecycle operations persist through the [`DeviceStore`] first and
//! only touch the live state once the store accepted the change. Store I/O
//! runs on the blocking pool, never on a runtime worker.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::{self, JoinHandle};
use tracing::{debug, info, warn};
use volume_client::{ApiError, Endpoint, StatusApi};
use volume_discovery::DiscoveredCandidate;
use volume_protocol::{StatusUpdate, MAX_VOLUME};

use crate::config::SyncConfig;
use crate::error::{Result, StateError, StoreError};
use crate::model::{Device, DeviceId, DeviceState};
use crate::store::{DeviceStore, StoreResult};

/// A debounced volume write waiting for its quiet period to end
struct PendingWrite {
    generation: u64,
    volume: u8,
    handle: JoinHandle<()>,
}

struct Inner<A> {
    api: A,
    store: Arc<dyn DeviceStore>,
    config: SyncConfig,
    state: watch::Sender<Vec<DeviceState>>,
    pending: Mutex<HashMap<DeviceId, PendingWrite>>,
    next_generation: AtomicU64,
    /// Serializes store read-modify-write cycles; held across blocking store calls
    lifecycle: tokio::sync::Mutex<()>,
}

/// Keeps device state consistent with the daemons
///
/// Cloning is cheap; clones share the same state.
pub struct SyncEngine<A: StatusApi> {
    inner: Arc<Inner<A>>,
}

impl<A: StatusApi> Clone for SyncEngine<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A: StatusApi> SyncEngine<A> {
    /// Creates an engine with an empty state; call
    /// [`load_devices`](Self::load_devices) to populate it from the store.
    pub fn new(api: A, store: Arc<dyn DeviceStore>, config: SyncConfig) -> Result<Self> {
        config.validate()?;
        let (state, _) = watch::channel(Vec::new());

        Ok(Self {
            inner: Arc::new(Inner {
                api,
                store,
                config,
                state,
                pending: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
                lifecycle: tokio::sync::Mutex::new(()),
            }),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn api(&self) -> &A {
        &self.inner.api
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Current state of every device, in store order
    pub fn snapshot(&self) -> Vec<DeviceState> {
        self.inner.state.borrow().clone()
    }

    pub fn device_state(&self, id: &DeviceId) -> Option<DeviceState> {
        self.inner
            .state
            .borrow()
            .iter()
            .find(|s| &s.device.id == id)
            .cloned()
    }

    /// Looks a device up by exact id, then by case-insensitive name
    pub fn resolve(&self, query: &str) -> Option<DeviceState> {
        let states = self.inner.state.borrow();
        states
            .iter()
            .find(|s| s.device.id.as_str() == query)
            .or_else(|| {
                states
                    .iter()
                    .find(|s| s.device.name.eq_ignore_ascii_case(query.trim()))
            })
            .cloned()
    }

    /// Receiver that sees every state change as a full snapshot
    pub fn subscribe(&self) -> watch::Receiver<Vec<DeviceState>> {
        self.inner.state.subscribe()
    }

    /// Number of debounced writes not yet sent
    pub fn pending_writes(&self) -> usize {
        self.inner.pending.lock().len()
    }

    fn ids(&self) -> Vec<DeviceId> {
        self.inner
            .state
            .borrow()
            .iter()
            .map(|s| s.device.id.clone())
            .collect()
    }

    fn endpoint(&self, id: &DeviceId) -> Option<Endpoint> {
        self.inner
            .state
            .borrow()
            .iter()
            .find(|s| &s.device.id == id)
            .map(|s| s.device.endpoint())
    }

    /// The single mutation path for one device's state
    ///
    /// Returns `None` when no device has this id. Subscribers are only woken
    /// when `f` actually changed something.
    fn update_device<R>(&self, id: &DeviceId, f: impl FnOnce(&mut DeviceState) -> R) -> Option<R> {
        let mut out = None;
        self.inner.state.send_if_modified(|states| {
            let Some(state) = states.iter_mut().find(|s| &s.device.id == id) else {
                return false;
            };
            let before = state.clone();
            out = Some(f(state));
            *state != before
        });
        out
    }

    // ========================================================================
    // Refresh
    // ========================================================================

    /// Replaces the live state with the stored device list, then refreshes
    /// every device. Returns the number of devices loaded.
    pub async fn load_devices(&self) -> Result<usize> {
        let count = self.load_stored().await?;
        self.fetch_all().await;
        Ok(count)
    }

    /// Replaces the live state with the stored device list without touching
    /// the network; every device starts out [`Phase::Unknown`](crate::Phase::Unknown).
    ///
    /// Only the first device of each id is kept.
    pub async fn load_stored(&self) -> Result<usize> {
        let _guard = self.inner.lifecycle.lock().await;
        let stored = self.with_store(|store| store.load()).await?;

        let mut known: HashSet<DeviceId> = HashSet::with_capacity(stored.len());
        let devices: Vec<Device> = stored
            .into_iter()
            .filter(|device| {
                let first = known.insert(device.id.clone());
                if !first {
                    warn!("Ignoring stored device {:?} with duplicate id {}", device.name, device.id);
                }
                first
            })
            .collect();
        self.cancel_pending_where(|id| !known.contains(id));

        let count = devices.len();
        self.inner
            .state
            .send_replace(devices.into_iter().map(DeviceState::new).collect());

        info!("Loaded {} devices", count);
        Ok(count)
    }

    /// Refreshes every known device concurrently
    ///
    /// Each device's outcome lands in its own state; one failure never holds
    /// up or affects the others.
    pub async fn fetch_all(&self) {
        let ids = self.ids();
        debug!("Refreshing {} devices", ids.len());
        join_all(ids.iter().map(|id| self.refresh(id))).await;
    }

    /// Refreshes one device; fails only when the id is unknown
    pub async fn refresh_device(&self, id: &DeviceId) -> Result<()> {
        if self.refresh(id).await {
            Ok(())
        } else {
            Err(StateError::DeviceNotFound(id.clone()))
        }
    }

    async fn refresh(&self, id: &DeviceId) -> bool {
        let Some(endpoint) = self.update_device(id, |s| {
            s.loading = true;
            s.error = None;
            s.device.endpoint()
        }) else {
            return false;
        };

        let result = self.inner.api.get_status(&endpoint).await;
        if let Err(e) = &result {
            warn!("Refresh of {} at {} failed: {}", id, endpoint, e);
        }

        // The device may have been deleted while the request was in flight
        self.update_device(id, |s| {
            s.loading = false;
            match result {
                Ok(status) => {
                    s.volume = Some(status.volume);
                    s.muted = status.muted;
                }
                Err(e) => s.error = Some(e.to_string()),
            }
        });
        true
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Shows `volume` immediately and sends it once the device has seen no
    /// newer volume intent for the debounce window.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn set_volume(&self, id: &DeviceId, volume: u8) -> Result<()> {
        let volume = volume.min(MAX_VOLUME);
        self.update_device(id, |s| {
            s.volume = Some(volume);
            s.error = None;
        })
        .ok_or_else(|| StateError::DeviceNotFound(id.clone()))?;

        self.schedule_write(id.clone(), volume);
        Ok(())
    }

    /// Like [`set_volume`](Self::set_volume) but sends right away, replacing
    /// any write still waiting out its debounce window.
    pub async fn write_volume(&self, id: &DeviceId, volume: u8) -> Result<()> {
        let volume = volume.min(MAX_VOLUME);
        self.update_device(id, |s| {
            s.volume = Some(volume);
            s.error = None;
        })
        .ok_or_else(|| StateError::DeviceNotFound(id.clone()))?;
        self.cancel_pending(id);

        self.commit(id, StatusUpdate::volume(volume), true).await?;
        Ok(())
    }

    pub async fn set_muted(&self, id: &DeviceId, muted: bool) -> Result<()> {
        self.update_device(id, |s| {
            s.muted = muted;
            s.error = None;
        })
        .ok_or_else(|| StateError::DeviceNotFound(id.clone()))?;

        self.commit(id, StatusUpdate::muted(muted), true).await?;
        Ok(())
    }

    /// Flips the mute state as currently shown; returns the new value
    pub async fn toggle_mute(&self, id: &DeviceId) -> Result<bool> {
        let muted = !self
            .device_state(id)
            .ok_or_else(|| StateError::DeviceNotFound(id.clone()))?
            .muted;
        self.set_muted(id, muted).await?;
        Ok(muted)
    }

    /// Mutes every device concurrently and returns the ones that failed
    pub async fn mute_all(&self) -> Vec<(DeviceId, ApiError)> {
        self.set_muted_all(true).await
    }

    /// Unmutes every device concurrently and returns the ones that failed
    pub async fn unmute_all(&self) -> Vec<(DeviceId, ApiError)> {
        self.set_muted_all(false).await
    }

    async fn set_muted_all(&self, muted: bool) -> Vec<(DeviceId, ApiError)> {
        let ids = self.ids();
        for id in &ids {
            self.update_device(id, |s| {
                s.muted = muted;
                s.error = None;
            });
        }

        let results = join_all(ids.iter().map(|id| async move {
            (id, self.commit(id, StatusUpdate::muted(muted), false).await)
        }))
        .await;

        let failures: Vec<(DeviceId, ApiError)> = results
            .into_iter()
            .filter_map(|(id, result)| result.err().map(|e| (id.clone(), e)))
            .collect();

        // One resync for the whole batch
        if !failures.is_empty() {
            warn!("{} of {} devices failed to apply mute={}", failures.len(), ids.len(), muted);
            self.fetch_all().await;
        }
        failures
    }

    fn schedule_write(&self, id: DeviceId, volume: u8) {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let debounce = self.inner.config.debounce;

        // Held across spawn and insert so the task cannot look itself up early
        let mut pending = self.inner.pending.lock();

        let engine = self.clone();
        let task_id = id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            engine.fire_write(task_id, generation).await;
        });

        if let Some(previous) = pending.insert(
            id,
            PendingWrite {
                generation,
                volume,
                handle,
            },
        ) {
            previous.handle.abort();
        }
    }

    async fn fire_write(&self, id: DeviceId, generation: u64) {
        // Once removed from the map the write is in flight and can no longer be cancelled
        let volume = {
            let mut pending = self.inner.pending.lock();
            match pending.get(&id) {
                Some(write) if write.generation == generation => {
                    pending.remove(&id).map(|write| write.volume)
                }
                _ => None,
            }
        };

        if let Some(volume) = volume {
            debug!("Debounce elapsed for {}, writing volume {}", id, volume);
            // Failures are recorded on the device by commit
            let _ = self.commit(&id, StatusUpdate::volume(volume), true).await;
        }
    }

    /// Sends `update` and reconciles the device's error with the outcome
    async fn commit(
        &self,
        id: &DeviceId,
        update: StatusUpdate,
        resync: bool,
    ) -> std::result::Result<(), ApiError> {
        let Some(endpoint) = self.endpoint(id) else {
            debug!("Dropping write for deleted device {}", id);
            return Ok(());
        };

        match self.inner.api.set_status(&endpoint, &update).await {
            Ok(_) => {
                // The optimistic value stands; the reply may already be stale
                self.update_device(id, |s| s.error = None);
                Ok(())
            }
            Err(e) => {
                warn!("Write to {} at {} failed: {}", id, endpoint, e);
                self.update_device(id, |s| s.error = Some(e.to_string()));
                if resync {
                    self.fetch_all().await;
                }
                Err(e)
            }
        }
    }

    fn cancel_pending(&self, id: &DeviceId) {
        if let Some(write) = self.inner.pending.lock().remove(id) {
            debug!("Cancelled pending write for {}", id);
            write.handle.abort();
        }
    }

    fn cancel_pending_where(&self, mut predicate: impl FnMut(&DeviceId) -> bool) {
        self.inner.pending.lock().retain(|id, write| {
            if predicate(id) {
                write.handle.abort();
                false
            } else {
                true
            }
        });
    }

    // ========================================================================
    // Device lifecycle
    // ========================================================================

    /// Persists a new device, starts tracking it and refreshes it
    pub async fn add_device(
        &self,
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
    ) -> Result<DeviceId> {
        let device = Device::new(name, host, port);
        device.validate()?;

        {
            let _guard = self.inner.lifecycle.lock().await;
            let added = device.clone();
            self.with_store(move |store| {
                let mut devices = store.load()?;
                devices.push(added);
                store.save(&devices)
            })
            .await?;

            let state = DeviceState::new(device.clone());
            self.inner.state.send_modify(|states| states.push(state));
        }

        info!("Added {} ({}) at {}", device.name, device.id, device.endpoint());
        self.refresh(&device.id).await;
        Ok(device.id)
    }

    /// Adds a device found by discovery
    pub async fn add_candidate(&self, candidate: &DiscoveredCandidate) -> Result<DeviceId> {
        self.add_device(candidate.name.clone(), candidate.host.clone(), candidate.port)
            .await
    }

    /// Replaces name, host and port of a device, keeping its id
    ///
    /// A device whose address changed is refreshed from its new address.
    pub async fn edit_device(
        &self,
        id: &DeviceId,
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
    ) -> Result<()> {
        let updated = Device::with_id(id.clone(), name, host, port);
        updated.validate()?;

        let moved = {
            let _guard = self.inner.lifecycle.lock().await;
            let replacement = updated.clone();
            let moved = self
                .with_store(move |store| {
                    let mut devices = store.load()?;
                    let Some(slot) = devices.iter_mut().find(|d| d.id == replacement.id) else {
                        return Ok(None);
                    };
                    let moved = slot.endpoint() != replacement.endpoint();
                    *slot = replacement;
                    store.save(&devices)?;
                    Ok(Some(moved))
                })
                .await?
                .ok_or_else(|| StateError::DeviceNotFound(id.clone()))?;

            if moved {
                // Anything queued was meant for the old address
                self.cancel_pending(id);
            }
            self.update_device(id, |s| s.device = updated);
            moved
        };

        info!("Edited device {}", id);
        if moved {
            self.refresh(id).await;
        }
        Ok(())
    }

    /// Forgets a device and drops any write still queued for it
    pub async fn delete_device(&self, id: &DeviceId) -> Result<()> {
        let _guard = self.inner.lifecycle.lock().await;
        let target = id.clone();
        let persisted = self
            .with_store(move |store| {
                let mut devices = store.load()?;
                let stored = devices.len();
                devices.retain(|d| d.id != target);
                if devices.len() == stored {
                    return Ok(false);
                }
                store.save(&devices)?;
                Ok(true)
            })
            .await?;

        if !persisted && self.device_state(id).is_none() {
            return Err(StateError::DeviceNotFound(id.clone()));
        }

        self.cancel_pending(id);
        self.inner.state.send_if_modified(|states| {
            let before = states.len();
            states.retain(|s| &s.device.id != id);
            states.len() != before
        });

        info!("Deleted device {}", id);
        Ok(())
    }

    /// Forgets every device
    pub async fn remove_all(&self) -> Result<()> {
        let _guard = self.inner.lifecycle.lock().await;
        self.with_store(|store| store.save(&[])).await?;
        self.cancel_pending_where(|_| true);
        self.inner.state.send_replace(Vec::new());

        info!("Removed all devices");
        Ok(())
    }

    /// Runs `op` against the store on the blocking pool
    async fn with_store<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn DeviceStore) -> StoreResult<T> + Send + 'static,
    {
        let store = Arc::clone(&self.inner.store);
        let outcome = task::spawn_blocking(move || op(store.as_ref()))
            .await
            .map_err(|e| StoreError::Unavailable(format!("Store task failed: {}", e)))?;
        Ok(outcome?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Phase;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use std::time::Duration;
    use tokio::time::{sleep, Instant};
    use volume_protocol::StatusPayload;

    /// Scriptable stand-in for a set of daemons, keyed by host
    #[derive(Default)]
    struct FakeDaemons {
        statuses: Mutex<HashMap<String, StatusPayload>>,
        unreachable: Mutex<HashSet<String>>,
        rejecting_writes: Mutex<HashSet<String>>,
        delays: Mutex<HashMap<String, Duration>>,
        gets: Mutex<Vec<String>>,
        writes: Mutex<Vec<(String, StatusUpdate)>>,
    }

    impl FakeDaemons {
        fn with_status(self, host: &str, volume: u8, muted: bool) -> Self {
            self.statuses
                .lock()
                .insert(host.to_string(), StatusPayload::new(volume.into(), muted));
            self
        }

        fn unreachable(self, host: &str) -> Self {
            self.unreachable.lock().insert(host.to_string());
            self
        }

        fn rejecting_writes(self, host: &str) -> Self {
            self.rejecting_writes.lock().insert(host.to_string());
            self
        }

        fn delayed(self, host: &str, delay: Duration) -> Self {
            self.delays.lock().insert(host.to_string(), delay);
            self
        }

        fn status(&self, host: &str) -> Option<StatusPayload> {
            self.statuses.lock().get(host).copied()
        }

        fn gets(&self) -> Vec<String> {
            self.gets.lock().clone()
        }

        fn writes(&self) -> Vec<(String, StatusUpdate)> {
            self.writes.lock().clone()
        }

        async fn wait(&self, host: &str) {
            let delay = self.delays.lock().get(host).copied();
            if let Some(delay) = delay {
                sleep(delay).await;
            }
        }
    }

    #[async_trait]
    impl StatusApi for FakeDaemons {
        async fn get_status(&self, endpoint: &Endpoint) -> volume_client::Result<StatusPayload> {
            self.gets.lock().push(endpoint.host.clone());
            self.wait(&endpoint.host).await;

            if self.unreachable.lock().contains(&endpoint.host) {
                return Err(ApiError::Transport("connection refused".to_string()));
            }
            Ok(self
                .status(&endpoint.host)
                .unwrap_or_else(|| StatusPayload::new(50, false)))
        }

        async fn set_status(
            &self,
            endpoint: &Endpoint,
            update: &StatusUpdate,
        ) -> volume_client::Result<StatusPayload> {
            self.writes.lock().push((endpoint.host.clone(), *update));
            self.wait(&endpoint.host).await;

            if self.unreachable.lock().contains(&endpoint.host) {
                return Err(ApiError::Transport("connection refused".to_string()));
            }
            if self.rejecting_writes.lock().contains(&endpoint.host) {
                return Err(ApiError::Remote("Mixer unavailable".to_string()));
            }

            let mut statuses = self.statuses.lock();
            let status = statuses
                .entry(endpoint.host.clone())
                .or_insert_with(|| StatusPayload::new(50, false));
            if let Some(volume) = update.clamped_volume() {
                status.volume = volume;
            }
            if let Some(muted) = update.muted {
                status.muted = muted;
            }
            Ok(*status)
        }
    }

    /// Engine over a store holding one device per host; ids equal hosts
    fn engine_with(
        api: FakeDaemons,
        hosts: &[&str],
    ) -> (SyncEngine<FakeDaemons>, Arc<MemoryStore>) {
        let devices = hosts
            .iter()
            .map(|host| Device::with_id(DeviceId::from(*host), *host, *host, 8888))
            .collect();
        let store = Arc::new(MemoryStore::with_devices(devices));
        let engine = SyncEngine::new(api, store.clone(), SyncConfig::default()).unwrap();
        (engine, store)
    }

    fn id(host: &str) -> DeviceId {
        DeviceId::from(host)
    }

    fn state_of(engine: &SyncEngine<FakeDaemons>, host: &str) -> DeviceState {
        engine.device_state(&id(host)).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_devices_fetches_every_device() {
        let api = FakeDaemons::default()
            .with_status("den", 30, false)
            .with_status("kitchen", 70, true);
        let (engine, _store) = engine_with(api, &["den", "kitchen"]);

        assert_eq!(engine.load_devices().await.unwrap(), 2);

        let den = state_of(&engine, "den");
        assert_eq!(den.volume, Some(30));
        assert!(!den.muted);
        assert_eq!(den.phase(), Phase::Ready);

        let kitchen = state_of(&engine, "kitchen");
        assert_eq!(kitchen.volume, Some(70));
        assert!(kitchen.muted);

        let names: Vec<_> = engine.snapshot().into_iter().map(|s| s.device.name).collect();
        assert_eq!(names, vec!["den", "kitchen"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_stored_stays_offline() {
        let (engine, _store) = engine_with(FakeDaemons::default(), &["den", "kitchen"]);

        assert_eq!(engine.load_stored().await.unwrap(), 2);
        assert!(engine.api().gets().is_empty());
        assert!(engine.snapshot().iter().all(|s| s.phase() == Phase::Unknown));
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_stored_keeps_first_of_duplicate_ids() {
        let store = Arc::new(MemoryStore::with_devices(vec![
            Device::with_id(DeviceId::from("same"), "Den", "den", 8888),
            Device::with_id(DeviceId::from("same"), "Kitchen", "kitchen", 8888),
            Device::with_id(DeviceId::from("other"), "Attic", "attic", 8888),
        ]));
        let engine = SyncEngine::new(FakeDaemons::default(), store, SyncConfig::default()).unwrap();

        assert_eq!(engine.load_stored().await.unwrap(), 2);
        let snapshot = engine.snapshot();
        let same: Vec<_> = snapshot.iter().filter(|s| s.device.id == id("same")).collect();
        assert_eq!(same.len(), 1);
        assert_eq!(same[0].device.name, "Den");
        assert_eq!(snapshot[1].device.id, id("other"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_optimistic_volume_on_unfetched_device_is_ready() {
        let (engine, _store) = engine_with(FakeDaemons::default(), &["den"]);
        engine.load_stored().await.unwrap();
        assert_eq!(state_of(&engine, "den").phase(), Phase::Unknown);

        engine.set_volume(&id("den"), 35).unwrap();
        let den = state_of(&engine, "den");
        assert_eq!(den.volume, Some(35));
        assert_eq!(den.phase(), Phase::Ready);
        assert!(engine.api().gets().is_empty());
    }

    /// A store whose writes block the calling thread
    struct SlowStore {
        devices: MemoryStore,
        delay: Duration,
    }

    impl DeviceStore for SlowStore {
        fn load(&self) -> StoreResult<Vec<Device>> {
            self.devices.load()
        }

        fn save(&self, devices: &[Device]) -> StoreResult<()> {
            std::thread::sleep(self.delay);
            self.devices.save(devices)
        }
    }

    #[tokio::test]
    async fn test_slow_store_does_not_stall_runtime() {
        let store = Arc::new(SlowStore {
            devices: MemoryStore::new(),
            delay: Duration::from_millis(300),
        });
        let engine =
            SyncEngine::new(FakeDaemons::default(), store.clone(), SyncConfig::default()).unwrap();

        let adding = tokio::spawn({
            let engine = engine.clone();
            async move { engine.add_device("Den", "den", 8888).await }
        });

        // Timers keep firing on this single-threaded runtime while the save blocks
        let started = Instant::now();
        sleep(Duration::from_millis(50)).await;
        assert!(started.elapsed() < Duration::from_millis(250));

        adding.await.unwrap().unwrap();
        assert_eq!(store.devices.devices().len(), 1);
        engine.delete_device(&engine.snapshot()[0].device.id).await.unwrap();
        assert!(store.devices.devices().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_all_isolates_failures() {
        let api = FakeDaemons::default()
            .with_status("den", 10, false)
            .with_status("kitchen", 20, false)
            .delayed("den", Duration::from_secs(1))
            .delayed("kitchen", Duration::from_secs(1))
            .delayed("attic", Duration::from_secs(4))
            .unreachable("attic");
        let (engine, _store) = engine_with(api, &["den", "kitchen", "attic"]);

        let started = Instant::now();
        engine.load_devices().await.unwrap();
        let elapsed = started.elapsed();

        // Concurrent: bounded by the slowest device, not the sum
        assert!(elapsed >= Duration::from_secs(4), "{:?}", elapsed);
        assert!(elapsed < Duration::from_secs(5), "{:?}", elapsed);

        assert_eq!(state_of(&engine, "den").phase(), Phase::Ready);
        assert_eq!(state_of(&engine, "kitchen").volume, Some(20));

        let attic = state_of(&engine, "attic");
        assert_eq!(attic.phase(), Phase::Errored);
        assert_eq!(attic.volume, None);
        assert_eq!(
            attic.error.as_deref(),
            Some("Connection failed: connection refused")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_all_marks_devices_loading() {
        let api = FakeDaemons::default()
            .delayed("den", Duration::from_secs(1))
            .delayed("kitchen", Duration::from_secs(1));
        let (engine, _store) = engine_with(api, &["den", "kitchen"]);
        engine.load_devices().await.unwrap();

        let background = engine.clone();
        let refresh = tokio::spawn(async move { background.fetch_all().await });
        sleep(Duration::from_millis(10)).await;

        assert!(engine
            .snapshot()
            .iter()
            .all(|s| s.phase() == Phase::Loading));

        refresh.await.unwrap();
        assert!(engine.snapshot().iter().all(|s| s.phase() == Phase::Ready));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_clears_previous_error() {
        let api = FakeDaemons::default().unreachable("den");
        let (engine, _store) = engine_with(api, &["den"]);
        engine.load_devices().await.unwrap();
        assert_eq!(state_of(&engine, "den").phase(), Phase::Errored);

        engine.api().unreachable.lock().clear();
        engine.refresh_device(&id("den")).await.unwrap();

        let den = state_of(&engine, "den");
        assert_eq!(den.phase(), Phase::Ready);
        assert_eq!(den.volume, Some(50));
    }

    #[tokio::test(start_paused = true)]
    async fn test_volume_burst_coalesces_into_one_write() {
        let api = FakeDaemons::default().with_status("den", 20, false);
        let (engine, _store) = engine_with(api, &["den"]);
        engine.load_devices().await.unwrap();

        engine.set_volume(&id("den"), 30).unwrap();
        assert_eq!(state_of(&engine, "den").volume, Some(30));
        assert_eq!(engine.pending_writes(), 1);

        sleep(Duration::from_millis(100)).await;
        engine.set_volume(&id("den"), 70).unwrap();
        assert_eq!(state_of(&engine, "den").volume, Some(70));
        assert_eq!(engine.pending_writes(), 1);

        // 400ms after the last intent: still quiet
        sleep(Duration::from_millis(400)).await;
        assert!(engine.api().writes().is_empty());

        sleep(Duration::from_millis(300)).await;
        assert_eq!(
            engine.api().writes(),
            vec![("den".to_string(), StatusUpdate::volume(70u8))]
        );
        assert_eq!(engine.pending_writes(), 0);
        assert_eq!(engine.api().status("den").unwrap().volume, 70);

        let den = state_of(&engine, "den");
        assert_eq!(den.volume, Some(70));
        assert_eq!(den.phase(), Phase::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_is_per_device() {
        let (engine, _store) = engine_with(FakeDaemons::default(), &["den", "kitchen"]);
        engine.load_devices().await.unwrap();

        engine.set_volume(&id("den"), 10).unwrap();
        sleep(Duration::from_millis(300)).await;
        engine.set_volume(&id("kitchen"), 90).unwrap();
        assert_eq!(engine.pending_writes(), 2);

        // Den's window ends first and is not pushed back by kitchen's intent
        sleep(Duration::from_millis(300)).await;
        assert_eq!(
            engine.api().writes(),
            vec![("den".to_string(), StatusUpdate::volume(10u8))]
        );

        sleep(Duration::from_millis(300)).await;
        assert_eq!(engine.api().writes().len(), 2);
        assert_eq!(engine.pending_writes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_write_is_not_cancelled() {
        let api = FakeDaemons::default().delayed("den", Duration::from_secs(1));
        let (engine, _store) = engine_with(api, &["den"]);
        engine.load_devices().await.unwrap();

        engine.set_volume(&id("den"), 30).unwrap();
        sleep(Duration::from_millis(600)).await;
        assert_eq!(engine.pending_writes(), 0);

        engine.set_volume(&id("den"), 70).unwrap();
        sleep(Duration::from_secs(3)).await;

        assert_eq!(
            engine.api().writes(),
            vec![
                ("den".to_string(), StatusUpdate::volume(30u8)),
                ("den".to_string(), StatusUpdate::volume(70u8)),
            ]
        );
        assert_eq!(state_of(&engine, "den").volume, Some(70));
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_volume_clamps_and_replaces_pending() {
        let (engine, _store) = engine_with(FakeDaemons::default(), &["den"]);
        engine.load_devices().await.unwrap();

        engine.set_volume(&id("den"), 10).unwrap();
        engine.write_volume(&id("den"), 150).await.unwrap();
        assert_eq!(engine.pending_writes(), 0);

        sleep(Duration::from_secs(1)).await;
        assert_eq!(
            engine.api().writes(),
            vec![("den".to_string(), StatusUpdate::volume(100u8))]
        );
        assert_eq!(state_of(&engine, "den").volume, Some(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_write_resyncs_to_ground_truth() {
        let api = FakeDaemons::default()
            .with_status("den", 20, false)
            .rejecting_writes("den");
        let (engine, _store) = engine_with(api, &["den", "kitchen"]);
        engine.load_devices().await.unwrap();
        assert_eq!(engine.api().gets().len(), 2);

        engine.set_volume(&id("den"), 80).unwrap();
        assert_eq!(state_of(&engine, "den").volume, Some(80));

        sleep(Duration::from_secs(1)).await;

        assert_eq!(engine.api().writes().len(), 1);
        // Every device was refreshed once more
        assert_eq!(engine.api().gets().len(), 4);

        let den = state_of(&engine, "den");
        assert_eq!(den.volume, Some(20));
        assert_eq!(den.phase(), Phase::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_to_unreachable_device_keeps_error() {
        let api = FakeDaemons::default().unreachable("den");
        let (engine, _store) = engine_with(api, &["den"]);
        engine.load_devices().await.unwrap();

        let err = engine.write_volume(&id("den"), 80).await.unwrap_err();
        assert!(matches!(err, StateError::Api(ApiError::Transport(_))));

        let den = state_of(&engine, "den");
        assert_eq!(den.phase(), Phase::Errored);
        // Last known value is the local intent
        assert_eq!(den.volume, Some(80));
        assert_eq!(engine.api().gets().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mute_all_reports_each_failure() {
        let api = FakeDaemons::default()
            .with_status("attic", 40, false)
            .rejecting_writes("attic");
        let (engine, _store) = engine_with(api, &["den", "kitchen", "attic"]);
        engine.load_devices().await.unwrap();

        let failures = engine.mute_all().await;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, id("attic"));
        assert_eq!(failures[0].1, ApiError::Remote("Mixer unavailable".to_string()));

        assert!(engine.api().status("den").unwrap().muted);
        assert!(engine.api().status("kitchen").unwrap().muted);
        assert!(state_of(&engine, "den").muted);

        // A single resync for the batch puts attic back to ground truth
        assert_eq!(engine.api().gets().len(), 6);
        assert!(!state_of(&engine, "attic").muted);

        let failures = engine.unmute_all().await;
        assert_eq!(failures.len(), 1);
        assert!(!engine.api().status("den").unwrap().muted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_mute() {
        let api = FakeDaemons::default().with_status("den", 40, true);
        let (engine, _store) = engine_with(api, &["den"]);
        engine.load_devices().await.unwrap();

        assert!(!engine.toggle_mute(&id("den")).await.unwrap());
        assert!(!engine.api().status("den").unwrap().muted);
        assert!(engine.toggle_mute(&id("den")).await.unwrap());
        assert!(state_of(&engine, "den").muted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_device_persists_and_refreshes() {
        let api = FakeDaemons::default().with_status("10.0.0.9", 35, false);
        let (engine, store) = engine_with(api, &[]);

        let new_id = engine.add_device(" Office ", "10.0.0.9", 8888).await.unwrap();

        let stored = store.devices();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, new_id);
        assert_eq!(stored[0].name, "Office");

        let office = engine.device_state(&new_id).unwrap();
        assert_eq!(office.volume, Some(35));
        assert_eq!(engine.api().gets(), vec!["10.0.0.9".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_candidate() {
        let (engine, store) = engine_with(FakeDaemons::default(), &["den"]);
        engine.load_devices().await.unwrap();

        let candidate = DiscoveredCandidate::new("Kitchen Mac", "192.168.1.7", 8888);
        let new_id = engine.add_candidate(&candidate).await.unwrap();

        assert_eq!(store.devices().len(), 2);
        let kitchen = engine.device_state(&new_id).unwrap();
        assert_eq!(kitchen.device.name, "Kitchen Mac");
        assert_eq!(kitchen.device.host, "192.168.1.7");
        assert_eq!(engine.snapshot().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_failure_leaves_state_untouched() {
        let (engine, store) = engine_with(FakeDaemons::default(), &["den"]);
        engine.load_devices().await.unwrap();
        store.set_read_only(true);

        let err = engine.add_device("Office", "office", 8888).await.unwrap_err();
        assert!(matches!(err, StateError::Store(_)));
        assert!(matches!(
            engine.delete_device(&id("den")).await,
            Err(StateError::Store(_))
        ));
        assert!(matches!(engine.remove_all().await, Err(StateError::Store(_))));

        assert_eq!(engine.snapshot().len(), 1);
        assert_eq!(engine.api().gets().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_invalid_device() {
        let (engine, store) = engine_with(FakeDaemons::default(), &[]);
        let err = engine.add_device("", "den", 8888).await.unwrap_err();
        assert!(matches!(err, StateError::InvalidDevice(_)));
        assert!(store.devices().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_edit_device_keeps_identity() {
        let (engine, store) = engine_with(FakeDaemons::default(), &["den"]);
        engine.load_devices().await.unwrap();

        // Renaming alone does not touch the network
        engine.edit_device(&id("den"), "Study", "den", 8888).await.unwrap();
        assert_eq!(engine.api().gets().len(), 1);
        assert_eq!(state_of(&engine, "den").device.name, "Study");

        engine
            .edit_device(&id("den"), "Study", "study.local", 9000)
            .await
            .unwrap();
        assert_eq!(engine.api().gets().last().unwrap(), "study.local");

        let stored = store.devices();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, id("den"));
        assert_eq!(stored[0].port, 9000);
        assert_eq!(state_of(&engine, "den").device.host, "study.local");
    }

    #[tokio::test(start_paused = true)]
    async fn test_edit_unknown_device() {
        let (engine, _store) = engine_with(FakeDaemons::default(), &[]);
        let err = engine
            .edit_device(&id("ghost"), "Ghost", "ghost", 8888)
            .await
            .unwrap_err();
        assert!(matches!(err, StateError::DeviceNotFound(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_device_cancels_pending_write() {
        let (engine, store) = engine_with(FakeDaemons::default(), &["den", "kitchen"]);
        engine.load_devices().await.unwrap();

        engine.set_volume(&id("den"), 10).unwrap();
        engine.delete_device(&id("den")).await.unwrap();
        assert_eq!(engine.pending_writes(), 0);

        sleep(Duration::from_secs(1)).await;
        assert!(engine.api().writes().is_empty());
        assert!(engine.device_state(&id("den")).is_none());
        assert_eq!(store.devices().len(), 1);

        engine.fetch_all().await;
        assert!(!engine.api().gets()[2..].contains(&"den".to_string()));

        assert!(matches!(
            engine.delete_device(&id("den")).await,
            Err(StateError::DeviceNotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_of_deleted_device_is_dropped() {
        let api = FakeDaemons::default().delayed("den", Duration::from_secs(1));
        let (engine, _store) = engine_with(api, &["den"]);

        let background = engine.clone();
        let load = tokio::spawn(async move { background.load_devices().await });
        sleep(Duration::from_millis(10)).await;

        engine.delete_device(&id("den")).await.unwrap();
        load.await.unwrap().unwrap();
        assert!(engine.snapshot().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_all() {
        let (engine, store) = engine_with(FakeDaemons::default(), &["den", "kitchen"]);
        engine.load_devices().await.unwrap();
        engine.set_volume(&id("kitchen"), 5).unwrap();

        engine.remove_all().await.unwrap();
        assert!(engine.snapshot().is_empty());
        assert!(store.devices().is_empty());
        assert_eq!(engine.pending_writes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_device() {
        let (engine, _store) = engine_with(FakeDaemons::default(), &["den"]);
        engine.load_devices().await.unwrap();

        assert!(matches!(
            engine.set_volume(&id("ghost"), 10),
            Err(StateError::DeviceNotFound(_))
        ));
        assert!(matches!(
            engine.refresh_device(&id("ghost")).await,
            Err(StateError::DeviceNotFound(_))
        ));
        assert!(matches!(
            engine.set_muted(&id("ghost"), true).await,
            Err(StateError::DeviceNotFound(_))
        ));
        assert!(engine.api().writes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribers_see_optimistic_updates() {
        let (engine, _store) = engine_with(FakeDaemons::default(), &["den"]);
        engine.load_devices().await.unwrap();

        let mut rx = engine.subscribe();
        assert!(!rx.has_changed().unwrap());

        engine.set_volume(&id("den"), 12).unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update()[0].volume, Some(12));

        // Same value again changes nothing
        engine.set_volume(&id("den"), 12).unwrap();
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_by_id_or_name() {
        let (engine, _store) = engine_with(FakeDaemons::default(), &["den"]);
        engine.load_devices().await.unwrap();
        let new_id = engine.add_device("Living Room", "living", 8888).await.unwrap();

        assert_eq!(engine.resolve("den").unwrap().device.id, id("den"));
        assert_eq!(engine.resolve("living room").unwrap().device.id, new_id);
        assert_eq!(engine.resolve(new_id.as_str()).unwrap().device.id, new_id);
        assert!(engine.resolve("garage").is_none());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let config = SyncConfig::new().with_debounce(Duration::from_secs(60));
        assert!(matches!(
            SyncEngine::new(FakeDaemons::default(), store, config),
            Err(StateError::Config(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_burst_sends_only_the_last_value(
            volumes in prop::collection::vec(any::<u8>(), 1..20),
            gap_ms in 0u64..400,
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .start_paused(true)
                .build()
                .unwrap();

            let writes = runtime.block_on(async {
                let (engine, _store) = engine_with(FakeDaemons::default(), &["den"]);
                engine.load_devices().await.unwrap();

                for volume in &volumes {
                    engine.set_volume(&id("den"), *volume).unwrap();
                    sleep(Duration::from_millis(gap_ms)).await;
                }
                sleep(Duration::from_secs(1)).await;
                engine.api().writes()
            });

            let last = (*volumes.last().unwrap()).min(MAX_VOLUME);
            prop_assert_eq!(writes, vec![("den".to_string(), StatusUpdate::volume(last))]);
        }
    }
}
