use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use accel_cache::CacheManager;
use accel_core::{
    DeviceControl, DeviceError, ResourceConfig, ResourceLimits, ResourceRequest, ResourceType,
    TuningKnob,
};
use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::ResourceError;
use crate::stats::ResourceStats;

/// Opaque payload stored in the device-resident cache.
pub type CachePayload = Arc<dyn Any + Send + Sync>;

#[derive(Debug, Default)]
struct Usage {
    used: u64,
    peak: u64,
    last_reclaim: Option<DateTime<Utc>>,
    reclaim_count: u64,
}

/// A resource that could not be satisfied: (type, requested, free).
type Shortfall = (ResourceType, u64, u64);

/// Accounting and admission for device capacity.
///
/// Cache residency counts against device memory, so an allocation fits when
/// `used + cached + requested <= available`. Evicting the cache is the main way
/// reclamation creates headroom.
///
/// Lock order: `admission`, then the cache, then the stats lock. The cache
/// size is read before the stats lock is taken, and the stats lock is always
/// dropped before calling into the cache or the device.
pub struct ResourceManager {
    limits: ResourceLimits,
    /// Serializes everything that grows `used` or the cache, so a reservation
    /// and a cache insert never both claim the same headroom.
    admission: Mutex<()>,
    usage: Mutex<HashMap<ResourceType, Usage>>,
    cache: Arc<CacheManager<CachePayload>>,
    device: Arc<dyn DeviceControl>,
    knob: Option<Arc<dyn TuningKnob>>,
    config: ResourceConfig,
}

impl ResourceManager {
    pub fn new(
        limits: ResourceLimits,
        cache: Arc<CacheManager<CachePayload>>,
        device: Arc<dyn DeviceControl>,
        config: ResourceConfig,
    ) -> Self {
        let usage = ResourceType::ALL
            .iter()
            .filter(|ty| limits.is_tracked(**ty))
            .map(|&ty| (ty, Usage::default()))
            .collect();

        Self {
            limits,
            admission: Mutex::new(()),
            usage: Mutex::new(usage),
            cache,
            device,
            knob: None,
            config,
        }
    }

    /// Knob shrunk when memory reclamation runs.
    pub fn with_tuning_knob(mut self, knob: Arc<dyn TuningKnob>) -> Self {
        self.knob = Some(knob);
        self
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    pub fn cache(&self) -> &Arc<CacheManager<CachePayload>> {
        &self.cache
    }

    pub fn device(&self) -> &Arc<dyn DeviceControl> {
        &self.device
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ResourceType, Usage>> {
        self.usage.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Allocation ──────────────────────────────────────────────

    /// Reserve `request` against device capacity.
    ///
    /// The check and the reservation happen in one critical section. When
    /// something does not fit, reclamation runs once for every short resource
    /// and the check is repeated exactly once.
    pub async fn allocate(&self, request: &ResourceRequest) -> Result<(), ResourceError> {
        let demands = self.checked_demands(request)?;

        let shortfalls = match self.try_reserve(&demands) {
            Ok(()) => return Ok(()),
            Err(shortfalls) => shortfalls,
        };

        for &(resource, requested, free) in &shortfalls {
            debug!(%resource, requested, free, "allocation short, reclaiming");
            self.reclaim(resource, requested - free).await;
        }

        match self.try_reserve(&demands) {
            Ok(()) => Ok(()),
            Err(shortfalls) => {
                let (resource, requested, free) = shortfalls[0];
                warn!(%resource, requested, free, "allocation refused after reclamation");
                Err(ResourceError::InsufficientResources {
                    resource,
                    requested,
                    free,
                })
            }
        }
    }

    /// Whether `request` would fit right now, without reserving or reclaiming.
    pub fn can_allocate(&self, request: &ResourceRequest) -> bool {
        let Ok(demands) = self.checked_demands(request) else {
            return false;
        };
        let cached = self.cache.current_size();
        let usage = self.lock();
        self.shortfalls(&usage, &demands, cached).is_empty()
    }

    /// Return `request` to the pool. Usage never drops below zero.
    pub fn release(&self, request: &ResourceRequest) {
        let mut usage = self.lock();
        for (resource, amount) in request.demands() {
            let Some(entry) = usage.get_mut(&resource) else {
                continue;
            };
            if amount > entry.used {
                warn!(%resource, amount, used = entry.used, "release exceeds usage, clamping to zero");
            }
            entry.used = entry.used.saturating_sub(amount);
        }
    }

    fn checked_demands(
        &self,
        request: &ResourceRequest,
    ) -> Result<Vec<(ResourceType, u64)>, ResourceError> {
        let demands = request.demands();
        if let Some(&(ty, _)) = demands.iter().find(|(ty, _)| !self.limits.is_tracked(*ty)) {
            return Err(ResourceError::InvalidResourceType(ty));
        }
        Ok(demands)
    }

    fn try_reserve(&self, demands: &[(ResourceType, u64)]) -> Result<(), Vec<Shortfall>> {
        let _admission = self.admission.lock().unwrap_or_else(PoisonError::into_inner);
        let cached = self.cache.current_size();
        let mut usage = self.lock();

        let shortfalls = self.shortfalls(&usage, demands, cached);
        if !shortfalls.is_empty() {
            return Err(shortfalls);
        }

        for &(resource, amount) in demands {
            if let Some(entry) = usage.get_mut(&resource) {
                entry.used += amount;
                entry.peak = entry.peak.max(entry.used);
            }
        }
        Ok(())
    }

    fn shortfalls(
        &self,
        usage: &HashMap<ResourceType, Usage>,
        demands: &[(ResourceType, u64)],
        cached: u64,
    ) -> Vec<Shortfall> {
        demands
            .iter()
            .filter_map(|&(resource, requested)| {
                let used = usage.get(&resource).map_or(0, |u| u.used);
                let resident = if resource == ResourceType::Memory { cached } else { 0 };
                let free = self.limits.available(resource).saturating_sub(used + resident);
                (requested > free).then_some((resource, requested, free))
            })
            .collect()
    }

    // ── Reclamation ─────────────────────────────────────────────

    /// Best-effort reclamation for one resource. Returns bytes evicted from
    /// the cache (always zero for non-memory types).
    ///
    /// Every step runs even when an earlier one fails; failures are logged.
    pub async fn reclaim(&self, resource: ResourceType, shortfall: u64) -> u64 {
        let freed = match resource {
            ResourceType::Memory => {
                let freed = self.cache.evict_bytes(shortfall);
                if let Err(e) = self.compress_memory().await {
                    warn!(error = %e, "memory compression failed during reclamation");
                }
                self.shrink_knob(self.config.pressure_knob_reduction);
                freed
            }
            ResourceType::Compute => {
                if let Err(e) = self.bounded(self.device.optimize_compute()).await {
                    warn!(error = %e, "compute optimization failed during reclamation");
                }
                0
            }
            ResourceType::Bandwidth => 0,
        };

        self.mark_reclaimed(&[resource]);
        info!(%resource, shortfall, freed, "reclamation finished");
        freed
    }

    /// Periodic sweep, independent of allocation pressure.
    ///
    /// Always compresses memory and optimizes compute. Cache eviction and knob
    /// reduction only happen while memory occupancy sits above the pressure
    /// threshold. Returns bytes evicted.
    pub async fn garbage_collect(&self) -> u64 {
        if let Err(e) = self.compress_memory().await {
            warn!(error = %e, "memory compression failed during sweep");
        }
        if let Err(e) = self.bounded(self.device.optimize_compute()).await {
            warn!(error = %e, "compute optimization failed during sweep");
        }

        let mut freed = 0;
        if self.limits.is_tracked(ResourceType::Memory) {
            let cached = self.cache.current_size();
            let used = self.lock().get(&ResourceType::Memory).map_or(0, |u| u.used);
            let available = self.limits.available(ResourceType::Memory);
            let threshold = (available as f64 * self.config.pressure_threshold) as u64;
            let occupancy = used + cached;

            if occupancy > threshold {
                freed = self.cache.evict_bytes(occupancy - threshold);
                self.shrink_knob(self.config.pressure_knob_reduction);
                info!(occupancy, threshold, freed, "memory pressure relieved by sweep");
            }
        }

        let swept: Vec<ResourceType> = [ResourceType::Memory, ResourceType::Compute]
            .into_iter()
            .filter(|ty| self.limits.is_tracked(*ty))
            .collect();
        self.mark_reclaimed(&swept);
        debug!(freed, "reclamation sweep done");
        freed
    }

    /// Run [`garbage_collect`](Self::garbage_collect) every `gc_interval` until
    /// `shutdown` is notified.
    pub fn spawn_periodic_gc(self: &Arc<Self>, shutdown: Arc<Notify>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let period = self.config.gc_interval();

        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            info!(interval_secs = period.as_secs(), "periodic reclamation started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        manager.garbage_collect().await;
                    }
                    _ = shutdown.notified() => {
                        info!("periodic reclamation stopped");
                        break;
                    }
                }
            }
        })
    }

    /// Drop every cache entry. Returns the bytes freed.
    pub fn clear_cache(&self) -> u64 {
        let freed = self.cache.clear();
        info!(freed, "cache cleared");
        freed
    }

    /// Ask the device to compact retained memory, bounded by the reclaim timeout.
    pub async fn compress_memory(&self) -> Result<(), DeviceError> {
        self.bounded(self.device.compress_memory()).await
    }

    async fn bounded<F>(&self, op: F) -> Result<(), DeviceError>
    where
        F: Future<Output = Result<(), DeviceError>>,
    {
        let limit = self.config.reclaim_timeout();
        match tokio::time::timeout(limit, op).await {
            Ok(result) => result,
            Err(_) => Err(DeviceError::Timeout(limit)),
        }
    }

    fn shrink_knob(&self, fraction: f64) {
        if let Some(knob) = &self.knob {
            if let Err(e) = knob.reduce_knob(fraction) {
                warn!(knob = knob.name(), error = %e, "knob reduction failed");
            }
        }
    }

    fn mark_reclaimed(&self, resources: &[ResourceType]) {
        let now = Utc::now();
        let mut usage = self.lock();
        for resource in resources {
            if let Some(entry) = usage.get_mut(resource) {
                entry.last_reclaim = Some(now);
                entry.reclaim_count += 1;
            }
        }
    }

    // ── Cache surface ───────────────────────────────────────────

    /// Cache `payload` in device memory.
    ///
    /// The entry must fit in the headroom left by task allocations; older
    /// entries are evicted to make room. Returns `false` when it cannot fit.
    pub fn cache_add(&self, key: impl Into<String>, payload: CachePayload, size_bytes: u64) -> bool {
        let _admission = self.admission.lock().unwrap_or_else(PoisonError::into_inner);
        let headroom = match self.lock().get(&ResourceType::Memory) {
            Some(u) => self.limits.available(ResourceType::Memory).saturating_sub(u.used),
            None => return false,
        };
        if size_bytes > headroom {
            debug!(size_bytes, headroom, "cache entry does not fit next to task allocations");
            return false;
        }
        self.cache.trim_to(headroom - size_bytes);
        self.cache.add(key, payload, size_bytes)
    }

    pub fn cache_get(&self, key: &str) -> Option<CachePayload> {
        self.cache.get(key)
    }

    // ── Introspection ───────────────────────────────────────────

    /// Stats for `resource`, or `None` when the type is not tracked.
    pub fn stats(&self, resource: ResourceType) -> Option<ResourceStats> {
        let cached = self.cache.current_size();
        let usage = self.lock();
        usage
            .get(&resource)
            .map(|u| self.render(resource, u, cached))
    }

    /// Stats for every tracked resource.
    pub fn snapshot(&self) -> BTreeMap<ResourceType, ResourceStats> {
        let cached = self.cache.current_size();
        let usage = self.lock();
        usage
            .iter()
            .map(|(&ty, u)| (ty, self.render(ty, u, cached)))
            .collect()
    }

    fn render(&self, resource: ResourceType, usage: &Usage, cached: u64) -> ResourceStats {
        ResourceStats {
            used: usage.used,
            reserved: self.limits.reserved(resource),
            available: self.limits.available(resource),
            peak: usage.peak,
            cached: if resource == ResourceType::Memory { cached } else { 0 },
            last_reclaim: usage.last_reclaim,
            reclaim_count: usage.reclaim_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use accel_core::{SimulatedDevice, TuningError};

    use super::*;

    struct CountingKnob(AtomicU32);

    impl TuningKnob for CountingKnob {
        fn name(&self) -> &str {
            "counting"
        }

        fn reduce_knob(&self, _fraction: f64) -> Result<(), TuningError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn limits(memory: u64, compute: u64) -> ResourceLimits {
        ResourceLimits {
            max_memory_bytes: memory,
            max_compute_units: compute,
            max_bandwidth_mbps: 0,
            reservation_fraction: 0.0,
        }
    }

    fn manager(limits: ResourceLimits, cache_capacity: u64) -> (ResourceManager, Arc<SimulatedDevice>) {
        let device = Arc::new(SimulatedDevice::new("gpu0"));
        let manager = ResourceManager::new(
            limits,
            Arc::new(CacheManager::new(cache_capacity)),
            device.clone(),
            ResourceConfig::default(),
        );
        (manager, device)
    }

    fn mem(bytes: u64) -> ResourceRequest {
        ResourceRequest::memory(bytes, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn allocate_updates_used_and_peak() {
        let (rm, _) = manager(limits(100, 8), 0);
        rm.allocate(&mem(40).with_compute_units(2)).await.unwrap();
        rm.allocate(&mem(30)).await.unwrap();
        rm.release(&mem(40).with_compute_units(2));

        let memory = rm.stats(ResourceType::Memory).unwrap();
        assert_eq!(memory.used, 30);
        assert_eq!(memory.peak, 70);
        assert_eq!(rm.stats(ResourceType::Compute).unwrap().used, 0);
    }

    #[tokio::test]
    async fn untracked_type_is_invalid() {
        let (rm, _) = manager(limits(100, 8), 0);
        let err = rm.allocate(&mem(10).with_bandwidth_mbps(5)).await.unwrap_err();
        assert_eq!(err, ResourceError::InvalidResourceType(ResourceType::Bandwidth));
        assert_eq!(rm.stats(ResourceType::Memory).unwrap().used, 0);
        assert!(rm.stats(ResourceType::Bandwidth).is_none());
    }

    #[tokio::test]
    async fn allocation_is_all_or_nothing() {
        let (rm, _) = manager(limits(100, 4), 0);
        let err = rm.allocate(&mem(10).with_compute_units(5)).await.unwrap_err();
        assert!(matches!(
            err,
            ResourceError::InsufficientResources { resource: ResourceType::Compute, requested: 5, free: 4 }
        ));
        assert_eq!(rm.stats(ResourceType::Memory).unwrap().used, 0);
    }

    #[tokio::test]
    async fn double_release_floors_at_zero() {
        let (rm, _) = manager(limits(100, 0), 0);
        rm.allocate(&mem(50)).await.unwrap();
        rm.release(&mem(50));
        rm.release(&mem(50));
        assert_eq!(rm.stats(ResourceType::Memory).unwrap().used, 0);
    }

    #[tokio::test]
    async fn reservation_fraction_caps_allocation() {
        let mut l = limits(100, 0);
        l.reservation_fraction = 0.2;
        let (rm, _) = manager(l, 0);
        assert!(rm.can_allocate(&mem(80)));
        assert!(!rm.can_allocate(&mem(81)));
        assert!(rm.allocate(&mem(81)).await.is_err());
    }

    #[tokio::test]
    async fn refused_allocation_reclaims_once() {
        let device = Arc::new(SimulatedDevice::new("gpu0"));
        let knob = Arc::new(CountingKnob(AtomicU32::new(0)));
        let rm = ResourceManager::new(
            limits(100, 0),
            Arc::new(CacheManager::new(100)),
            device.clone(),
            ResourceConfig::default(),
        )
        .with_tuning_knob(knob.clone());

        assert!(rm.allocate(&mem(120)).await.is_err());
        assert_eq!(device.compress_count(), 1);
        assert_eq!(knob.0.load(Ordering::SeqCst), 1);
        let stats = rm.stats(ResourceType::Memory).unwrap();
        assert_eq!(stats.reclaim_count, 1);
        assert!(stats.last_reclaim.is_some());
    }

    #[tokio::test]
    async fn compression_failure_does_not_stop_reclamation() {
        let (rm, device) = manager(limits(100, 0), 100);
        assert!(rm.cache_add("w", Arc::new(1u8), 60));
        device.set_fail_compress(true);

        rm.allocate(&mem(70)).await.unwrap();
        assert_eq!(rm.cache().current_size(), 0);
    }

    #[tokio::test]
    async fn cache_add_respects_task_headroom() {
        let (rm, _) = manager(limits(100, 0), 100);
        rm.allocate(&mem(70)).await.unwrap();

        assert!(!rm.cache_add("big", Arc::new(()), 40));
        assert!(rm.cache_add("a", Arc::new(1u32), 20));
        assert!(rm.cache_add("b", Arc::new(2u32), 20));
        // Only 30 bytes of headroom: "a" must go.
        assert!(rm.cache().current_size() <= 30);
        assert!(rm.cache_get("a").is_none());

        let payload = rm.cache_get("b").unwrap();
        assert_eq!(payload.downcast_ref::<u32>(), Some(&2));
    }

    #[tokio::test]
    async fn sweep_evicts_only_above_threshold() {
        let (rm, device) = manager(limits(100, 8), 100);
        rm.cache_add("a", Arc::new(()), 50);
        assert_eq!(rm.garbage_collect().await, 0);
        assert_eq!(device.compress_count(), 1);
        assert_eq!(device.optimize_count(), 1);

        rm.allocate(&mem(45)).await.unwrap();
        // occupancy 95 > 90
        assert_eq!(rm.garbage_collect().await, 50);
        assert_eq!(rm.stats(ResourceType::Memory).unwrap().cached, 0);
        assert_eq!(rm.stats(ResourceType::Compute).unwrap().reclaim_count, 2);
    }

    #[tokio::test]
    async fn slow_device_is_bounded() {
        let device = Arc::new(SimulatedDevice::new("gpu0").with_latency(Duration::from_secs(10)));
        let config = ResourceConfig {
            reclaim_timeout_ms: 20,
            ..ResourceConfig::default()
        };
        let rm = ResourceManager::new(limits(100, 0), Arc::new(CacheManager::new(0)), device, config);

        let err = rm.compress_memory().await.unwrap_err();
        assert_eq!(err, DeviceError::Timeout(Duration::from_millis(20)));
    }
}
