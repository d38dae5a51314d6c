//! Background maintenance tests: idle eviction, lifetime retirement,
//! keepalive validation, and minimum-idle top-up with creation backoff.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use corral::{Context, Error, Outcome, Pool, PoolConfig, PoolStats, ResourceFactory, Result};

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

struct CountingFactory {
    counter: AtomicU64,
}

impl CountingFactory {
    fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }
}

impl ResourceFactory for CountingFactory {
    type Resource = u64;

    fn name(&self) -> &str {
        "counting"
    }

    async fn create(&self, _ctx: &Context) -> Result<u64> {
        Ok(self.counter.fetch_add(1, Ordering::SeqCst))
    }
}

/// Factory whose resources stop validating when `valid` is cleared.
struct FlakyFactory {
    counter: AtomicU64,
    valid: Arc<AtomicBool>,
}

impl ResourceFactory for FlakyFactory {
    type Resource = u64;

    fn name(&self) -> &str {
        "flaky"
    }

    async fn create(&self, _ctx: &Context) -> Result<u64> {
        Ok(self.counter.fetch_add(1, Ordering::SeqCst))
    }

    async fn validate(&self, _resource: &mut u64) -> Result<bool> {
        Ok(self.valid.load(Ordering::SeqCst))
    }
}

/// Factory that fails its first `failures` creations, then heals.
struct RecoveringFactory {
    counter: AtomicU64,
    failures: AtomicI64,
}

impl ResourceFactory for RecoveringFactory {
    type Resource = u64;

    fn name(&self) -> &str {
        "recovering"
    }

    async fn create(&self, _ctx: &Context) -> Result<u64> {
        if self.failures.fetch_sub(1, Ordering::SeqCst) > 0 {
            return Err(Error::creation("injected creation failure"));
        }
        Ok(self.counter.fetch_add(1, Ordering::SeqCst))
    }
}

fn ctx() -> Context {
    Context::new("test")
}

/// Poll `stats()` until `predicate` holds or `deadline` elapses.
async fn wait_for<F>(pool_stats: impl Fn() -> PoolStats, predicate: F, what: &str)
where
    F: Fn(&PoolStats) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let stats = pool_stats();
        if predicate(&stats) {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}; last stats: {stats:?}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

// ---------------------------------------------------------------------------
// Idle count converges back to min_idle as excess idle slots retire
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn idle_count_converges_to_min_idle() {
    let config = PoolConfig {
        min_idle: 8,
        max_size: 20,
        idle_timeout: Duration::from_millis(25),
        max_lifetime: Duration::ZERO,
        keepalive_interval: Duration::ZERO,
        maintenance_interval: Duration::from_millis(10),
        ..Default::default()
    };
    let pool = Pool::new(CountingFactory::new(), config).unwrap();

    // Push the idle population well above the target.
    let mut leases = Vec::new();
    for _ in 0..12 {
        leases.push(pool.acquire(&ctx()).await.unwrap());
    }
    for lease in leases {
        lease.release(Outcome::Ok).await;
    }

    let stats_pool = pool.clone();
    wait_for(
        move || stats_pool.stats(),
        |stats| stats.idle == 8 && stats.in_use == 0,
        "idle count to converge to min_idle",
    )
    .await;

    // And it stays there.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let stats = pool.stats();
    assert_eq!(stats.idle, 8);
    assert_eq!(stats.in_use, 0);
}

// ---------------------------------------------------------------------------
// An in-use slot past max_lifetime is only marked; destroyed on release
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn in_use_past_lifetime_retires_on_release() {
    let config = PoolConfig {
        min_idle: 0,
        max_size: 5,
        max_lifetime: Duration::from_millis(50),
        idle_timeout: Duration::ZERO,
        keepalive_interval: Duration::ZERO,
        maintenance_interval: Duration::from_millis(10),
        ..Default::default()
    };
    let pool = Pool::new(CountingFactory::new(), config).unwrap();

    let lease = pool.acquire(&ctx()).await.unwrap();
    assert_eq!(*lease, 0);

    // Outlive the max lifetime while still holding the lease.
    tokio::time::sleep(Duration::from_millis(120)).await;
    let stats = pool.stats();
    assert_eq!(stats.retiring, 1, "slot should be marked, not closed");
    assert_eq!(stats.in_use, 0);
    assert_eq!(
        stats.total_destroyed, 0,
        "resource must not be destroyed while held"
    );

    // The caller's release succeeds and only then is the slot destroyed.
    lease.release(Outcome::Ok).await;
    let stats = pool.stats();
    assert_eq!(stats.retiring, 0);
    assert_eq!(stats.total_destroyed, 1);

    // The next acquire gets a fresh resource.
    let fresh = pool.acquire(&ctx()).await.unwrap();
    assert_eq!(*fresh, 1);
    fresh.release(Outcome::Ok).await;
}

// ---------------------------------------------------------------------------
// Keepalive: silent failures are detected and retired
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn keepalive_retires_resource_that_stops_validating() {
    let valid = Arc::new(AtomicBool::new(true));
    let factory = FlakyFactory {
        counter: AtomicU64::new(0),
        valid: valid.clone(),
    };
    let config = PoolConfig {
        min_idle: 0,
        max_size: 5,
        max_lifetime: Duration::ZERO,
        idle_timeout: Duration::ZERO,
        keepalive_interval: Duration::from_millis(20),
        maintenance_interval: Duration::from_millis(10),
        ..Default::default()
    };
    let pool = Pool::new(factory, config).unwrap();

    let lease = pool.acquire(&ctx()).await.unwrap();
    lease.release(Outcome::Ok).await;
    assert_eq!(pool.stats().idle, 1);

    // The resource silently dies.
    valid.store(false, Ordering::SeqCst);

    let stats_pool = pool.clone();
    wait_for(
        move || stats_pool.stats(),
        |stats| stats.idle == 0 && stats.total_destroyed == 1,
        "keepalive to retire the dead resource",
    )
    .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn keepalive_keeps_healthy_resource() {
    let valid = Arc::new(AtomicBool::new(true));
    let factory = FlakyFactory {
        counter: AtomicU64::new(0),
        valid,
    };
    let config = PoolConfig {
        min_idle: 0,
        max_size: 5,
        max_lifetime: Duration::ZERO,
        idle_timeout: Duration::ZERO,
        keepalive_interval: Duration::from_millis(20),
        maintenance_interval: Duration::from_millis(10),
        ..Default::default()
    };
    let pool = Pool::new(factory, config).unwrap();

    let lease = pool.acquire(&ctx()).await.unwrap();
    lease.release(Outcome::Ok).await;

    // Several keepalive rounds pass; the resource survives them all.
    tokio::time::sleep(Duration::from_millis(150)).await;
    let stats_pool = pool.clone();
    wait_for(
        move || stats_pool.stats(),
        |stats| stats.idle == 1,
        "the validated resource to be parked back idle",
    )
    .await;
    let stats = pool.stats();
    assert_eq!(stats.total_created, 1);
    assert_eq!(stats.total_destroyed, 0);
}

// ---------------------------------------------------------------------------
// isolate_internal_ops: keepalive runs as a regular lease
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn isolated_keepalive_counts_as_use() {
    let valid = Arc::new(AtomicBool::new(true));
    let factory = FlakyFactory {
        counter: AtomicU64::new(0),
        valid,
    };
    let config = PoolConfig {
        min_idle: 0,
        max_size: 5,
        max_lifetime: Duration::ZERO,
        idle_timeout: Duration::ZERO,
        keepalive_interval: Duration::from_millis(20),
        maintenance_interval: Duration::from_millis(10),
        isolate_internal_ops: true,
        ..Default::default()
    };
    let pool = Pool::new(factory, config).unwrap();

    let lease = pool.acquire(&ctx()).await.unwrap();
    lease.release(Outcome::Ok).await;

    let stats_pool = pool.clone();
    wait_for(
        move || stats_pool.stats(),
        |stats| {
            stats.total_acquisitions >= 2
                && stats.total_acquisitions == stats.total_releases
                && stats.idle == 1
        },
        "an isolated keepalive lease to show up in the counters",
    )
    .await;

    let stats = pool.stats();
    assert_eq!(stats.total_destroyed, 0);
}

// ---------------------------------------------------------------------------
// Top-up retries with backoff and recovers once the factory heals
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn top_up_backs_off_then_recovers() {
    let factory = RecoveringFactory {
        counter: AtomicU64::new(0),
        failures: AtomicI64::new(3),
    };
    let config = PoolConfig {
        min_idle: 2,
        max_size: 5,
        max_lifetime: Duration::ZERO,
        idle_timeout: Duration::ZERO,
        keepalive_interval: Duration::ZERO,
        maintenance_interval: Duration::from_millis(10),
        ..Default::default()
    };
    let pool = Pool::new(factory, config).unwrap();

    let stats_pool = pool.clone();
    wait_for(
        move || stats_pool.stats(),
        |stats| stats.idle == 2,
        "top-up to reach min_idle after the factory heals",
    )
    .await;

    let stats = pool.stats();
    assert_eq!(stats.total_created, 2);
    assert_eq!(stats.pending_creates, 0);
}
