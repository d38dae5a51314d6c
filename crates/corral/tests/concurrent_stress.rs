//! Concurrent stress tests for the pool.
//!
//! Verifies that many tasks doing acquire/release cycles never deadlock,
//! never share a slot, and that cancelling one worker leaves its peers
//! untouched: the scenario the pool exists to get right.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use corral::{Context, Error, Outcome, Pool, PoolConfig, ResourceFactory, Result, SlotId};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

struct StressFactory {
    create_count: AtomicU64,
}

impl StressFactory {
    fn new() -> Self {
        Self {
            create_count: AtomicU64::new(0),
        }
    }
}

impl ResourceFactory for StressFactory {
    type Resource = u64;

    fn name(&self) -> &str {
        "stress"
    }

    async fn create(&self, _ctx: &Context) -> Result<u64> {
        let id = self.create_count.fetch_add(1, Ordering::SeqCst);
        // Simulate small creation latency
        tokio::time::sleep(Duration::from_micros(100)).await;
        Ok(id)
    }
}

fn quiet_config(max_size: usize) -> PoolConfig {
    PoolConfig {
        min_idle: 0,
        max_size,
        max_lifetime: Duration::ZERO,
        idle_timeout: Duration::ZERO,
        keepalive_interval: Duration::ZERO,
        maintenance_interval: Duration::from_secs(3600),
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// 50 tasks of random acquire/release cycles: no deadlock, no sharing
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stress_50_tasks_no_deadlock_no_shared_slots() {
    let config = PoolConfig {
        acquire_timeout: Duration::from_secs(10),
        ..quiet_config(10)
    };
    let pool = Arc::new(Pool::new(StressFactory::new(), config).unwrap());
    let leased: Arc<Mutex<HashSet<SlotId>>> = Arc::new(Mutex::new(HashSet::new()));

    let success_count = Arc::new(AtomicU64::new(0));
    let mut set = JoinSet::new();

    for task in 0..50 {
        let pool = Arc::clone(&pool);
        let leased = Arc::clone(&leased);
        let success_count = Arc::clone(&success_count);
        set.spawn(async move {
            let ctx = Context::new(format!("task-{task}"));
            for _ in 0..20 {
                let lease = pool.acquire(&ctx).await.expect("task should acquire");
                {
                    let mut out = leased.lock().unwrap();
                    assert!(
                        out.insert(lease.slot_id()),
                        "slot {} granted to two leases at once",
                        lease.slot_id()
                    );
                }
                // Simulate some work
                tokio::time::sleep(Duration::from_millis(1)).await;
                let _val: u64 = *lease;
                leased.lock().unwrap().remove(&lease.slot_id());
                lease.release(Outcome::Ok).await;
            }
            success_count.fetch_add(1, Ordering::SeqCst);
        });
    }

    // Wait for all tasks (timeout as safety net against deadlock)
    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    while let Some(result) = tokio::time::timeout_at(deadline, set.join_next())
        .await
        .expect("stress test should not deadlock (30s timeout)")
    {
        result.expect("task should not panic");
    }

    assert_eq!(success_count.load(Ordering::SeqCst), 50);

    let stats = pool.stats();
    assert_eq!(stats.in_use, 0, "no slots in use after all tasks complete");
    assert_eq!(stats.total_acquisitions, 1000, "50 tasks x 20 cycles");
    assert_eq!(stats.total_releases, stats.total_acquisitions);
    assert!(stats.total_destroyed <= stats.total_created);
    assert!(
        stats.idle + stats.in_use + stats.retiring + stats.pending_creates <= 10,
        "capacity invariant violated"
    );
}

// ---------------------------------------------------------------------------
// The original reproduction: interrupting one worker must not break the other
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancelling_one_worker_leaves_the_other_unaffected() {
    let config = PoolConfig {
        min_idle: 8,
        max_size: 20,
        maintenance_interval: Duration::from_millis(50),
        ..quiet_config(20)
    };
    let pool = Pool::new(StressFactory::new(), config).unwrap();

    let stop = Arc::new(AtomicBool::new(false));

    // Worker A: periodic acquire → trivial round-trip → release. Any error
    // here is the bug the pool must not have.
    let a_errors = Arc::new(AtomicU64::new(0));
    let a = {
        let pool = pool.clone();
        let stop = Arc::clone(&stop);
        let a_errors = Arc::clone(&a_errors);
        tokio::spawn(async move {
            let ctx = Context::new("worker-a");
            while !stop.load(Ordering::SeqCst) {
                match pool.acquire(&ctx).await {
                    Ok(lease) => {
                        tokio::time::sleep(Duration::from_millis(2)).await;
                        lease.release(Outcome::Ok).await;
                    }
                    Err(_) => {
                        a_errors.fetch_add(1, Ordering::SeqCst);
                    }
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
    };

    // Worker B: same loop, but its context carries a token we will fire.
    let b_token = CancellationToken::new();
    let b = {
        let pool = pool.clone();
        let token = b_token.clone();
        tokio::spawn(async move {
            let ctx = Context::new("worker-b").with_cancellation(token.clone());
            loop {
                match pool.acquire(&ctx).await {
                    Ok(lease) => {
                        tokio::time::sleep(Duration::from_millis(2)).await;
                        lease.release(Outcome::Ok).await;
                    }
                    Err(Error::Cancelled { .. }) => return,
                    Err(other) => panic!("worker B saw unexpected error: {other:?}"),
                }
                if token.is_cancelled() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
    };

    // Let both workers run, then interrupt B mid-flight.
    tokio::time::sleep(Duration::from_millis(200)).await;
    b_token.cancel();
    b.await.expect("worker B should wind down cleanly");

    // A keeps going for a while after the interruption.
    tokio::time::sleep(Duration::from_millis(200)).await;
    stop.store(true, Ordering::SeqCst);
    a.await.expect("worker A should not panic");

    assert_eq!(
        a_errors.load(Ordering::SeqCst),
        0,
        "worker A must never observe an error"
    );

    // The pool is still fully serviceable.
    let probe = pool
        .acquire_with_timeout(&Context::new("probe"), Duration::from_secs(2))
        .await
        .expect("pool must stay healthy after a worker is cancelled");
    probe.release(Outcome::Ok).await;

    let stats = pool.stats();
    assert_eq!(stats.in_use, 0);
    assert!(stats.idle + stats.pending_creates <= 20);
}
