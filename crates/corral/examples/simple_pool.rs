//! Simple pooling example
//!
//! Demonstrates basic pool usage with a fake connection factory.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use corral::{Context, Outcome, Pool, PoolConfig, ResourceFactory, Result};

/// Fake connection handle standing in for a real driver's connection.
#[derive(Debug)]
struct Connection {
    id: u64,
}

/// Factory that simulates opening connections to a database.
struct ConnectionFactory {
    next_id: AtomicU64,
}

impl ResourceFactory for ConnectionFactory {
    type Resource = Connection;

    fn name(&self) -> &str {
        "example-db"
    }

    async fn create(&self, ctx: &Context) -> Result<Connection> {
        // Simulate connection latency
        tokio::time::sleep(Duration::from_millis(50)).await;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        println!("  [factory] opened connection {id} for {}", ctx.caller);
        Ok(Connection { id })
    }

    async fn destroy(&self, connection: Connection) -> Result<()> {
        println!("  [factory] closed connection {}", connection.id);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    println!("=== Simple Pool Example ===\n");

    let config = PoolConfig {
        min_idle: 2,
        max_size: 10,
        acquire_timeout: Duration::from_secs(5),
        ..Default::default()
    };

    let pool = Pool::new(
        ConnectionFactory {
            next_id: AtomicU64::new(0),
        },
        config,
    )?;

    println!("Pool created (min_idle: 2, max_size: 10)\n");

    // Acquire a connection
    let ctx = Context::new("example-worker");
    println!("Acquiring connection...");
    let lease = pool.acquire(&ctx).await?;
    println!("  Got connection {} on {}\n", lease.id, lease.slot_id());

    let stats = pool.stats();
    println!("Pool statistics:");
    println!("  - In use: {}", stats.in_use);
    println!("  - Idle: {}", stats.idle);
    println!("  - Total acquisitions: {}", stats.total_acquisitions);

    // Return the connection
    lease.release(Outcome::Ok).await;

    let stats = pool.stats();
    println!("\nAfter release:");
    println!("  - In use: {}", stats.in_use);
    println!("  - Idle: {}", stats.idle);

    pool.close().await;
    println!("\n=== Example completed! ===");

    Ok(())
}
