use std::time::Duration;
use token_bucket::TokenBucket;

fn init_logging() {
    use tracing_subscriber::prelude::*;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_level(true)
                .compact(),
        )
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let bucket = TokenBucket::builder()
        .capacity(3)
        .refill(1.0)
        .interval(Duration::from_millis(500))
        .initial(0)
        .verbose(true)
        .build()?;

    bucket.start();

    // Logs the estimated ready time for the failed attempt.
    assert!(!bucket.try_consume(3));

    bucket.consume(3).await?;
    println!("consumed a burst of three");

    // Simulate an upstream back-off request. Refilling pauses for two
    // seconds, then the next consume is served.
    bucket.force_stop_for(Duration::from_secs(2));
    bucket.consume(1).await?;
    println!("consumed one more after the forced pause");

    Ok(())
}
