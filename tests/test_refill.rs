use std::time::Duration;
use token_bucket::TokenBucket;
use tokio::time;

const INTERVAL: Duration = Duration::from_millis(100);

/// Sleep slightly past the given number of ticks so the refill task has
/// already processed the last one when we resume.
async fn sleep_ticks(ticks: u32) {
    time::sleep(INTERVAL * ticks + Duration::from_millis(10)).await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn test_accrual() {
    let bucket = TokenBucket::builder()
        .capacity(10)
        .refill(2.0)
        .interval(INTERVAL)
        .initial(1)
        .build()
        .expect("build bucket");

    bucket.start();

    sleep_ticks(3).await;
    assert_eq!(bucket.tokens(), 7.0);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn test_clamped_at_capacity() {
    let bucket = TokenBucket::builder()
        .capacity(10)
        .refill(3.0)
        .interval(INTERVAL)
        .initial(9)
        .build()
        .expect("build bucket");

    bucket.start();

    // The excess above capacity is discarded, not carried forward.
    sleep_ticks(1).await;
    assert_eq!(bucket.tokens(), 10.0);

    sleep_ticks(5).await;
    assert_eq!(bucket.tokens(), 10.0);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn test_fractional_refill() {
    let bucket = TokenBucket::builder()
        .capacity(4)
        .refill(0.5)
        .interval(INTERVAL)
        .initial(0)
        .build()
        .expect("build bucket");

    bucket.start();

    sleep_ticks(1).await;
    assert!(!bucket.try_consume(1));

    sleep_ticks(1).await;
    assert!(bucket.try_consume(1));
    assert_eq!(bucket.tokens(), 0.0);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn test_no_accrual_before_start() {
    let bucket = TokenBucket::builder()
        .capacity(10)
        .refill(1.0)
        .interval(INTERVAL)
        .initial(2)
        .build()
        .expect("build bucket");

    assert!(!bucket.is_running());

    sleep_ticks(5).await;
    assert_eq!(bucket.tokens(), 2.0);
}
