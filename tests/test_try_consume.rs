use std::time::Duration;
use token_bucket::TokenBucket;
use tokio::time;

const INTERVAL: Duration = Duration::from_secs(1);

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn test_consume_scenario() {
    let bucket = TokenBucket::builder()
        .capacity(10)
        .refill(1.0)
        .interval(INTERVAL)
        .initial(10)
        .build()
        .expect("build bucket");

    bucket.start();

    assert!(bucket.try_consume(5));
    assert_eq!(bucket.tokens(), 5.0);

    // Not enough tokens: a normal failure which leaves the bucket untouched.
    assert!(!bucket.try_consume(6));
    assert_eq!(bucket.tokens(), 5.0);

    time::sleep(INTERVAL + Duration::from_millis(10)).await;
    assert_eq!(bucket.tokens(), 6.0);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn test_failed_consume_keeps_level() {
    let bucket = TokenBucket::builder()
        .capacity(10)
        .refill(1.0)
        .interval(INTERVAL)
        .initial(10)
        .build()
        .expect("build bucket");

    assert!(bucket.try_consume(3));
    // capacity - k + 1 can never fit next to the first consume.
    assert!(!bucket.try_consume(8));
    assert_eq!(bucket.tokens(), 7.0);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn test_over_capacity_is_permanent() {
    let bucket = TokenBucket::builder()
        .capacity(10)
        .refill(10.0)
        .interval(INTERVAL)
        .initial(10)
        .build()
        .expect("build bucket");

    bucket.start();

    // Even a brimful bucket cannot serve more than its capacity, and no
    // amount of refilling will change that.
    assert!(!bucket.try_consume(11));
    assert_eq!(bucket.tokens(), 10.0);

    time::sleep(INTERVAL * 3).await;
    assert!(!bucket.try_consume(11));
    assert_eq!(bucket.tokens(), 10.0);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn test_default_amount_of_one() {
    let bucket = TokenBucket::builder()
        .capacity(2)
        .refill(1.0)
        .interval(INTERVAL)
        .initial(1)
        .build()
        .expect("build bucket");

    assert!(bucket.try_consume(1));
    assert!(!bucket.try_consume(1));
    assert_eq!(bucket.tokens(), 0.0);
}
