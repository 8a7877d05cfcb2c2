use std::time::Duration;
use token_bucket::TokenBucket;

#[tokio::main]
async fn main() -> Result<(), token_bucket::Error> {
    let bucket = TokenBucket::builder()
        .capacity(5)
        .refill(1.0)
        .interval(Duration::from_millis(200))
        .initial(0)
        .build()?;

    bucket.start();

    println!("Waiting for tokens...");
    // should take about a second to be served.
    bucket.consume(5).await?;
    println!("I made it!");

    Ok(())
}
