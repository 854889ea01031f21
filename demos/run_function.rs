//! Run a script function against a running engine.
//!
//! Start the engine with the `TestRemoteControl` script listening on a
//! port, then:
//!
//! ```text
//! BAS_PORT=9000 RUST_LOG=bas_remote=debug cargo run --example run_function
//! ```

use bas_remote::Client;
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let port: u16 = std::env::var("BAS_PORT")
        .unwrap_or_else(|_| "9000".to_string())
        .parse()?;

    let client = Client::builder()
        .script("TestRemoteControl")
        .port(port)
        .start()
        .await?;

    let sum = client
        .run_function("Add", json!({"X": 2, "Y": 3}))?
        .await?;
    println!("Add(2, 3) = {}", sum);

    // Fan out several calls; they resolve independently.
    let runners = (0..4)
        .map(|i| client.run_function("Add", json!({"X": i, "Y": i})))
        .collect::<Result<Vec<_>, _>>()?;
    for (i, runner) in runners.into_iter().enumerate() {
        println!("Add({i}, {i}) = {}", runner.await?);
    }

    client.close().await?;
    Ok(())
}
