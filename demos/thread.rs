//! Run functions inside a long-lived remote thread.
//!
//! ```text
//! BAS_PORT=9000 cargo run --example thread
//! ```

use bas_remote::{BasError, Client};
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

    let mut thread = client.create_thread();
    thread.start().await?;
    println!("thread {} started", thread.id());

    let runner = thread.run_function("Add", json!({"X": 4, "Y": 5}))?;

    // One function at a time per thread.
    match thread.run_function("Add", json!({"X": 1, "Y": 1})) {
        Err(BasError::AlreadyRunning) => println!("thread busy, second call rejected"),
        Err(e) => return Err(e.into()),
        Ok(_) => println!("second call accepted"),
    }

    println!("Add(4, 5) = {}", runner.await?);

    thread.stop().await?;
    client.close().await?;
    Ok(())
}
