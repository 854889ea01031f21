//! Print every connection event while running one function.
//!
//! ```text
//! BAS_PORT=9000 cargo run --example events
//! ```

use bas_remote::{Client, Event};
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

    let mut builder = Client::builder().script("TestRemoteControl").port(port);
    let mut events = builder.subscribe();

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match &event {
                Event::MessageReceived(message) | Event::MessageSent(message) => {
                    println!("{:<17} {} id={}", event.name(), message.kind(), message.id);
                }
                Event::Fatal(reason) => println!("{:<17} {}", event.name(), reason),
                _ => println!("{}", event.name()),
            }
            if event == Event::SocketClosed {
                break;
            }
        }
    });

    let client = builder.start().await?;
    let result = client
        .run_function("Add", json!({"X": 10, "Y": 20}))?
        .await?;
    println!("result: {}", result);

    client.close().await?;
    printer.await?;
    Ok(())
}
