//! Runs a responder and a caller over the in-memory transport.

use async_trait::async_trait;
use proven_messaging_memory::{MemoryBroker, MemoryTransport, MemoryTransportOptions};
use proven_messaging_rpc::{
    PushOptions, Queue, QueueOptions, RequestHandler, Responder, UsedResponder,
};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Serialize, Deserialize)]
struct Greeting {
    name: String,
}

#[derive(Clone)]
struct Greeter;

#[async_trait]
impl RequestHandler for Greeter {
    type Request = Greeting;

    async fn handle(&self, request: Greeting, responder: Responder) -> UsedResponder {
        responder.reply(&format!("hello, {}", request.name))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let broker = MemoryBroker::new();
    let options = MemoryTransportOptions::default().namespace("demo");

    let server = Queue::new(
        MemoryTransport::new(broker.clone(), options.clone()),
        QueueOptions::default(),
    );
    server.pull("greet", Greeter).await?;

    let client = Queue::new(
        MemoryTransport::new(broker, options),
        QueueOptions::default(),
    );
    let reply: String = client
        .push(
            "greet",
            &Greeting {
                name: "world".to_string(),
            },
            PushOptions::default(),
        )
        .await?;

    info!("{}", reply);

    client.close().await?;
    server.close().await?;

    Ok(())
}
