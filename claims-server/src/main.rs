use std::sync::Arc;

use claims_server::{Config, MemoryTransport, Server, print_banner, setup_environment};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Environment (dotenv, logging)
    setup_environment();

    print_banner();

    tracing::info!("Claims server starting...");

    // 2. Load configuration
    let config = Config::from_env();

    // 3. Bind the chat transport. A real deployment drops in a network
    //    implementation of ChatTransport here; the in-process transport
    //    keeps the binary self-contained.
    let transport = Arc::new(MemoryTransport::new());

    // 4. Run the event loop (Server::run starts the background tasks)
    let server = Server::new(config, transport);
    if let Err(e) = server.run().await {
        tracing::error!("Server error: {e}");
        return Err(e.into());
    }

    Ok(())
}
