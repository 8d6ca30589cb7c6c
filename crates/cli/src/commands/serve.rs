//! `contextrelay serve`: Start the HTTP API server.

use std::path::Path;

pub async fn run(
    config_path: Option<&Path>,
    host_override: Option<String>,
    port_override: Option<u16>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config =
        super::load_config(config_path).map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(host) = host_override {
        config.gateway.host = host;
    }
    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    println!("📡 ContextRelay");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!(
        "   Embedding: {} ({} dims)",
        config.embedding.provider.as_str(),
        config.embedding.effective_dimensions()
    );
    println!("   Store:     {}", config.store.backend.as_str());
    if config.gateway.enable_test_routes {
        println!("   ⚠️  Test routes enabled");
    }

    contextrelay_gateway::start(config).await?;

    Ok(())
}
