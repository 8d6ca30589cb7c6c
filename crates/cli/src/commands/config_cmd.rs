//! `contextrelay config`: Configuration management commands.

use contextrelay_config::{AppConfig, StoreBackendKind};
use std::path::Path;

pub async fn validate(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Validating configuration...");

    match super::load_config(config_path) {
        Ok(config) => {
            println!("   ✅ Config parsed successfully");

            let warnings = warnings(&config);
            if warnings.is_empty() {
                println!("   ✅ All checks passed");
            } else {
                println!();
                for w in &warnings {
                    println!("   ⚠️  {w}");
                }
            }

            println!();
            println!(
                "   Gateway:    {}:{}",
                config.gateway.host, config.gateway.port
            );
            println!(
                "   Embedding:  {} ({} dims)",
                config.embedding.provider.as_str(),
                config.embedding.effective_dimensions()
            );
            println!("   Store:      {}", config.store.backend.as_str());
            println!(
                "   Thresholds: relay {} / merge {} / search {}",
                config.relay.conflict_threshold,
                config.merge.similarity_threshold,
                config.search.similarity_threshold
            );
        }
        Err(e) => {
            println!("   ❌ Config error: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}

/// Non-fatal problems worth pointing out.
fn warnings(config: &AppConfig) -> Vec<&'static str> {
    let mut warnings = Vec::new();

    if config.embedding.provider.requires_api_key() && config.embedding.api_key.is_none() {
        warnings.push(
            "No embedding API key set (set VOYAGE_API_KEY or OPENAI_API_KEY); mock embeddings will be used",
        );
    }
    if config.store.backend == StoreBackendKind::Memory {
        warnings.push("In-memory store: contexts are lost on restart");
    }
    if config.gateway.enable_test_routes {
        warnings.push("Test routes are enabled; do not expose this server publicly");
    }
    if config.gateway.host == "0.0.0.0" && config.gateway.cors_origins.is_empty() {
        warnings.push("Public bind with CORS open to any origin");
    }

    warnings
}

pub async fn show(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config =
        super::load_config(config_path).map_err(|e| format!("Failed to load config: {e}"))?;
    if config.embedding.api_key.is_some() {
        config.embedding.api_key = Some("********".into());
    }
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

pub async fn init(config_path: Option<&Path>, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    let path = super::config_file(config_path);
    if path.exists() && !force {
        return Err(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        )
        .into());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, AppConfig::default_toml())?;
    println!("✅ Wrote {}", path.display());
    Ok(())
}

pub async fn path(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", super::config_file(config_path).display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_path_is_valid() {
        let path = crate::commands::config_file(None);
        assert!(path.to_str().unwrap().contains("config.toml"));
    }

    #[test]
    fn default_config_warns_about_memory_store() {
        let w = warnings(&AppConfig::default());
        assert!(w.iter().any(|w| w.contains("In-memory store")));
    }

    #[tokio::test]
    async fn init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        init(Some(&path), false).await.unwrap();
        let written = AppConfig::load_from(&path).unwrap();
        assert_eq!(written.gateway.port, AppConfig::default().gateway.port);

        assert!(init(Some(&path), false).await.is_err());
        assert!(init(Some(&path), true).await.is_ok());
    }
}
