use anyhow::{Context, Result};

use crate::cli::output::{OutputFormat, OutputOptions};
use crate::core::auth::TokenManager;
use crate::core::config::AppConfig;
use crate::core::token_store::TokenStore;

/// Delete the cached token and its encryption key.
pub async fn clear(config: &AppConfig, opts: &OutputOptions) -> Result<()> {
    let dir = config.token_dir();
    let tokens = TokenManager::new(
        &config.azure.authority_url,
        &config.azure.management_url,
        config.credentials(),
        TokenStore::new(&dir),
        config.timeout(),
    )
    .context("Failed to build token client")?;
    let removed = tokens
        .invalidate()
        .await
        .with_context(|| format!("Failed to clear token cache in {}", dir.display()))?;

    match opts.format {
        OutputFormat::Json => {
            let payload = serde_json::json!({
                "dir": dir,
                "removed": removed,
            });
            println!("{}", opts.to_json(&payload)?);
        }
        OutputFormat::Text => {
            if removed {
                println!("Cleared cached token in {}", dir.display());
            } else {
                println!("No cached token in {}", dir.display());
            }
        }
    }
    Ok(())
}
