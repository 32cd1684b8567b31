use std::path::Path;

use anyhow::{Context, Result};

use crate::cli::output::{OutputFormat, OutputOptions};
use crate::core::config::AppConfig;

/// Placeholder values written by `config init` so the file shows every key.
fn template_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.azure.tenant_id = "<tenant-id>".into();
    config.azure.client_id = "<client-id>".into();
    config.azure.client_secret = "<client-secret>".into();
    config.subscriptions.push(crate::core::config::SubscriptionConfig {
        id: "<subscription-id>".into(),
        billing_start_day: Some(1),
    });
    config.smtp.server = Some("smtp.example.com".into());
    config.smtp.from = Some("reports@example.com".into());
    config.smtp.to = vec!["team@example.com".into()];
    config
}

pub fn init(path: &Path, _opts: &OutputOptions) -> Result<()> {
    if path.exists() {
        eprintln!("Config file already exists at {}", path.display());
        eprintln!("Remove it first if you want to regenerate.");
        return Ok(());
    }

    let path = template_config()
        .save(path)
        .with_context(|| format!("Failed to generate config at {}", path.display()))?;
    println!("Generated config at {}", path.display());
    println!("  Fill in the azure credentials and subscriptions, then run `azcost config check`.");
    Ok(())
}

pub fn check(path: &Path, config: &AppConfig, opts: &OutputOptions) -> Result<()> {
    let issues = config.validate();

    if let OutputFormat::Json = opts.format {
        let payload = serde_json::json!({
            "path": path,
            "valid": issues.is_empty(),
            "issues": issues,
        });
        println!("{}", opts.to_json(&payload)?);
    } else if issues.is_empty() {
        println!("Config is valid: {}", path.display());
        println!(
            "  {} subscription{}, notify via {:?}",
            config.subscriptions.len(),
            if config.subscriptions.len() == 1 { "" } else { "s" },
            config.notify.method
        );
    } else {
        eprintln!("Config issues found in {}:", path.display());
        for issue in &issues {
            eprintln!("  - {}", issue);
        }
    }

    if !issues.is_empty() {
        std::process::exit(1);
    }
    Ok(())
}

/// Print the effective config with secrets masked.
pub fn show(config: &AppConfig, opts: &OutputOptions) -> Result<()> {
    let masked = masked(config);
    match opts.format {
        OutputFormat::Json => println!("{}", opts.to_json(&masked)?),
        OutputFormat::Text => print!("{}", toml::to_string_pretty(&masked)?),
    }
    Ok(())
}

fn mask(secret: &str) -> String {
    if secret.is_empty() {
        String::new()
    } else {
        "********".to_string()
    }
}

fn masked(config: &AppConfig) -> AppConfig {
    let mut config = config.clone();
    config.azure.client_secret = mask(&config.azure.client_secret);
    config.smtp.password = config.smtp.password.as_deref().map(mask);
    config
}
