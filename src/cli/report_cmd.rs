use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde::Serialize;

use crate::cli::output::{OutputFormat, OutputOptions};
use crate::cli::renderer;
use crate::core::api::BillingClient;
use crate::core::auth::TokenManager;
use crate::core::config::{validate_subscriptions, AppConfig, SubscriptionConfig};
use crate::core::html::HtmlRenderer;
use crate::core::notify::{Delivery, Notifier};
use crate::core::report::{ReportRunner, ReportTotals, RunReport};
use crate::core::token_store::TokenStore;

#[derive(Debug, Clone, Default)]
pub struct ReportArgs {
    /// Write the rendered HTML here.
    pub preview: Option<PathBuf>,
    /// Skip email and webhook delivery.
    pub no_send: bool,
    /// Limit the run to these subscription ids.
    pub subscriptions: Vec<String>,
}

#[derive(Serialize)]
struct ReportPayload<'a> {
    #[serde(flatten)]
    report: &'a RunReport,
    totals: ReportTotals,
    deliveries: &'a [Delivery],
}

/// Configured subscriptions narrowed to `filter`. Ids missing from the
/// config are still queried, with the start day looked up.
pub fn select_subscriptions(configured: &[SubscriptionConfig], filter: &[String]) -> Vec<SubscriptionConfig> {
    if filter.is_empty() {
        return configured.to_vec();
    }
    filter
        .iter()
        .map(|id| {
            configured
                .iter()
                .find(|s| &s.id == id)
                .cloned()
                .unwrap_or_else(|| SubscriptionConfig {
                    id: id.clone(),
                    billing_start_day: None,
                })
        })
        .collect()
}

fn write_preview(path: &Path, html: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, html).with_context(|| format!("Failed to write preview {}", path.display()))?;
    tracing::info!(path = %path.display(), "Preview written");
    Ok(())
}

pub async fn run(config: &AppConfig, args: &ReportArgs, opts: &OutputOptions) -> Result<()> {
    let subscriptions = select_subscriptions(&config.subscriptions, &args.subscriptions);

    let mut issues = config.validate_connection();
    issues.extend(validate_subscriptions(&subscriptions));
    if !args.no_send {
        issues.extend(config.validate_notify());
    }
    if !issues.is_empty() {
        bail!(
            "Invalid configuration:\n  - {}\nRun `azcost config check` for details.",
            issues.join("\n  - ")
        );
    }

    let timeout = config.timeout();

    let store = TokenStore::new(config.token_dir());
    let tokens = TokenManager::new(
        &config.azure.authority_url,
        &config.azure.management_url,
        config.credentials(),
        store,
        timeout,
    )
    .context("Failed to build token client")?;
    let client = BillingClient::new(&config.azure.management_url, timeout, config.retry_policy())
        .context("Failed to build billing client")?;
    let html = HtmlRenderer::new(&config.report.currency_symbol)?;
    let notifier = Notifier::from_config(config)?;
    let subject = config.notify.subject.as_str();

    let runner = ReportRunner::new(
        Arc::new(tokens),
        Arc::new(client),
        subscriptions,
        config.fetch.concurrency,
        &config.report.currency_symbol,
    );

    let now = Utc::now();
    let report = match runner.run(now).await {
        Ok(report) => report,
        Err(e) if e.is_fatal() => {
            tracing::error!(error = %e, "Report run aborted");
            let page = html.render_error(subject, &e.to_string(), now.date_naive())?;
            if let Some(path) = &args.preview {
                write_preview(path, &page)?;
            }
            if !args.no_send {
                notifier.send(&format!("{} - Failed", subject), &page).await;
            }
            return Err(e).context("Report run aborted");
        }
        Err(e) => return Err(e).context("Report run failed"),
    };

    let page = html.render_report(&report, subject)?;
    if let Some(path) = &args.preview {
        write_preview(path, &page)?;
    }

    let deliveries = if args.no_send {
        Vec::new()
    } else {
        notifier.send(subject, &page).await
    };
    let failed = deliveries.iter().filter(|d| !d.succeeded()).count();
    if failed > 0 {
        tracing::warn!(failed, "Some notifications were not delivered");
    }

    match opts.format {
        OutputFormat::Text => {
            println!(
                "{}",
                renderer::render_report(&report, &config.report.currency_symbol, opts.use_color)
            );
            if !deliveries.is_empty() && !opts.quiet {
                println!("\n{}", renderer::render_deliveries(&deliveries, opts.use_color));
            }
        }
        OutputFormat::Json => {
            let payload = ReportPayload {
                report: &report,
                totals: report.totals(),
                deliveries: &deliveries,
            };
            println!("{}", opts.to_json(&payload)?);
        }
    }

    if report.degraded_count() > 0 && opts.verbose {
        for sub in report.subscriptions.iter().filter(|s| s.is_degraded()) {
            eprintln!(
                "Incomplete data for {}: {}",
                sub.name,
                sub.error.as_deref().unwrap_or_default()
            );
        }
    }

    Ok(())
}
