//! Per-recipient report messages and their delivery.

use crate::config::NotifyConfig;
use crate::models::QueryWindow;
use crate::reconcile::ReconciliationSummary;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ReportMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    pub attachment: PathBuf,
}

/// Python-style capitalisation: first char upper, rest lower.
fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// Greeting derived from the address: "jan.novak@x.com" → "Jan Novak".
/// Only the first two dot-separated parts of the local part are used.
pub fn greeting_name(email: &str) -> String {
    let local = email.trim().split('@').next().unwrap_or_default();
    local
        .split('.')
        .take(2)
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ")
}

fn sign_off(contact: Option<&str>) -> String {
    match contact {
        Some(c) => format!(
            "Please do not reply to this message; with any questions write directly to {c}."
        ),
        None => "Please do not reply to this message.".to_string(),
    }
}

// ── Daily listing report ──────────────────────────────────────────────────────

pub struct ListingDigest<'a> {
    pub window: QueryWindow,
    pub listings: usize,
    pub summaries: &'a [ReconciliationSummary],
    pub manual_review: usize,
    pub attachment: PathBuf,
}

pub fn compose_listing_report(
    sender: &str,
    recipient: &str,
    today: NaiveDate,
    digest: &ListingDigest<'_>,
    contact: Option<&str>,
) -> ReportMessage {
    let mut body = format!(
        "Dear {},\n\n\
         please find the new listings from eauction.gr posted {} to {} \
         (on Mondays this includes the weekend).\n\n\
         There were {} auctions added, of which:\n",
        greeting_name(recipient),
        digest.window.from,
        digest.window.to,
        digest.listings,
    );
    for s in digest.summaries {
        body.push_str(&format!("  {s}\n"));
    }
    body.push_str(&format!(
        "\n{} auctions have to be checked manually.\n\n{}\n",
        digest.manual_review,
        sign_off(contact)
    ));

    ReportMessage {
        from: sender.to_string(),
        to: recipient.trim().to_string(),
        subject: format!("GR auction data {today}"),
        body,
        attachment: digest.attachment.clone(),
    }
}

// ── Weekly results report ─────────────────────────────────────────────────────

pub fn compose_results_report(
    sender: &str,
    recipient: &str,
    window: QueryWindow,
    tables: &[&str],
    attachment: PathBuf,
    contact: Option<&str>,
) -> ReportMessage {
    let body = format!(
        "Dear {},\n\n\
         please find the auction results for auctions held {} to {}.\n\
         The attachment holds the results for {} and the summary strats for each.\n\n{}\n",
        greeting_name(recipient),
        window.from,
        window.to,
        tables.join(", "),
        sign_off(contact),
    );

    ReportMessage {
        from: sender.to_string(),
        to: recipient.trim().to_string(),
        subject: format!("GR auction results {}", window.to),
        body,
        attachment,
    }
}

// ── Delivery ──────────────────────────────────────────────────────────────────

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &ReportMessage) -> Result<()>;
}

/// Drops each message as a JSON file for an external mailer to pick up.
pub struct OutboxNotifier {
    dir: PathBuf,
}

impl OutboxNotifier {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl Notifier for OutboxNotifier {
    async fn send(&self, message: &ReportMessage) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Could not create dir {:?}", self.dir))?;

        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%f");
        let path = self.dir.join(format!("{}_{}.json", stamp, message.to));
        let json = serde_json::to_string_pretty(message)?;
        tokio::fs::write(&path, json)
            .await
            .with_context(|| format!("Cannot write {:?}", path))?;

        info!("Queued {:?} for {} at {:?}", message.subject, message.to, path);
        Ok(())
    }
}

/// POSTs each message as JSON.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client, url: url.into() })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, message: &ReportMessage) -> Result<()> {
        self.client
            .post(&self.url)
            .json(message)
            .send()
            .await
            .with_context(|| format!("POST {}", self.url))?
            .error_for_status()
            .with_context(|| format!("POST {} rejected", self.url))?;

        info!("Sent {:?} to {}", message.subject, message.to);
        Ok(())
    }
}

pub fn notifier_from_config(config: &NotifyConfig) -> Result<Box<dyn Notifier>> {
    Ok(match &config.webhook_url {
        Some(url) => Box::new(WebhookNotifier::new(url.clone())?),
        None => Box::new(OutboxNotifier::new(config.outbox_dir.clone())),
    })
}

/// Send every message; a failed recipient is logged and skipped.
/// Returns how many went out.
pub async fn deliver(notifier: &dyn Notifier, messages: &[ReportMessage]) -> usize {
    let mut sent = 0;
    for m in messages {
        match notifier.send(m).await {
            Ok(()) => sent += 1,
            Err(e) => warn!("Could not notify {}: {:#}", m.to, e),
        }
    }
    sent
}
