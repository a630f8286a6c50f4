use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub scraper: ScraperConfig,
    #[serde(default)]
    pub pacing: PacingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub reconciliation: ReconciliationConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Scraper configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScraperConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Backoff multiplier; the n-th retry waits roughly `2^n × retry_factor_ms`.
    #[serde(default = "default_retry_factor_ms")]
    pub retry_factor_ms: u64,

    /// Pool a per-request identity is drawn from.
    #[serde(default = "default_user_agents")]
    pub user_agents: Vec<String>,

    #[serde(default = "default_true")]
    pub sort_ascending: bool,

    #[serde(default = "default_category_id")]
    pub category_id: u32,
}

/// Cooldown schedule shared by the index and detail passes
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PacingConfig {
    #[serde(default = "default_pacing_every")]
    pub every: u32,

    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_true")]
    pub run_migrations: bool,

    /// Where reconciled rows land as CSV when the store refuses them.
    #[serde(default = "default_fallback_dir")]
    pub fallback_dir: PathBuf,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ReconciliationConfig {
    #[serde(default)]
    pub tables: Vec<ReferenceTableConfig>,
}

/// One business reference table scraped debtors are matched against.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReferenceTableConfig {
    /// Display name used in reports, e.g. "Frame".
    pub name: String,

    /// Store table holding the reference rows.
    pub source_table: String,

    /// CSV used when the store table cannot be read.
    #[serde(default)]
    pub fallback_file: Option<PathBuf>,

    #[serde(default = "default_id_column")]
    pub id_column: String,

    /// Store table reconciled auctions for this reference are appended to.
    pub auction_table: String,
}

/// Report configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReportConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    #[serde(default = "default_mailing_list_table")]
    pub mailing_list_table: String,

    #[serde(default = "default_mailing_list_file")]
    pub mailing_list_file: PathBuf,

    /// Address readers are pointed to instead of replying.
    #[serde(default)]
    pub contact: Option<String>,
}

/// Notification delivery
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotifyConfig {
    /// When set, every message is POSTed here as JSON.
    #[serde(default)]
    pub webhook_url: Option<String>,

    #[serde(default = "default_outbox_dir")]
    pub outbox_dir: PathBuf,

    #[serde(default = "default_sender")]
    pub sender: String,
}

/// Pipeline configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Run last week's result enrichment as part of a Monday scrape.
    #[serde(default = "default_true")]
    pub weekly_results_on_monday: bool,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_base_url() -> String {
    "https://www.eauction.gr/en/Home/HlektronikoiPleistiriasmoi".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_factor_ms() -> u64 {
    500
}
fn default_user_agents() -> Vec<String> {
    [
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
        "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}
fn default_category_id() -> u32 {
    1
}
fn default_pacing_every() -> u32 {
    10
}
fn default_cooldown_secs() -> u64 {
    150
}
fn default_db_path() -> PathBuf {
    PathBuf::from("data/eauctions.duckdb")
}
fn default_fallback_dir() -> PathBuf {
    PathBuf::from("data/fallback")
}
fn default_id_column() -> String {
    "VAT Number".to_string()
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("reports")
}
fn default_mailing_list_table() -> String {
    "mailing_list".to_string()
}
fn default_mailing_list_file() -> PathBuf {
    PathBuf::from("participants_emails.txt")
}
fn default_outbox_dir() -> PathBuf {
    PathBuf::from("outbox")
}
fn default_sender() -> String {
    "eauction-monitor@localhost".to_string()
}
fn default_true() -> bool {
    true
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_factor_ms: default_retry_factor_ms(),
            user_agents: default_user_agents(),
            sort_ascending: true,
            category_id: default_category_id(),
        }
    }
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            every: default_pacing_every(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            run_migrations: true,
            fallback_dir: default_fallback_dir(),
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            mailing_list_table: default_mailing_list_table(),
            mailing_list_file: default_mailing_list_file(),
            contact: None,
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            outbox_dir: default_outbox_dir(),
            sender: default_sender(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            weekly_results_on_monday: true,
        }
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("EAUCTION").separator("__"))
            .build()
            .context("Failed to read configuration")?;

        cfg.try_deserialize().context("Invalid configuration")
    }

    pub fn reference_table(&self, name: &str) -> Option<&ReferenceTableConfig> {
        self.reconciliation
            .tables
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name) || t.source_table == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_source_yields_defaults() {
        let cfg: AppConfig = config::Config::builder()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(cfg.pacing.every, 10);
        assert_eq!(cfg.pacing.cooldown_secs, 150);
        assert_eq!(cfg.scraper.max_retries, 3);
        assert!(cfg.scraper.sort_ascending);
        assert!(!cfg.scraper.user_agents.is_empty());
        assert!(cfg.reconciliation.tables.is_empty());
        assert!(cfg.pipeline.weekly_results_on_monday);
    }

    #[test]
    fn reference_tables_from_toml() {
        let toml = r#"
            [pacing]
            every = 5

            [[reconciliation.tables]]
            name = "Frame"
            source_table = "frame_debtors"
            auction_table = "frame_auctions"
            fallback_file = "data/frame.csv"
        "#;
        let cfg: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(cfg.pacing.every, 5);
        assert_eq!(cfg.pacing.cooldown_secs, 150);

        let frame = cfg.reference_table("frame").unwrap();
        assert_eq!(frame.id_column, "VAT Number");
        assert_eq!(frame.fallback_file, Some(PathBuf::from("data/frame.csv")));
        assert!(cfg.reference_table("frame_debtors").is_some());
        assert!(cfg.reference_table("arctos").is_none());
    }
}
