use crate::config::ScraperConfig;
use crate::scraper::{FetchError, PageFetcher};
use anyhow::{Context, Result};
use async_trait::async_trait;
use rand::seq::IndexedRandom;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio_retry::RetryIf;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tracing::{debug, warn};

const FALLBACK_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Plain HTTP page fetcher. Each request goes out under a user agent drawn
/// at random from the configured pool.
pub struct HttpFetcher {
    inner: reqwest::Client,
    user_agents: Vec<String>,
}

impl HttpFetcher {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        let inner = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            // Accept cookies so session-based pages work
            .cookie_store(true)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            inner,
            user_agents: config.user_agents.clone(),
        })
    }

    fn pick_user_agent(&self) -> &str {
        self.user_agents
            .choose(&mut rand::rng())
            .map(String::as_str)
            .unwrap_or(FALLBACK_USER_AGENT)
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let resp = self
            .inner
            .get(url)
            .header(reqwest::header::USER_AGENT, self.pick_user_agent())
            .send()
            .await
            .map_err(|source| FetchError::Transport {
                url: url.to_string(),
                source,
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = resp.text().await.map_err(|source| FetchError::Transport {
            url: url.to_string(),
            source,
        })?;

        if body.trim().is_empty() {
            return Err(FetchError::EmptyBody { url: url.to_string() });
        }
        Ok(body)
    }
}

// ── Retry ─────────────────────────────────────────────────────────────────────

/// Wraps any fetcher with bounded, jittered exponential backoff.
/// Delays run `2 × factor`, `4 × factor`, `8 × factor`, … capped at one minute.
pub struct RetryingFetcher<F> {
    inner: F,
    max_retries: usize,
    factor_ms: u64,
}

impl<F: PageFetcher> RetryingFetcher<F> {
    pub fn new(inner: F, config: &ScraperConfig) -> Self {
        Self {
            inner,
            max_retries: config.max_retries as usize,
            factor_ms: config.retry_factor_ms,
        }
    }
}

#[async_trait]
impl<F: PageFetcher> PageFetcher for RetryingFetcher<F> {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let strategy = ExponentialBackoff::from_millis(2)
            .factor(self.factor_ms)
            .max_delay(Duration::from_secs(60))
            .map(jitter)
            .take(self.max_retries);

        let attempts = AtomicU32::new(0);

        let result = RetryIf::start(
            strategy,
            || {
                let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
                debug!("GET {} (attempt {})", url, attempt);
                self.inner.fetch(url)
            },
            |e: &FetchError| {
                let retry = e.is_retryable();
                if retry {
                    warn!("{}; backing off", e);
                }
                retry
            },
        )
        .await;

        result.map_err(|last| {
            let attempts = attempts.load(Ordering::Relaxed);
            if last.is_retryable() {
                FetchError::Exhausted {
                    url: url.to_string(),
                    attempts,
                    last: Box::new(last),
                }
            } else {
                last
            }
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    /// Serves canned pages by URL and logs every request into a shared log.
    pub struct StaticFetcher {
        pages: HashMap<String, String>,
        failures: Mutex<HashMap<String, u32>>,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl StaticFetcher {
        pub fn new(log: Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                pages: HashMap::new(),
                failures: Mutex::new(HashMap::new()),
                log,
            }
        }

        pub fn with_page(mut self, url: impl Into<String>, html: impl Into<String>) -> Self {
            self.pages.insert(url.into(), html.into());
            self
        }

        /// Answer 503 for the first `times` requests to `url`.
        pub fn failing(self, url: impl Into<String>, times: u32) -> Self {
            self.failures.lock().unwrap().insert(url.into(), times);
            self
        }
    }

    #[async_trait]
    impl PageFetcher for StaticFetcher {
        async fn fetch(&self, url: &str) -> Result<String, FetchError> {
            self.log.lock().unwrap().push(format!("fetch {url}"));

            if let Some(left) = self.failures.lock().unwrap().get_mut(url) {
                if *left > 0 {
                    *left -= 1;
                    return Err(FetchError::Status {
                        url: url.to_string(),
                        status: 503,
                    });
                }
            }

            self.pages.get(url).cloned().ok_or(FetchError::Status {
                url: url.to_string(),
                status: 404,
            })
        }
    }

    fn config(max_retries: u32) -> ScraperConfig {
        ScraperConfig {
            max_retries,
            retry_factor_ms: 1,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn retries_transient_failures() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let inner = StaticFetcher::new(log.clone())
            .with_page("https://example.org/a", "<p>ok</p>")
            .failing("https://example.org/a", 2);
        let fetcher = RetryingFetcher::new(inner, &config(3));

        let body = fetcher.fetch("https://example.org/a").await.unwrap();
        assert_eq!(body, "<p>ok</p>");
        assert_eq!(log.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn gives_up_after_bounded_attempts() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let inner = StaticFetcher::new(log.clone())
            .with_page("https://example.org/a", "<p>ok</p>")
            .failing("https://example.org/a", 10);
        let fetcher = RetryingFetcher::new(inner, &config(2));

        let err = fetcher.fetch("https://example.org/a").await.unwrap_err();
        assert!(matches!(err, FetchError::Exhausted { attempts: 3, .. }));
        assert_eq!(log.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn does_not_retry_not_found() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let fetcher = RetryingFetcher::new(StaticFetcher::new(log.clone()), &config(3));

        let err = fetcher.fetch("https://example.org/missing").await.unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 404, .. }));
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn user_agent_drawn_from_pool() {
        let fetcher = HttpFetcher::new(&ScraperConfig {
            user_agents: vec!["agent-a".into(), "agent-b".into()],
            ..Default::default()
        })
        .unwrap();
        for _ in 0..10 {
            assert!(["agent-a", "agent-b"].contains(&fetcher.pick_user_agent()));
        }

        let empty = HttpFetcher::new(&ScraperConfig {
            user_agents: vec![],
            ..Default::default()
        })
        .unwrap();
        assert_eq!(empty.pick_user_agent(), FALLBACK_USER_AGENT);
    }
}
