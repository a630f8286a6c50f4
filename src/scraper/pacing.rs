//! Cooldown policy: after a fixed number of work units the scraper stops for
//! a fixed window so the site does not start refusing requests.

use crate::config::PacingConfig;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Suspends the current task. Swapped for a recording fake in tests.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Clone)]
pub struct Pacer {
    every: u32,
    cooldown: Duration,
    sleeper: Arc<dyn Sleeper>,
}

impl Pacer {
    pub fn new(config: &PacingConfig, sleeper: Arc<dyn Sleeper>) -> Self {
        Self {
            every: config.every,
            cooldown: Duration::from_secs(config.cooldown_secs),
            sleeper,
        }
    }

    /// Index pages: cool down after pages `every`, `2 * every`, … but never after page 1.
    pub fn due_after_page(&self, page: u32) -> bool {
        self.every > 0 && page > 1 && page % self.every == 0
    }

    /// Detail rows: cool down before rows 0, `every`, `2 * every`, …
    pub fn due_before_row(&self, index: usize) -> bool {
        self.every > 0 && index % self.every as usize == 0
    }

    pub async fn after_page(&self, page: u32) {
        if self.due_after_page(page) {
            info!("Cooling down {:?} after index page {}", self.cooldown, page);
            self.sleeper.sleep(self.cooldown).await;
        }
    }

    pub async fn before_row(&self, index: usize) {
        if self.due_before_row(index) {
            info!("Cooling down {:?} before detail row {}", self.cooldown, index);
            self.sleeper.sleep(self.cooldown).await;
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records every requested pause into a shared log instead of sleeping.
    pub struct RecordingSleeper {
        log: Arc<Mutex<Vec<String>>>,
    }

    impl RecordingSleeper {
        pub fn new(log: Arc<Mutex<Vec<String>>>) -> Self {
            Self { log }
        }
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.log
                .lock()
                .unwrap()
                .push(format!("sleep {}", duration.as_secs()));
        }
    }

    pub fn pacer(every: u32, log: Arc<Mutex<Vec<String>>>) -> Pacer {
        let config = PacingConfig {
            every,
            cooldown_secs: 150,
        };
        Pacer::new(&config, Arc::new(RecordingSleeper::new(log)))
    }

    #[test]
    fn page_schedule_skips_first_page() {
        let p = pacer(10, Arc::default());
        let due: Vec<u32> = (1..=35).filter(|&n| p.due_after_page(n)).collect();
        assert_eq!(due, vec![10, 20, 30]);

        let every_page = pacer(1, Arc::default());
        assert!(!every_page.due_after_page(1));
        assert!(every_page.due_after_page(2));
    }

    #[test]
    fn row_schedule_includes_first_row() {
        let p = pacer(10, Arc::default());
        let due: Vec<usize> = (0..25).filter(|&i| p.due_before_row(i)).collect();
        assert_eq!(due, vec![0, 10, 20]);
    }

    #[test]
    fn zero_disables_pacing() {
        let p = pacer(0, Arc::default());
        assert!(!p.due_after_page(10));
        assert!(!p.due_before_row(0));
    }

    #[test]
    fn sleeps_only_when_due() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let p = pacer(10, log.clone());
        tokio_test::block_on(async {
            for page in 1..=20 {
                p.after_page(page).await;
            }
            p.before_row(3).await;
        });
        assert_eq!(*log.lock().unwrap(), vec!["sleep 150", "sleep 150"]);
    }
}
