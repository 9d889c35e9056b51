//! Integration tests for the campaign coordinator

#![allow(clippy::unwrap_used)]

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use fanout_campaign::{
    CampaignConfig, CampaignCoordinator, CampaignSnapshot, DelayConfig, MonitorConfig,
    WeightTable,
};
use fanout_common::{BotId, CampaignStatus, RecipientId, SendError, Transport, UserId};
use fanout_limiter::{RateLimitConfig, RateLimiter, SpamConfig};
use parking_lot::Mutex;

#[derive(Debug, Default)]
struct MockTransport {
    sends: Mutex<Vec<(BotId, RecipientId, String)>>,
    /// Message texts that fail with a generic error
    fail_texts: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl MockTransport {
    fn new() -> Self {
        Self::default()
    }

    fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    fn fail_text(&self, text: &str) {
        self.fail_texts.lock().push(text.to_string());
    }

    fn sent_count(&self) -> usize {
        self.sends.lock().len()
    }

    fn recipients_hit(&self) -> Vec<i64> {
        let mut hit: Vec<i64> = self.sends.lock().iter().map(|(_, r, _)| r.0).collect();
        hit.sort_unstable();
        hit
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(
        &self,
        bot: BotId,
        recipient: RecipientId,
        text: &str,
    ) -> Result<(), SendError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_texts.lock().iter().any(|t| t == text) {
            return Err(SendError::Failed("rejected".to_string()));
        }
        self.sends.lock().push((bot, recipient, text.to_string()));
        Ok(())
    }
}

fn open_limiter() -> Arc<RateLimiter> {
    Arc::new(RateLimiter::new(RateLimitConfig {
        user_rate: 10_000.0,
        user_burst: 100_000,
        bot_rate: 10_000.0,
        bot_burst: 100_000,
        global_rate: 10_000.0,
        global_burst: 100_000,
        spam: SpamConfig {
            window_secs: 1,
            threshold: 1_000_000,
            block_secs: 1,
        },
    }))
}

fn coordinator(transport: Arc<MockTransport>) -> Arc<CampaignCoordinator> {
    Arc::new(CampaignCoordinator::new(
        open_limiter(),
        transport,
        Arc::new(WeightTable::default()),
    ))
}

/// Config that runs as fast as the scheduler allows.
fn fast_config(recipients: usize, variants: Vec<String>) -> CampaignConfig {
    CampaignConfig::new(
        UserId(1),
        vec![BotId(1), BotId(2)],
        (0..recipients).map(|i| RecipientId(i as i64 + 100)).collect(),
        variants,
    )
    .with_delay(DelayConfig {
        base_secs: 0.0,
        min_secs: 0.0,
        ..DelayConfig::default()
    })
}

fn fast_monitor() -> MonitorConfig {
    MonitorConfig {
        poll_secs: 0.05,
        ..MonitorConfig::default()
    }
}

async fn wait_for_status(
    coordinator: &CampaignCoordinator,
    id: fanout_common::CampaignId,
    status: CampaignStatus,
) -> CampaignSnapshot {
    for _ in 0..500 {
        let snap = coordinator.campaign_snapshot(id).unwrap();
        if snap.status == status {
            return snap;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("campaign never reached {status}");
}

#[tokio::test]
async fn test_campaign_runs_to_completion() {
    let transport = Arc::new(MockTransport::new());
    let coordinator = coordinator(transport.clone());

    let mut config = fast_config(10, vec!["hello".to_string()]);
    config.monitor = fast_monitor();
    let id = coordinator.start_campaign(config).unwrap();

    let snap = wait_for_status(&coordinator, id, CampaignStatus::Completed).await;
    assert_eq!(snap.processed, 10);
    assert_eq!(snap.success, 10);
    assert!((snap.percent - 100.0).abs() < f64::EPSILON);
    assert!(snap.completed_at.is_some());

    // Every recipient attempted exactly once across the three chunks
    assert_eq!(transport.recipients_hit(), (100..110).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_completed_never_regresses() {
    let transport = Arc::new(MockTransport::new());
    let coordinator = coordinator(transport);

    let mut config = fast_config(5, vec!["hello".to_string()]);
    config.monitor = fast_monitor();
    let id = coordinator.start_campaign(config).unwrap();

    wait_for_status(&coordinator, id, CampaignStatus::Completed).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(
        coordinator.campaign_status(id).unwrap(),
        CampaignStatus::Completed
    );
}

#[tokio::test]
async fn test_pause_halts_progress_and_resume_finishes() {
    let transport = Arc::new(MockTransport::with_delay(Duration::from_millis(10)));
    let coordinator = coordinator(transport.clone());

    let mut config = fast_config(30, vec!["hello".to_string()]);
    config.monitor = fast_monitor();
    let id = coordinator.start_campaign(config).unwrap();

    while transport.sent_count() < 3 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    coordinator.pause_campaign(id).unwrap();

    // In-flight sends drain, then progress stops
    tokio::time::sleep(Duration::from_millis(150)).await;
    let frozen = transport.sent_count();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(transport.sent_count(), frozen);

    coordinator.resume_campaign(id).unwrap();
    wait_for_status(&coordinator, id, CampaignStatus::Completed).await;

    // No recipient skipped or repeated across the pause
    assert_eq!(transport.recipients_hit(), (100..130).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_stop_cancels_and_releases_workers() {
    let transport = Arc::new(MockTransport::with_delay(Duration::from_millis(10)));
    let coordinator = coordinator(transport.clone());

    let id = coordinator
        .start_campaign(fast_config(100, vec!["hello".to_string()]))
        .unwrap();

    while transport.sent_count() < 3 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(coordinator.active_workers() > 0);

    coordinator.stop_campaign(id).unwrap();
    assert_eq!(
        coordinator.campaign_status(id).unwrap(),
        CampaignStatus::Cancelled
    );
    assert_eq!(coordinator.active_workers(), 0);

    // No further sends once the cancel has been observed
    tokio::time::sleep(Duration::from_millis(100)).await;
    let after_grace = transport.sent_count();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(transport.sent_count(), after_grace);
    assert!(after_grace < 100);

    // Stopping again is an invalid transition
    assert!(coordinator.stop_campaign(id).is_err());
}

#[tokio::test]
async fn test_workers_release_on_natural_completion() {
    let transport = Arc::new(MockTransport::new());
    let coordinator = coordinator(transport);

    let mut config = fast_config(10, vec!["hello".to_string()]);
    config.monitor = fast_monitor();
    let id = coordinator.start_campaign(config).unwrap();

    wait_for_status(&coordinator, id, CampaignStatus::Completed).await;
    for _ in 0..100 {
        if coordinator.active_workers() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("workers never released their slots");
}

#[tokio::test]
async fn test_failures_feed_stats() {
    let transport = Arc::new(MockTransport::new());
    transport.fail_text("bad");
    let coordinator = coordinator(transport);

    let mut config = fast_config(40, vec!["bad".to_string(), "good".to_string()]);
    config.monitor = fast_monitor();
    let id = coordinator.start_campaign(config).unwrap();

    wait_for_status(&coordinator, id, CampaignStatus::Completed).await;

    let stats = coordinator.campaign_stats(id).unwrap();
    assert_eq!(stats.processed, 40);
    assert_eq!(stats.success + stats.failed, 40);
    assert!(stats.failed > 0, "the failing variant was never drawn");
}

#[tokio::test]
async fn test_ab_test_over_live_counters() {
    let transport = Arc::new(MockTransport::new());
    transport.fail_text("bad");
    let coordinator = coordinator(transport);

    let mut config = fast_config(60, vec!["bad".to_string(), "good".to_string()]);
    config.monitor = fast_monitor();
    let id = coordinator.start_campaign(config).unwrap();

    wait_for_status(&coordinator, id, CampaignStatus::Completed).await;

    let result = coordinator
        .run_ab_test(id, &["bad".to_string(), "good".to_string()])
        .unwrap();
    assert_eq!(result.winner, "good");
    assert!(result.confidence > 0.0);
}

#[tokio::test]
async fn test_invalid_configs_rejected() {
    let coordinator = coordinator(Arc::new(MockTransport::new()));

    let no_recipients = CampaignConfig::new(
        UserId(1),
        vec![BotId(1)],
        Vec::new(),
        vec!["hello".to_string()],
    );
    assert!(coordinator.start_campaign(no_recipients).is_err());

    let no_variants = CampaignConfig::new(
        UserId(1),
        vec![BotId(1)],
        vec![RecipientId(100)],
        Vec::new(),
    );
    assert!(coordinator.start_campaign(no_variants).is_err());

    let no_bots = CampaignConfig::new(
        UserId(1),
        Vec::new(),
        vec![RecipientId(100)],
        vec!["hello".to_string()],
    );
    assert!(coordinator.start_campaign(no_bots).is_err());

    let zero_parallelism = CampaignConfig::new(
        UserId(1),
        vec![BotId(1)],
        vec![RecipientId(100)],
        vec!["hello".to_string()],
    )
    .with_parallelism(0);
    assert!(coordinator.start_campaign(zero_parallelism).is_err());
}

#[tokio::test]
async fn test_out_of_range_tuning_rejected_before_spawn() {
    // Inverted clamp bounds or a zero poll interval would panic inside a
    // spawned worker or the monitor loop; they must be rejected up front.
    let coordinator = coordinator(Arc::new(MockTransport::new()));

    let inverted_clamp = fast_config(5, vec!["hello".to_string()]).with_delay(DelayConfig {
        min_secs: 5.0,
        max_secs: 1.0,
        ..DelayConfig::default()
    });
    assert!(coordinator.start_campaign(inverted_clamp).is_err());

    let mut zero_poll = fast_config(5, vec!["hello".to_string()]);
    zero_poll.monitor = MonitorConfig {
        poll_secs: 0.0,
        ..MonitorConfig::default()
    };
    assert!(coordinator.start_campaign(zero_poll).is_err());

    // Nothing was registered for either rejected campaign
    assert_eq!(coordinator.active_workers(), 0);
}

#[test]
fn test_coordinator_debuggable_with_callback_attached() {
    let coordinator = CampaignCoordinator::new(
        open_limiter(),
        Arc::new(MockTransport::new()),
        Arc::new(WeightTable::default()),
    )
    .with_callback(Arc::new(|_| {}));

    let rendered = format!("{coordinator:?}");
    assert!(rendered.contains("CampaignCoordinator"));
}
