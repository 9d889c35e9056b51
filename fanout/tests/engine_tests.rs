//! End-to-end tests of the assembled engine

#![allow(clippy::unwrap_used)]

use std::{io::Write, sync::Arc, time::Duration};

use async_trait::async_trait;
use fanout::{
    BotId, CampaignConfig, CampaignStatus, DelayConfig, Engine, EngineConfig, JobStatus,
    MailingTask, MonitorConfig, RateLimitConfig, RecipientId, SendError, SpamConfig, TaskStatus,
    Transport, UserId, Verdict,
};
use parking_lot::Mutex;

#[derive(Debug, Default)]
struct MockTransport {
    sends: Mutex<Vec<(BotId, RecipientId, String)>>,
}

impl MockTransport {
    fn sent_count(&self) -> usize {
        self.sends.lock().len()
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
        self.sends.lock().push((bot, recipient, text.to_string()));
        Ok(())
    }
}

/// Engine config generous enough that the limiter never gets in the way.
fn open_config() -> EngineConfig {
    EngineConfig {
        limiter: RateLimitConfig {
            user_rate: 10_000.0,
            user_burst: 100_000,
            bot_rate: 10_000.0,
            bot_burst: 100_000,
            global_rate: 10_000.0,
            global_burst: 100_000,
            spam: SpamConfig {
                threshold: 1_000_000,
                ..SpamConfig::default()
            },
        },
        ..EngineConfig::default()
    }
}

#[tokio::test]
async fn test_dispatch_through_engine() {
    let transport = Arc::new(MockTransport::default());
    let engine = Engine::new(open_config(), transport.clone());
    engine.start();

    let task = MailingTask::new(
        UserId(1),
        BotId(1),
        vec!["hello".to_string()],
        (0..10).map(RecipientId).collect(),
    )
    .with_interval(0.0, 0.0);
    let id = engine.dispatch().add_task(task).unwrap();

    for _ in 0..500 {
        if engine.dispatch().task(id).map(|t| t.status) == Some(TaskStatus::Completed) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let task = engine.dispatch().task(id).unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.sent + task.failed, 10);
    assert_eq!(transport.sent_count(), 10);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_campaign_through_engine() {
    let transport = Arc::new(MockTransport::default());
    let engine = Engine::new(open_config(), transport.clone());
    engine.start();

    let mut config = CampaignConfig::new(
        UserId(1),
        vec![BotId(1), BotId(2)],
        (0..10).map(|i| RecipientId(i + 100)).collect(),
        vec!["hello".to_string()],
    )
    .with_delay(DelayConfig {
        base_secs: 0.0,
        min_secs: 0.0,
        ..DelayConfig::default()
    });
    config.monitor = MonitorConfig {
        poll_secs: 0.05,
        ..MonitorConfig::default()
    };

    let id = engine.campaigns().start_campaign(config).unwrap();
    for _ in 0..500 {
        if engine.campaigns().campaign_status(id).unwrap() == CampaignStatus::Completed {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let stats = engine.campaigns().campaign_stats(id).unwrap();
    assert_eq!(stats.processed, 10);
    assert_eq!(transport.sent_count(), 10);

    // Successful sends pushed the identities' weights up
    assert!(engine.weights().weight(BotId(1)) >= 100.0);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_background_job_through_engine() {
    let engine = Engine::new(open_config(), Arc::new(MockTransport::default()));
    engine.start();

    let id = engine
        .jobs()
        .submit("report", Some(UserId(1)), async { Ok("done".to_string()) });

    for _ in 0..500 {
        if engine
            .jobs()
            .status(id)
            .is_some_and(|job| job.status.is_terminal())
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let job = engine.jobs().status(id).unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.result.as_deref(), Some("done"));

    engine.shutdown().await;
}

#[tokio::test]
async fn test_limiter_reachable_through_engine() {
    let engine = Engine::new(EngineConfig::default(), Arc::new(MockTransport::default()));

    // Default user burst is 5
    for _ in 0..5 {
        assert_eq!(
            engine.limiter().check_send(UserId(9), BotId(1)),
            Verdict::Ok
        );
    }
    assert_eq!(
        engine.limiter().check_send(UserId(9), BotId(1)),
        Verdict::UserLimit
    );
}

#[test]
fn test_config_loads_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
        dispatch_workers = 2

        [limiter]
        global_rate = 45.0

        [weights]
        cap = 200.0
        "#
    )
    .unwrap();

    let config = EngineConfig::from_path(file.path()).unwrap();
    assert_eq!(config.dispatch_workers, 2);
    assert!((config.limiter.global_rate - 45.0).abs() < f64::EPSILON);
    assert!((config.weights.cap - 200.0).abs() < f64::EPSILON);
}

#[test]
fn test_config_missing_file_errors() {
    assert!(EngineConfig::from_path("/nonexistent/fanout.toml").is_err());
}
