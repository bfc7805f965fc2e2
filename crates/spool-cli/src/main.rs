use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::time::{Duration, Instant, sleep};
use tracing::{info, warn};

use spool_core::app::{MessageHandler, Processor, QueueRegistry, SpoolConfig};
use spool_core::domain::{ClaimedMessage, HandlerError, QueueEvent};
use spool_core::impls::InMemoryMessageStore;
use spool_core::ports::{MessageStore, SystemClock};
use spool_core::telemetry;

/// Used when no config path is given on the command line.
const DEMO_CONFIG: &str = r#"
[processor]
parallelism = 3
poll_interval_ms = 100

[queues.builds]
visibility_secs = 30
max_retries = 3
dead_letter_queue = "builds-dead"

[queues.builds-dead]
"#;

const QUEUE: &str = "builds";

#[derive(Debug, Serialize, Deserialize)]
struct BuildJob {
    image: String,
    flaky_failures: u32,
}

/// Fails each image `flaky_failures` times before it builds.
#[derive(Default)]
struct BuildHandler {
    attempts: Mutex<HashMap<String, u32>>,
}

#[async_trait]
impl MessageHandler for BuildHandler {
    async fn handle(&self, message: ClaimedMessage) -> Result<(), HandlerError> {
        let job: BuildJob = message.decode()?;

        let attempt = {
            let mut attempts = self.attempts.lock().map_err(|_| HandlerError::new("poisoned"))?;
            let n = attempts.entry(job.image.clone()).or_insert(0);
            *n += 1;
            *n
        };

        sleep(Duration::from_millis(50)).await;
        if attempt <= job.flaky_failures {
            return Err(HandlerError::new(format!(
                "build of {} failed (attempt {attempt})",
                job.image
            )));
        }
        info!(image = %job.image, attempt, "image built");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    telemetry::init_tracing(telemetry::DEFAULT_FILTER);

    // (A) 設定: 引数があれば TOML を読む
    let config = match std::env::args().nth(1) {
        Some(path) => SpoolConfig::load(&path)?,
        None => SpoolConfig::from_toml_str(DEMO_CONFIG)?,
    };

    // (B) queue ごとに in-memory store を割り当てて registry を組み立てる
    let registry = QueueRegistry::open(&config, Arc::new(SystemClock), |_name: &str| {
        Arc::new(InMemoryMessageStore::new()) as Arc<dyn MessageStore>
    })
    .await?;
    info!(queues = ?registry.names(), "registry opened");

    let queue = registry
        .get(QUEUE)
        .ok_or_else(|| format!("config has no '{QUEUE}' queue"))?;

    // (C) ジョブ投入
    let jobs = [
        ("api:1.4.0", 0),
        ("worker:2.0.1", 1),
        ("frontend:0.9.3", 2),
        ("scheduler:1.1.0", 0),
        ("legacy:0.1.0", u32::MAX),
    ];
    let jobs: Vec<BuildJob> = jobs
        .into_iter()
        .map(|(image, flaky_failures)| BuildJob {
            image: image.to_string(),
            flaky_failures,
        })
        .collect();
    let ids = queue.add_many(&jobs).await?;
    info!(count = ids.len(), "jobs enqueued");

    // (D) processor 起動 + イベントをログに流す
    let processor = Processor::with_config(Arc::clone(&queue), config.processor.processor_config());
    processor.on_event(|event| match &event {
        QueueEvent::Succeeded { message } => {
            info!(id = %message.id, tries = message.tries, "succeeded");
        }
        QueueEvent::Retrying { message, error } => {
            info!(id = %message.id, tries = message.tries, %error, "retrying");
        }
        QueueEvent::Failed { message, error } => {
            warn!(id = %message.id, tries = message.tries, %error, "failed for good");
        }
    });
    processor.start(config.processor.parallelism, BuildHandler::default())?;

    // (E) 全部片付くまで待つ（dead-letter 行きも完了に数える）
    let deadline = Instant::now() + Duration::from_secs(30);
    loop {
        let stats = queue.stats().await?;
        if stats.done == stats.total {
            break;
        }
        if Instant::now() >= deadline {
            warn!(?stats, "gave up waiting for the queue to drain");
            break;
        }
        sleep(Duration::from_millis(100)).await;
    }

    // (F) graceful shutdown
    processor.stop().await;

    for name in registry.names() {
        if let Some(q) = registry.get(name) {
            let stats = q.stats().await?;
            println!("{name}: {}", serde_json::to_string(&stats)?);
        }
    }
    let purged = queue.purge().await?;
    info!(purged, "completed messages purged");
    Ok(())
}
