use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use crate::audit::memory::InMemoryAuditStore;
use crate::audit::AuditStore;
use crate::config::ConsumerConfig;
use crate::consumer::ConsumerOrchestrator;
use crate::record::StreamRecord;
use crate::source::MemoryStreamSource;

const DEFAULT_CONFIG_PATH: &str = "streamgate.json";
const DEMO_RECORDS: i64 = 8;
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Application entrypoint: load configuration, wire a consumer over the
/// in-memory source, run a demonstration feed through it, and print the
/// metrics exposition.
pub fn run() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let raw = fs::read_to_string(&config_path)
        .with_context(|| format!("failed to read config file {config_path}"))?;
    let config = ConsumerConfig::from_json(&raw)
        .with_context(|| format!("invalid config in {config_path}"))?;

    let source = MemoryStreamSource::new();
    for offset in 0..DEMO_RECORDS {
        source.push(
            StreamRecord::new(&config.topic, 0, offset, format!("demo-{offset}"))
                .with_key(format!("key-{offset}")),
        );
    }

    let store = Arc::new(InMemoryAuditStore::new());
    let handler: crate::lifecycle::Handler = Arc::new(|record| {
        println!("handled {record}");
        Ok(())
    });
    let feed = source.clone();
    let consumer = ConsumerOrchestrator::new(
        config,
        Box::new(source),
        handler,
        Some(Arc::clone(&store) as Arc<dyn AuditStore>),
    )?;

    consumer.start();
    let deadline = Instant::now() + DRAIN_TIMEOUT;
    while feed.committed().len() < DEMO_RECORDS as usize && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(20));
    }
    consumer.stop();

    if let Some(error) = consumer.fatal_error() {
        anyhow::bail!("consumer halted: {error}");
    }
    print!("{}", consumer.observability().render_metrics());
    Ok(())
}
