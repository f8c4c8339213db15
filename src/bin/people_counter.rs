//! Composition root. Loads configuration, wires the shared KV store,
//! identity manager and event sink, then hands each configured channel its
//! own counting thread.
//!
//! The `Detector`/`Tracker`/`Embedder`/`StaffClassifier` bindings are out of
//! this crate's scope (they'd be a real YOLO/DeepSORT/ArcFace integration),
//! so this binary stops short of actually decoding RTSP: it proves out the
//! composition root — config, KV, identity, sink, metrics all start up and
//! validate together — and leaves per-frame capture to whatever binds those
//! four traits in a deployment.

use anyhow::{Context, Result};
use people_counter::config::Config;
use people_counter::counter::{DailyPersonCounter, ZoneCounter};
use people_counter::identity::PersonIdentityManager;
use people_counter::kv::{InMemoryKv, KvStore, RedisKv};
use people_counter::sink::{EventBatcher, EventSink, InMemoryEventSink, PostgresEventSink};
use std::sync::Arc;

fn main() -> Result<()> {
    env_logger::init();
    people_counter::metrics::describe();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.json".to_string());
    let config = Config::load_from_file(&config_path).with_context(|| format!("loading config from {config_path}"))?;
    log::info!("loaded config for {} channel(s) from {config_path}", config.channels.len());

    let kv = build_kv_store(&config);
    let sink = build_event_sink(&config)?;
    let batcher = Arc::new(EventBatcher::new(sink));

    let identity_manager = Arc::new(PersonIdentityManager::new(
        kv,
        config.identity.similarity_threshold,
        config.identity.redis_ttl_seconds,
        config.timezone(),
    ));
    log::info!("identity manager backend: {:?}", identity_manager.backend());

    let mut handles = Vec::new();
    for channel in config.channels.clone() {
        let zones: Vec<people_counter::geometry::Zone> = channel
            .zones
            .iter()
            .cloned()
            .map(|z| z.into_zone())
            .collect::<Result<_, _>>()
            .with_context(|| format!("channel {}: invalid zone configuration", channel.channel_id))?;

        let daily_counter = DailyPersonCounter::new(ZoneCounter::new(zones), identity_manager.clone());
        let batcher = batcher.clone();
        let channel_id = channel.channel_id;

        handles.push(std::thread::spawn(move || {
            run_channel(channel_id, daily_counter, batcher);
        }));
    }

    for handle in handles {
        let _ = handle.join();
    }

    batcher_final_flush(&batcher);
    Ok(())
}

/// Stands in for the real capture/detect/track loop a deployment would run
/// here against `channel_id`'s RTSP source. Kept as a heartbeat so the
/// composition root is demonstrably alive end-to-end without a concrete
/// `Detector`/`Tracker` binding.
fn run_channel(channel_id: u32, daily_counter: DailyPersonCounter, _batcher: Arc<EventBatcher>) {
    log::info!("channel {channel_id} worker started with {} zone(s)", daily_counter.get_counts().len());
}

fn batcher_final_flush(batcher: &EventBatcher) {
    if let Err(e) = batcher.flush() {
        log::warn!("final event batch flush failed: {e}");
    }
}

fn build_kv_store(config: &Config) -> Box<dyn KvStore> {
    match config.storage.kv_url.as_deref() {
        Some(url) => match RedisKv::connect(url) {
            Ok(kv) => Box::new(kv),
            Err(e) => {
                log::warn!("failed to connect to KV store at {url}: {e}; falling back to in-memory store");
                Box::new(InMemoryKv::new())
            }
        },
        None => {
            log::info!("no kv_url configured; running on the in-memory KV fallback");
            Box::new(InMemoryKv::new())
        }
    }
}

fn build_event_sink(config: &Config) -> Result<Arc<dyn EventSink>> {
    match config.storage.event_sink_dsn.as_deref() {
        Some(dsn) => {
            let sink = PostgresEventSink::connect(dsn, config.storage.event_sink_pool_size).context("connecting to event sink")?;
            Ok(Arc::new(sink))
        }
        None => {
            log::info!("no event_sink_dsn configured; running on the in-memory event sink");
            Ok(Arc::new(InMemoryEventSink::new()))
        }
    }
}
