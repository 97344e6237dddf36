//! Event processing from eBPF perf buffers
//!
//! Handles reading events from per-CPU perf buffers, decoding them and
//! feeding the collector and the optional event log.

use crate::{collector::TraceCollector, decoder::decode_bytes, types::{RawEvent, TraceEvent}};
use anyhow::{Context, Result};
use aya::{
    maps::{perf::AsyncPerfEventArray, MapData},
    util::online_cpus,
};
use bytes::BytesMut;
use log::{debug, info, warn};
use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
    sync::Arc,
    time::Duration,
};
use tokio::{sync::Mutex, time::interval};

/// JSON-lines dump of every decoded event
pub struct EventLog {
    writer: Box<dyn Write + Send>,
}

impl EventLog {
    /// Create an event log writing to `path`
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create event log: {:?}", path))?;
        Ok(Self::from_writer(BufWriter::new(file)))
    }

    pub fn from_writer<W: Write + Send + 'static>(writer: W) -> Self {
        Self {
            writer: Box::new(writer),
        }
    }

    /// Append one event
    pub fn write(&mut self, event: &TraceEvent) -> Result<()> {
        serde_json::to_writer(&mut self.writer, event)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush().context("Failed to flush event log")
    }
}

/// Decode one perf buffer sample and hand it to the collector and log
pub async fn process_sample(
    bytes: &[u8],
    collector: &Mutex<TraceCollector>,
    event_log: Option<&Mutex<EventLog>>,
    verbose: bool,
) {
    let event = match decode_bytes(bytes) {
        Ok(event) => event,
        Err(e) => {
            debug!("Dropping undecodable event: {:#}", e);
            collector.lock().await.add_decode_error();
            return;
        }
    };

    if verbose {
        debug!("Event: {:?}", event);
    }

    if let Some(event_log) = event_log {
        if let Err(e) = event_log.lock().await.write(&event) {
            warn!("Failed to write event log: {:#}", e);
        }
    }

    collector.lock().await.add_event(&event);
}

/// Event processor that reads from perf buffers
pub struct EventProcessor {
    collector: Arc<Mutex<TraceCollector>>,
    event_log: Option<Arc<Mutex<EventLog>>>,
    verbose: bool,
}

impl EventProcessor {
    /// Create a new event processor
    ///
    /// # Arguments
    ///
    /// * `collector` - Shared trace collector
    /// * `event_log` - Optional JSON-lines event dump
    /// * `verbose` - Enable verbose logging
    pub fn new(
        collector: Arc<Mutex<TraceCollector>>,
        event_log: Option<EventLog>,
        verbose: bool,
    ) -> Self {
        Self {
            collector,
            event_log: event_log.map(|log| Arc::new(Mutex::new(log))),
            verbose,
        }
    }

    /// Spawn per-CPU event readers
    ///
    /// Creates a task for each CPU to read events from its perf buffer.
    pub async fn spawn_cpu_readers(&self, mut perf_array: AsyncPerfEventArray<MapData>) -> Result<()> {
        let cpus = online_cpus().context("Failed to get online CPUs")?;
        info!("Spawning event readers for {} CPUs", cpus.len());

        for cpu_id in cpus {
            let mut buf = perf_array.open(cpu_id, None)?;
            let collector = Arc::clone(&self.collector);
            let event_log = self.event_log.clone();
            let verbose = self.verbose;

            tokio::spawn(async move {
                // Pre-allocate buffers for reading events
                let mut buffers = (0..10)
                    .map(|_| BytesMut::with_capacity(std::mem::size_of::<RawEvent>()))
                    .collect::<Vec<_>>();

                loop {
                    let events = match buf.read_events(&mut buffers).await {
                        Ok(events) => events,
                        Err(e) => {
                            warn!("Error reading events from CPU {}: {}", cpu_id, e);
                            continue;
                        }
                    };

                    if events.lost > 0 {
                        warn!("Lost {} events on CPU {}", events.lost, cpu_id);
                        collector.lock().await.add_lost_events(events.lost);
                    }

                    for buf in buffers.iter().take(events.read) {
                        process_sample(buf, &collector, event_log.as_deref(), verbose).await;
                    }
                }
            });
        }

        Ok(())
    }

    /// Spawn progress reporter
    ///
    /// Creates a task that periodically reports collection progress.
    pub fn spawn_progress_reporter(&self, interval_secs: u64) {
        let collector = Arc::clone(&self.collector);

        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(interval_secs.max(1)));

            loop {
                ticker.tick().await;

                let collector = collector.lock().await;
                info!(
                    "Progress: {} events collected, {} fingerprinted packets",
                    collector.event_count(),
                    collector.queue_count()
                );
            }
        });
    }

    /// Flush the event log, if any
    pub async fn flush(&self) -> Result<()> {
        match &self.event_log {
            Some(event_log) => event_log.lock().await.flush(),
            None => Ok(()),
        }
    }
}
