//! Archive mode: store values that changed since the previous tick, plus a
//! full snapshot every `snapshot_every` ticks.
//!
//! Selected measurements go into a pending buffer. A failed commit keeps the
//! buffer for the next tick; a successful one empties it. The previous-value
//! snapshot advances every evaluated tick whatever the commit outcome, so a
//! value that flips and flips back while commits fail is not archived.

use crate::collect::{collect, TickData};
use crate::config::RangePolicy;
use crate::device::Connector;
use crate::error::Result;
use crate::heatpump::HeatPump;
use crate::registry::Registry;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// One stored value.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub name: String,
    /// Unix seconds
    pub ts: i64,
    pub value: f64,
}

/// Point name as stored: dots become underscores.
pub fn measurement_name(name: &str) -> String {
    name.replace('.', "_")
}

#[async_trait]
pub trait MeasurementSink: Send + Sync {
    /// Stores the whole batch or nothing.
    async fn commit(&self, batch: &[Measurement]) -> Result<()>;
}

#[derive(Debug)]
pub struct Archiver {
    snapshot_every: u64,
    tick_count: u64,
    previous: HashMap<String, f64>,
    pending: Vec<Measurement>,
}

impl Archiver {
    pub fn new(snapshot_every: u64) -> Self {
        Self {
            snapshot_every: snapshot_every.max(1),
            tick_count: 0,
            previous: HashMap::new(),
            pending: Vec::new(),
        }
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn pending(&self) -> &[Measurement] {
        &self.pending
    }

    /// Selects the measurements worth storing from `tick`, appends them to the
    /// pending buffer and advances the snapshot. Returns how many were selected.
    ///
    /// The power total is only stored when it changed; it takes no part in the
    /// periodic snapshot.
    pub fn evaluate(&mut self, tick: &TickData, ts: i64) -> usize {
        let forced = self.tick_count % self.snapshot_every == 0;

        let mut candidates: Vec<(String, f64, bool)> = Vec::with_capacity(tick.point_count());
        candidates.extend(tick.setpoints.iter().map(|r| {
            (
                format!("Setpoint_{}", measurement_name(r.name)),
                r.value,
                true,
            )
        }));
        candidates.extend(
            tick.datapoints
                .iter()
                .map(|r| (measurement_name(r.name), r.value, true)),
        );
        candidates.extend(
            tick.status
                .iter()
                .map(|f| (measurement_name(f.bit.name), f64::from(f.value), true)),
        );
        candidates.push((measurement_name(tick.power.name), tick.power.value, false));

        let mut current = HashMap::with_capacity(candidates.len());
        let mut selected = 0;
        for (name, value, in_snapshot) in candidates {
            let changed = self.previous.get(&name) != Some(&value);
            if changed || (forced && in_snapshot) {
                self.pending.push(Measurement {
                    name: name.clone(),
                    ts,
                    value,
                });
                selected += 1;
            }
            current.insert(name, value);
        }

        self.previous = current;
        self.tick_count += 1;
        selected
    }

    /// Tries to store everything pending. On success the buffer is emptied and
    /// the number stored is returned; on failure it is kept as is.
    pub async fn commit<K: MeasurementSink + ?Sized>(&mut self, sink: &K) -> Result<usize> {
        if self.pending.is_empty() {
            return Ok(0);
        }
        match sink.commit(&self.pending).await {
            Ok(()) => {
                let n = self.pending.len();
                self.pending.clear();
                Ok(n)
            }
            Err(e) => {
                warn!(
                    pending = self.pending.len(),
                    error = %e,
                    "commit failed; keeping measurements for the next tick"
                );
                Err(e)
            }
        }
    }
}

pub struct ArchiveBridge<C, K> {
    connector: C,
    registry: Arc<Registry>,
    sink: K,
    range_policy: RangePolicy,
    poll_interval: Duration,
    backoff: Duration,
}

impl<C: Connector, K: MeasurementSink> ArchiveBridge<C, K> {
    pub fn new(
        connector: C,
        registry: Arc<Registry>,
        sink: K,
        range_policy: RangePolicy,
        poll_interval: Duration,
        backoff: Duration,
    ) -> Self {
        Self {
            connector,
            registry,
            sink,
            range_policy,
            poll_interval,
            backoff,
        }
    }

    /// Runs until the process is stopped. A tick whose read fails is not
    /// evaluated; the read is retried on the next scheduled tick.
    pub async fn run(&self, archiver: &mut Archiver) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            info!("connecting to device");
            let mut pump = HeatPump::connect(
                &self.connector,
                Arc::clone(&self.registry),
                self.range_policy,
                self.backoff,
            )
            .await;

            loop {
                ticker.tick().await;
                let tick = match collect(&mut pump).await {
                    Ok(t) => t,
                    Err(e) if e.is_device_failure() => {
                        warn!(error = %e, "device read failed; reconnecting");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "device read failed");
                        continue;
                    }
                };
                tick.warn_on_malfunction();
                let tick_no = archiver.tick_count();
                let selected = archiver.evaluate(&tick, Utc::now().timestamp());
                let committed = archiver.commit(&self.sink).await;
                match committed {
                    Ok(n) => info!(
                        tick = tick_no,
                        read = tick.point_count(),
                        selected,
                        committed = n,
                        "tick complete"
                    ),
                    Err(_) => info!(
                        tick = tick_no,
                        read = tick.point_count(),
                        selected,
                        pending = archiver.pending().len(),
                        "tick complete; commit deferred"
                    ),
                }
                debug!(snapshot_size = archiver.previous.len(), "snapshot advanced");
            }
        }
    }
}
