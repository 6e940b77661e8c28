use crate::bridge::{LightSource, SourceError};
use crate::mapper::MetricMapper;
use crate::metric::Batch;
use crate::writer::{MetricsSink, SinkError};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::Instrument;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Sampling,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub sampled: usize,
    pub stored: usize,
    pub skipped: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error("error fetching rooms: {0}")]
    Rooms(#[source] SourceError),
    #[error("error fetching lights: {0}")]
    Lights(#[source] SourceError),
    #[error("error writing light batch ({records} records lost): {source}")]
    Sink {
        records: usize,
        #[source]
        source: SinkError,
    },
}

pub struct Sampler<S, W> {
    source: S,
    sink: W,
    mapper: MetricMapper,
    interval: Duration,
    phase: Phase,
}

impl<S, W> Sampler<S, W>
where
    S: LightSource,
    W: MetricsSink,
{
    pub fn new(source: S, sink: W, mapper: MetricMapper, interval: Duration) -> Self {
        Self {
            source,
            sink,
            mapper,
            interval,
            phase: Phase::Idle,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Runs cycles on a fixed period until the task is dropped. The first
    /// cycle starts immediately; a slow cycle pushes the next tick back
    /// instead of letting ticks pile up.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            measurement = self.mapper.measurement(),
            "running light logger"
        );

        loop {
            ticker.tick().await;
            let span = tracing::info_span!("sample_cycle");
            match self.run_cycle(Utc::now()).instrument(span).await {
                Ok(report) => {
                    tracing::info!(
                        sampled = report.sampled,
                        stored = report.stored,
                        skipped = report.skipped,
                        "{} lights stored",
                        report.stored
                    );
                }
                Err(err @ CycleError::Sink { .. }) => {
                    tracing::error!(error = %err, "light batch lost");
                }
                Err(err) => {
                    tracing::warn!(error = %err, "sampling cycle aborted");
                }
            }
        }
    }

    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> Result<CycleReport, CycleError> {
        self.phase = Phase::Sampling;
        let result = self.sample(now).await;
        self.phase = Phase::Idle;
        result
    }

    async fn sample(&self, now: DateTime<Utc>) -> Result<CycleReport, CycleError> {
        let rooms = self.source.list_rooms().await.map_err(CycleError::Rooms)?;
        let lights = self.source.list_lights().await.map_err(CycleError::Lights)?;

        let mut batch = Batch::new(now);
        let mut report = CycleReport {
            sampled: lights.len(),
            ..CycleReport::default()
        };

        for light in &lights {
            let state = match self.source.light_state(light).await {
                Ok(state) => state,
                Err(err) => {
                    tracing::warn!(
                        light_id = %light.id,
                        light_name = %light.name,
                        error = %err,
                        "error getting light attributes; skipping light"
                    );
                    report.skipped += 1;
                    continue;
                }
            };

            match self.mapper.map_light(&rooms, light, &state, batch.timestamp()) {
                Ok(record) => batch.push(record),
                Err(err) => {
                    tracing::warn!(
                        light_id = %light.id,
                        light_name = %light.name,
                        error = %err,
                        "unable to map light; skipping light"
                    );
                    report.skipped += 1;
                }
            }
        }

        if batch.is_empty() {
            tracing::debug!(sampled = report.sampled, "no light records to write");
            return Ok(report);
        }

        let records = batch.len();
        report.stored = self
            .sink
            .write_batch(&batch)
            .await
            .map_err(|source| CycleError::Sink { records, source })?;
        Ok(report)
    }
}
