//! Bounded document sampling.
//!
//! `fast` and `medium` read the head of the cursor, then probe further in
//! with a skip stride that doubles after every batch. `full` reads every
//! document. The wall-clock budget and the field ceiling stop any strategy
//! early; whatever was merged by then is kept.

use crate::config::DiscoveryConfig;
use crate::source::DocumentCursor;
use bson::Document;
use serde::Serialize;
use std::time::{Duration, Instant};

/// Why a sampling pass ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The cursor ran dry.
    Exhausted,
    /// The strategy's sample sizes were reached.
    SampleLimit,
    TimeBudget,
    FieldLimit,
    /// Reading from the cursor failed.
    Aborted(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SampleReport {
    pub sampled: u64,
    pub skipped: u64,
    pub stop_reason: StopReason,
    #[serde(with = "millis")]
    pub elapsed: Duration,
}

pub struct DocumentSampler<'a> {
    config: &'a DiscoveryConfig,
}

enum Step {
    Continue,
    Stop(StopReason),
}

impl<'a> DocumentSampler<'a> {
    pub fn new(config: &'a DiscoveryConfig) -> Self {
        DocumentSampler { config }
    }

    /// Drive `cursor` under the configured strategy, handing every sampled
    /// document to `visit`. `visit` returns the number of fields discovered
    /// so far, which feeds the field ceiling. The cursor is always closed.
    ///
    /// `total` is the collection's document count when known; it bounds a
    /// `full` scan.
    pub fn run<F>(&self, cursor: &mut (dyn DocumentCursor + '_), total: Option<u64>, mut visit: F) -> SampleReport
    where
        F: FnMut(Document) -> usize,
    {
        let started = Instant::now();
        let mut report = SampleReport {
            sampled: 0,
            skipped: 0,
            stop_reason: StopReason::SampleLimit,
            elapsed: Duration::ZERO,
        };

        let (first, probe) = match self.config.sample_sizes() {
            Some(sizes) => (sizes.first, sizes.probe),
            None => (total.unwrap_or(u64::MAX), 0),
        };

        let outcome = self
            .read_head(cursor, first, started, &mut report, &mut visit)
            .and_then(|step| match step {
                Step::Continue => {
                    if !cursor.has_next()? {
                        return Ok(Step::Stop(StopReason::Exhausted));
                    }
                    self.probe(cursor, probe, started, &mut report, &mut visit)
                }
                stop => Ok(stop),
            });

        report.stop_reason = match outcome {
            Ok(Step::Stop(reason)) => reason,
            Ok(Step::Continue) => StopReason::SampleLimit,
            Err(e) => {
                log::warn!("Sampling aborted after {} documents: {e}", report.sampled);
                StopReason::Aborted(e.to_string())
            }
        };

        cursor.close();
        report.elapsed = started.elapsed();
        report
    }

    fn read_head<F>(
        &self,
        cursor: &mut (dyn DocumentCursor + '_),
        limit: u64,
        started: Instant,
        report: &mut SampleReport,
        visit: &mut F,
    ) -> crate::Result<Step>
    where
        F: FnMut(Document) -> usize,
    {
        let mut read = 0;
        while read < limit {
            if let Step::Stop(reason) = self.read_one(cursor, started, report, visit)? {
                return Ok(Step::Stop(reason));
            }
            read += 1;
        }
        Ok(Step::Continue)
    }

    fn probe<F>(
        &self,
        cursor: &mut (dyn DocumentCursor + '_),
        limit: u64,
        started: Instant,
        report: &mut SampleReport,
        visit: &mut F,
    ) -> crate::Result<Step>
    where
        F: FnMut(Document) -> usize,
    {
        let batch = self.config.probe_batch.max(1);
        let mut stride = batch;
        let mut probed = 0;

        while probed < limit {
            if !cursor.has_next()? {
                return Ok(Step::Stop(StopReason::Exhausted));
            }
            report.skipped += cursor.skip(stride)?;
            stride = stride.saturating_mul(2);

            let mut in_batch = 0;
            while in_batch < batch && probed < limit {
                if let Step::Stop(reason) = self.read_one(cursor, started, report, visit)? {
                    return Ok(Step::Stop(reason));
                }
                in_batch += 1;
                probed += 1;
            }
        }
        Ok(Step::Continue)
    }

    fn read_one<F>(
        &self,
        cursor: &mut (dyn DocumentCursor + '_),
        started: Instant,
        report: &mut SampleReport,
        visit: &mut F,
    ) -> crate::Result<Step>
    where
        F: FnMut(Document) -> usize,
    {
        if started.elapsed() >= self.config.time_budget() {
            return Ok(Step::Stop(StopReason::TimeBudget));
        }
        let Some(document) = cursor.next()? else {
            return Ok(Step::Stop(StopReason::Exhausted));
        };
        report.sampled += 1;
        if visit(document) >= self.config.max_fields {
            return Ok(Step::Stop(StopReason::FieldLimit));
        }
        Ok(Step::Continue)
    }
}

mod millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }
}
