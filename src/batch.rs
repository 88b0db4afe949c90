use std::borrow::Cow;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::fake_ack;
use crate::hl7::{self, AckStatus};
use crate::transport::{Endpoint, MllpClient, Transport, DEFAULT_TIMEOUT};

/// Upper bound on records reserved before the first attempt runs.
const RECORD_PREALLOC_LIMIT: usize = 1024;

#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Attempts per message, at least one.
    pub repeat_count: usize,
    /// Stamp a fresh MSH-10 into every attempt.
    pub generate_ids: bool,
    /// Answer from [`fake_ack::build_ack`] instead of the network.
    pub simulate: bool,
    pub timeout: Duration,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            repeat_count: 1,
            generate_ids: false,
            simulate: false,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// One successful attempt. Indices are 1-based.
#[derive(Debug, Clone, PartialEq)]
pub struct AckRecord {
    pub message_index: usize,
    pub attempt_index: usize,
    pub ack_text: String,
    pub message_control_id: Option<String>,
    pub duration: Duration,
}

impl AckRecord {
    pub fn status(&self) -> AckStatus {
        hl7::parse_status(&self.ack_text)
    }
}

/// The transport failure that ended a batch.
#[derive(Debug, Error)]
#[error("message {message_index}, attempt {attempt_index}: {error}")]
pub struct BatchFailure {
    pub message_index: usize,
    pub attempt_index: usize,
    #[source]
    pub error: TransportError,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BatchMetrics {
    pub attempts: usize,
    pub elapsed: Duration,
    pub messages_per_sec: f64,
    pub avg_duration: Duration,
}

impl BatchMetrics {
    fn compute(records: &[AckRecord], elapsed: Duration) -> Self {
        let attempts = records.len();
        let secs = elapsed.as_secs_f64();
        let messages_per_sec = if secs > 0.0 {
            attempts as f64 / secs
        } else {
            0.0
        };
        let avg_duration = if attempts == 0 {
            Duration::ZERO
        } else {
            let total: Duration = records.iter().map(|r| r.duration).sum();
            match u32::try_from(attempts) {
                Ok(n) => total / n,
                Err(_) => Duration::from_secs_f64(total.as_secs_f64() / attempts as f64),
            }
        };

        Self {
            attempts,
            elapsed,
            messages_per_sec,
            avg_duration,
        }
    }
}

#[derive(Debug)]
pub struct BatchResult {
    pub records: Vec<AckRecord>,
    pub failure: Option<BatchFailure>,
    pub metrics: BatchMetrics,
}

impl BatchResult {
    pub fn is_complete(&self) -> bool {
        self.failure.is_none()
    }
}

/// Runs every message `repeat_count` times against `endpoint`, or against the
/// fake ACK builder when simulating.
pub fn run_batch(messages: &[String], endpoint: &Endpoint, options: &BatchOptions) -> BatchResult {
    let mut client = MllpClient::new(endpoint.clone(), options.timeout);
    run_batch_with(messages, options, &mut client)
}

/// Same as [`run_batch`] over any [`Transport`]. Stops at the first transport
/// error; records collected until then are kept.
pub fn run_batch_with<T>(messages: &[String], options: &BatchOptions, transport: &mut T) -> BatchResult
where
    T: Transport + ?Sized,
{
    let repeat_count = options.repeat_count.max(1);
    info!(
        messages = messages.len(),
        repeat_count,
        generate_ids = options.generate_ids,
        simulate = options.simulate,
        "starting batch"
    );

    let started = Instant::now();
    let mut records = Vec::with_capacity(
        messages
            .len()
            .saturating_mul(repeat_count)
            .min(RECORD_PREALLOC_LIMIT),
    );
    let mut failure = None;

    'messages: for (m, message) in messages.iter().enumerate() {
        for attempt in 1..=repeat_count {
            let attempt_started = Instant::now();

            let control_id = options.generate_ids.then(hl7::generate_control_id);
            let outbound = match &control_id {
                Some(id) => Cow::Owned(hl7::rewrite_control_id(message, id)),
                None => Cow::Borrowed(message.as_str()),
            };

            let outcome = if options.simulate {
                Ok(fake_ack::build_ack(&outbound, control_id.as_deref()))
            } else {
                transport.send(&outbound)
            };
            let duration = attempt_started.elapsed();

            match outcome {
                Ok(ack_text) => {
                    debug!(message = m + 1, attempt, ?duration, "attempt acknowledged");
                    records.push(AckRecord {
                        message_index: m + 1,
                        attempt_index: attempt,
                        ack_text,
                        message_control_id: control_id,
                        duration,
                    });
                }
                Err(error) => {
                    let stopped = BatchFailure {
                        message_index: m + 1,
                        attempt_index: attempt,
                        error,
                    };
                    warn!(error = %stopped, "batch stopped");
                    failure = Some(stopped);
                    break 'messages;
                }
            }
        }
    }

    let metrics = BatchMetrics::compute(&records, started.elapsed());
    info!(
        attempts = metrics.attempts,
        messages_per_sec = metrics.messages_per_sec,
        failed = failure.is_some(),
        "batch finished"
    );

    BatchResult {
        records,
        failure,
        metrics,
    }
}

/// Metrics of successive batches, owned by whoever drives them.
#[derive(Debug, Clone, Default)]
pub struct MetricsHistory {
    runs: Vec<BatchMetrics>,
}

impl MetricsHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, result: &BatchResult) {
        self.runs.push(result.metrics);
    }

    pub fn runs(&self) -> &[BatchMetrics] {
        &self.runs
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn total_attempts(&self) -> usize {
        self.runs.iter().map(|run| run.attempts).sum()
    }

    /// Attempts per second over the combined elapsed time of every run.
    pub fn overall_messages_per_sec(&self) -> f64 {
        let secs: f64 = self.runs.iter().map(|run| run.elapsed.as_secs_f64()).sum();
        if secs > 0.0 {
            self.total_attempts() as f64 / secs
        } else {
            0.0
        }
    }
}
