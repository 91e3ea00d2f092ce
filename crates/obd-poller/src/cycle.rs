//! Poll Cycle Execution

use crate::catalog::Catalog;
use chrono::Utc;
use obd_protocol::{DiagnosticLink, RawResponse};
use obd_storage::PollRecord;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use value_normalizer::normalize;

/// How a single field of a record came to be
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOutcome {
    Value,
    /// Query succeeded but the vehicle had no data
    Empty,
    /// Query raised; the field is `null`
    Failed,
}

/// Result of one pass over the catalog
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub record: PollRecord,
    /// One outcome per record field, in catalog order
    pub outcomes: Vec<FieldOutcome>,
    pub elapsed: Duration,
}

impl CycleReport {
    pub fn count(&self, outcome: FieldOutcome) -> usize {
        self.outcomes.iter().filter(|o| **o == outcome).count()
    }
}

/// Query every catalog command once, in order, and build the cycle's record.
///
/// Never fails: a command that errors is logged and recorded as `null`, and
/// the remaining commands are still queried.
pub async fn execute_cycle<L>(link: &mut L, catalog: &Catalog) -> CycleReport
where
    L: DiagnosticLink + ?Sized,
{
    let started = Instant::now();
    let mut record = PollRecord::with_capacity(Utc::now(), catalog.len());
    let mut outcomes = Vec::with_capacity(catalog.len());

    for entry in catalog.entries() {
        let command = entry.command();
        let (value, outcome) = match link.query(command).await {
            Ok(RawResponse::Empty) => {
                debug!("{}: no data", entry.key());
                metrics::counter!("obd_query_empty_total", "command" => entry.key().to_string())
                    .increment(1);
                (serde_json::Value::Null, FieldOutcome::Empty)
            }
            Ok(response) => {
                let value = normalize(&response);
                debug!("{} = {}", entry.key(), value);
                (value, FieldOutcome::Value)
            }
            Err(e) => {
                warn!("Error querying {}: {}", command.name(), e);
                metrics::counter!("obd_query_failures_total", "command" => entry.key().to_string())
                    .increment(1);
                (serde_json::Value::Null, FieldOutcome::Failed)
            }
        };
        record.push(entry.key(), value);
        outcomes.push(outcome);
    }

    let elapsed = started.elapsed();
    metrics::counter!("obd_cycles_total").increment(1);
    metrics::histogram!("obd_cycle_duration_seconds").record(elapsed.as_secs_f64());
    debug!("Cycle of {} commands took {:?}", catalog.len(), elapsed);

    CycleReport {
        record,
        outcomes,
        elapsed,
    }
}
