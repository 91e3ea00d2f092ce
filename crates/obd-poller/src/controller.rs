//! Poll Loop Controller
//!
//! Drives one run: connect, resolve the catalog, then execute and persist a
//! cycle every interval until the shutdown flag is raised. The link is
//! closed exactly once whichever way the run ends.

use crate::catalog::{self, Catalog, CatalogSource};
use crate::cycle::{execute_cycle, FieldOutcome};
use crate::error::PollError;
use obd_protocol::{DiagnosticLink, ObdError};
use obd_storage::JsonlWriter;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Poll loop configuration
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Delay between the end of one cycle and the start of the next
    pub interval: Duration,
    pub catalog: CatalogSource,
    pub log_path: PathBuf,
    /// `fsync` after each record
    pub sync_data: bool,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            catalog: CatalogSource::Discovered,
            log_path: PathBuf::from("obd_logs/all_obd.jsonl"),
            sync_data: false,
        }
    }
}

/// Lifecycle of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Connecting,
    Resolving,
    Polling,
    Stopping,
    Closed,
}

/// Counters for a finished run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub cycles: u64,
    pub records_written: u64,
    pub query_failures: u64,
    pub empty_responses: u64,
    pub catalog_len: usize,
}

pub struct PollLoop {
    config: PollerConfig,
    state: LoopState,
    summary: RunSummary,
}

impl PollLoop {
    pub fn new(config: PollerConfig) -> Self {
        Self {
            config,
            state: LoopState::Idle,
            summary: RunSummary::default(),
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Counters so far; complete once `run` has returned, even with an error
    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    fn transition(&mut self, next: LoopState) {
        debug!("Poll loop {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Run until `shutdown` becomes `true` or a fatal error occurs.
    ///
    /// Cancellation is observed before each cycle and during the inter-cycle
    /// delay, never in the middle of a cycle, so every record written is
    /// complete.
    pub async fn run<L, C, Fut>(
        &mut self,
        connect: C,
        shutdown: watch::Receiver<bool>,
    ) -> Result<RunSummary, PollError>
    where
        L: DiagnosticLink,
        C: FnOnce() -> Fut,
        Fut: Future<Output = Result<L, ObdError>>,
    {
        self.transition(LoopState::Connecting);
        let mut link = match connect().await {
            Ok(link) if link.is_connected() => link,
            Ok(mut link) => {
                error!("Adapter did not complete the connection handshake");
                link.close().await;
                self.transition(LoopState::Closed);
                return Err(PollError::Connection(ObdError::AdapterNotResponding));
            }
            Err(e) => {
                error!("Failed to connect: {}", e);
                self.transition(LoopState::Closed);
                return Err(PollError::Connection(e));
            }
        };
        info!("Connected on port {}", link.port_name().unwrap_or("unknown"));

        let result = self.resolve_and_poll(&mut link, shutdown).await;
        if self.state == LoopState::Polling {
            self.transition(LoopState::Stopping);
        }
        link.close().await;
        self.transition(LoopState::Closed);

        match &result {
            Ok(summary) => info!(
                "Stopped logging after {} cycles, {} records written",
                summary.cycles, summary.records_written
            ),
            Err(e) => error!("Poll loop aborted: {}", e),
        }
        result
    }

    async fn resolve_and_poll<L>(
        &mut self,
        link: &mut L,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<RunSummary, PollError>
    where
        L: DiagnosticLink,
    {
        self.transition(LoopState::Resolving);
        let catalog = catalog::resolve(&self.config.catalog, link).await?;
        log_catalog(&catalog);

        let mut writer = JsonlWriter::open(&self.config.log_path)
            .await?
            .with_sync_data(self.config.sync_data);
        info!("Logging to {}", writer.path().display());

        self.summary.catalog_len = catalog.len();
        self.transition(LoopState::Polling);

        // Once every sender is gone nobody can cancel; keep sleeping normally
        let mut cancellable = true;

        loop {
            if *shutdown.borrow() {
                info!("Shutdown requested");
                break;
            }

            let report = execute_cycle(link, &catalog).await;
            writer.append(&report.record).await?;

            self.summary.cycles += 1;
            self.summary.records_written = writer.lines_written();
            self.summary.query_failures += report.count(FieldOutcome::Failed) as u64;
            self.summary.empty_responses += report.count(FieldOutcome::Empty) as u64;
            metrics::counter!("obd_records_written_total").increment(1);

            tokio::select! {
                _ = tokio::time::sleep(self.config.interval) => {}
                changed = shutdown.changed(), if cancellable => {
                    if changed.is_err() {
                        warn!("Shutdown channel closed, polling continues until the process exits");
                        cancellable = false;
                    }
                }
            }
        }

        Ok(self.summary.clone())
    }
}

fn log_catalog(catalog: &Catalog) {
    info!("Polling {} commands every cycle", catalog.len());
    let manufacturer: Vec<&str> = catalog
        .entries()
        .iter()
        .filter(|entry| entry.command().is_manufacturer())
        .map(|entry| entry.key())
        .collect();
    if !manufacturer.is_empty() {
        info!("Manufacturer commands: {}", manufacturer.join(", "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogEntry;
    use crate::testing::ScriptedLink;
    use obd_protocol::{CommandRegistry, DiagnosticCommand, Quantity, Unit};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn config(log_path: PathBuf, catalog: CatalogSource) -> PollerConfig {
        PollerConfig {
            interval: Duration::from_millis(1),
            catalog,
            log_path,
            sync_data: false,
        }
    }

    fn fixed(names: &[&str]) -> CatalogSource {
        let registry = CommandRegistry::standard();
        CatalogSource::Fixed(
            names
                .iter()
                .map(|n| CatalogEntry::new(*n, registry.lookup(n).unwrap().clone()))
                .collect(),
        )
    }

    /// Link that raises the shutdown flag once `cycles` full cycles were queried
    fn stopping_link(cycles: usize, per_cycle: usize, stop: watch::Sender<bool>) -> ScriptedLink {
        let queried = Arc::new(AtomicUsize::new(0));
        ScriptedLink::new().with_responder(move |command: &DiagnosticCommand| {
            let n = queried.fetch_add(1, Ordering::SeqCst) + 1;
            if n == cycles * per_cycle {
                let _ = stop.send(true);
            }
            match command.name() {
                "RPM" => Ok(Quantity::new(2500.0, Unit::Rpm).into()),
                _ => Err(ObdError::Timeout(1000)),
            }
        })
    }

    #[tokio::test]
    async fn test_runs_until_cancelled_and_writes_one_line_per_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/all_obd.jsonl");
        let (tx, rx) = watch::channel(false);

        let link = stopping_link(3, 2, tx);
        let probes = link.probes();
        let mut poller = PollLoop::new(config(path.clone(), fixed(&["RPM", "COOLANT_TEMP"])));

        let summary = poller.run(move || async move { Ok(link) }, rx).await.unwrap();

        assert_eq!(summary.cycles, 3);
        assert_eq!(summary.records_written, 3);
        assert_eq!(summary.query_failures, 3);
        assert_eq!(summary.catalog_len, 2);
        assert_eq!(poller.state(), LoopState::Closed);
        assert_eq!(probes.closes(), 1);

        let records = obd_storage::read_records(&path).await.unwrap();
        assert_eq!(records.len(), 3);
        for record in &records {
            let keys: Vec<_> = record.keys().map(String::as_str).collect();
            assert_eq!(keys, vec!["timestamp", "RPM", "COOLANT_TEMP"]);
            assert_eq!(record["RPM"], json!(2500.0));
            assert_eq!(record["COOLANT_TEMP"], Value::Null);
        }
    }

    #[tokio::test]
    async fn test_cancel_before_first_cycle_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("all_obd.jsonl");
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let link = ScriptedLink::new();
        let probes = link.probes();
        let mut poller = PollLoop::new(config(path.clone(), fixed(&["RPM"])));

        let summary = poller.run(move || async move { Ok(link) }, rx).await.unwrap();
        assert_eq!(summary.cycles, 0);
        assert!(probes.queries().is_empty());
        assert_eq!(probes.closes(), 1);
    }

    #[tokio::test]
    async fn test_connect_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("all_obd.jsonl");
        let (_tx, rx) = watch::channel(false);
        let mut poller = PollLoop::new(config(path.clone(), CatalogSource::Discovered));

        let result = poller
            .run(|| async { Err::<ScriptedLink, _>(ObdError::NoAdapter) }, rx)
            .await;

        assert!(matches!(result, Err(PollError::Connection(ObdError::NoAdapter))));
        assert_eq!(poller.state(), LoopState::Closed);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_unconnected_link_is_closed_and_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let (_tx, rx) = watch::channel(false);
        let link = ScriptedLink::new().disconnected();
        let probes = link.probes();
        let mut poller = PollLoop::new(config(dir.path().join("a.jsonl"), fixed(&["RPM"])));

        let result = poller.run(move || async move { Ok(link) }, rx).await;
        assert!(matches!(result, Err(PollError::Connection(_))));
        assert_eq!(probes.closes(), 1);
    }

    #[tokio::test]
    async fn test_discovery_failure_creates_no_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/all_obd.jsonl");
        let (_tx, rx) = watch::channel(false);
        let link = ScriptedLink::new()
            .with_supported(Ok(Vec::new()))
            .with_known(Vec::new());
        let probes = link.probes();
        let mut poller = PollLoop::new(config(path.clone(), CatalogSource::Discovered));

        let result = poller.run(move || async move { Ok(link) }, rx).await;

        assert!(matches!(result, Err(PollError::Discovery(_))));
        assert!(probes.queries().is_empty());
        assert_eq!(probes.closes(), 1);
        assert!(!path.exists());
        assert_eq!(poller.state(), LoopState::Closed);
    }

    #[tokio::test]
    async fn test_unwritable_log_is_fatal_and_link_closed() {
        let dir = tempfile::tempdir().unwrap();
        let (_tx, rx) = watch::channel(false);
        let link = ScriptedLink::new();
        let probes = link.probes();
        // The log path is an existing directory
        let mut poller = PollLoop::new(config(dir.path().to_path_buf(), fixed(&["RPM"])));

        let result = poller.run(move || async move { Ok(link) }, rx).await;
        assert!(matches!(result, Err(PollError::Persistence(_))));
        assert_eq!(probes.closes(), 1);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_write_failure_mid_run_stops_polling() {
        if !std::path::Path::new("/dev/full").exists() {
            return;
        }
        let (_tx, rx) = watch::channel(false);
        let link = ScriptedLink::new();
        let probes = link.probes();
        let mut poller = PollLoop::new(config(PathBuf::from("/dev/full"), fixed(&["RPM", "SPEED"])));

        let result = poller.run(move || async move { Ok(link) }, rx).await;

        assert!(matches!(result, Err(PollError::Persistence(_))));
        assert_eq!(probes.queries(), vec!["RPM", "SPEED"]);
        assert_eq!(probes.closes(), 1);
        assert_eq!(poller.summary().records_written, 0);
        assert_eq!(poller.state(), LoopState::Closed);
    }

    #[tokio::test]
    async fn test_discovered_catalog_drives_record_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("all_obd.jsonl");
        let (tx, rx) = watch::channel(false);
        let registry = CommandRegistry::standard();
        let supported = ["SPEED", "RPM", "COOLANT_TEMP"]
            .iter()
            .map(|n| registry.lookup(n).unwrap().clone())
            .chain(std::iter::once(DiagnosticCommand::manufacturer(
                "OIL_LIFE",
                0x1A2B,
                obd_protocol::Decoder::Raw,
            )))
            .collect();
        let link = stopping_link(2, 4, tx).with_supported(Ok(supported));
        let mut poller = PollLoop::new(config(path.clone(), CatalogSource::Discovered));

        poller.run(move || async move { Ok(link) }, rx).await.unwrap();

        let records = obd_storage::read_records(&path).await.unwrap();
        assert_eq!(records.len(), 2);
        let keys: Vec<_> = records[0].keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["timestamp", "COOLANT_TEMP", "RPM", "SPEED", "OIL_LIFE"]);
    }
}
