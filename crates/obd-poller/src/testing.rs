//! Scripted diagnostic link for tests

use async_trait::async_trait;
use obd_protocol::{DiagnosticCommand, DiagnosticLink, ObdError, RawResponse};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

type Responder = Box<dyn FnMut(&DiagnosticCommand) -> Result<RawResponse, ObdError> + Send>;

/// Shared counters that outlive the link once it is moved into a poll loop
#[derive(Clone, Default)]
pub struct Probes {
    closes: Arc<AtomicUsize>,
    queries: Arc<Mutex<Vec<String>>>,
}

impl Probes {
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

pub struct ScriptedLink {
    connected: bool,
    supported: Result<Vec<DiagnosticCommand>, ObdError>,
    known: Vec<DiagnosticCommand>,
    responder: Responder,
    probes: Probes,
}

impl ScriptedLink {
    pub fn new() -> Self {
        Self {
            connected: true,
            supported: Ok(Vec::new()),
            known: obd_protocol::standard_commands(),
            responder: Box::new(|_| Ok(RawResponse::Empty)),
            probes: Probes::default(),
        }
    }

    pub fn disconnected(mut self) -> Self {
        self.connected = false;
        self
    }

    pub fn with_supported(mut self, supported: Result<Vec<DiagnosticCommand>, ObdError>) -> Self {
        self.supported = supported;
        self
    }

    pub fn with_known(mut self, known: Vec<DiagnosticCommand>) -> Self {
        self.known = known;
        self
    }

    pub fn with_responder<F>(mut self, responder: F) -> Self
    where
        F: FnMut(&DiagnosticCommand) -> Result<RawResponse, ObdError> + Send + 'static,
    {
        self.responder = Box::new(responder);
        self
    }

    pub fn probes(&self) -> Probes {
        self.probes.clone()
    }
}

#[async_trait]
impl DiagnosticLink for ScriptedLink {
    fn is_connected(&self) -> bool {
        self.connected
    }

    fn port_name(&self) -> Option<&str> {
        Some("scripted")
    }

    async fn query(&mut self, command: &DiagnosticCommand) -> Result<RawResponse, ObdError> {
        self.probes
            .queries
            .lock()
            .unwrap()
            .push(command.name().to_string());
        (self.responder)(command)
    }

    async fn supported_commands(&mut self) -> Result<Vec<DiagnosticCommand>, ObdError> {
        self.supported.clone()
    }

    fn known_commands(&self) -> Vec<DiagnosticCommand> {
        self.known.clone()
    }

    async fn close(&mut self) {
        self.probes.closes.fetch_add(1, Ordering::SeqCst);
        self.connected = false;
    }
}
