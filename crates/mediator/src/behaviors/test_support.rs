//! Shared fixtures for behavior tests.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dbets_core::DomainError;

use crate::error::MediatorError;
use crate::handler::{HandlerContext, RequestHandler};
use crate::mediator::Mediator;
use crate::pipeline::Pipeline;
use crate::registry::HandlerRegistry;
use crate::request::{Request, RequestKind};

/// Command that echoes its text, optionally after a delay or failing instead.
#[derive(Debug)]
pub struct Echo {
    pub text: String,
    delay: Option<Duration>,
    error: Option<MediatorError>,
}

impl Echo {
    pub fn ok(text: &str) -> Self {
        Self {
            text: text.to_string(),
            delay: None,
            error: None,
        }
    }

    pub fn slow(text: &str, delay: Duration) -> Self {
        Self::ok(text).after(delay)
    }

    pub fn failing(error: MediatorError) -> Self {
        Self {
            error: Some(error),
            ..Self::ok("")
        }
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

impl Request for Echo {
    type Response = String;
}

struct EchoHandler;

#[async_trait]
impl RequestHandler<Echo> for EchoHandler {
    async fn handle(&self, request: Echo, _ctx: &HandlerContext<'_>) -> Result<String, MediatorError> {
        if let Some(delay) = request.delay {
            tokio::time::sleep(delay).await;
        }
        match request.error {
            Some(err) => Err(err),
            None => Ok(request.text),
        }
    }
}

/// Query resolved by a counting handler.
#[derive(Debug)]
pub struct Lookup {
    key: String,
    exists: bool,
}

impl Lookup {
    pub fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            exists: true,
        }
    }

    pub fn missing(key: &str) -> Self {
        Self {
            key: key.to_string(),
            exists: false,
        }
    }
}

impl Request for Lookup {
    type Response = String;

    fn kind(&self) -> RequestKind {
        RequestKind::Query
    }
}

struct LookupHandler {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl RequestHandler<Lookup> for LookupHandler {
    async fn handle(
        &self,
        request: Lookup,
        _ctx: &HandlerContext<'_>,
    ) -> Result<String, MediatorError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if !request.exists {
            return Err(DomainError::not_found(request.key).into());
        }
        Ok(format!("{}#{n}", request.key))
    }
}

/// Mediator with `Echo` and `Lookup` handlers; returns the lookup call counter.
pub fn fixture(pipeline: Pipeline) -> (Mediator, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let registry = HandlerRegistry::builder()
        .register::<Echo, _>(EchoHandler)
        .register::<Lookup, _>(LookupHandler {
            calls: calls.clone(),
        })
        .build();
    (Mediator::new(registry, pipeline), calls)
}

pub fn mediator_with(pipeline: Pipeline) -> Mediator {
    fixture(pipeline).0
}

/// In-memory sink for formatted log output.
#[derive(Debug, Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    pub fn contents(&self) -> String {
        let bytes = self.0.lock().unwrap();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Route this thread's tracing output into a buffer until the guard drops.
pub fn capture_logs() -> (CapturedLogs, tracing::subscriber::DefaultGuard) {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .finish();
    let guard = tracing::subscriber::set_default(subscriber);
    (logs, guard)
}
