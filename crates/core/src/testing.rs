//! Scripted driver used by the unit tests in this crate.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::catalog::LIST_DATABASES_QUERY;
use crate::connection_manager::{DriverBackend, DriverError, QueryRequest, VERIFICATION_QUERY};
use crate::endpoint::{AuthToken, Endpoint};
use crate::record::{NodeValue, Record, Value};

type Response = Result<Vec<Record>, DriverError>;

#[derive(Debug, Default)]
struct FakeState {
    reject_endpoints: AtomicBool,
    created: AtomicUsize,
    closed: AtomicUsize,
    auth_tokens: Mutex<Vec<AuthToken>>,
    requests: Mutex<Vec<QueryRequest>>,
    verification: Mutex<VecDeque<Response>>,
    catalog: Mutex<VecDeque<Response>>,
    admin: Mutex<VecDeque<Response>>,
    verification_gate: Mutex<Option<Arc<Notify>>>,
    catalog_gate: Mutex<Option<Arc<Notify>>>,
    close_gate: Mutex<Option<Arc<Notify>>>,
    events: Mutex<Vec<&'static str>>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct FakeBackend {
    state: Arc<FakeState>,
}

#[derive(Debug, Clone)]
pub(crate) struct FakeDriver {
    _id: usize,
}

impl FakeBackend {
    pub(crate) fn reject_endpoints(&self) {
        self.state.reject_endpoints.store(true, Ordering::SeqCst);
    }

    pub(crate) fn push_verification(&self, response: Response) {
        self.state
            .verification
            .lock()
            .expect("verification queue")
            .push_back(response);
    }

    pub(crate) fn push_catalog(&self, response: Response) {
        self.state
            .catalog
            .lock()
            .expect("catalog queue")
            .push_back(response);
    }

    pub(crate) fn push_admin(&self, response: Response) {
        self.state
            .admin
            .lock()
            .expect("admin queue")
            .push_back(response);
    }

    /// The next verification query waits until `gate` is notified.
    pub(crate) fn hold_verification(&self, gate: Arc<Notify>) {
        *self.state.verification_gate.lock().expect("gate") = Some(gate);
    }

    /// The next catalog query waits until `gate` is notified.
    pub(crate) fn hold_catalog(&self, gate: Arc<Notify>) {
        *self.state.catalog_gate.lock().expect("gate") = Some(gate);
    }

    /// The next `close` waits until `gate` is notified.
    pub(crate) fn hold_close(&self, gate: Arc<Notify>) {
        *self.state.close_gate.lock().expect("gate") = Some(gate);
    }

    /// Handle lifecycle in call order: `create`, `close-start`, `close-done`.
    pub(crate) fn events(&self) -> Vec<&'static str> {
        self.state.events.lock().expect("events").clone()
    }

    fn record_event(&self, event: &'static str) {
        self.state.events.lock().expect("events").push(event);
    }

    pub(crate) fn auth_tokens(&self) -> Vec<AuthToken> {
        self.state.auth_tokens.lock().expect("auth tokens").clone()
    }

    pub(crate) fn requests(&self) -> Vec<QueryRequest> {
        self.state.requests.lock().expect("requests").clone()
    }

    pub(crate) fn created_count(&self) -> usize {
        self.state.created.load(Ordering::SeqCst)
    }

    pub(crate) fn closed_count(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DriverBackend for FakeBackend {
    type Driver = FakeDriver;

    async fn create_driver(
        &self,
        _endpoint: &Endpoint,
        auth: &AuthToken,
    ) -> Result<Self::Driver, DriverError> {
        if self.state.reject_endpoints.load(Ordering::SeqCst) {
            return Err(DriverError::new(
                "UrlParseError",
                "Invalid URI: relative URL without a base",
            ));
        }
        self.state
            .auth_tokens
            .lock()
            .expect("auth tokens")
            .push(auth.clone());
        self.record_event("create");
        let id = self.state.created.fetch_add(1, Ordering::SeqCst);
        Ok(FakeDriver { _id: id })
    }

    async fn run(
        &self,
        _driver: &Self::Driver,
        request: &QueryRequest,
    ) -> Result<Vec<Record>, DriverError> {
        self.state
            .requests
            .lock()
            .expect("requests")
            .push(request.clone());

        match request.query.as_str() {
            VERIFICATION_QUERY => {
                let gate = self.state.verification_gate.lock().expect("gate").take();
                if let Some(gate) = gate {
                    gate.notified().await;
                }
                let scripted = self
                    .state
                    .verification
                    .lock()
                    .expect("verification queue")
                    .pop_front();
                scripted.unwrap_or_else(|| Ok(vec![node_record(false)]))
            }
            LIST_DATABASES_QUERY => {
                let gate = self.state.catalog_gate.lock().expect("gate").take();
                if let Some(gate) = gate {
                    gate.notified().await;
                }
                let scripted = self.state.catalog.lock().expect("catalog queue").pop_front();
                scripted.unwrap_or_else(|| {
                    Ok(vec![
                        database_record("neo4j", true, "standard"),
                        database_record("system", false, "system"),
                    ])
                })
            }
            _ => {
                let scripted = self.state.admin.lock().expect("admin queue").pop_front();
                scripted.unwrap_or_else(|| Ok(Vec::new()))
            }
        }
    }

    async fn close(&self, _driver: Self::Driver) {
        self.record_event("close-start");
        let gate = self.state.close_gate.lock().expect("gate").take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.state.closed.fetch_add(1, Ordering::SeqCst);
        self.record_event("close-done");
    }
}

pub(crate) fn node_record(element_id: bool) -> Record {
    Record::new().with(
        "n",
        Value::Node(NodeValue {
            id: 42,
            element_id: element_id.then(|| "4:a1b2:42".to_string()),
            labels: Vec::new(),
            properties: BTreeMap::new(),
        }),
    )
}

pub(crate) fn database_record(name: &str, default: bool, kind: &str) -> Record {
    Record::new()
        .with("name", Value::String(name.to_string()))
        .with("default", Value::Boolean(default))
        .with("type", Value::String(kind.to_string()))
        .with("currentStatus", Value::String("online".to_string()))
}
