// SPDX-License-Identifier: Apache-2.0
//! Shared test plumbing: a scripted transport and event collection.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bramble_client::{ClientConfig, NetworkError, QueryEvent, Transport, TransportFuture};
use bramble_graphql::{GraphqlError, GraphqlRequest, GraphqlResponse};
use serde_json::Value;
use tokio::sync::Semaphore;

/// One observed request, captured before the transport resolves.
#[derive(Debug, Clone)]
pub struct SentRequest {
    pub query: String,
    pub variables: Value,
    pub headers: Vec<(String, String)>,
}

struct Scripted {
    outcome: Result<GraphqlResponse, u16>,
    gate: Option<Arc<Semaphore>>,
}

/// Transport double that replays scripted responses in order and records
/// every request. A gated response holds its request open until the test
/// releases the gate, which is how mid-flight states are observed.
#[derive(Default)]
pub struct ScriptedTransport {
    queue: Mutex<VecDeque<Scripted>>,
    log: Mutex<Vec<SentRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_data(&self, data: Value) {
        self.push(Ok(GraphqlResponse {
            data: Some(data),
            errors: Vec::new(),
        }), None);
    }

    pub fn push_data_with_errors(&self, data: Value, errors: Vec<GraphqlError>) {
        self.push(Ok(GraphqlResponse {
            data: Some(data),
            errors,
        }), None);
    }

    pub fn push_errors(&self, errors: Vec<GraphqlError>) {
        self.push(Ok(GraphqlResponse { data: None, errors }), None);
    }

    pub fn push_network_error(&self) {
        self.push(Err(503), None);
    }

    pub fn push_gated_data(&self, data: Value) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.push(Ok(GraphqlResponse {
            data: Some(data),
            errors: Vec::new(),
        }), Some(Arc::clone(&gate)));
        gate
    }

    pub fn push_gated_network_error(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.push(Err(503), Some(Arc::clone(&gate)));
        gate
    }

    pub fn requests(&self) -> Vec<SentRequest> {
        self.log.lock().unwrap().clone()
    }

    fn push(&self, outcome: Result<GraphqlResponse, u16>, gate: Option<Arc<Semaphore>>) {
        self.queue.lock().unwrap().push_back(Scripted { outcome, gate });
    }
}

impl Transport for ScriptedTransport {
    fn send(
        &self,
        _endpoint: &str,
        request: &GraphqlRequest,
        headers: &[(String, String)],
    ) -> TransportFuture {
        self.log.lock().unwrap().push(SentRequest {
            query: request.query.clone(),
            variables: request.variables.clone(),
            headers: headers.to_vec(),
        });
        let next = self.queue.lock().unwrap().pop_front();
        Box::pin(async move {
            let Some(scripted) = next else {
                return Err(NetworkError::Status(500));
            };
            if let Some(gate) = scripted.gate {
                let _permit = gate.acquire().await;
            }
            scripted.outcome.map_err(NetworkError::Status)
        })
    }
}

/// Builds a client over a fresh scripted transport.
pub fn scripted_client() -> (bramble_client::Client, Arc<ScriptedTransport>) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let transport = ScriptedTransport::new();
    let client = bramble_client::Client::with_transport(
        ClientConfig::default(),
        Arc::clone(&transport) as Arc<dyn Transport>,
    );
    (client, transport)
}

/// Shared sink for watcher deliveries.
pub type Events = Arc<Mutex<Vec<QueryEvent>>>;

pub fn event_sink() -> (Events, impl FnMut(QueryEvent) + Send + 'static) {
    let events: Events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    (events, move |event| sink.lock().unwrap().push(event))
}

/// Polls until `predicate` holds or a second passes.
pub async fn wait_until(mut predicate: impl FnMut() -> bool) {
    for _ in 0..200 {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within timeout");
}

/// Polls until at least `count` events arrived.
pub async fn wait_for_events(events: &Events, count: usize) {
    let events = Arc::clone(events);
    wait_until(move || events.lock().unwrap().len() >= count).await;
}
