#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedReceiver;
use turbo_query::{
    ChannelSink, EngineConfig, KeyCodec, Navigator, Notification, NotificationKind, PolicyRegistry,
    QueryClient, RequestDescriptor, Role, Transport, TransportError, TransportRequest, User,
};

#[derive(Clone)]
struct Reply {
    delay: Duration,
    result: Result<Value, TransportError>,
}

/// In-memory transport answering from a script keyed by `"METHOD /path"`.
///
/// Queued replies are used first, in order; then the route's standing reply.
/// Unscripted routes fail with a network error.
#[derive(Default)]
pub struct ScriptedTransport {
    queued: Mutex<HashMap<String, VecDeque<Reply>>>,
    standing: Mutex<HashMap<String, Reply>>,
    requests: Mutex<Vec<TransportRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reply(&self, route: &str, result: Result<Value, TransportError>) {
        self.reply_after(route, Duration::ZERO, result);
    }

    pub fn reply_after(&self, route: &str, delay: Duration, result: Result<Value, TransportError>) {
        self.queued
            .lock()
            .unwrap()
            .entry(route.to_string())
            .or_default()
            .push_back(Reply { delay, result });
    }

    pub fn always(&self, route: &str, result: Result<Value, TransportError>) {
        self.always_after(route, Duration::ZERO, result);
    }

    pub fn always_after(&self, route: &str, delay: Duration, result: Result<Value, TransportError>) {
        self.standing
            .lock()
            .unwrap()
            .insert(route.to_string(), Reply { delay, result });
    }

    /// Number of calls made to a route.
    pub fn calls(&self, route: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| route_of(r) == route)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next_reply(&self, route: &str) -> Reply {
        if let Some(reply) = self
            .queued
            .lock()
            .unwrap()
            .get_mut(route)
            .and_then(VecDeque::pop_front)
        {
            return reply;
        }
        self.standing
            .lock()
            .unwrap()
            .get(route)
            .cloned()
            .unwrap_or_else(|| Reply {
                delay: Duration::ZERO,
                result: Err(TransportError::network(format!("no reply scripted for {}", route))),
            })
    }
}

fn route_of(request: &TransportRequest) -> String {
    format!("{} {}", request.method, request.path)
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: TransportRequest) -> Result<Value, TransportError> {
        let route = route_of(&request);
        self.requests.lock().unwrap().push(request);
        let reply = self.next_reply(&route);
        if !reply.delay.is_zero() {
            tokio::time::sleep(reply.delay).await;
        }
        reply.result
    }
}

#[derive(Clone, Default)]
pub struct CountingNavigator(Arc<AtomicUsize>);

impl Navigator for CountingNavigator {
    fn redirect_to_login(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct Harness {
    pub client: QueryClient,
    pub transport: Arc<ScriptedTransport>,
    navigator: CountingNavigator,
    notifications: UnboundedReceiver<Notification>,
}

impl Harness {
    pub fn new(config: EngineConfig) -> Self {
        Self::with(config, KeyCodec::new(), PolicyRegistry::default())
    }

    pub fn with(config: EngineConfig, codec: KeyCodec, policies: PolicyRegistry) -> Self {
        let transport = ScriptedTransport::new();
        let navigator = CountingNavigator::default();
        let (sink, notifications) = ChannelSink::new();
        let client = QueryClient::builder(transport.clone())
            .notifier(sink)
            .navigator(navigator.clone())
            .codec(codec)
            .policies(policies)
            .config(config)
            .build();
        Self {
            client,
            transport,
            navigator,
            notifications,
        }
    }

    pub fn redirects(&self) -> usize {
        self.navigator.0.load(Ordering::SeqCst)
    }

    pub fn drain_notifications(&mut self) -> Vec<Notification> {
        let mut out = Vec::new();
        while let Ok(n) = self.notifications.try_recv() {
            out.push(n);
        }
        out
    }

    pub fn count_notifications(&mut self, kind: NotificationKind) -> usize {
        self.drain_notifications()
            .into_iter()
            .filter(|n| n.kind == kind)
            .count()
    }
}

pub fn items(page: i64) -> RequestDescriptor {
    RequestDescriptor::new("items").param("page", page)
}

pub fn me() -> RequestDescriptor {
    RequestDescriptor::new("me").session_scoped()
}

pub fn orders() -> RequestDescriptor {
    RequestDescriptor::new("orders").session_scoped()
}

pub fn ada() -> User {
    User::new("u_ada", "ada@example.com").with_role(Role::Customer)
}

pub fn ada_json() -> Value {
    json!({"id": "u_ada", "email": "ada@example.com", "roles": ["customer"]})
}

pub fn rejected() -> Result<Value, TransportError> {
    Err(TransportError::credential_rejected("session expired"))
}

/// Let spawned fetches run to completion under paused time.
pub async fn settle() {
    tokio::time::sleep(Duration::from_secs(5)).await;
}
