//! Shared fakes for the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, watch};
use watchdogd::config::{AppConfig, DeviceSettings, WatchSettings};
use watchdogd::context::AppContext;
use watchdogd::core::{
    AdHocRequest, ConnectivityState, DeviceClient, MessageLevel, Prober, StatusMessage,
    StatusSink, TaskState,
};
use watchdogd::error::DeliveryError;

pub const READY: ConnectivityState = ConnectivityState {
    address_valid: true,
    reachable: true,
};

/// Keeps everything the core reported, in order.
#[derive(Default)]
pub struct RecordingSink {
    messages: Mutex<Vec<StatusMessage>>,
    connectivity: Mutex<Vec<ConnectivityState>>,
}

impl RecordingSink {
    pub fn messages(&self) -> Vec<StatusMessage> {
        self.messages.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<StatusMessage> {
        self.messages()
            .into_iter()
            .filter(|m| m.level == MessageLevel::Error)
            .collect()
    }

    pub fn connectivity_updates(&self) -> Vec<ConnectivityState> {
        self.connectivity.lock().unwrap().clone()
    }
}

impl StatusSink for RecordingSink {
    fn update_connectivity(&self, state: ConnectivityState) {
        self.connectivity.lock().unwrap().push(state);
    }

    fn append_message(&self, message: StatusMessage) {
        self.messages.lock().unwrap().push(message);
    }
}

/// Answers every probe the same way after an optional delay.
pub struct ScriptedProber {
    answer: bool,
    delay: Duration,
    calls: AtomicUsize,
    pub started: Notify,
}

impl ScriptedProber {
    pub fn answering(answer: bool) -> Arc<Self> {
        Self::slow(answer, Duration::ZERO)
    }

    pub fn slow(answer: bool, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            answer,
            delay,
            calls: AtomicUsize::new(0),
            started: Notify::new(),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn check_reachable(&self, _address: &str, _timeout: Duration) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.started.notify_one();
        tokio::time::sleep(self.delay).await;
        self.answer
    }
}

/// Device client that records requests instead of sending them.
pub struct RecordingClient {
    requests: Mutex<Vec<(String, AdHocRequest)>>,
    response: Result<(), DeliveryError>,
    delay: Duration,
    pub started: Notify,
}

impl RecordingClient {
    pub fn ok() -> Arc<Self> {
        Self::stalled(Duration::ZERO)
    }

    /// Answers 200 only after `delay`, standing in for a device that hangs.
    pub fn stalled(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            response: Ok(()),
            delay,
            started: Notify::new(),
        })
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<(String, AdHocRequest)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeviceClient for RecordingClient {
    async fn post_ad_hoc(&self, url: &str, request: &AdHocRequest) -> Result<(), DeliveryError> {
        self.requests
            .lock()
            .unwrap()
            .push((url.to_string(), request.clone()));
        self.started.notify_one();
        tokio::time::sleep(self.delay).await;
        self.response.clone()
    }
}

pub fn device(ip: &str, folder: &std::path::Path) -> DeviceSettings {
    DeviceSettings {
        ip: ip.to_string(),
        folder_path: folder.display().to_string(),
        api_endpoint: "api".to_string(),
        api_port: 8080,
        alfadriver: true,
        cr: false,
    }
}

pub fn fast_watch() -> WatchSettings {
    WatchSettings {
        file_interval_ms: 40,
        reachability_interval_ms: 20,
        probe_timeout_ms: 1_000,
        upload_timeout_ms: 3_000,
        shutdown_grace_ms: 2_000,
        ..Default::default()
    }
}

pub fn context(
    device: DeviceSettings,
    watch: WatchSettings,
    sink: Arc<RecordingSink>,
    prober: Arc<dyn Prober>,
    client: Arc<dyn DeviceClient>,
) -> AppContext {
    AppContext::new(AppConfig { device, watch }, sink, prober, client)
}

/// Record a successful probe for whatever address the store currently holds.
pub async fn mark_ready(ctx: &AppContext) {
    let ip = ctx.store.get().await.ip.clone();
    ctx.store.set_connectivity(&ip, READY).await;
}

pub async fn wait_for_state(rx: &mut watch::Receiver<TaskState>, want: TaskState) {
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == want))
        .await
        .expect("timeout waiting for task state")
        .expect("task state channel closed");
}

/// Poll `check` until it holds or five seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 5s"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
