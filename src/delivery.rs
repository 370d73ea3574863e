//! Bounded retrying delivery queue for finalized segment payloads.
//!
//! Payloads are sent one at a time in FIFO order on the queue's own worker
//! thread. Transient failures (transport errors and 5xx gateway codes) retry
//! in place with exponential backoff, jitter and a hard deadline; anything
//! else is terminal on first sight. Delivery outcomes never propagate to the
//! host, this is a best-effort analytics channel.

use crate::config::DeliveryConfig;
use crate::ident::jitter_factor;
use crate::worker::{Scheduler, Worker};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Status codes retried with backoff: transport failure, bad gateway,
/// service unavailable, gateway timeout.
const TRANSIENT_STATUSES: [u16; 4] = [0, 502, 503, 504];

/// Errors constructing the delivery transport.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("failed to create delivery runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error("failed to create http client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Executes one blocking POST and reports the HTTP status, with `0` standing
/// in for a transport-level failure (connection refused, timeout).
pub trait Transport: Send + Sync {
    fn send(&self, url: &str, body: &str, headers: &[(String, String)]) -> u16;
}

/// Terminal outcome of one queued payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Delivered(u16),
    Failed(u16),
    Expired,
}

/// Observer invoked on the worker thread for every terminal disposition.
pub type DispositionObserver = Box<dyn Fn(Disposition) + Send>;

struct DeliveryRequest {
    body: String,
    retries: u32,
    retry_interval: Duration,
    began: Option<Instant>,
}

impl DeliveryRequest {
    fn new(body: String, initial_interval: Duration) -> Self {
        Self {
            body,
            retries: 0,
            retry_interval: initial_interval,
            began: None,
        }
    }

    /// Randomized wait before the next attempt. The jitter applies to the
    /// current interval; the multiplier only affects the interval after it.
    fn prepare_retry(&mut self, config: &DeliveryConfig) -> Duration {
        let wait = self
            .retry_interval
            .mul_f64(jitter_factor(config.randomization_factor()));
        self.retry_interval = self
            .retry_interval
            .mul_f64(config.multiplier())
            .min(config.max_backoff());
        self.retries += 1;
        wait
    }
}

enum Command {
    Enqueue(DeliveryRequest),
    Send,
}

/// FIFO delivery queue with a single in-flight payload.
pub struct DeliveryQueue {
    worker: Worker<Command>,
    initial_interval: Duration,
}

impl DeliveryQueue {
    pub fn new(config: DeliveryConfig, api_key: String, transport: Arc<dyn Transport>) -> Self {
        Self::with_observer(config, api_key, transport, None)
    }

    /// Like [`DeliveryQueue::new`] with a hook observing every terminal
    /// disposition.
    pub fn with_observer(
        config: DeliveryConfig,
        api_key: String,
        transport: Arc<dyn Transport>,
        observer: Option<DispositionObserver>,
    ) -> Self {
        let initial_interval = config.initial_interval();
        let mut state = QueueState {
            pending: VecDeque::new(),
            sending: false,
            config,
            api_key,
            transport,
            observer,
        };
        let worker = Worker::spawn("telemetry-delivery", move |command, scheduler| {
            state.handle(command, scheduler)
        });
        Self {
            worker,
            initial_interval,
        }
    }

    /// Hand a serialized payload to the queue. Returns immediately; the
    /// payload is dropped with a warning if the queue is at capacity.
    pub fn enqueue(&self, body: String) {
        self.worker
            .scheduler()
            .send(Command::Enqueue(DeliveryRequest::new(
                body,
                self.initial_interval,
            )));
    }

    /// Stop the worker thread, abandoning queued payloads and pending
    /// retries.
    pub fn shutdown(&mut self) {
        self.worker.shutdown();
    }
}

struct QueueState {
    pending: VecDeque<DeliveryRequest>,
    sending: bool,
    config: DeliveryConfig,
    api_key: String,
    transport: Arc<dyn Transport>,
    observer: Option<DispositionObserver>,
}

impl QueueState {
    fn handle(&mut self, command: Command, scheduler: &Scheduler<Command>) {
        match command {
            Command::Enqueue(request) => {
                if self.pending.len() >= self.config.max_queued() {
                    log::warn!(
                        "delivery queue full ({} payloads), new payload dropped",
                        self.pending.len()
                    );
                    return;
                }
                self.pending.push_back(request);
                if !self.sending {
                    self.sending = true;
                    scheduler.send(Command::Send);
                }
            }
            Command::Send => self.send_next(scheduler),
        }
    }

    fn send_next(&mut self, scheduler: &Scheduler<Command>) {
        let Some(head) = self.pending.front_mut() else {
            self.sending = false;
            return;
        };
        if head.began.is_none() {
            head.began = Some(Instant::now());
        }

        let mut headers = vec![("apikey".to_owned(), self.api_key.clone())];
        if head.retries > 0 {
            headers.push(("X-Retry-Num".to_owned(), head.retries.to_string()));
        }
        let status = self
            .transport
            .send(self.config.url(), &head.body, &headers);

        if TRANSIENT_STATUSES.contains(&status) {
            let elapsed = head.began.map(|b| b.elapsed()).unwrap_or_default();
            if elapsed >= self.config.deadline() {
                log::warn!(
                    "payload past delivery deadline after {} retries, dropped",
                    head.retries
                );
                self.pending.pop_front();
                self.resolve(Disposition::Expired);
                self.advance(scheduler);
            } else {
                let wait = head.prepare_retry(&self.config);
                log::info!(
                    "transient delivery failure (status {status}), retry {} in {}ms",
                    head.retries,
                    wait.as_millis()
                );
                scheduler.send_delayed(Command::Send, wait);
            }
        } else {
            self.pending.pop_front();
            if (200..300).contains(&status) {
                log::debug!("payload delivered (status {status})");
                self.resolve(Disposition::Delivered(status));
            } else {
                log::warn!("payload rejected with status {status}, dropped");
                self.resolve(Disposition::Failed(status));
            }
            self.advance(scheduler);
        }
    }

    fn advance(&mut self, scheduler: &Scheduler<Command>) {
        if self.pending.is_empty() {
            self.sending = false;
        } else {
            scheduler.send(Command::Send);
        }
    }

    fn resolve(&self, disposition: Disposition) {
        if let Some(observer) = &self.observer {
            observer(disposition);
        }
    }
}

/// HTTP transport over a current-thread runtime, blocking only the delivery
/// worker thread.
pub struct HttpTransport {
    client: reqwest::Client,
    runtime: tokio::runtime::Runtime,
}

impl HttpTransport {
    pub fn new() -> Result<Self, DeliveryError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self { client, runtime })
    }
}

impl Transport for HttpTransport {
    fn send(&self, url: &str, body: &str, headers: &[(String, String)]) -> u16 {
        let result = self.runtime.block_on(async {
            let mut request = self
                .client
                .post(url)
                .header("Content-Type", "application/json")
                .body(body.to_owned());
            for (name, value) in headers {
                request = request.header(name.as_str(), value.as_str());
            }
            request.send().await
        });
        match result {
            Ok(response) => response.status().as_u16(),
            Err(e) => {
                log::warn!("delivery transport error: {e}");
                0
            }
        }
    }
}
