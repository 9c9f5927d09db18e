//! Sampler that fetches its configuration from AWS X-Ray.
//!
//! The control plane serves a prioritized set of sampling rules and, in
//! exchange for per-rule statistics, assigns reservoir quotas so a fleet
//! stays within a global trace budget. This module polls both on a
//! background task and swaps the assembled sampler in atomically; the
//! decision path itself is lock-free and never performs I/O.
//!
//! ```ignore
//! use opentelemetry_aws::trace::XrayRemoteSampler;
//! use opentelemetry_sdk::{runtime, Resource};
//!
//! #[tokio::main]
//! async fn main() {
//!     let sampler = XrayRemoteSampler::builder(
//!         runtime::Tokio,
//!         reqwest::Client::new(),
//!         Resource::builder().build(),
//!     )
//!     .with_endpoint("http://localhost:2000")
//!     .build()
//!     .expect("valid sampler configuration");
//!     // install on the tracer provider via `with_sampler(sampler)`
//! }
//! ```

mod applier;
mod client;
mod clock;
mod matcher;
// Decode-only wire fields (rule version, pagination token) are kept for
// structural equality checks and forward compatibility.
#[allow(dead_code)]
mod protocol;
mod rate_limit;
mod rules;

pub use client::XraySamplerError;
pub use clock::{Clock, SystemClock};

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use futures_channel::mpsc;
use futures_util::{pin_mut, select, FutureExt, StreamExt};
use opentelemetry::otel_debug;
use opentelemetry::trace::{Link, SamplingDecision, SamplingResult, SpanKind, TraceId};
use opentelemetry::{Context, KeyValue};
use opentelemetry_http::HttpClient;
use opentelemetry_sdk::runtime::Runtime;
use opentelemetry_sdk::trace::{Sampler, ShouldSample};
use opentelemetry_sdk::Resource;
use rand::Rng;

use applier::{ResourceFields, DEFAULT_TARGET_INTERVAL};
use client::XraySamplerClient;
use protocol::{
    GetSamplingRulesRequest, GetSamplingRulesResponse, GetSamplingTargetsRequest,
    SamplingTargetDocument,
};
use rate_limit::RateLimitingSampler;
use rules::XrayRulesSampler;

/// Address of the local X-Ray daemon or collector TCP proxy.
const DEFAULT_ENDPOINT: &str = "http://localhost:2000";
const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_secs(300);

const HEX_CHARS: &[u8; 16] = b"0123456789abcdef";

/// Configures a [`XrayRemoteSampler`].
pub struct XrayRemoteSamplerBuilder<C, R> {
    runtime: R,
    client: C,
    resource: Resource,
    endpoint: String,
    polling_interval: Duration,
    initial_sampler: Option<Box<dyn ShouldSample>>,
    clock: Arc<dyn Clock>,
}

impl<C, R> XrayRemoteSamplerBuilder<C, R>
where
    C: HttpClient + 'static,
    R: Runtime,
{
    fn new(runtime: R, client: C, resource: Resource) -> Self {
        XrayRemoteSamplerBuilder {
            runtime,
            client,
            resource,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            polling_interval: DEFAULT_POLLING_INTERVAL,
            initial_sampler: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Sets the address of the X-Ray daemon or collector proxying sampling
    /// requests. Defaults to `http://localhost:2000`.
    pub fn with_endpoint<T: Into<String>>(mut self, endpoint: T) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Sets how often the rule set is polled. Defaults to five minutes; a
    /// little jitter is added to every poll either way.
    pub fn with_polling_interval(mut self, interval: Duration) -> Self {
        self.polling_interval = interval;
        self
    }

    /// Sets the sampler used until the first rule set arrives, and as the
    /// fallback should no rule match a span. Defaults to a parent-based
    /// one-trace-per-second sampler backed by a 5% trace-id ratio.
    pub fn with_initial_sampler<S: ShouldSample + 'static>(mut self, sampler: S) -> Self {
        self.initial_sampler = Some(Box::new(sampler));
        self
    }

    /// Replaces the wall clock used for rate limiting, quota expiry and
    /// statistics windows. Intended for tests.
    pub fn with_clock<T: Clock>(mut self, clock: T) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Starts the background poller and returns the sampler.
    pub fn build(self) -> Result<XrayRemoteSampler, XraySamplerError> {
        let client = XraySamplerClient::new(self.client, &self.endpoint)?;
        let initial = self
            .initial_sampler
            .unwrap_or_else(|| default_initial_sampler(self.clock.clone()));
        let state = Arc::new(ArcSwap::from_pointee(SamplerState::Initial(
            initial.clone(),
        )));
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let config = WorkerConfig {
            client_id: generate_client_id().into(),
            resource: Arc::new(ResourceFields::from_resource(&self.resource)),
            clock: self.clock,
            fallback: initial,
            polling_interval: self.polling_interval,
        };
        run_worker(self.runtime, client, state.clone(), config, shutdown_rx);
        Ok(XrayRemoteSampler {
            inner: Arc::new(Inner {
                state,
                shutdown: Mutex::new(Some(shutdown_tx)),
                endpoint: self.endpoint,
            }),
        })
    }
}

impl<C, R> fmt::Debug for XrayRemoteSamplerBuilder<C, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XrayRemoteSamplerBuilder")
            .field("endpoint", &self.endpoint)
            .field("polling_interval", &self.polling_interval)
            .finish_non_exhaustive()
    }
}

/// Sampler remotely configured by AWS X-Ray.
///
/// Cheap to clone; all clones share the rule set and the background poller.
/// The poller stops when the last clone is dropped or [`shutdown`] is
/// called, after which the most recently installed rules keep serving
/// decisions.
///
/// [`shutdown`]: XrayRemoteSampler::shutdown
#[derive(Clone)]
pub struct XrayRemoteSampler {
    inner: Arc<Inner>,
}

impl XrayRemoteSampler {
    /// Returns a builder for a sampler polling the given endpoint on
    /// `runtime`, matching rules against `resource`.
    ///
    /// The resource should be the same one the tracer provider is
    /// configured with; rule fields like the service name and type match
    /// against it.
    pub fn builder<C, R>(
        runtime: R,
        http_client: C,
        resource: Resource,
    ) -> XrayRemoteSamplerBuilder<C, R>
    where
        C: HttpClient + 'static,
        R: Runtime,
    {
        XrayRemoteSamplerBuilder::new(runtime, http_client, resource)
    }

    /// Stops the background poller, cancelling any in-flight request.
    /// Pending and future decisions use the last installed configuration.
    pub fn shutdown(&self) {
        self.inner.signal_shutdown();
    }
}

impl fmt::Debug for XrayRemoteSampler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XrayRemoteSampler")
            .field("endpoint", &self.inner.endpoint)
            .finish_non_exhaustive()
    }
}

impl ShouldSample for XrayRemoteSampler {
    fn should_sample(
        &self,
        parent_context: Option<&Context>,
        trace_id: TraceId,
        name: &str,
        span_kind: &SpanKind,
        attributes: &[KeyValue],
        links: &[Link],
    ) -> SamplingResult {
        let state = self.inner.state.load();
        match &**state {
            SamplerState::Initial(sampler) => {
                sampler.should_sample(parent_context, trace_id, name, span_kind, attributes, links)
            }
            SamplerState::Rules(rules) => {
                rules.should_sample(parent_context, trace_id, name, span_kind, attributes, links)
            }
        }
    }
}

struct Inner {
    state: Arc<ArcSwap<SamplerState>>,
    shutdown: Mutex<Option<mpsc::Sender<()>>>,
    endpoint: String,
}

impl Inner {
    fn signal_shutdown(&self) {
        if let Ok(mut sender) = self.shutdown.lock() {
            if let Some(mut sender) = sender.take() {
                let _ = sender.try_send(());
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.signal_shutdown();
    }
}

#[derive(Debug)]
enum SamplerState {
    /// No rules received yet; the caller-provided sampler decides.
    Initial(Box<dyn ShouldSample>),
    Rules(XrayRulesSampler),
}

struct WorkerConfig {
    client_id: Arc<str>,
    resource: Arc<ResourceFields>,
    clock: Arc<dyn Clock>,
    fallback: Box<dyn ShouldSample>,
    polling_interval: Duration,
}

/// Spawns the polling task. Rule polls run on a fixed jittered cadence;
/// statistics exchanges follow the earliest reporting window across rules.
/// Both actions run serially on this one task, so sampler installs never
/// interleave.
fn run_worker<C, R>(
    runtime: R,
    client: XraySamplerClient<C>,
    state: Arc<ArcSwap<SamplerState>>,
    config: WorkerConfig,
    shutdown: mpsc::Receiver<()>,
) where
    C: HttpClient + 'static,
    R: Runtime,
{
    let timer = runtime.clone();
    runtime.spawn(Box::pin(async move {
        let mut shutdown = shutdown.fuse();
        let mut previous_response: Option<GetSamplingRulesResponse> = None;
        // First poll fires immediately; the initial sampler covers the gap.
        let mut rules_due = Instant::now();
        let mut targets_due: Option<Instant> = None;

        loop {
            let now = Instant::now();
            let rules_delay = timer.delay(rules_due.saturating_duration_since(now)).fuse();
            // Until a rule set is installed there is nothing to exchange;
            // look again on the polling cadence.
            let targets_in = targets_due
                .map(|due| due.saturating_duration_since(now))
                .unwrap_or(config.polling_interval);
            let targets_delay = timer.delay(targets_in).fuse();
            pin_mut!(rules_delay, targets_delay);

            select! {
                _ = shutdown.next() => return,
                _ = rules_delay => {
                    {
                        let refresh =
                            refresh_rules(&client, &state, &config, &mut previous_response).fuse();
                        pin_mut!(refresh);
                        select! {
                            _ = shutdown.next() => return,
                            installed = refresh => {
                                if installed {
                                    // Give the new rule set one full default
                                    // window before the first exchange.
                                    targets_due =
                                        Some(Instant::now() + DEFAULT_TARGET_INTERVAL);
                                }
                            }
                        }
                    }
                    rules_due = Instant::now()
                        + config.polling_interval
                        + jitter(config.polling_interval);
                },
                _ = targets_delay => {
                    let exchange = refresh_targets(&client, &state, &config).fuse();
                    pin_mut!(exchange);
                    select! {
                        _ = shutdown.next() => return,
                        next_in = exchange => {
                            targets_due = next_in.map(|delay| Instant::now() + delay);
                        }
                    }
                },
            }
        }
    }));
}

/// Polls the rule set. Returns whether a new sampler was installed; a
/// response identical to the previous one keeps the live samplers and
/// their statistics windows.
async fn refresh_rules<C: HttpClient + 'static>(
    client: &XraySamplerClient<C>,
    state: &ArcSwap<SamplerState>,
    config: &WorkerConfig,
    previous_response: &mut Option<GetSamplingRulesResponse>,
) -> bool {
    // Pagination is accepted on the wire but not followed.
    let request = GetSamplingRulesRequest::default();
    match client.get_sampling_rules(&request).await {
        Ok(response) => {
            if previous_response.as_ref() == Some(&response) {
                return false;
            }
            let sampler = {
                let current = state.load();
                let previous_rules = match &**current {
                    SamplerState::Rules(rules) => Some(rules),
                    SamplerState::Initial(_) => None,
                };
                XrayRulesSampler::new(
                    config.client_id.clone(),
                    config.resource.clone(),
                    config.clock.clone(),
                    config.fallback.clone(),
                    &response.sampling_rules,
                    previous_rules,
                )
            };
            state.store(Arc::new(SamplerState::Rules(sampler)));
            *previous_response = Some(response);
            otel_debug!(name: "XrayRemoteSampler.RulesRefreshed");
            true
        }
        Err(error) => {
            // Transient control plane trouble; the current sampler stays in
            // service and the next poll retries.
            otel_debug!(
                name: "XrayRemoteSampler.FetchRulesFailed",
                reason = format!("{error}")
            );
            false
        }
    }
}

/// Exchanges due statistics for targets. Returns the delay until the next
/// exchange, or `None` when no rule set is installed.
async fn refresh_targets<C: HttpClient + 'static>(
    client: &XraySamplerClient<C>,
    state: &ArcSwap<SamplerState>,
    config: &WorkerConfig,
) -> Option<Duration> {
    // Work on a clone so the exchange never holds up decision-path readers.
    let rules = match &**state.load() {
        SamplerState::Rules(rules) => rules.clone(),
        SamplerState::Initial(_) => return None,
    };

    let now = config.clock.now();
    let statistics = rules.snapshot_all(now);
    let requested: HashSet<String> = statistics
        .iter()
        .map(|document| document.rule_name.clone())
        .collect();
    let request = GetSamplingTargetsRequest {
        sampling_statistics_documents: statistics,
    };
    match client.get_sampling_targets(&request).await {
        Ok(response) => {
            for unprocessed in &response.unprocessed_statistics {
                otel_debug!(
                    name: "XrayRemoteSampler.UnprocessedStatistics",
                    rule_name = unprocessed.rule_name.clone(),
                    error_code = unprocessed.error_code.clone(),
                    message = unprocessed.message.clone()
                );
            }
            let targets: HashMap<&str, &SamplingTargetDocument> = response
                .sampling_target_documents
                .iter()
                .map(|document| (document.rule_name.as_str(), document))
                .collect();
            let now = config.clock.now();
            let updated = rules.with_targets(&targets, &requested, now);
            let due = updated.next_snapshot_due(now);
            state.store(Arc::new(SamplerState::Rules(updated)));
            Some(due.duration_since(now).unwrap_or(Duration::ZERO))
        }
        Err(error) => {
            otel_debug!(
                name: "XrayRemoteSampler.FetchTargetsFailed",
                reason = format!("{error}")
            );
            Some(DEFAULT_TARGET_INTERVAL)
        }
    }
}

fn default_initial_sampler(clock: Arc<dyn Clock>) -> Box<dyn ShouldSample> {
    Box::new(Sampler::ParentBased(Box::new(OrElseSampler {
        primary: Box::new(RateLimitingSampler::new(1.0, clock)),
        secondary: Box::new(Sampler::TraceIdRatioBased(0.05)),
    })))
}

/// Uses the secondary sampler whenever the primary decides to drop.
#[derive(Clone, Debug)]
struct OrElseSampler {
    primary: Box<dyn ShouldSample>,
    secondary: Box<dyn ShouldSample>,
}

impl ShouldSample for OrElseSampler {
    fn should_sample(
        &self,
        parent_context: Option<&Context>,
        trace_id: TraceId,
        name: &str,
        span_kind: &SpanKind,
        attributes: &[KeyValue],
        links: &[Link],
    ) -> SamplingResult {
        let result = self
            .primary
            .should_sample(parent_context, trace_id, name, span_kind, attributes, links);
        if result.decision != SamplingDecision::Drop {
            return result;
        }
        self.secondary
            .should_sample(parent_context, trace_id, name, span_kind, attributes, links)
    }
}

/// One hex-encoded identifier per process, reported with every statistics
/// document so the control plane can divide quotas among clients.
fn generate_client_id() -> String {
    let mut rng = rand::rng();
    (0..24)
        .map(|_| HEX_CHARS[rng.random_range(0..HEX_CHARS.len())] as char)
        .collect()
}

/// ~1% of the interval, so a fleet's polls spread out instead of arriving
/// in lockstep.
fn jitter(interval: Duration) -> Duration {
    let max_nanos = interval.as_nanos() as u64 / 100;
    if max_nanos == 0 {
        return Duration::ZERO;
    }
    Duration::from_nanos(rand::rng().random_range(0..max_nanos))
}
