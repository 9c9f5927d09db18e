use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use opentelemetry::trace::{
    Link, SamplingDecision, SamplingResult, SpanKind, TraceContextExt, TraceId, TraceState,
};
use opentelemetry::{Context, KeyValue};
use opentelemetry_sdk::trace::ShouldSample;

use super::clock::Clock;

/// Token bucket over a single atomic.
///
/// The balance is stored as a "debit" timestamp in nanoseconds since the
/// epoch: `balance = now - debit`, capped at the bucket capacity. Spending
/// moves the debit forward with one compare-exchange, so concurrent callers
/// never block each other. A lost exchange counts as a failed spend, which
/// only ever under-samples for that one call.
#[derive(Debug)]
pub(crate) struct RateLimiter {
    clock: Arc<dyn Clock>,
    credits_per_nano: f64,
    max_balance_nanos: u64,
    debit_nanos: AtomicU64,
}

impl RateLimiter {
    /// Creates a full bucket refilling at `credits_per_second` with room for
    /// `max_balance` unspent credits.
    pub(crate) fn new(credits_per_second: f64, max_balance: f64, clock: Arc<dyn Clock>) -> Self {
        let credits_per_nano = credits_per_second / 1e9;
        let max_balance_nanos = if credits_per_nano > 0.0 {
            (max_balance / credits_per_nano) as u64
        } else {
            0
        };
        let debit_nanos = AtomicU64::new(nanos(clock.now()).saturating_sub(max_balance_nanos));
        RateLimiter {
            clock,
            credits_per_nano,
            max_balance_nanos,
            debit_nanos,
        }
    }

    pub(crate) fn try_spend(&self, cost: f64) -> bool {
        if self.credits_per_nano <= 0.0 {
            return false;
        }
        let cost_nanos = (cost / self.credits_per_nano) as u64;
        let now_nanos = nanos(self.clock.now());
        let current_debit = self.debit_nanos.load(Ordering::Acquire);
        let balance = now_nanos
            .saturating_sub(current_debit)
            .min(self.max_balance_nanos);
        if balance < cost_nanos {
            return false;
        }
        let new_debit = now_nanos - (balance - cost_nanos);
        self.debit_nanos
            .compare_exchange(current_debit, new_debit, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }
}

fn nanos(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos() as u64)
        .unwrap_or(0)
}

/// Sampler admitting at most a fixed number of spans per second.
///
/// Wrap in [`Sampler::ParentBased`](opentelemetry_sdk::trace::Sampler) so
/// child spans follow their parent instead of draining the bucket.
#[derive(Clone, Debug)]
pub(crate) struct RateLimitingSampler {
    limiter: Arc<RateLimiter>,
}

impl RateLimitingSampler {
    pub(crate) fn new(spans_per_second: f64, clock: Arc<dyn Clock>) -> Self {
        RateLimitingSampler {
            limiter: Arc::new(RateLimiter::new(spans_per_second, spans_per_second, clock)),
        }
    }
}

impl ShouldSample for RateLimitingSampler {
    fn should_sample(
        &self,
        parent_context: Option<&Context>,
        _trace_id: TraceId,
        _name: &str,
        _span_kind: &SpanKind,
        _attributes: &[KeyValue],
        _links: &[Link],
    ) -> SamplingResult {
        let decision = if self.limiter.try_spend(1.0) {
            SamplingDecision::RecordAndSample
        } else {
            SamplingDecision::Drop
        };
        SamplingResult {
            decision,
            attributes: Vec::new(),
            trace_state: match parent_context {
                Some(ctx) => ctx.span().span_context().trace_state().clone(),
                None => TraceState::default(),
            },
        }
    }
}
