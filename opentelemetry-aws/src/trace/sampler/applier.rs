use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use opentelemetry::trace::{Link, SamplingDecision, SamplingResult, SpanKind, TraceId};
use opentelemetry::{Context, Key, KeyValue, Value};
use opentelemetry_sdk::trace::{Sampler, ShouldSample};
use opentelemetry_sdk::Resource;
use opentelemetry_semantic_conventions::attribute::{
    AWS_ECS_CONTAINER_ARN, CLOUD_PLATFORM, CLOUD_RESOURCE_ID, HTTP_REQUEST_METHOD,
    HTTP_REQUEST_METHOD_ORIGINAL, SERVER_ADDRESS, SERVICE_NAME, URL_FULL, URL_PATH,
};
use thiserror::Error;

use super::clock::Clock;
use super::matcher::Matcher;
use super::protocol::{SamplingRule, SamplingStatisticsDocument, SamplingTargetDocument};
use super::rate_limit::RateLimitingSampler;

/// How long to wait between statistics exchanges when the control plane
/// does not specify an interval.
pub(crate) const DEFAULT_TARGET_INTERVAL: Duration = Duration::from_secs(10);

// Superseded semantic conventions still emitted by older instrumentation.
const HTTP_HOST: &str = "http.host";
const HTTP_METHOD: &str = "http.method";
const HTTP_TARGET: &str = "http.target";
const HTTP_URL: &str = "http.url";
const NET_HOST_NAME: &str = "net.host.name";

// Placeholder the HTTP semantic conventions substitute for nonstandard
// request methods; the original method is carried in a separate attribute.
const OTHER_REQUEST_METHOD: &str = "_OTHER";

fn xray_service_type(cloud_platform: &str) -> Option<&'static str> {
    match cloud_platform {
        "aws_ec2" => Some("AWS::EC2::Instance"),
        "aws_ecs" => Some("AWS::ECS::Container"),
        "aws_eks" => Some("AWS::EKS::Container"),
        "aws_elastic_beanstalk" => Some("AWS::ElasticBeanstalk::Environment"),
        "aws_lambda" => Some("AWS::Lambda::Function"),
        _ => None,
    }
}

/// Match inputs that only depend on the SDK resource, derived once per rule
/// set instead of on every decision.
#[derive(Clone, Debug, Default)]
pub(crate) struct ResourceFields {
    pub(crate) service_name: Option<String>,
    pub(crate) service_type: Option<&'static str>,
    pub(crate) resource_arn: Option<String>,
    pub(crate) on_lambda: bool,
}

impl ResourceFields {
    pub(crate) fn from_resource(resource: &Resource) -> Self {
        let string_attr = |name: &'static str| {
            resource
                .get(&Key::from_static_str(name))
                .map(|value| value.as_str().into_owned())
        };
        let cloud_platform = string_attr(CLOUD_PLATFORM);
        let on_lambda = cloud_platform.as_deref() == Some("aws_lambda");
        let resource_arn = string_attr(AWS_ECS_CONTAINER_ARN).or_else(|| {
            if on_lambda {
                string_attr(CLOUD_RESOURCE_ID)
            } else {
                None
            }
        });
        ResourceFields {
            service_name: string_attr(SERVICE_NAME),
            service_type: cloud_platform
                .as_deref()
                .and_then(xray_service_type),
            resource_arn,
            on_lambda,
        }
    }
}

/// A rule fetched from the control plane that cannot be applied.
///
/// Validation failures drop only the offending rule, never the refresh.
#[derive(Debug, Error)]
pub(crate) enum RuleValidationError {
    #[error("rule has no name")]
    MissingName,
    #[error("fixed rate {0} outside [0, 1]")]
    FixedRateOutOfRange(f64),
    #[error("negative reservoir size {0}")]
    NegativeReservoir(i64),
    #[error("unusable match pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Sampling counters for one rule, shared across applier generations so a
/// target update never resets the reporting window.
///
/// Updated on the hot path without locks. `requests` is incremented before
/// any sub-sampler runs, so a concurrent snapshot can observe sampled and
/// borrowed counts at most equal to requests, never greater.
#[derive(Debug, Default)]
pub(crate) struct Statistics {
    requests: AtomicU64,
    sampled: AtomicU64,
    borrowed: AtomicU64,
}

impl Statistics {
    fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    fn record_sampled(&self) {
        self.sampled.fetch_add(1, Ordering::Relaxed);
    }

    fn record_borrowed(&self) {
        self.borrowed.fetch_add(1, Ordering::Relaxed);
    }

    /// Drains all three counters, zeroing the window.
    fn take(&self) -> (u64, u64, u64) {
        let requests = self.requests.swap(0, Ordering::Relaxed);
        let sampled = self.sampled.swap(0, Ordering::Relaxed);
        let borrowed = self.borrowed.swap(0, Ordering::Relaxed);
        (requests, sampled, borrowed)
    }
}

#[derive(Debug)]
struct RuleMatchers {
    attributes: Vec<(String, Matcher)>,
    url_path: Matcher,
    service_name: Matcher,
    http_method: Matcher,
    host: Matcher,
    service_type: Matcher,
    resource_arn: Matcher,
}

/// Runtime state of one sampling rule.
///
/// Immutable; target responses produce a successor via [`Self::with_target`]
/// that shares the same [`Statistics`]. The reservoir starts out borrowing
/// one trace per second until the control plane assigns a quota, and turns
/// off entirely once a target arrives without one.
#[derive(Clone, Debug)]
pub(crate) struct SamplingRuleApplier {
    client_id: Arc<str>,
    rule_name: Arc<str>,
    priority: i32,
    clock: Arc<dyn Clock>,
    matchers: Arc<RuleMatchers>,
    reservoir_sampler: Sampler,
    /// `None` while borrowing; borrowed reservoirs have no expiry.
    reservoir_expiry: Option<SystemTime>,
    borrowing: bool,
    fixed_rate_sampler: Sampler,
    statistics: Arc<Statistics>,
    next_snapshot_due: SystemTime,
}

impl SamplingRuleApplier {
    pub(crate) fn new(
        client_id: Arc<str>,
        rule: &SamplingRule,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, RuleValidationError> {
        if rule.rule_name.is_empty() {
            return Err(RuleValidationError::MissingName);
        }
        if !(0.0..=1.0).contains(&rule.fixed_rate) {
            return Err(RuleValidationError::FixedRateOutOfRange(rule.fixed_rate));
        }
        if rule.reservoir_size < 0 {
            return Err(RuleValidationError::NegativeReservoir(rule.reservoir_size));
        }

        let mut attributes = Vec::with_capacity(rule.attributes.len());
        for (key, glob) in &rule.attributes {
            attributes.push((key.clone(), Matcher::new(glob)?));
        }
        let matchers = RuleMatchers {
            attributes,
            url_path: Matcher::new(&rule.url_path)?,
            service_name: Matcher::new(&rule.service_name)?,
            http_method: Matcher::new(&rule.http_method)?,
            host: Matcher::new(&rule.host)?,
            service_type: Matcher::new(&rule.service_type)?,
            resource_arn: Matcher::new(&rule.resource_arn)?,
        };

        // Borrow one trace per second until the first target exchange
        // assigns a quota; a zero reservoir never borrows.
        let (reservoir_sampler, borrowing) = if rule.reservoir_size > 0 {
            (rate_limited(1.0, clock.clone()), true)
        } else {
            (Sampler::AlwaysOff, false)
        };

        // No target yet, so a snapshot is due right away.
        let next_snapshot_due = clock.now();

        Ok(SamplingRuleApplier {
            client_id,
            rule_name: rule.rule_name.as_str().into(),
            priority: rule.priority,
            clock,
            matchers: Arc::new(matchers),
            reservoir_sampler,
            reservoir_expiry: None,
            borrowing,
            fixed_rate_sampler: fixed_rate(rule.fixed_rate),
            statistics: Arc::new(Statistics::default()),
            next_snapshot_due,
        })
    }

    pub(crate) fn rule_name(&self) -> &str {
        &self.rule_name
    }

    pub(crate) fn priority(&self) -> i32 {
        self.priority
    }

    pub(crate) fn next_snapshot_due(&self) -> SystemTime {
        self.next_snapshot_due
    }

    /// Whether this rule applies to the given span and resource.
    pub(crate) fn matches(&self, attributes: &[KeyValue], resource: &ResourceFields) -> bool {
        let matchers = &*self.matchers;

        // Every attribute the rule names must be present and matching; an
        // absent attribute is a non-match rather than a wildcard.
        for (key, matcher) in &matchers.attributes {
            match attribute(attributes, key) {
                Some(value) => {
                    if !matcher.matches(Some(value.as_str().as_ref())) {
                        return false;
                    }
                }
                None => return false,
            }
        }

        let direct_target = str_attribute(attributes, URL_PATH)
            .or_else(|| str_attribute(attributes, HTTP_TARGET));
        let full_url = if direct_target.is_none() {
            str_attribute(attributes, URL_FULL).or_else(|| str_attribute(attributes, HTTP_URL))
        } else {
            None
        };
        let url_path = match (direct_target, full_url) {
            (Some(target), _) => Some(target),
            (None, Some(url)) => path_of_url(url),
            (None, None) => None,
        };

        let method = match str_attribute(attributes, HTTP_REQUEST_METHOD)
            .or_else(|| str_attribute(attributes, HTTP_METHOD))
        {
            Some(OTHER_REQUEST_METHOD) => str_attribute(attributes, HTTP_REQUEST_METHOD_ORIGINAL),
            other => other,
        };

        let host = str_attribute(attributes, SERVER_ADDRESS)
            .or_else(|| str_attribute(attributes, NET_HOST_NAME))
            .or_else(|| str_attribute(attributes, HTTP_HOST));

        // The span-level identifier only stands in for the resource ARN on
        // Lambda, where the resource may not carry one.
        let span_arn = if resource.resource_arn.is_none() && resource.on_lambda {
            str_attribute(attributes, CLOUD_RESOURCE_ID)
        } else {
            None
        };
        let resource_arn = resource.resource_arn.as_deref().or(span_arn);

        matchers.url_path.matches(url_path)
            && matchers
                .service_name
                .matches(resource.service_name.as_deref())
            && matchers.http_method.matches(method)
            && matchers.host.matches(host)
            && matchers.service_type.matches(resource.service_type)
            && matchers.resource_arn.matches(resource_arn)
    }

    /// Decides for one span, consulting the reservoir before the fixed rate.
    pub(crate) fn should_sample(
        &self,
        parent_context: Option<&Context>,
        trace_id: TraceId,
        name: &str,
        span_kind: &SpanKind,
        attributes: &[KeyValue],
        links: &[Link],
    ) -> SamplingResult {
        // Requests counts up before either sub-sampler runs so derived
        // sample and borrow rates stay well-defined mid-update.
        self.statistics.record_request();

        let reservoir_open = self
            .reservoir_expiry
            .map_or(true, |expiry| self.clock.now() < expiry);
        if reservoir_open {
            let result = self.reservoir_sampler.should_sample(
                parent_context,
                trace_id,
                name,
                span_kind,
                attributes,
                links,
            );
            if result.decision != SamplingDecision::Drop {
                if self.borrowing {
                    self.statistics.record_borrowed();
                }
                self.statistics.record_sampled();
                return result;
            }
        }

        let result = self.fixed_rate_sampler.should_sample(
            parent_context,
            trace_id,
            name,
            span_kind,
            attributes,
            links,
        );
        if result.decision != SamplingDecision::Drop {
            self.statistics.record_sampled();
        }
        result
    }

    /// Drains the statistics window, or returns `None` while the window is
    /// still open so the control plane only ever sees complete intervals.
    pub(crate) fn snapshot(&self, now: SystemTime) -> Option<SamplingStatisticsDocument> {
        if now < self.next_snapshot_due {
            return None;
        }
        let (request_count, sampled_count, borrow_count) = self.statistics.take();
        Some(SamplingStatisticsDocument {
            client_id: self.client_id.to_string(),
            rule_name: self.rule_name.to_string(),
            timestamp: now,
            request_count,
            sampled_count,
            borrow_count,
        })
    }

    /// Applies a target response, producing the successor applier.
    pub(crate) fn with_target(&self, target: &SamplingTargetDocument, now: SystemTime) -> Self {
        // A quota is only usable together with its expiry; a target without
        // both turns the reservoir off until the next assignment.
        let (reservoir_sampler, reservoir_expiry) =
            match (target.reservoir_quota, target.reservoir_quota_ttl) {
                (Some(quota), Some(ttl)) => {
                    (rate_limited(quota as f64, self.clock.clone()), Some(ttl))
                }
                _ => (Sampler::AlwaysOff, Some(now)),
            };
        let interval = target
            .interval_secs
            .map_or(DEFAULT_TARGET_INTERVAL, |secs| {
                Duration::from_secs(secs.max(0) as u64)
            });
        SamplingRuleApplier {
            reservoir_sampler,
            reservoir_expiry,
            borrowing: false,
            fixed_rate_sampler: fixed_rate(target.fixed_rate),
            next_snapshot_due: now + interval,
            ..self.clone()
        }
    }

    /// Resets only the reporting cadence, keeping the samplers as they are.
    pub(crate) fn with_next_snapshot_due(&self, due: SystemTime) -> Self {
        SamplingRuleApplier {
            next_snapshot_due: due,
            ..self.clone()
        }
    }
}

fn rate_limited(per_second: f64, clock: Arc<dyn Clock>) -> Sampler {
    Sampler::ParentBased(Box::new(RateLimitingSampler::new(per_second, clock)))
}

fn fixed_rate(rate: f64) -> Sampler {
    Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(rate)))
}

fn attribute<'a>(attributes: &'a [KeyValue], key: &str) -> Option<&'a Value> {
    attributes
        .iter()
        .find(|kv| kv.key.as_str() == key)
        .map(|kv| &kv.value)
}

/// String attribute lookup without allocating; these semantic conventions
/// are always strings.
fn str_attribute<'a>(attributes: &'a [KeyValue], key: &str) -> Option<&'a str> {
    attributes
        .iter()
        .find(|kv| kv.key.as_str() == key)
        .and_then(|kv| match &kv.value {
            Value::String(value) => Some(value.as_str()),
            _ => None,
        })
}

/// Extracts the path of a `scheme://authority/path` URL. A URL without a
/// scheme separator is broken instrumentation and yields nothing.
fn path_of_url(url: &str) -> Option<&str> {
    let scheme_end = url.find("://").filter(|index| *index > 0)?;
    let after_scheme = &url[scheme_end + 3..];
    match after_scheme.find('/') {
        Some(path_start) => Some(&after_scheme[path_start..]),
        None => Some("/"),
    }
}

#[cfg(test)]
mod tests {
    use super::super::clock::manual::ManualClock;
    use super::*;
    use opentelemetry::trace::{SpanContext, SpanId, TraceContextExt, TraceFlags, TraceState};
    use std::collections::HashMap;
    use std::time::UNIX_EPOCH;

    fn test_clock() -> ManualClock {
        ManualClock::new(UNIX_EPOCH + Duration::from_secs(1_700_000_000))
    }

    fn rule(name: &str) -> SamplingRule {
        SamplingRule {
            rule_name: name.to_owned(),
            ..Default::default()
        }
    }

    fn applier(rule: &SamplingRule, clock: &ManualClock) -> SamplingRuleApplier {
        SamplingRuleApplier::new("test-client".into(), rule, Arc::new(clock.clone())).unwrap()
    }

    fn decide(applier: &SamplingRuleApplier, trace_id: u128) -> SamplingDecision {
        applier
            .should_sample(
                None,
                TraceId::from_bytes(trace_id.to_be_bytes()),
                "span",
                &SpanKind::Server,
                &[],
                &[],
            )
            .decision
    }

    fn target(
        fixed_rate: f64,
        quota: Option<i64>,
        ttl: Option<SystemTime>,
        interval_secs: Option<i64>,
    ) -> SamplingTargetDocument {
        SamplingTargetDocument {
            rule_name: "r".to_owned(),
            fixed_rate,
            reservoir_quota: quota,
            reservoir_quota_ttl: ttl,
            interval_secs,
        }
    }

    #[test]
    fn validation_rejects_bad_rules() {
        let clock = test_clock();
        let make = |rule: &SamplingRule| {
            SamplingRuleApplier::new("c".into(), rule, Arc::new(clock.clone()))
        };

        assert!(matches!(
            make(&rule("")),
            Err(RuleValidationError::MissingName)
        ));
        assert!(matches!(
            make(&SamplingRule {
                fixed_rate: 1.5,
                ..rule("r")
            }),
            Err(RuleValidationError::FixedRateOutOfRange(_))
        ));
        assert!(matches!(
            make(&SamplingRule {
                reservoir_size: -1,
                ..rule("r")
            }),
            Err(RuleValidationError::NegativeReservoir(_))
        ));
        assert!(make(&rule("ok")).is_ok());
    }

    #[test]
    fn matches_all_fields() {
        let clock = test_clock();
        let mut attributes = HashMap::new();
        attributes.insert("animal".to_owned(), "c?t".to_owned());
        let applier = applier(
            &SamplingRule {
                service_name: "my-service".to_owned(),
                http_method: "GET".to_owned(),
                host: "opentelemetry.io".to_owned(),
                url_path: "/instrument-me*".to_owned(),
                attributes,
                ..rule("r")
            },
            &clock,
        );
        let resource = ResourceFields {
            service_name: Some("my-service".to_owned()),
            ..Default::default()
        };
        let span_attributes = [
            KeyValue::new(URL_PATH, "/instrument-me?foo=bar&cat=meow"),
            KeyValue::new(HTTP_REQUEST_METHOD, "GET"),
            KeyValue::new(SERVER_ADDRESS, "opentelemetry.io"),
            KeyValue::new("animal", "cat"),
        ];
        assert!(applier.matches(&span_attributes, &resource));

        // Rule attribute missing from the span.
        let missing_attribute = [
            KeyValue::new(URL_PATH, "/instrument-me"),
            KeyValue::new(HTTP_REQUEST_METHOD, "GET"),
            KeyValue::new(SERVER_ADDRESS, "opentelemetry.io"),
        ];
        assert!(!applier.matches(&missing_attribute, &resource));

        // Method differs.
        let wrong_method = [
            KeyValue::new(URL_PATH, "/instrument-me"),
            KeyValue::new(HTTP_REQUEST_METHOD, "POST"),
            KeyValue::new(SERVER_ADDRESS, "opentelemetry.io"),
            KeyValue::new("animal", "cat"),
        ];
        assert!(!applier.matches(&wrong_method, &resource));

        // Resource service name differs.
        let other_resource = ResourceFields {
            service_name: Some("other-service".to_owned()),
            ..Default::default()
        };
        assert!(!applier.matches(&span_attributes, &other_resource));

        // Absent resource service name never matches a concrete pattern.
        assert!(!applier.matches(&span_attributes, &ResourceFields::default()));
    }

    #[test]
    fn matches_path_from_full_url() {
        let clock = test_clock();
        let by_path = applier(
            &SamplingRule {
                url_path: "/users/*".to_owned(),
                ..rule("r")
            },
            &clock,
        );
        let resource = ResourceFields::default();

        let from_url = [KeyValue::new(URL_FULL, "https://example.com/users/123")];
        assert!(by_path.matches(&from_url, &resource));

        let no_path = [KeyValue::new(URL_FULL, "https://example.com")];
        assert!(!by_path.matches(&no_path, &resource));

        // Malformed URL without an authority yields no path at all.
        let malformed = [KeyValue::new(URL_FULL, "example.com/users/123")];
        assert!(!by_path.matches(&malformed, &resource));

        // But the catch-all path still matches it.
        let catch_all = applier(&rule("r"), &clock);
        assert!(catch_all.matches(&malformed, &resource));
    }

    #[test]
    fn matches_nonstandard_method_through_original() {
        let clock = test_clock();
        let applier = applier(
            &SamplingRule {
                http_method: "PURGE".to_owned(),
                ..rule("r")
            },
            &clock,
        );
        let resource = ResourceFields::default();
        let span_attributes = [
            KeyValue::new(HTTP_REQUEST_METHOD, OTHER_REQUEST_METHOD),
            KeyValue::new(HTTP_REQUEST_METHOD_ORIGINAL, "PURGE"),
        ];
        assert!(applier.matches(&span_attributes, &resource));
    }

    #[test]
    fn matches_service_type_from_cloud_platform() {
        let clock = test_clock();
        let applier = applier(
            &SamplingRule {
                service_type: "AWS::Lambda::Function".to_owned(),
                ..rule("r")
            },
            &clock,
        );
        let lambda = ResourceFields {
            service_type: xray_service_type("aws_lambda"),
            on_lambda: true,
            ..Default::default()
        };
        assert!(applier.matches(&[], &lambda));

        let ec2 = ResourceFields {
            service_type: xray_service_type("aws_ec2"),
            ..Default::default()
        };
        assert!(!applier.matches(&[], &ec2));
    }

    #[test]
    fn lambda_arn_falls_back_to_span_attribute() {
        let clock = test_clock();
        let applier = applier(
            &SamplingRule {
                resource_arn: "arn:aws:lambda:us-east-1:123:function:f".to_owned(),
                ..rule("r")
            },
            &clock,
        );
        let lambda = ResourceFields {
            on_lambda: true,
            ..Default::default()
        };
        let span_attributes = [KeyValue::new(
            CLOUD_RESOURCE_ID,
            "arn:aws:lambda:us-east-1:123:function:f",
        )];
        assert!(applier.matches(&span_attributes, &lambda));

        // Off Lambda the span attribute is not consulted.
        let not_lambda = ResourceFields::default();
        assert!(!applier.matches(&span_attributes, &not_lambda));
    }

    #[test]
    fn reservoir_borrows_before_fixed_rate() {
        let clock = test_clock();
        let applier = applier(
            &SamplingRule {
                reservoir_size: 100,
                fixed_rate: 0.0,
                ..rule("r")
            },
            &clock,
        );

        // Borrowing is capped at one per second no matter the configured
        // reservoir size.
        assert_eq!(decide(&applier, 1), SamplingDecision::RecordAndSample);
        assert_eq!(decide(&applier, 2), SamplingDecision::Drop);
        assert_eq!(decide(&applier, 3), SamplingDecision::Drop);

        clock.advance(Duration::from_secs(1));
        assert_eq!(decide(&applier, 4), SamplingDecision::RecordAndSample);
        assert_eq!(decide(&applier, 5), SamplingDecision::Drop);

        let snapshot = applier.snapshot(clock.now()).unwrap();
        assert_eq!(snapshot.request_count, 5);
        assert_eq!(snapshot.sampled_count, 2);
        assert_eq!(snapshot.borrow_count, 2);
    }

    #[test]
    fn zero_reservoir_starts_exhausted() {
        let clock = test_clock();
        let always = applier(
            &SamplingRule {
                reservoir_size: 0,
                fixed_rate: 1.0,
                ..rule("r")
            },
            &clock,
        );
        let never = applier(
            &SamplingRule {
                reservoir_size: 0,
                fixed_rate: 0.0,
                ..rule("r")
            },
            &clock,
        );

        for trace_id in 1..=10 {
            assert_eq!(decide(&always, trace_id), SamplingDecision::RecordAndSample);
            assert_eq!(decide(&never, trace_id), SamplingDecision::Drop);
        }

        let snapshot = never.snapshot(clock.now()).unwrap();
        assert_eq!(snapshot.request_count, 10);
        assert_eq!(snapshot.sampled_count, 0);
        // Nothing is ever borrowed without a reservoir.
        assert_eq!(snapshot.borrow_count, 0);
    }

    #[test]
    fn sampled_parent_bypasses_both_samplers() {
        let clock = test_clock();
        let applier = applier(
            &SamplingRule {
                reservoir_size: 0,
                fixed_rate: 0.0,
                ..rule("r")
            },
            &clock,
        );
        let parent = Context::new().with_remote_span_context(SpanContext::new(
            TraceId::from_bytes(42u128.to_be_bytes()),
            SpanId::from_bytes(7u64.to_be_bytes()),
            TraceFlags::SAMPLED,
            true,
            TraceState::default(),
        ));
        let result = applier.should_sample(
            Some(&parent),
            TraceId::from_bytes(42u128.to_be_bytes()),
            "span",
            &SpanKind::Server,
            &[],
            &[],
        );
        assert_eq!(result.decision, SamplingDecision::RecordAndSample);

        let snapshot = applier.snapshot(clock.now()).unwrap();
        assert_eq!(snapshot.request_count, 1);
        assert_eq!(snapshot.sampled_count, 1);
    }

    #[test]
    fn target_applies_quota_until_ttl() {
        let clock = test_clock();
        let applier = applier(
            &SamplingRule {
                reservoir_size: 10,
                fixed_rate: 0.5,
                ..rule("r")
            },
            &clock,
        );

        let now = clock.now();
        let applier = applier.with_target(
            &target(0.0, Some(2), Some(now + Duration::from_secs(10)), None),
            now,
        );

        // Quota of two per second, fixed rate zero behind it.
        assert_eq!(decide(&applier, 1), SamplingDecision::RecordAndSample);
        assert_eq!(decide(&applier, 2), SamplingDecision::RecordAndSample);
        assert_eq!(decide(&applier, 3), SamplingDecision::Drop);

        // Quota replenishes within the TTL window.
        clock.advance(Duration::from_secs(1));
        assert_eq!(decide(&applier, 4), SamplingDecision::RecordAndSample);

        // Past the TTL the reservoir is no longer consulted and the zero
        // fixed rate drops everything.
        clock.advance(Duration::from_secs(10));
        for trace_id in 5..=10 {
            assert_eq!(decide(&applier, trace_id), SamplingDecision::Drop);
        }

        // Quota samples no longer count as borrowed.
        clock.advance(Duration::from_secs(10));
        let snapshot = applier.snapshot(clock.now()).unwrap();
        assert_eq!(snapshot.sampled_count, 3);
        assert_eq!(snapshot.borrow_count, 0);
    }

    #[test]
    fn target_without_quota_exhausts_reservoir() {
        let clock = test_clock();
        let applier = applier(
            &SamplingRule {
                reservoir_size: 10,
                fixed_rate: 1.0,
                ..rule("r")
            },
            &clock,
        );
        let now = clock.now();
        // Quota without a TTL is as unusable as no quota at all.
        let applier = applier.with_target(&target(0.0, Some(5), None, None), now);

        assert_eq!(decide(&applier, 1), SamplingDecision::Drop);
        assert_eq!(decide(&applier, 2), SamplingDecision::Drop);
    }

    #[test]
    fn snapshot_withheld_until_due() {
        let clock = test_clock();
        let applier = applier(&rule("r"), &clock);

        // Fresh appliers are due immediately.
        assert!(applier.snapshot(clock.now()).is_some());

        let now = clock.now();
        let applier = applier.with_target(&target(0.5, None, None, Some(30)), now);

        assert!(applier.snapshot(clock.now()).is_none());
        clock.advance(Duration::from_secs(29));
        assert!(applier.snapshot(clock.now()).is_none());
        clock.advance(Duration::from_secs(1));

        decide(&applier, 1);
        let snapshot = applier.snapshot(clock.now()).unwrap();
        assert_eq!(snapshot.request_count, 1);

        // The drain zeroed the window.
        let drained = applier.snapshot(clock.now()).unwrap();
        assert_eq!(drained.request_count, 0);
        assert_eq!(drained.sampled_count, 0);
        assert_eq!(drained.borrow_count, 0);
    }

    #[test]
    fn statistics_survive_target_application() {
        let clock = test_clock();
        let applier = applier(
            &SamplingRule {
                fixed_rate: 1.0,
                ..rule("r")
            },
            &clock,
        );
        decide(&applier, 1);
        decide(&applier, 2);

        let successor = applier.with_target(&target(1.0, None, None, None), clock.now());
        decide(&successor, 3);

        clock.advance(DEFAULT_TARGET_INTERVAL);
        let snapshot = successor.snapshot(clock.now()).unwrap();
        assert_eq!(snapshot.request_count, 3);
        assert_eq!(snapshot.sampled_count, 3);
    }
}
