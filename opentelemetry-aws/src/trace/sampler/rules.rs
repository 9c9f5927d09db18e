use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::SystemTime;

use opentelemetry::otel_warn;
use opentelemetry::trace::{Link, SamplingResult, SpanKind, TraceId};
use opentelemetry::{Context, KeyValue};
use opentelemetry_sdk::trace::ShouldSample;

use super::applier::{ResourceFields, SamplingRuleApplier, DEFAULT_TARGET_INTERVAL};
use super::clock::Clock;
use super::protocol::{SamplingRule, SamplingStatisticsDocument, SamplingTargetDocument};

/// The rule set currently in force: appliers in evaluation order plus the
/// sampler used if nothing matches.
///
/// Immutable; rule refreshes and target responses build a replacement that
/// is atomically swapped in, so a decision in flight never observes a
/// half-updated set.
#[derive(Clone, Debug)]
pub(crate) struct XrayRulesSampler {
    resource: Arc<ResourceFields>,
    fallback: Box<dyn ShouldSample>,
    appliers: Vec<SamplingRuleApplier>,
}

impl XrayRulesSampler {
    /// Builds appliers for every valid rule, sorted by priority and then
    /// name. An invalid rule is dropped with a warning, keeping the previous
    /// incarnation of that rule if one exists.
    pub(crate) fn new(
        client_id: Arc<str>,
        resource: Arc<ResourceFields>,
        clock: Arc<dyn Clock>,
        fallback: Box<dyn ShouldSample>,
        rules: &[SamplingRule],
        previous: Option<&XrayRulesSampler>,
    ) -> Self {
        let mut appliers = Vec::with_capacity(rules.len());
        for rule in rules {
            match SamplingRuleApplier::new(client_id.clone(), rule, clock.clone()) {
                Ok(applier) => appliers.push(applier),
                Err(error) => {
                    otel_warn!(
                        name: "XrayRulesSampler.InvalidRule",
                        rule_name = rule.rule_name.clone(),
                        reason = format!("{error}")
                    );
                    if let Some(retained) =
                        previous.and_then(|sampler| sampler.applier(&rule.rule_name))
                    {
                        appliers.push(retained.clone());
                    }
                }
            }
        }
        // Lower priority value wins; rule name breaks ties.
        appliers.sort_by(|a, b| {
            a.priority()
                .cmp(&b.priority())
                .then_with(|| a.rule_name().cmp(b.rule_name()))
        });
        XrayRulesSampler {
            resource,
            fallback,
            appliers,
        }
    }

    pub(crate) fn should_sample(
        &self,
        parent_context: Option<&Context>,
        trace_id: TraceId,
        name: &str,
        span_kind: &SpanKind,
        attributes: &[KeyValue],
        links: &[Link],
    ) -> SamplingResult {
        for applier in &self.appliers {
            if applier.matches(attributes, &self.resource) {
                return applier.should_sample(
                    parent_context,
                    trace_id,
                    name,
                    span_kind,
                    attributes,
                    links,
                );
            }
        }

        // The control plane always serves a catch-all default rule, so
        // reaching this point means a matching defect on one side or the
        // other.
        otel_warn!(name: "XrayRulesSampler.NoRuleMatched");
        self.fallback
            .should_sample(parent_context, trace_id, name, span_kind, attributes, links)
    }

    /// Drains every rule whose reporting window has elapsed.
    pub(crate) fn snapshot_all(&self, now: SystemTime) -> Vec<SamplingStatisticsDocument> {
        self.appliers
            .iter()
            .filter_map(|applier| applier.snapshot(now))
            .collect()
    }

    /// When the next statistics exchange is due.
    pub(crate) fn next_snapshot_due(&self, now: SystemTime) -> SystemTime {
        self.appliers
            .iter()
            .map(|applier| applier.next_snapshot_due())
            .min()
            .unwrap_or(now + DEFAULT_TARGET_INTERVAL)
    }

    /// Applies a target response. A rule we asked about but got no answer
    /// for falls back to the default reporting cadence; a rule that was not
    /// yet due stays untouched.
    pub(crate) fn with_targets(
        &self,
        targets: &HashMap<&str, &SamplingTargetDocument>,
        requested: &HashSet<String>,
        now: SystemTime,
    ) -> Self {
        let default_due = now + DEFAULT_TARGET_INTERVAL;
        let appliers = self
            .appliers
            .iter()
            .map(|applier| {
                if let Some(target) = targets.get(applier.rule_name()) {
                    applier.with_target(target, now)
                } else if requested.contains(applier.rule_name()) {
                    applier.with_next_snapshot_due(default_due)
                } else {
                    applier.clone()
                }
            })
            .collect();
        XrayRulesSampler {
            appliers,
            ..self.clone()
        }
    }

    pub(crate) fn applier(&self, rule_name: &str) -> Option<&SamplingRuleApplier> {
        self.appliers
            .iter()
            .find(|applier| applier.rule_name() == rule_name)
    }
}
