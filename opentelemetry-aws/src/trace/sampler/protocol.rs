//! Wire shapes for the X-Ray sampling API.
//!
//! Responses derive `PartialEq` so a rule refresh can compare the whole
//! payload against the previous one and skip rebuilding samplers when
//! nothing changed. Unknown fields are ignored in case the API grows new
//! ones.

use std::collections::HashMap;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub(crate) struct GetSamplingRulesRequest {
    #[serde(rename = "NextToken")]
    pub(crate) next_token: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub(crate) struct GetSamplingRulesResponse {
    /// Accepted but not followed; the service returns every rule in one page.
    #[serde(rename = "NextToken", default)]
    pub(crate) next_token: Option<String>,
    #[serde(rename = "SamplingRule", default)]
    pub(crate) sampling_rules: Vec<SamplingRule>,
}

/// One remote sampling rule, as fetched. Match fields default to `"*"`.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub(crate) struct SamplingRule {
    #[serde(rename = "RuleName", default)]
    pub(crate) rule_name: String,
    #[serde(rename = "Priority", default)]
    pub(crate) priority: i32,
    #[serde(rename = "FixedRate", default)]
    pub(crate) fixed_rate: f64,
    #[serde(rename = "ReservoirSize", default)]
    pub(crate) reservoir_size: i64,
    #[serde(rename = "ServiceName", default = "default_glob")]
    pub(crate) service_name: String,
    #[serde(rename = "ServiceType", default = "default_glob")]
    pub(crate) service_type: String,
    #[serde(rename = "Host", default = "default_glob")]
    pub(crate) host: String,
    #[serde(rename = "HTTPMethod", default = "default_glob")]
    pub(crate) http_method: String,
    #[serde(rename = "URLPath", default = "default_glob")]
    pub(crate) url_path: String,
    #[serde(rename = "ResourceARN", default = "default_glob")]
    pub(crate) resource_arn: String,
    #[serde(rename = "Attributes", default)]
    pub(crate) attributes: HashMap<String, String>,
    #[serde(rename = "Version", default)]
    pub(crate) version: i32,
}

fn default_glob() -> String {
    "*".to_owned()
}

impl Default for SamplingRule {
    /// Mirrors the serde field defaults: match-everything globs, zero rate
    /// and reservoir.
    fn default() -> Self {
        SamplingRule {
            rule_name: String::new(),
            priority: 0,
            fixed_rate: 0.0,
            reservoir_size: 0,
            service_name: default_glob(),
            service_type: default_glob(),
            host: default_glob(),
            http_method: default_glob(),
            url_path: default_glob(),
            resource_arn: default_glob(),
            attributes: HashMap::new(),
            version: 0,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub(crate) struct GetSamplingTargetsRequest {
    #[serde(rename = "SamplingStatisticsDocuments")]
    pub(crate) sampling_statistics_documents: Vec<SamplingStatisticsDocument>,
}

/// One rule's drained statistics window.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub(crate) struct SamplingStatisticsDocument {
    #[serde(rename = "ClientID")]
    pub(crate) client_id: String,
    #[serde(rename = "RuleName")]
    pub(crate) rule_name: String,
    #[serde(rename = "Timestamp", with = "epoch_seconds")]
    pub(crate) timestamp: SystemTime,
    #[serde(rename = "RequestCount")]
    pub(crate) request_count: u64,
    #[serde(rename = "SampledCount")]
    pub(crate) sampled_count: u64,
    #[serde(rename = "BorrowCount")]
    pub(crate) borrow_count: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub(crate) struct GetSamplingTargetsResponse {
    #[serde(rename = "LastRuleModification", default, with = "epoch_seconds_opt")]
    pub(crate) last_rule_modification: Option<SystemTime>,
    #[serde(rename = "SamplingTargetDocuments", default)]
    pub(crate) sampling_target_documents: Vec<SamplingTargetDocument>,
    #[serde(rename = "UnprocessedStatistics", default)]
    pub(crate) unprocessed_statistics: Vec<UnprocessedStatistics>,
}

/// Control-plane assignment for one rule, exchanged for statistics.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub(crate) struct SamplingTargetDocument {
    #[serde(rename = "RuleName", default)]
    pub(crate) rule_name: String,
    #[serde(rename = "FixedRate", default)]
    pub(crate) fixed_rate: f64,
    #[serde(rename = "ReservoirQuota", default)]
    pub(crate) reservoir_quota: Option<i64>,
    /// A point in time when the quota stops applying, not a duration.
    #[serde(rename = "ReservoirQuotaTTL", default, with = "epoch_seconds_opt")]
    pub(crate) reservoir_quota_ttl: Option<SystemTime>,
    #[serde(rename = "Interval", default)]
    pub(crate) interval_secs: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub(crate) struct UnprocessedStatistics {
    #[serde(rename = "RuleName", default)]
    pub(crate) rule_name: String,
    #[serde(rename = "ErrorCode", default)]
    pub(crate) error_code: String,
    #[serde(rename = "Message", default)]
    pub(crate) message: String,
}

/// Timestamps cross this wire as seconds since the epoch with fractional
/// milliseconds as a decimal number, never as ISO strings.
pub(crate) mod epoch_seconds {
    use serde::Serializer;
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    pub(crate) fn serialize<S>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let seconds = time
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        serializer.serialize_f64(seconds)
    }

    // Far enough out to cover any real timestamp while staying well inside
    // what `Duration` can represent.
    const MAX_EPOCH_SECONDS: f64 = 1e15;

    pub(crate) fn from_seconds(seconds: f64) -> Option<SystemTime> {
        if !seconds.is_finite() || !(0.0..=MAX_EPOCH_SECONDS).contains(&seconds) {
            return None;
        }
        Some(UNIX_EPOCH + Duration::from_secs_f64(seconds))
    }
}

pub(crate) mod epoch_seconds_opt {
    use serde::{Deserialize, Deserializer};
    use std::time::SystemTime;

    pub(crate) fn deserialize<'de, D>(deserializer: D) -> Result<Option<SystemTime>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<f64>::deserialize(deserializer)? {
            Some(seconds) => super::epoch_seconds::from_seconds(seconds)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom("timestamp out of range")),
            None => Ok(None),
        }
    }
}
