//! Health status data model.
//!
//! A [`ProviderStatus`] is both the accumulated record of one provider and the
//! delta produced from a single call by [`compute_delta`]. Aggregated statuses
//! (per chain, across chains) reuse the same shape; see [`combine`].

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::classify::{classify, is_timeout};
use crate::error::TransportError;

// ─── StatusType ───────────────────────────────────────────────────────────────

/// Liveness of a provider, a chain or the whole set of chains.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusType {
    /// No call outcome has been observed yet.
    #[default]
    Unknown,
    Up,
    Down,
}

impl fmt::Display for StatusType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Up => write!(f, "up"),
            Self::Down => write!(f, "down"),
        }
    }
}

// ─── ProviderStatus ───────────────────────────────────────────────────────────

/// Accumulated health of one provider, or the aggregate of many.
///
/// Counters only ever grow. Durations are signed: a call whose completion
/// timestamp precedes its start contributes a negative duration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderStatus {
    pub name: String,
    pub status: StatusType,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_error_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(rename = "total_duration_ms", with = "duration_ms")]
    pub total_duration: Duration,
    pub total_requests: u64,
    pub total_timeout_count: u64,
    pub total_error_count: u64,
}

/// An aggregate over providers or chains. Always derived, never stored as
/// a source of truth.
pub type AggregatedStatus = ProviderStatus;

impl ProviderStatus {
    /// A zero-valued entry in the `Unknown` state.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: StatusType::Unknown,
            last_success_at: None,
            last_error_at: None,
            last_error: None,
            total_duration: Duration::zero(),
            total_requests: 0,
            total_timeout_count: 0,
            total_error_count: 0,
        }
    }

    /// Merge a delta into this record.
    ///
    /// Counters are summed and `status` is replaced. Timestamps and the last
    /// error are replaced only when the delta carries them, without comparing
    /// against what is stored.
    pub fn merge(&mut self, delta: &ProviderStatus) {
        self.status = delta.status;
        if delta.last_success_at.is_some() {
            self.last_success_at = delta.last_success_at;
        }
        if delta.last_error_at.is_some() {
            self.last_error_at = delta.last_error_at;
            self.last_error = delta.last_error.clone();
        }
        self.total_duration = saturating_add(self.total_duration, delta.total_duration);
        self.total_requests += delta.total_requests;
        self.total_timeout_count += delta.total_timeout_count;
        self.total_error_count += delta.total_error_count;
    }
}

/// Combine a set of statuses into one aggregate named `name`.
///
/// - empty set: `Down`
/// - any `Up`: `Up`
/// - otherwise any `Down`: `Down`
/// - otherwise (all `Unknown`): `Unknown`
///
/// Timestamps take the latest value across the set; counters and durations
/// are summed.
pub fn combine<'a, I>(name: &str, statuses: I) -> AggregatedStatus
where
    I: IntoIterator<Item = &'a ProviderStatus>,
{
    let mut out = ProviderStatus::new(name);
    let mut seen = false;
    let mut any_up = false;
    let mut any_down = false;

    for s in statuses {
        seen = true;
        match s.status {
            StatusType::Up => any_up = true,
            StatusType::Down => any_down = true,
            StatusType::Unknown => {}
        }
        out.last_success_at = out.last_success_at.max(s.last_success_at);
        out.last_error_at = out.last_error_at.max(s.last_error_at);
        out.total_duration = saturating_add(out.total_duration, s.total_duration);
        out.total_requests += s.total_requests;
        out.total_timeout_count += s.total_timeout_count;
        out.total_error_count += s.total_error_count;
    }

    out.status = if !seen {
        StatusType::Down
    } else if any_up {
        StatusType::Up
    } else if any_down {
        StatusType::Down
    } else {
        StatusType::Unknown
    };
    out
}

// ─── Call outcomes ────────────────────────────────────────────────────────────

/// One completed call attempt against one provider.
#[derive(Debug, Clone)]
pub struct RpcProviderCallStatus {
    /// Provider name.
    pub name: String,
    /// RPC method or logical operation name, if known.
    pub method: Option<String>,
    /// When the attempt completed.
    pub timestamp: DateTime<Utc>,
    /// When the attempt started.
    pub start: DateTime<Utc>,
    /// `None` if the attempt succeeded.
    pub error: Option<Arc<TransportError>>,
}

impl RpcProviderCallStatus {
    pub fn success(
        name: impl Into<String>,
        start: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            method: None,
            timestamp,
            start,
            error: None,
        }
    }

    pub fn failure(
        name: impl Into<String>,
        start: DateTime<Utc>,
        timestamp: DateTime<Utc>,
        error: TransportError,
    ) -> Self {
        Self {
            name: name.into(),
            method: None,
            timestamp,
            start,
            error: Some(Arc::new(error)),
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }
}

/// Turn one call outcome into a status delta.
///
/// A non-critical outcome counts as a success and marks the provider `Up`;
/// a critical one marks it `Down` and records the error.
pub fn compute_delta(call: &RpcProviderCallStatus) -> ProviderStatus {
    let err = call.error.as_deref();
    let mut delta = ProviderStatus::new(call.name.clone());
    delta.total_requests = 1;
    delta.total_duration = call.timestamp - call.start;

    if classify(err).is_critical() {
        delta.status = StatusType::Down;
        delta.last_error_at = Some(call.timestamp);
        delta.last_error = err.map(ToString::to_string).filter(|e| !e.is_empty());
        delta.total_error_count = 1;
        if is_timeout(err) {
            delta.total_timeout_count = 1;
        }
    } else {
        delta.status = StatusType::Up;
        delta.last_success_at = Some(call.timestamp);
    }
    delta
}

/// Duration sum that clamps at the representable range instead of panicking.
fn saturating_add(a: Duration, b: Duration) -> Duration {
    a.checked_add(&b).unwrap_or(if b < Duration::zero() {
        Duration::MIN
    } else {
        Duration::MAX
    })
}

mod duration_ms {
    use chrono::Duration;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_i64(d.num_milliseconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let ms = i64::deserialize(d)?;
        Duration::try_milliseconds(ms)
            .ok_or_else(|| D::Error::custom(format!("duration out of range: {ms}ms")))
    }
}
