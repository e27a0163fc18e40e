use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use time::OffsetDateTime;
use tracing::{debug, warn};

/// Liveness and readiness reporting for the service.
///
/// Trying to merge the k8s concepts of liveness and readiness in
/// a single state is full of foot-guns, so the two are kept apart:
///   - liveness only answers "is the process responsive", and never
///     looks at dependencies. A store outage must not get the pod
///     restarted, as a restart does not fix a store-side outage.
///   - readiness answers "can we serve data right now", and follows
///     the store connection state as it is, with no debouncing.
///
/// Both are pure reads of state maintained elsewhere.
pub trait ReadinessProbe: Send + Sync {
    /// Latest known connectivity of the dependency. Must not perform I/O.
    fn is_ready(&self) -> bool;
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
pub enum Liveness {
    #[serde(rename = "UP")]
    Up,
}

/// Body of the liveness probe.
#[derive(Debug, Clone, Serialize)]
pub struct LivenessReport {
    pub status: Liveness,
    pub version: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl IntoResponse for LivenessReport {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Readiness {
    Ready,
    NotReady,
}

#[derive(Serialize)]
struct ReadinessBody {
    status: &'static str,
    redis: &'static str,
}

impl Readiness {
    pub fn from_connected(connected: bool) -> Self {
        if connected {
            Readiness::Ready
        } else {
            Readiness::NotReady
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready)
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Readiness::Ready => StatusCode::OK,
            Readiness::NotReady => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn body(&self) -> ReadinessBody {
        match self {
            Readiness::Ready => ReadinessBody {
                status: "READY",
                redis: "CONNECTED",
            },
            Readiness::NotReady => ReadinessBody {
                status: "NOT READY",
                redis: "DISCONNECTED",
            },
        }
    }
}

impl IntoResponse for Readiness {
    /// 200 when ready, 503 otherwise so the orchestrator takes us out of rotation.
    fn into_response(self) -> Response {
        (self.status_code(), Json(self.body())).into_response()
    }
}

#[derive(Clone)]
pub struct HealthSignal {
    version: String,
    probe: Arc<dyn ReadinessProbe>,
}

impl HealthSignal {
    pub fn new(version: impl Into<String>, probe: Arc<dyn ReadinessProbe>) -> Self {
        Self {
            version: version.into(),
            probe,
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Always up while we are able to answer at all.
    pub fn liveness(&self) -> Liveness {
        Liveness::Up
    }

    pub fn liveness_report(&self) -> LivenessReport {
        LivenessReport {
            status: self.liveness(),
            version: self.version.clone(),
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    pub fn readiness(&self) -> Readiness {
        let readiness = Readiness::from_connected(self.probe.is_ready());
        match readiness {
            Readiness::Ready => debug!("readiness check ok"),
            Readiness::NotReady => warn!("readiness check failed: store disconnected"),
        }
        readiness
    }
}
