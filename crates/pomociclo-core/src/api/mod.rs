//! Backend session API.
//!
//! The study cycle never awaits the backend itself. Mutating operations
//! commit locally and hand back a [`RemoteCall`]; the caller runs it with
//! [`execute`] once the cycle lock is released and feeds the resulting
//! [`RemoteStatus`] back into the cycle. A failed call is recorded and
//! reported, never rolled back.

mod http;
mod sync;

pub use http::HttpSessionApi;
pub use sync::execute;

use std::collections::HashMap;
use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::subject::Subject;

/// Response of `POST study/start`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStarted {
    #[serde(default)]
    pub id: Option<String>,
}

/// Body of `POST study/end`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndSession {
    pub session_id: String,
    /// Minutes studied.
    pub duration: u32,
    pub skipped: bool,
}

/// Response of `POST study/end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionRewards {
    #[serde(default)]
    pub coins_earned: i64,
    #[serde(default)]
    pub xp_earned: i64,
}

/// Response of `GET settings`. Missing, null or non-positive fields fall
/// back to the local defaults when applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RemoteSettings {
    #[serde(default)]
    pub study_duration: Option<i64>,
    #[serde(default)]
    pub break_duration: Option<i64>,
    #[serde(default)]
    pub long_break_duration: Option<i64>,
    #[serde(default)]
    pub long_break_interval: Option<i64>,
}

/// The backend collaborator consumed by the study cycle.
pub trait SessionApi: Send + Sync {
    fn start_session(
        &self,
        subject_id: &str,
    ) -> impl Future<Output = Result<SessionStarted, ApiError>> + Send;

    fn end_session(
        &self,
        request: &EndSession,
    ) -> impl Future<Output = Result<SessionRewards, ApiError>> + Send;

    fn list_subjects(&self) -> impl Future<Output = Result<Vec<Subject>, ApiError>> + Send;

    /// Studied minutes per subject as the backend counts them.
    fn subject_totals(
        &self,
    ) -> impl Future<Output = Result<HashMap<String, u64>, ApiError>> + Send;

    /// Block lengths and long-break cadence stored for the user.
    fn settings(&self) -> impl Future<Output = Result<RemoteSettings, ApiError>> + Send;
}

/// A backend write deferred until after the local commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum RemoteCall {
    OpenSession {
        subject_id: String,
    },
    CloseSession {
        session_id: String,
        subject_name: Option<String>,
        duration_min: u32,
        skipped: bool,
    },
}

/// Side-channel result of a [`RemoteCall`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RemoteStatus {
    SessionOpened {
        session_id: String,
    },
    SessionOpenedWithoutId,
    SessionOpenFailed {
        error: String,
    },
    SessionClosed {
        subject_name: Option<String>,
        rewards: SessionRewards,
    },
    SessionCloseFailed {
        error: String,
    },
    /// No backend configured; nothing was sent.
    Offline,
}

impl RemoteStatus {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            RemoteStatus::SessionOpenFailed { .. } | RemoteStatus::SessionCloseFailed { .. }
        )
    }
}
