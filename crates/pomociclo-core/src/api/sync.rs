use tracing::{info, warn};

use super::{EndSession, RemoteCall, RemoteStatus, SessionApi};
use crate::error::ApiError;

/// Run one deferred backend write. Never fails: errors become a status.
pub async fn execute<A: SessionApi>(api: &A, call: RemoteCall) -> RemoteStatus {
    match call {
        RemoteCall::OpenSession { subject_id } => match api.start_session(&subject_id).await {
            Ok(started) => match started.id {
                Some(session_id) => {
                    info!(%subject_id, %session_id, "study session opened");
                    RemoteStatus::SessionOpened { session_id }
                }
                None => {
                    warn!(%subject_id, "backend opened a session without an id");
                    RemoteStatus::SessionOpenedWithoutId
                }
            },
            Err(ApiError::NotConfigured) => RemoteStatus::Offline,
            Err(e) => {
                warn!(%subject_id, error = %e, "failed to open study session");
                RemoteStatus::SessionOpenFailed {
                    error: e.to_string(),
                }
            }
        },
        RemoteCall::CloseSession {
            session_id,
            subject_name,
            duration_min,
            skipped,
        } => {
            let request = EndSession {
                session_id,
                duration: duration_min,
                skipped,
            };
            match api.end_session(&request).await {
                Ok(rewards) => {
                    info!(
                        session_id = %request.session_id,
                        coins = rewards.coins_earned,
                        xp = rewards.xp_earned,
                        "study session closed"
                    );
                    RemoteStatus::SessionClosed {
                        subject_name,
                        rewards,
                    }
                }
                Err(ApiError::NotConfigured) => RemoteStatus::Offline,
                Err(e) => {
                    warn!(session_id = %request.session_id, error = %e, "failed to close study session");
                    RemoteStatus::SessionCloseFailed {
                        error: e.to_string(),
                    }
                }
            }
        }
    }
}
