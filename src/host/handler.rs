//! Routes host commands to the refresh scheduler.

use crate::error::{PaperError, Result};
use crate::host::contract::{CommandEnvelope, CommandName, ResponseEnvelope};
use crate::scheduler::SchedulerHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Command router shared by every in-flight host request.
#[derive(Debug, Clone)]
pub struct HostCommandRouter {
    scheduler: SchedulerHandle,
    shutdown: CancellationToken,
}

impl HostCommandRouter {
    /// `shutdown` is cancelled on `runtime.stop`.
    #[must_use]
    pub fn new(scheduler: SchedulerHandle, shutdown: CancellationToken) -> Self {
        Self {
            scheduler,
            shutdown,
        }
    }

    /// Route a command envelope to the appropriate handler.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid envelopes or when the payload cannot be
    /// serialized.
    pub async fn route(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        envelope
            .validate()
            .map_err(|e| PaperError::Channel(e.to_string()))?;

        let request_id = envelope.request_id.clone();
        match envelope.command {
            CommandName::HostPing => Ok(ResponseEnvelope::ok(
                request_id,
                serde_json::json!({
                    "pong": true,
                    "contract_version": crate::host::contract::EVENT_VERSION,
                    "version": env!("CARGO_PKG_VERSION"),
                }),
            )),
            CommandName::RefreshPause => {
                self.scheduler.pause();
                self.status_response(request_id)
            }
            CommandName::RefreshResume => {
                self.scheduler.resume();
                self.status_response(request_id)
            }
            CommandName::RefreshNow => {
                let result = self.scheduler.refresh_now().await;
                Ok(ResponseEnvelope::ok(request_id, to_payload(&result)?))
            }
            CommandName::RefreshStatus => self.status_response(request_id),
            CommandName::RuntimeStop => {
                info!("runtime.stop received");
                self.shutdown.cancel();
                Ok(ResponseEnvelope::ok(
                    request_id,
                    serde_json::json!({"stopping": true}),
                ))
            }
        }
    }

    fn status_response(&self, request_id: String) -> Result<ResponseEnvelope> {
        Ok(ResponseEnvelope::ok(
            request_id,
            to_payload(&self.scheduler.status())?,
        ))
    }
}

fn to_payload<T: serde::Serialize>(value: &T) -> Result<serde_json::Value> {
    serde_json::to_value(value)
        .map_err(|e| PaperError::Channel(format!("failed to serialize payload: {e}")))
}
