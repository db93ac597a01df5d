//! Write iteration execution

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

use crate::error::WriteError;
use crate::identity::{HostId, HostIdentity, HostIdentityCache, IdentityRegistry};
use crate::metrics::RunMetrics;
use crate::remote_write::{self, WriteCall, WriteTransport};
use crate::sample::SampleBuilder;

/// Status codes meaning "write accepted"
pub const ACCEPTED_STATUSES: [u16; 3] = [200, 202, 204];

/// Result of an accepted write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOutcome {
    pub status: u16,
    pub latency: Duration,
    pub identity: HostIdentity,
}

/// Process-scoped state shared by every worker of a run
pub struct RunContext {
    pub registry: Arc<IdentityRegistry>,
    pub identities: Arc<HostIdentityCache>,
    pub metrics: Arc<RunMetrics>,
}

/// Issues one authenticated write per call to [`RequestExecutor::write`]
pub struct RequestExecutor {
    transport: Arc<dyn WriteTransport>,
    context: RunContext,
    builder: SampleBuilder,
    secret: String,
}

impl RequestExecutor {
    pub fn new(
        transport: Arc<dyn WriteTransport>,
        context: RunContext,
        builder: SampleBuilder,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            context,
            builder,
            secret: secret.into(),
        }
    }

    pub fn context(&self) -> &RunContext {
        &self.context
    }

    /// Write one sample for `host_id`.
    ///
    /// The outcome is recorded as a "write" check before this returns, for
    /// failures as well as successes.
    pub async fn write(&self, host_id: HostId) -> Result<WriteOutcome, WriteError> {
        let Some(identity) = self
            .context
            .identities
            .resolve(host_id, &self.context.registry)
        else {
            let error = WriteError::NoIdentity(host_id);
            self.context.metrics.record_failure(&error, None);
            return Err(error);
        };
        let sample = self.builder.build(host_id, &identity);

        let body = match remote_write::encode(std::slice::from_ref(&sample)) {
            Ok(body) => body,
            Err(e) => {
                self.context.metrics.record_failure(&e, None);
                return Err(e);
            }
        };

        let call = WriteCall {
            secret: self.secret.clone(),
            caller: host_id.to_string(),
            body,
        };

        let start = Instant::now();
        let response = match self.transport.send(call).await {
            Ok(response) => response,
            Err(e) => {
                self.context.metrics.record_failure(&e, None);
                return Err(e);
            }
        };
        let latency = start.elapsed();

        if ACCEPTED_STATUSES.contains(&response.status) {
            self.context
                .metrics
                .record_success(response.status, latency);
            trace!(host_id, status = response.status, ?latency, "Write accepted");
            Ok(WriteOutcome {
                status: response.status,
                latency,
                identity,
            })
        } else {
            let error = WriteError::Rejected {
                status: response.status,
                body: response.body,
            };
            self.context.metrics.record_failure(&error, Some(latency));
            Err(error)
        }
    }
}
