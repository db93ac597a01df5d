//! Prometheus remote-write transport
//!
//! Samples are encoded as a remote-write `WriteRequest` protobuf, snappy
//! block compressed, and POSTed with the gateway's authentication headers.

use std::time::Duration;

use async_trait::async_trait;
use prost::Message;
use tracing::trace;

use crate::error::{ConfigError, WriteError};
use crate::sample::Sample;

/// Header carrying the shared gateway secret
pub const SECRET_HEADER: &str = "x-rh-rhelemeter-gateway-secret";

/// Header carrying the caller identity (the host id)
pub const CALLER_HEADER: &str = "x-rh-certauth-cn";

const REMOTE_WRITE_VERSION: &str = "0.1.0";

/// Remote-write protobuf messages
pub mod proto {
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct WriteRequest {
        #[prost(message, repeated, tag = "1")]
        pub timeseries: Vec<TimeSeries>,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct TimeSeries {
        #[prost(message, repeated, tag = "1")]
        pub labels: Vec<Label>,
        #[prost(message, repeated, tag = "2")]
        pub samples: Vec<Sample>,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct Label {
        #[prost(string, tag = "1")]
        pub name: String,
        #[prost(string, tag = "2")]
        pub value: String,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct Sample {
        #[prost(double, tag = "1")]
        pub value: f64,
        #[prost(int64, tag = "2")]
        pub timestamp: i64,
    }
}

impl From<&Sample> for proto::TimeSeries {
    fn from(sample: &Sample) -> Self {
        Self {
            labels: sample
                .labels
                .iter()
                .map(|label| proto::Label {
                    name: label.name.clone(),
                    value: label.value.clone(),
                })
                .collect(),
            samples: vec![proto::Sample {
                value: sample.value,
                timestamp: sample.timestamp_ms,
            }],
        }
    }
}

/// Encode a batch of samples into a compressed request body
pub fn encode(samples: &[Sample]) -> Result<Vec<u8>, WriteError> {
    let request = proto::WriteRequest {
        timeseries: samples.iter().map(proto::TimeSeries::from).collect(),
    };

    snap::raw::Encoder::new()
        .compress_vec(&request.encode_to_vec())
        .map_err(|e| WriteError::Encode(e.to_string()))
}

/// Decode a compressed request body
pub fn decode(body: &[u8]) -> Result<proto::WriteRequest, WriteError> {
    let raw = snap::raw::Decoder::new()
        .decompress_vec(body)
        .map_err(|e| WriteError::Encode(e.to_string()))?;

    proto::WriteRequest::decode(raw.as_slice()).map_err(|e| WriteError::Encode(e.to_string()))
}

/// One authenticated write call
#[derive(Debug, Clone)]
pub struct WriteCall {
    /// Shared gateway secret
    pub secret: String,
    /// Caller identity presented to the gateway
    pub caller: String,
    /// Snappy compressed `WriteRequest`
    pub body: Vec<u8>,
}

/// Response of the remote-write endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteResponse {
    pub status: u16,
    pub body: String,
}

/// Carries write calls to the endpoint
#[async_trait]
pub trait WriteTransport: Send + Sync {
    /// Deliver one call. Errors are transport failures only; any status
    /// code the endpoint answers with is a response.
    async fn send(&self, call: WriteCall) -> Result<WriteResponse, WriteError>;
}

/// HTTP transport backed by `reqwest`
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: reqwest::Url,
}

impl HttpTransport {
    pub fn new(url: &str, timeout: Duration, max_idle_per_host: usize) -> Result<Self, ConfigError> {
        let url = reqwest::Url::parse(url)
            .map_err(|e| ConfigError::InvalidUrl(format!("{}: {}", url, e)))?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(max_idle_per_host)
            .build()
            .map_err(|e| ConfigError::Client(e.to_string()))?;

        Ok(Self { client, url })
    }
}

#[async_trait]
impl WriteTransport for HttpTransport {
    async fn send(&self, call: WriteCall) -> Result<WriteResponse, WriteError> {
        let response = self
            .client
            .post(self.url.clone())
            .header(SECRET_HEADER, call.secret)
            .header(CALLER_HEADER, call.caller)
            .header(reqwest::header::CONTENT_TYPE, "application/x-protobuf")
            .header(reqwest::header::CONTENT_ENCODING, "snappy")
            .header("X-Prometheus-Remote-Write-Version", REMOTE_WRITE_VERSION)
            .body(call.body)
            .send()
            .await
            .map_err(|e| WriteError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        trace!(status, "Remote write response");

        Ok(WriteResponse { status, body })
    }
}
