//! Request observation.
//!
//! Wraps the whole pipeline and emits exactly one access record per
//! request, carrying the number of body bytes actually written.

use crate::error::ErrorDetail;
use axum::body::{Body, HttpBody};
use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use futures::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservationRecord {
    pub method: String,
    pub path: String,
    pub remote_addr: String,
    pub status: u16,
    pub byte_size: u64,
    pub started_at: SystemTime,
    pub duration: Duration,
    /// Internal failure detail, if the pipeline produced an error response.
    pub error: Option<String>,
}

/// Receives finished observation records.
pub trait ObservationSink: Send + Sync {
    fn record(&self, record: ObservationRecord);
}

/// Writes records to the structured log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ObservationSink for TracingSink {
    fn record(&self, record: ObservationRecord) {
        let start_ms = record
            .started_at
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        info!(
            target: "gateway::access",
            method = %record.method,
            path = %record.path,
            remote = %record.remote_addr,
            status = record.status,
            size = record.byte_size,
            start_ms,
            duration_ms = record.duration.as_secs_f64() * 1000.0,
            error = record.error.as_deref(),
            "http request"
        );
    }
}

/// Peer address as `ip:port`, or `unknown` when the listener did not
/// record connection info.
pub fn remote_addr(request: &Request) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Observation middleware; install as the outermost layer.
///
/// Bodies of known length are recorded as soon as the handlers return.
/// Streamed bodies are metered and recorded once the last byte was written
/// or the caller went away.
pub async fn observe(
    State(sink): State<Arc<dyn ObservationSink>>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let remote = remote_addr(&request);
    let started_at = SystemTime::now();
    let start = Instant::now();

    let response = next.run(request).await;

    let record = ObservationRecord {
        method,
        path,
        remote_addr: remote,
        status: response.status().as_u16(),
        byte_size: 0,
        started_at,
        duration: start.elapsed(),
        error: response
            .extensions()
            .get::<ErrorDetail>()
            .map(|detail| detail.0.clone()),
    };

    if let Some(exact) = response.body().size_hint().exact() {
        sink.record(ObservationRecord {
            byte_size: exact,
            ..record
        });
        return response;
    }

    let (parts, body) = response.into_parts();
    let mut meter = BodyMeter {
        sink,
        record: Some(record),
        start,
    };
    let body = body.into_data_stream().inspect(move |chunk| {
        if let Ok(bytes) = chunk {
            meter.add(bytes.len());
        }
    });
    Response::from_parts(parts, Body::from_stream(body))
}

/// Counts streamed bytes and emits the record when dropped.
struct BodyMeter {
    sink: Arc<dyn ObservationSink>,
    record: Option<ObservationRecord>,
    start: Instant,
}

impl BodyMeter {
    fn add(&mut self, len: usize) {
        if let Some(record) = self.record.as_mut() {
            record.byte_size += len as u64;
        }
    }
}

impl Drop for BodyMeter {
    fn drop(&mut self) {
        if let Some(mut record) = self.record.take() {
            record.duration = self.start.elapsed();
            self.sink.record(record);
        }
    }
}
