use std::net::SocketAddr;
use std::time::Instant;

use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use prometheus::{
    Encoder, HistogramVec, IntCounterVec, IntGauge, register_histogram_vec,
    register_int_counter_vec, register_int_gauge,
};
use tarpc::{
    ServerError,
    client::{RpcError, stub::Stub},
    context::Context,
    server::Serve,
};
use tokio::net::TcpListener;

use crate::model::service::{NumberServiceRequest, NumberServiceResponse};

lazy_static::lazy_static! {
    static ref METRIC_SERVER_DURATION_SECONDS: HistogramVec =
        register_histogram_vec!(
            "numex_server_duration_seconds",
            "RPC method duration, in seconds",
            &["method", "status"],
            // Default buckets are designed for just this use case
            prometheus::DEFAULT_BUCKETS.to_vec()
            ).unwrap();
    static ref METRIC_SERVER_CALL_COUNT: IntCounterVec =
        register_int_counter_vec!(
            "numex_server_call_count",
            "RPC call count, grouped by status and errors",
            &["method", "status", "error"]).unwrap();
    static ref METRIC_SERVER_IN_FLIGHT_REQUEST_COUNT: IntGauge =
        register_int_gauge!(
            "numex_server_in_flight_request_count",
            "Number of RPCs currently in-flight on the server").unwrap();
    static ref METRIC_SERVER_CONNECTION_COUNT: IntCounterVec =
        register_int_counter_vec!(
            "numex_server_connection_count",
            "Incoming connections, grouped by whether they were accepted",
            &["status"]).unwrap();

    static ref METRIC_CLIENT_DURATION_SECONDS: HistogramVec =
        register_histogram_vec!(
            "numex_client_duration_seconds",
            "RPC method duration, in seconds",
            &["method", "status"],
            prometheus::DEFAULT_BUCKETS.to_vec()
            ).unwrap();
    static ref METRIC_CLIENT_CALL_COUNT: IntCounterVec =
        register_int_counter_vec!(
            "numex_client_call_count",
            "RPC call count, grouped by status and errors",
            &["method", "status", "error"]).unwrap();
    static ref METRIC_CLIENT_CONNECTION_COUNT: IntCounterVec =
        register_int_counter_vec!(
            "numex_client_connection_count",
            "Connection attempts, grouped by outcome",
            &["status"]).unwrap();
}

/// Label that identifies methods in metrics.
fn method_label(req: &NumberServiceRequest) -> &'static str {
    match req {
        NumberServiceRequest::SendNumber { .. } => "send_number",
    }
}

/// Label that describes whether a method call suceeded.
fn status_label<T>(res: &Result<NumberServiceResponse, T>) -> &'static str {
    match res {
        Err(_) => "RpcError",
        Ok(_) => "OK",
    }
}

/// Label that describes the error type, client-side.
fn error_label_client(res: &Result<NumberServiceResponse, RpcError>) -> &'static str {
    match res {
        Err(err) => rpc_error_label(err),
        Ok(_) => "OK",
    }
}

/// Label that describes the error type, server-side.
fn error_label_server(res: &Result<NumberServiceResponse, ServerError>) -> &'static str {
    match res {
        Err(_) => "ServerError",
        Ok(_) => "OK",
    }
}

/// Label that describes a [RpcError] in metrics.
fn rpc_error_label(err: &RpcError) -> &'static str {
    match err {
        RpcError::Shutdown => "RPC::Shutdown",
        RpcError::Send(_) => "RPC::Send",
        RpcError::Channel(_) => "RPC::Channel",
        RpcError::DeadlineExceeded => "RPC::DeadlineExceeded",
        RpcError::Server(_) => "RPC::Server",
    }
}

fn outcome_label<T, E>(res: &Result<T, E>) -> &'static str {
    match res {
        Ok(_) => "OK",
        Err(_) => "Error",
    }
}

/// Count a client connection attempt.
pub(crate) fn record_client_connection<T, E>(res: &Result<T, E>) {
    METRIC_CLIENT_CONNECTION_COUNT
        .with_label_values(&[outcome_label(res)])
        .inc();
}

/// Count an incoming connection, accepted or rejected.
pub(crate) fn record_server_connection(accepted: bool) {
    METRIC_SERVER_CONNECTION_COUNT
        .with_label_values(&[if accepted { "OK" } else { "Rejected" }])
        .inc();
}

/// Decorate the given future with a counter for in-flight requests.
pub(crate) async fn track_in_flight_request(fut: impl Future<Output = ()>) {
    METRIC_SERVER_IN_FLIGHT_REQUEST_COUNT.inc();
    fut.await;
    METRIC_SERVER_IN_FLIGHT_REQUEST_COUNT.dec();
}

/// Run a HTTP server in the background to expose metrics at the given
/// address.
///
/// Returns the address actually bound, which differs from
/// `metrics_addr` when it asks for port 0.
pub async fn export_metrics(metrics_addr: SocketAddr) -> anyhow::Result<SocketAddr> {
    let listener = TcpListener::bind(metrics_addr).await?;
    let addr = listener.local_addr()?;
    log::info!("[metrics] server listening on {addr}");
    tokio::spawn(async move {
        loop {
            if let Ok((stream, _)) = listener.accept().await {
                let io = TokioIo::new(stream);
                let _ = http1::Builder::new()
                    .serve_connection(io, hyper::service::service_fn(serve_metrics))
                    .await;
            }
        }
    });

    Ok(addr)
}

async fn serve_metrics(
    req: hyper::Request<hyper::body::Incoming>,
) -> anyhow::Result<hyper::Response<String>> {
    if req.uri().path() != "/metrics" {
        return Ok(hyper::Response::builder()
            .status(hyper::StatusCode::NOT_FOUND)
            .body("Not found".to_string())?);
    }

    let metrics = prometheus::gather();
    let encoder = prometheus::TextEncoder::new();

    Ok(hyper::Response::builder()
        .status(hyper::StatusCode::OK)
        .header(
            hyper::header::CONTENT_TYPE,
            encoder.format_type().to_string(),
        )
        .body(encoder.encode_to_string(&metrics)?)?)
}

/// [NumberService](crate::model::service::NumberService) Stub that
/// fills in client-side metrics.
#[derive(Clone)]
pub struct MetricsNumberClient<T>
where
    T: Stub<Req = NumberServiceRequest, Resp = NumberServiceResponse>,
{
    inner: T,
}

impl<T: Stub<Req = NumberServiceRequest, Resp = NumberServiceResponse>> MetricsNumberClient<T> {
    pub fn new(stub: T) -> Self {
        Self { inner: stub }
    }
}

impl<T: Stub<Req = NumberServiceRequest, Resp = NumberServiceResponse>> Stub
    for MetricsNumberClient<T>
{
    type Req = NumberServiceRequest;
    type Resp = NumberServiceResponse;

    async fn call(
        &self,
        ctx: Context,
        req: NumberServiceRequest,
    ) -> Result<NumberServiceResponse, RpcError> {
        let method = method_label(&req);
        let start = Instant::now();

        let res = self.inner.call(ctx, req).await;

        let duration = start.elapsed();
        let status = status_label(&res);
        let error = error_label_client(&res);

        METRIC_CLIENT_DURATION_SECONDS
            .with_label_values(&[method, status])
            .observe(duration.as_secs_f64());
        METRIC_CLIENT_CALL_COUNT
            .with_label_values(&[method, status, error])
            .inc();

        res
    }
}

/// [NumberService](crate::model::service::NumberService) serve
/// function that fills in server-side metrics.
#[derive(Clone)]
pub struct MetricsNumberServer<T> {
    inner: T,
}

impl<T> MetricsNumberServer<T>
where
    T: Serve<Req = NumberServiceRequest, Resp = NumberServiceResponse>,
{
    pub fn new(inner: T) -> Self {
        Self { inner }
    }
}

impl<T> Serve for MetricsNumberServer<T>
where
    T: Serve<Req = NumberServiceRequest, Resp = NumberServiceResponse>,
{
    type Req = NumberServiceRequest;
    type Resp = NumberServiceResponse;

    async fn serve(self, ctx: Context, req: Self::Req) -> Result<Self::Resp, ServerError> {
        let method = method_label(&req);
        let start = Instant::now();

        let res = self.inner.serve(ctx, req).await;

        let duration = start.elapsed();
        let status = status_label(&res);
        let error = error_label_server(&res);

        METRIC_SERVER_DURATION_SECONDS
            .with_label_values(&[method, status])
            .observe(duration.as_secs_f64());
        METRIC_SERVER_CALL_COUNT
            .with_label_values(&[method, status, error])
            .inc();

        res
    }
}
