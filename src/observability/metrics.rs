//! Metrics collection and exposition.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Initialize the Prometheus exporter and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus recorder");

    tracing::info!("Metrics server listening on http://{}", addr);
}

/// Strip the version prefix and collapse object identifiers so URL labels
/// stay low-cardinality: `/v/2/users/1234/lists` becomes `/users/:id/lists`.
pub fn sanitize_url(path: &str) -> String {
    let mut segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.first() == Some(&"v")
        && segments.get(1).is_some_and(|v| v.parse::<u32>().is_ok())
    {
        segments.drain(..2);
    }
    if segments.len() >= 2 {
        segments[1] = ":id";
    }
    format!("/{}", segments.join("/"))
}

/// An in-flight request measurement; finish it with the response code.
pub struct RequestMeasurement {
    method: String,
    url: String,
    start: Instant,
}

/// Record the start of a request.
pub fn measure_request(method: &str, url: &str) -> RequestMeasurement {
    counter!("http_requests_total", "method" => method.to_string()).increment(1);
    RequestMeasurement {
        method: method.to_string(),
        url: sanitize_url(url),
        start: Instant::now(),
    }
}

impl RequestMeasurement {
    /// Record duration and, for 5xx codes, the error counter.
    pub fn finish(self, code: u16) {
        let labels = [("method", self.method), ("url", self.url)];
        histogram!("http_requests_duration_seconds", &labels)
            .record(self.start.elapsed().as_secs_f64());

        if code >= 500 {
            counter!(
                "http_errors_5xx_total",
                "method" => labels[0].1.clone(),
                "url" => labels[1].1.clone(),
                "code" => code.to_string()
            )
            .increment(1);
        }
    }
}

/// Track one more live WebSocket connection.
pub fn register_ws_connection() {
    counter!("http_ws_connections_total").increment(1);
    gauge!("http_ws_connections_current").increment(1.0);
}

/// Track one less live WebSocket connection.
pub fn unregister_ws_connection() {
    gauge!("http_ws_connections_current").decrement(1.0);
}
