use axum::{routing, Router};
use metrics_exporter_prometheus::PrometheusHandle;

use cdr_common::health::HealthRegistry;
use cdr_common::metrics;

pub fn app(liveness: HealthRegistry, recorder_handle: Option<PrometheusHandle>) -> Router {
    let router = Router::new()
        .route("/", routing::get(index))
        .route("/_readiness", routing::get(|| async { "ok" }))
        .route(
            "/_liveness",
            routing::get(move || std::future::ready(liveness.get_status())),
        );

    match recorder_handle {
        Some(recorder_handle) => metrics::add_metrics_route(router, recorder_handle),
        None => router.layer(axum::middleware::from_fn(metrics::track_metrics)),
    }
}

pub async fn index() -> &'static str {
    "cdr loader"
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::time::Duration;
    use tower::ServiceExt;

    #[tokio::test]
    async fn index_responds() {
        let app = app(HealthRegistry::new("liveness"), None);

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"cdr loader");
    }

    #[tokio::test]
    async fn liveness_follows_registry() {
        let registry = HealthRegistry::new("liveness");
        let handle = registry.register("cycle_loop".to_owned(), Duration::from_secs(60));
        let app = app(registry, None);

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/_liveness").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        handle.report_healthy();
        let response = app
            .oneshot(Request::builder().uri("/_liveness").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
