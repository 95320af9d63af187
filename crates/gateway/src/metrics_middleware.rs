//! HTTP request metrics.
//!
//! Endpoints are labelled with the matched route template so unknown paths
//! collapse into a single series.

use std::time::Instant;

use axum::{
    body::Body,
    extract::MatchedPath,
    http::Request,
    middleware::Next,
    response::Response,
};

use wabridge_metrics::{counter, gauge, histogram, http as http_metrics, labels};

/// Label used for requests that did not match any route.
const UNMATCHED: &str = "unmatched";

/// Records `wabridge_http_requests_total`, the request duration histogram
/// and the in-flight gauge for every request.
pub async fn http_metrics_middleware(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let endpoint = endpoint_label(request.extensions().get::<MatchedPath>());

    gauge!(http_metrics::REQUESTS_IN_FLIGHT, labels::ENDPOINT => endpoint.clone(), labels::METHOD => method.clone())
        .increment(1.0);

    let response = next.run(request).await;

    let status = response.status().as_u16().to_string();
    let duration = start.elapsed().as_secs_f64();

    counter!(
        http_metrics::REQUESTS_TOTAL,
        labels::ENDPOINT => endpoint.clone(),
        labels::METHOD => method.clone(),
        labels::STATUS => status.clone()
    )
    .increment(1);

    histogram!(
        http_metrics::REQUEST_DURATION_SECONDS,
        labels::ENDPOINT => endpoint.clone(),
        labels::METHOD => method.clone(),
        labels::STATUS => status
    )
    .record(duration);

    gauge!(http_metrics::REQUESTS_IN_FLIGHT, labels::ENDPOINT => endpoint, labels::METHOD => method)
        .decrement(1.0);

    response
}

fn endpoint_label(matched: Option<&MatchedPath>) -> String {
    matched.map_or_else(|| UNMATCHED.to_string(), |p| p.as_str().to_string())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        axum::{Router, routing::get},
        tower::ServiceExt,
    };

    #[tokio::test]
    async fn matched_route_is_used_as_label() {
        let app = Router::new()
            .route(
                "/chat/{kind}",
                get(|path: Option<MatchedPath>| async move {
                    endpoint_label(path.as_ref())
                }),
            )
            .layer(axum::middleware::from_fn(http_metrics_middleware));

        let response = app
            .oneshot(Request::get("/chat/text").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"/chat/{kind}");
    }

    #[test]
    fn unmatched_requests_share_a_label() {
        assert_eq!(endpoint_label(None), "unmatched");
    }
}
