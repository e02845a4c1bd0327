//! Request limits.
//!
//! Body size is enforced by `tower_http::limit::RequestBodyLimitLayer` (413);
//! header count is enforced here (431).

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};

/// Reject requests carrying more than `max_headers` header fields.
pub async fn header_count_middleware(
    State(max_headers): State<usize>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let count = request.headers().len();
    if count > max_headers {
        tracing::warn!(count, max_headers, path = %request.uri().path(), "Too many request headers");
        let status = StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE;
        return (
            status,
            Json(serde_json::json!({
                "error": {
                    "code": "header_limit_exceeded",
                    "message": format!("request carries {count} headers, limit is {max_headers}"),
                    "status": status.as_u16(),
                }
            })),
        )
            .into_response();
    }
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{middleware, routing::get, Router};
    use tower::ServiceExt;

    fn app(max: usize) -> Router {
        Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(max, header_count_middleware))
    }

    #[tokio::test]
    async fn rejects_excess_headers() {
        let mut builder = Request::builder().uri("/");
        for i in 0..3 {
            builder = builder.header(format!("x-h{i}"), "v");
        }
        let response = app(2).oneshot(builder.body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE);
    }

    #[tokio::test]
    async fn allows_headers_within_limit() {
        let request = Request::builder().uri("/").header("x-a", "1").body(Body::empty()).unwrap();
        let response = app(2).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
