use axum::{
    extract::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::api::error::ApiError;

/// Logs one event per request. Handlers report their outcome by inserting a
/// `Result<(), ApiError>` into the response extensions (see [`to_response`]
/// and `ApiError::into_response`).
pub async fn logging_middleware(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let start = Instant::now();

    let response = next.run(req).await;

    let status = response.status();
    let elapsed = start.elapsed();
    match response.extensions().get::<Result<(), ApiError>>() {
        Some(Ok(())) => info!(%method, %uri, %status, ?elapsed, "processed request"),
        Some(Err(err)) if status.is_server_error() => error!(
            %method,
            %uri,
            %status,
            ?elapsed,
            error = %err,
            "failed to process request"
        ),
        Some(Err(err)) => warn!(
            %method,
            %uri,
            %status,
            ?elapsed,
            error = %err,
            "rejected request"
        ),
        None => debug!(%method, %uri, %status, ?elapsed, "processed request without outcome"),
    }

    response
}

pub fn to_response<T: IntoResponse>(
    response: T,               // body and status
    ext: Result<(), ApiError>, // outcome for logging_middleware
) -> Response {
    let mut response = response.into_response();

    response.extensions_mut().insert(ext);

    response
}
