use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use crate::AppState;
use crate::error::ApiError;

/// Resolve the `Authorization: Bearer` header to an [`parlor_types::Identity`]
/// and attach it to the request.
///
/// A missing header is handed to the verifier as "no token", which only
/// succeeds in development mode. A valid token whose account no longer
/// exists is refused.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = match req.headers().get(header::AUTHORIZATION) {
        None => None,
        Some(value) => Some(
            value
                .to_str()
                .ok()
                .and_then(|v| v.strip_prefix("Bearer "))
                .ok_or_else(|| ApiError::unauthorized("malformed authorization header"))?,
        ),
    };

    let identity = state.gateway.resolve(token).await?;
    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}
