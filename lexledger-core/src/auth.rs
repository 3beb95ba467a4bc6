use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::api::AppState;

/// Container for the authenticated user's id stored in request extensions.
#[derive(Clone, Copy, Debug)]
pub struct CurrentUser(pub Uuid);

/// Claims expected inside the JWT for authenticated users.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject - the acting user's UUID as a string.
    pub sub: String,
    pub exp: usize,
}

/// Validates a bearer token and returns the user it was issued to.
pub fn verify_token(token: &str, secret: &str) -> Option<Uuid> {
    let decoding_key = DecodingKey::from_secret(secret.as_bytes());
    let claims = decode::<Claims>(token, &decoding_key, &Validation::new(Algorithm::HS256))
        .ok()?
        .claims;
    Uuid::parse_str(&claims.sub).ok()
}

/// Middleware to validate a Bearer JWT in the `Authorization` header.
///
/// On success the request is forwarded with a [`CurrentUser`] extension; on
/// failure a `401` is returned. Without a configured secret every request is
/// rejected.
pub async fn jwt_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = match req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        Some(s) if s.starts_with("Bearer ") => &s[7..],
        _ => return Err(StatusCode::UNAUTHORIZED),
    };

    let Some(secret) = state.jwt_secret.as_deref() else {
        warn!("JWT_SECRET is not configured, rejecting request");
        return Err(StatusCode::UNAUTHORIZED);
    };

    let user_id = verify_token(token, secret).ok_or(StatusCode::UNAUTHORIZED)?;
    req.extensions_mut().insert(CurrentUser(user_id));

    Ok(next.run(req).await)
}
