use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    error::{ApiError, AuthError},
    metrics::Metrics,
};

/// Caller identity decoded from a bearer token. Created per request, attached
/// to the request extensions, read-only downstream, dropped at request end.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    /// Subject identifier.
    pub sub: i64,
    pub role: String,
    /// Issued-at, Unix seconds.
    pub iat: i64,
    /// Expiry, Unix seconds.
    pub exp: i64,
}

impl Claims {
    pub fn new(sub: i64, role: impl Into<String>, issued_at: i64, ttl_secs: i64) -> Self {
        Self {
            sub,
            role: role.into(),
            iat: issued_at,
            exp: issued_at + ttl_secs,
        }
    }
}

/// Sign claims into a compact HS256 token. Used by the identity-issuing
/// collaborator and by tests; the gate itself only validates.
pub fn issue_token(claims: &Claims, secret: &str) -> Result<String, jsonwebtoken::errors::Error> {
    encode(
        &Header::default(),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

/// Stateless authentication gate. Token validation is pure computation; this
/// never touches the network or storage.
#[derive(Clone)]
pub struct AuthGate {
    decoding_key: Arc<DecodingKey>,
    validation: Arc<Validation>,
    metrics: Arc<Metrics>,
}

impl AuthGate {
    pub fn new(secret: &str, metrics: Arc<Metrics>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp"]);
        Self {
            decoding_key: Arc::new(DecodingKey::from_secret(secret.as_bytes())),
            validation: Arc::new(validation),
            metrics,
        }
    }

    /// Validate the `Authorization` header and extract the caller identity.
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<Claims, AuthError> {
        let header = headers
            .get(AUTHORIZATION)
            .ok_or(AuthError::Missing)?
            .to_str()
            .map_err(|_| AuthError::Malformed)?;

        let token = header.strip_prefix("Bearer ").ok_or(AuthError::Malformed)?;
        if token.is_empty() {
            return Err(AuthError::Malformed);
        }

        // Signature, expiry, and structural failures are collapsed into one
        // kind so responses never leak which validation step failed.
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|_| AuthError::Invalid)
    }
}

/// Auth middleware: rejects unauthenticated callers and injects [`Claims`]
/// into the request extensions for downstream gates and handlers.
pub async fn require_auth(
    State(gate): State<AuthGate>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    match gate.authenticate(request.headers()) {
        Ok(claims) => {
            request.extensions_mut().insert(claims);
            Ok(next.run(request).await)
        }
        Err(err) => {
            gate.metrics.record_auth_failure(err.kind());
            warn!(kind = err.kind(), path = %request.uri().path(), "authentication rejected");
            Err(err.into())
        }
    }
}

/// Extractor for the claims injected by [`require_auth`].
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub Claims);

#[axum::async_trait]
impl<S> axum::extract::FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Claims>()
            .cloned()
            .map(AuthenticatedUser)
            .ok_or_else(ApiError::unauthorized)
    }
}
