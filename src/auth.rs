/// Authentication extractors
///
/// Sessions are issued elsewhere; this service only verifies HS256 bearer
/// JWTs and reads the owner id from the `sub` claim.
use crate::{api::middleware::extract_bearer_token, context::AppContext, error::AppError};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use serde::Deserialize;

/// Claims read from a bearer token
#[derive(Debug, Clone, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
}

/// Authenticated owner of the request
#[derive(Debug, Clone)]
pub struct OwnerContext {
    pub owner_id: String,
}

#[async_trait]
impl FromRequestParts<AppContext> for OwnerContext {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppContext) -> Result<Self, Self::Rejection> {
        let token = extract_bearer_token(&parts.headers)
            .ok_or_else(|| AppError::Authentication("Missing authorization header".to_string()))?;

        let claims = verify_jwt_token(&token, &state.config.authentication.jwt_secret)?;
        if claims.sub.trim().is_empty() {
            return Err(AppError::Authentication("Invalid token: empty subject".to_string()));
        }

        Ok(OwnerContext { owner_id: claims.sub })
    }
}

/// Verify signature and expiry of a JWT
pub fn verify_jwt_token(token: &str, jwt_secret: &str) -> Result<Claims, AppError> {
    use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

    let decoding_key = DecodingKey::from_secret(jwt_secret.as_bytes());
    let mut validation = Validation::new(Algorithm::HS256);
    // Allow some clock skew (5 minutes)
    validation.leeway = 300;

    decode::<Claims>(token, &decoding_key, &validation)
        .map(|data| data.claims)
        .map_err(|e| {
            tracing::debug!("JWT verification failed: {}", e);
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    AppError::Authentication("Token has expired".to_string())
                }
                jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                    AppError::Authentication("Invalid token signature".to_string())
                }
                _ => AppError::Authentication(format!("Invalid token: {}", e)),
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    const SECRET: &str = "test-jwt-secret-that-is-long-enough-0000";

    fn token(sub: &str, exp_offset: Duration, secret: &str) -> String {
        let claims = json!({ "sub": sub, "exp": (Utc::now() + exp_offset).timestamp() });
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    #[test]
    fn test_valid_token_yields_subject() {
        let claims = verify_jwt_token(&token("owner-1", Duration::hours(1), SECRET), SECRET).unwrap();
        assert_eq!(claims.sub, "owner-1");
    }

    #[test]
    fn test_wrong_secret_and_expiry_rejected() {
        let forged = token("owner-1", Duration::hours(1), "another-secret-of-sufficient-length");
        assert!(matches!(
            verify_jwt_token(&forged, SECRET),
            Err(AppError::Authentication(msg)) if msg.contains("signature")
        ));

        let expired = token("owner-1", -Duration::hours(1), SECRET);
        assert!(matches!(
            verify_jwt_token(&expired, SECRET),
            Err(AppError::Authentication(msg)) if msg.contains("expired")
        ));
    }
}
