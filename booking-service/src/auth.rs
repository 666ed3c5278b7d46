use crate::api::AppState;
use crate::error::ApiError;
use crate::models::{NewUser, User};
use crate::schema::users;
use async_trait::async_trait;
use axum::extract::{FromRequestParts, State};
use axum::http::request::Parts;
use axum::http::{header, StatusCode};
use axum::Json;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use chrono::{Duration, Utc};
use constant_time_eq::constant_time_eq;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use shared::Role;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

/// Signed bearer tokens and salted password hashes. Constructed once at
/// startup from explicit configuration; there is no ambient secret.
#[derive(Clone)]
pub struct AuthService {
    secret: Arc<Vec<u8>>,
    token_ttl: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawClaims {
    sub: Uuid,
    role: String,
    email: Option<String>,
    exp: i64,
}

#[derive(Debug, Clone)]
pub struct Claims {
    pub sub: Uuid,
    pub role: Role,
    pub email: Option<String>,
}

impl AuthService {
    pub fn new(secret: Vec<u8>, token_ttl_days: i64) -> Self {
        Self {
            secret: Arc::new(secret),
            token_ttl: Duration::days(token_ttl_days),
        }
    }

    fn password_digest(salt: &[u8], password: &str) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(salt);
        hasher.update(password.as_bytes());
        hasher.finalize().into()
    }

    pub fn hash_password(&self, password: &str) -> String {
        let salt: [u8; 16] = rand::random();
        let digest = Self::password_digest(&salt, password);
        format!("{}${}", STANDARD.encode(salt), STANDARD.encode(digest))
    }

    pub fn verify_password(&self, password: &str, stored: &str) -> bool {
        let Some((salt_b64, digest_b64)) = stored.split_once('$') else {
            return false;
        };
        let (Ok(salt), Ok(expected)) = (STANDARD.decode(salt_b64), STANDARD.decode(digest_b64))
        else {
            return false;
        };
        let actual = Self::password_digest(&salt, password);
        constant_time_eq(&actual, &expected)
    }

    fn signature(&self, payload: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.secret.as_slice());
        hasher.update(b".");
        hasher.update(payload.as_bytes());
        URL_SAFE_NO_PAD.encode(hasher.finalize())
    }

    pub fn issue_token(&self, user: &User) -> Result<String, ApiError> {
        let claims = RawClaims {
            sub: user.id,
            role: user.role.clone(),
            email: Some(user.email.clone()),
            exp: (Utc::now() + self.token_ttl).timestamp(),
        };
        let payload = URL_SAFE_NO_PAD.encode(
            serde_json::to_vec(&claims).map_err(|e| ApiError::Internal(e.into()))?,
        );
        let signature = self.signature(&payload);
        Ok(format!("{payload}.{signature}"))
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims, ApiError> {
        let invalid = || ApiError::Unauthorized("Invalid or expired token".to_string());

        let (payload, signature) = token.split_once('.').ok_or_else(invalid)?;
        let expected = self.signature(payload);
        if !constant_time_eq(expected.as_bytes(), signature.as_bytes()) {
            return Err(invalid());
        }

        let bytes = URL_SAFE_NO_PAD.decode(payload).map_err(|_| invalid())?;
        let raw: RawClaims = serde_json::from_slice(&bytes).map_err(|_| invalid())?;
        if raw.exp <= Utc::now().timestamp() {
            return Err(invalid());
        }
        let role = Role::from_str(&raw.role)
            .map_err(|_| ApiError::Forbidden("Forbidden: Invalid role".to_string()))?;

        Ok(Claims {
            sub: raw.sub,
            role,
            email: raw.email,
        })
    }
}

/// The authenticated caller, extracted from the Authorization header.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub role: Role,
    pub email: Option<String>,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                ApiError::Unauthorized("Access token missing or invalid".to_string())
            })?;
        let token = header.strip_prefix("Bearer ").ok_or_else(|| {
            ApiError::Unauthorized("Access token missing or invalid".to_string())
        })?;
        let claims = state.auth.verify_token(token)?;
        Ok(AuthUser {
            id: claims.sub,
            role: claims.role,
            email: claims.email,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub email: Option<String>,
    pub password: Option<String>,
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub role: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AuthUserResponse {
    pub id: Uuid,
    pub email: String,
    pub role: String,
}

#[derive(Debug, Serialize)]
pub struct SignupResponse {
    pub message: String,
    pub user: AuthUserResponse,
}

pub async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> Result<(StatusCode, Json<SignupResponse>), ApiError> {
    let (Some(email), Some(password)) = (req.email, req.password) else {
        return Err(ApiError::Validation(
            "Email and password are required".to_string(),
        ));
    };
    let role = match req.role {
        Some(raw) => Role::from_str(&raw)
            .map_err(|_| ApiError::Validation(format!("Unknown role: {raw}")))?,
        None => Role::Artist,
    };

    let mut conn = state.pool.get().await?;

    let existing: Option<User> = users::table
        .filter(users::email.eq(&email))
        .first(&mut conn)
        .await
        .optional()?;
    if existing.is_some() {
        return Err(ApiError::Conflict("User already exists".to_string()));
    }

    let new_user = NewUser {
        id: Uuid::new_v4(),
        email: email.clone(),
        phone: req.phone,
        full_name: req.full_name,
        password_hash: state.auth.hash_password(&password),
        role: role.as_str().to_string(),
    };
    diesel::insert_into(users::table)
        .values(&new_user)
        .execute(&mut conn)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(SignupResponse {
            message: "User created successfully".to_string(),
            user: AuthUserResponse {
                id: new_user.id,
                email,
                role: role.as_str().to_string(),
            },
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub message: String,
    pub token: String,
    pub user: AuthUserResponse,
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let (Some(email), Some(password)) = (req.email, req.password) else {
        return Err(ApiError::Validation(
            "Email and password are required".to_string(),
        ));
    };

    let mut conn = state.pool.get().await?;
    let user: User = users::table
        .filter(users::email.eq(&email))
        .first(&mut conn)
        .await
        .optional()?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    if !state.auth.verify_password(&password, &user.password_hash) {
        return Err(ApiError::Unauthorized("Invalid credentials".to_string()));
    }

    let token = state.auth.issue_token(&user)?;
    Ok(Json(LoginResponse {
        message: "Login successful".to_string(),
        token,
        user: AuthUserResponse {
            id: user.id,
            email: user.email,
            role: user.role,
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> AuthService {
        AuthService::new(b"test-secret".to_vec(), 7)
    }

    fn user(role: &str) -> User {
        User {
            id: Uuid::new_v4(),
            email: "artist@example.com".to_string(),
            phone: None,
            full_name: Some("Test Artist".to_string()),
            password_hash: String::new(),
            role: role.to_string(),
            created_at: None,
        }
    }

    #[test]
    fn password_hash_round_trip() {
        let auth = service();
        let stored = auth.hash_password("s3cret");
        assert!(auth.verify_password("s3cret", &stored));
        assert!(!auth.verify_password("wrong", &stored));
    }

    #[test]
    fn password_hashes_are_salted() {
        let auth = service();
        assert_ne!(auth.hash_password("s3cret"), auth.hash_password("s3cret"));
    }

    #[test]
    fn verify_rejects_malformed_stored_hash() {
        let auth = service();
        assert!(!auth.verify_password("s3cret", "not-a-hash"));
    }

    #[test]
    fn token_round_trip() {
        let auth = service();
        let u = user("artist");
        let token = auth.issue_token(&u).unwrap();
        let claims = auth.verify_token(&token).unwrap();
        assert_eq!(claims.sub, u.id);
        assert_eq!(claims.role, Role::Artist);
        assert_eq!(claims.email.as_deref(), Some("artist@example.com"));
    }

    #[test]
    fn tampered_token_is_rejected() {
        let auth = service();
        let token = auth.issue_token(&user("artist")).unwrap();
        let mut tampered = token.clone();
        tampered.replace_range(0..1, if token.starts_with('A') { "B" } else { "A" });
        assert!(auth.verify_token(&tampered).is_err());
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let token = service().issue_token(&user("artist")).unwrap();
        let other = AuthService::new(b"other-secret".to_vec(), 7);
        assert!(other.verify_token(&token).is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let auth = AuthService::new(b"test-secret".to_vec(), -1);
        let token = auth.issue_token(&user("artist")).unwrap();
        assert!(auth.verify_token(&token).is_err());
    }

    #[test]
    fn unknown_role_in_token_is_forbidden() {
        let auth = service();
        let token = auth.issue_token(&user("superuser")).unwrap();
        let err = auth.verify_token(&token).unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));
    }
}
