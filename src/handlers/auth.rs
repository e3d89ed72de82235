//! Authentication handlers

use axum::{extract::{Path, State}, Json};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::SaltString;
use jsonwebtoken::{encode, decode, Header, EncodingKey, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;
use chrono::{Utc, Duration};
use validator::Validate;

use crate::{AppState, AppError, AppResult};
use crate::middleware::auth::UserContext;
use crate::middleware::rbac::{self, Resource, Verb};
use crate::models::{
    AuditLog, CreateUserRequest, LoginRequest, LoginResponse, RefreshRequest,
    Role, UpdateProfileRequest, UpdateUserRequest, User, UserInfo,
};

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,        // User ID
    pub role: String,       // User role
    pub token_type: String, // "access" or "refresh"
    pub exp: usize,         // Expiration timestamp
    pub iat: usize,         // Issued at
}

#[derive(Debug, Serialize)]
pub struct TokenPairResponse {
    pub access_token: String,
    pub refresh_token: String,
}

/// Login endpoint
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> AppResult<Json<LoginResponse>> {
    let user = User::find_by_username(&state.pool, &req.username)
        .await?
        .ok_or(AppError::InvalidCredentials)?;

    verify_password(&req.password, &user.password_hash)?;

    User::update_last_login(&state.pool, user.id).await?;

    let (access_token, refresh_token) = generate_token_pair(&user, &state.config)?;

    AuditLog::record(
        &state.pool,
        Some(user.id),
        "user_login",
        &user.username,
        Some(user.id.to_string()),
        json!({}),
    )
    .await;

    tracing::info!("User logged in: {} ({})", user.username, user.role);

    Ok(Json(LoginResponse {
        access_token,
        refresh_token,
        user: user.to_info(),
    }))
}

/// Exchange a refresh token for a new access/refresh pair
pub async fn refresh(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> AppResult<Json<TokenPairResponse>> {
    let claims = decode_refresh_claims(&req.refresh_token, &state.config.jwt_secret)?;

    let user_id = Uuid::parse_str(&claims.sub).map_err(|_| AppError::TokenInvalid)?;
    let user = User::find_by_id(&state.pool, user_id)
        .await?
        .filter(|u| u.is_active)
        .ok_or(AppError::Unauthorized)?;

    let (access_token, refresh_token) = generate_token_pair(&user, &state.config)?;

    Ok(Json(TokenPairResponse { access_token, refresh_token }))
}

/// Current user's profile
pub async fn profile(
    State(state): State<AppState>,
    user: UserContext,
) -> AppResult<Json<UserInfo>> {
    let user = User::find_by_id(&state.pool, user.user_id)
        .await?
        .ok_or(AppError::Unauthorized)?;
    Ok(Json(user.to_info()))
}

/// Update own profile; the role field is deliberately absent here
pub async fn update_profile(
    State(state): State<AppState>,
    user: UserContext,
    Json(req): Json<UpdateProfileRequest>,
) -> AppResult<Json<UserInfo>> {
    req.validate()?;

    let password_hash = match &req.password {
        Some(password) => Some(hash_password(password)?),
        None => None,
    };

    let updated = User::update(
        &state.pool,
        user.user_id,
        req.full_name.as_deref(),
        None,
        None,
        password_hash.as_deref(),
    )
    .await?
    .ok_or(AppError::Unauthorized)?;

    AuditLog::record(
        &state.pool,
        Some(user.user_id),
        "user_updated",
        &updated.username,
        Some(updated.id.to_string()),
        json!({"self_service": true}),
    )
    .await;

    Ok(Json(updated.to_info()))
}

/// List users (superadmin)
pub async fn list_users(
    State(state): State<AppState>,
    user: UserContext,
) -> AppResult<Json<Vec<UserInfo>>> {
    rbac::require(&user, Resource::Users, Verb::Read)?;

    let users = User::list(&state.pool).await?;
    Ok(Json(users.iter().map(|u| u.to_info()).collect()))
}

/// Create a user (superadmin)
pub async fn create_user(
    State(state): State<AppState>,
    user: UserContext,
    Json(req): Json<CreateUserRequest>,
) -> AppResult<Json<UserInfo>> {
    rbac::require(&user, Resource::Users, Verb::Write)?;
    req.validate()?;

    if User::find_by_username(&state.pool, &req.username).await?.is_some() {
        return Err(AppError::Conflict("Username already taken".to_string()));
    }

    let password_hash = hash_password(&req.password)?;
    let created = User::create(
        &state.pool,
        &req.username,
        &password_hash,
        req.full_name.as_deref(),
        req.role,
    )
    .await?;

    AuditLog::record(
        &state.pool,
        Some(user.user_id),
        "user_created",
        &created.username,
        Some(created.id.to_string()),
        json!({"role": created.role}),
    )
    .await;

    tracing::info!("User created: {} ({})", created.username, created.role);

    Ok(Json(created.to_info()))
}

/// Update a user, including role changes (superadmin)
pub async fn update_user(
    State(state): State<AppState>,
    user: UserContext,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateUserRequest>,
) -> AppResult<Json<UserInfo>> {
    // Only superadmin reaches this point, which keeps roles immutable
    // for everyone else.
    rbac::require(&user, Resource::Users, Verb::Write)?;
    req.validate()?;

    let password_hash = match &req.password {
        Some(password) => Some(hash_password(password)?),
        None => None,
    };

    let updated = User::update(
        &state.pool,
        id,
        req.full_name.as_deref(),
        req.role,
        req.is_active,
        password_hash.as_deref(),
    )
    .await?
    .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    AuditLog::record(
        &state.pool,
        Some(user.user_id),
        "user_updated",
        &updated.username,
        Some(updated.id.to_string()),
        json!({"role": updated.role, "is_active": updated.is_active}),
    )
    .await;

    Ok(Json(updated.to_info()))
}

/// Hash a password with Argon2
pub fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::InternalError(e.to_string()))?
        .to_string())
}

fn verify_password(password: &str, hash: &str) -> AppResult<()> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|_| AppError::InternalError("Invalid password hash".to_string()))?;

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .map_err(|_| AppError::InvalidCredentials)
}

/// Generate an access/refresh JWT pair
fn generate_token_pair(user: &User, config: &crate::config::Config) -> AppResult<(String, String)> {
    let access = generate_jwt(
        user,
        &config.jwt_secret,
        "access",
        Duration::minutes(config.access_token_minutes),
    )?;
    let refresh = generate_jwt(
        user,
        &config.jwt_secret,
        "refresh",
        Duration::days(config.refresh_token_days),
    )?;
    Ok((access, refresh))
}

fn generate_jwt(user: &User, secret: &str, token_type: &str, lifetime: Duration) -> AppResult<String> {
    let now = Utc::now();
    let claims = Claims {
        sub: user.id.to_string(),
        role: user.role.clone(),
        token_type: token_type.to_string(),
        exp: (now + lifetime).timestamp() as usize,
        iat: now.timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes())
    ).map_err(|e| AppError::InternalError(e.to_string()))
}

fn decode_refresh_claims(token: &str, secret: &str) -> AppResult<Claims> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;

    if data.claims.token_type != "refresh" {
        return Err(AppError::TokenInvalid);
    }
    Ok(data.claims)
}

/// Create the bootstrap superadmin on an empty user table
pub async fn ensure_bootstrap_admin(
    pool: &sqlx::PgPool,
    config: &crate::config::Config,
) -> AppResult<()> {
    if User::count(pool).await? > 0 {
        return Ok(());
    }

    let password_hash = hash_password(&config.admin_password)?;
    let admin = User::create(
        pool,
        &config.admin_username,
        &password_hash,
        Some("Bootstrap Administrator"),
        Role::Superadmin,
    )
    .await?;

    tracing::info!("Bootstrap superadmin created: {}", admin.username);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    fn test_user(role: &str) -> User {
        User {
            id: Uuid::new_v4(),
            username: "tester".to_string(),
            password_hash: String::new(),
            full_name: None,
            role: role.to_string(),
            is_active: true,
            last_login: None,
            created_at: DateTime::<Utc>::UNIX_EPOCH,
            updated_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    #[test]
    fn access_token_round_trips() {
        let user = test_user("it_admin");
        let token = generate_jwt(&user, "test-secret", "access", Duration::minutes(5)).unwrap();

        let data = decode::<Claims>(
            &token,
            &DecodingKey::from_secret(b"test-secret"),
            &Validation::default(),
        )
        .unwrap();

        assert_eq!(data.claims.sub, user.id.to_string());
        assert_eq!(data.claims.role, "it_admin");
        assert_eq!(data.claims.token_type, "access");
    }

    #[test]
    fn refresh_path_rejects_access_tokens() {
        let user = test_user("security");
        let access = generate_jwt(&user, "test-secret", "access", Duration::minutes(5)).unwrap();

        let err = decode_refresh_claims(&access, "test-secret").unwrap_err();
        assert!(matches!(err, AppError::TokenInvalid));
    }

    #[test]
    fn refresh_token_is_accepted() {
        let user = test_user("auditor");
        let refresh = generate_jwt(&user, "test-secret", "refresh", Duration::days(1)).unwrap();

        let claims = decode_refresh_claims(&refresh, "test-secret").unwrap();
        assert_eq!(claims.role, "auditor");
    }

    #[test]
    fn expired_token_maps_to_token_expired() {
        let user = test_user("auditor");
        let token = generate_jwt(&user, "test-secret", "refresh", Duration::seconds(-120)).unwrap();

        let err = decode_refresh_claims(&token, "test-secret").unwrap_err();
        assert!(matches!(err, AppError::TokenExpired));
    }

    #[test]
    fn password_hash_verifies() {
        let hash = hash_password("correct horse battery").unwrap();
        assert!(verify_password("correct horse battery", &hash).is_ok());
        assert!(matches!(
            verify_password("wrong", &hash).unwrap_err(),
            AppError::InvalidCredentials
        ));
    }
}
