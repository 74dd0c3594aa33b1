use actix_web::cookie::{time::Duration as CookieDuration, Cookie, SameSite};
use actix_web::{
    body::BoxBody,
    dev::{ServiceRequest, ServiceResponse},
    http::header::{self, Header},
    middleware::Next,
    web, Error, HttpMessage, HttpRequest, HttpResponse,
};
use actix_web_httpauth::headers::authorization::{Authorization, Bearer};
use argon2::{
    password_hash::{self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{DateTime, Duration, Utc};
use rand_core::{OsRng, RngCore};
use serde::Serialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{config::Config, db::timestamp, models::AdminSessionRow, state::AppState};

pub const SESSION_COOKIE: &str = "barbearia_session";
const TOKEN_PREFIX: &str = "admin_";
const TOKEN_BYTES: usize = 32;

/// The operator login, checked against the configured pair.
#[derive(Clone)]
pub struct AdminCredentials {
    username: String,
    password_hash: String,
}

impl AdminCredentials {
    pub fn from_config(config: &Config) -> Result<Self, password_hash::Error> {
        Ok(Self {
            username: config.admin_user.trim().to_string(),
            password_hash: hash_password(&config.admin_password)?,
        })
    }

    pub fn matches(&self, username: &str, password: &str) -> bool {
        // Verify even on a wrong username so both failures cost the same.
        let password_ok = verify_password(password, &self.password_hash);
        username.trim() == self.username && password_ok
    }
}

/// An authenticated admin session, handed to handlers through request extensions.
#[derive(Clone, Debug, Serialize)]
pub struct AdminSession {
    pub token: String,
    pub username: String,
    pub expires_at: DateTime<Utc>,
}

pub fn hash_password(password: &str) -> Result<String, password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

fn verify_password(password: &str, password_hash: &str) -> bool {
    match PasswordHash::new(password_hash) {
        Ok(hash) => Argon2::default()
            .verify_password(password.as_bytes(), &hash)
            .is_ok(),
        Err(_) => false,
    }
}

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn generate_session_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    format!("{TOKEN_PREFIX}{}", hex::encode(bytes))
}

pub async fn create_session(
    pool: &SqlitePool,
    username: &str,
    ttl_hours: i64,
) -> Result<AdminSession, sqlx::Error> {
    let now = Utc::now();
    let session = AdminSession {
        token: generate_session_token(),
        username: username.to_string(),
        expires_at: now + Duration::hours(ttl_hours),
    };

    sqlx::query(
        r#"INSERT INTO admin_sessions (id, session_token, username, created_at, expires_at, is_active)
           VALUES (?, ?, ?, ?, ?, 1)"#,
    )
    .bind(new_id())
    .bind(&session.token)
    .bind(&session.username)
    .bind(timestamp(now))
    .bind(timestamp(session.expires_at))
    .execute(pool)
    .await?;

    Ok(session)
}

/// `Ok(None)` means the credentials were wrong.
pub async fn login(
    state: &AppState,
    username: &str,
    password: &str,
) -> Result<Option<AdminSession>, sqlx::Error> {
    if !state.credentials.matches(username, password) {
        log::info!("Rejected admin login for {:?}", username.trim());
        return Ok(None);
    }
    let session = create_session(&state.db, username.trim(), state.config.session_ttl_hours).await?;
    log::info!("Admin {} logged in", session.username);
    Ok(Some(session))
}

pub async fn sweep_expired_sessions(pool: &SqlitePool) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM admin_sessions WHERE expires_at < ?")
        .bind(timestamp(Utc::now()))
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

pub async fn validate_session(
    pool: &SqlitePool,
    token: &str,
) -> Result<Option<AdminSession>, sqlx::Error> {
    if let Err(err) = sweep_expired_sessions(pool).await {
        log::warn!("Expired session sweep failed: {err}");
    }

    let row = sqlx::query_as::<_, AdminSessionRow>(
        r#"SELECT id, session_token, username, created_at, expires_at, is_active
           FROM admin_sessions
           WHERE session_token = ? AND is_active = 1 AND expires_at > ?
           LIMIT 1"#,
    )
    .bind(token)
    .bind(timestamp(Utc::now()))
    .fetch_optional(pool)
    .await?;

    Ok(row.and_then(|row| {
        let expires_at = DateTime::parse_from_rfc3339(&row.expires_at)
            .ok()?
            .with_timezone(&Utc);
        Some(AdminSession {
            token: row.session_token,
            username: row.username,
            expires_at,
        })
    }))
}

pub async fn invalidate_session(pool: &SqlitePool, token: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE admin_sessions SET is_active = 0 WHERE session_token = ?")
        .bind(token)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub fn session_cookie(config: &Config, session: &AdminSession) -> Cookie<'static> {
    Cookie::build(SESSION_COOKIE, session.token.clone())
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(config.cookie_secure)
        .max_age(CookieDuration::hours(config.session_ttl_hours))
        .finish()
}

pub fn clear_session_cookie(config: &Config) -> Cookie<'static> {
    Cookie::build(SESSION_COOKIE, "")
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(config.cookie_secure)
        .max_age(CookieDuration::seconds(0))
        .finish()
}

/// Session token from the cookie, or from an `Authorization: Bearer` header.
pub fn request_token(req: &HttpRequest) -> Option<String> {
    if let Some(cookie) = req.cookie(SESSION_COOKIE) {
        let value = cookie.value().trim();
        if !value.is_empty() {
            return Some(value.to_string());
        }
    }
    Authorization::<Bearer>::parse(req)
        .ok()
        .map(|auth| auth.into_scheme().token().to_string())
        .filter(|token| !token.trim().is_empty())
}

pub async fn session_guard<B>(
    req: ServiceRequest,
    next: Next<B>,
) -> Result<ServiceResponse<BoxBody>, Error>
where
    B: actix_web::body::MessageBody + 'static,
{
    let Some(state) = req.app_data::<web::Data<AppState>>().cloned() else {
        return Err(actix_web::error::ErrorInternalServerError("state missing"));
    };

    let session = match request_token(req.request()) {
        Some(token) => match validate_session(&state.db, &token).await {
            Ok(session) => session,
            Err(err) => {
                log::error!("Session validation failed: {err}");
                None
            }
        },
        None => None,
    };

    let Some(session) = session else {
        let response = if req.path().starts_with("/admin/api") {
            HttpResponse::Unauthorized()
                .insert_header((header::CACHE_CONTROL, "no-store"))
                .json(serde_json::json!({ "error": "unauthorized" }))
        } else {
            HttpResponse::SeeOther()
                .append_header((header::LOCATION, "/admin/login"))
                .insert_header((header::CACHE_CONTROL, "no-store"))
                .cookie(clear_session_cookie(&state.config))
                .finish()
        };
        return Ok(req.into_response(response));
    };

    req.extensions_mut().insert(session);
    let res = next.call(req).await?;
    Ok(res.map_into_boxed_body())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_long_and_distinct() {
        let first = generate_session_token();
        let second = generate_session_token();
        assert!(first.starts_with(TOKEN_PREFIX));
        assert_eq!(first.len(), TOKEN_PREFIX.len() + TOKEN_BYTES * 2);
        assert!(first[TOKEN_PREFIX.len()..].chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(first, second);
    }

    #[test]
    fn credentials_check_both_fields() {
        let credentials = AdminCredentials::from_config(&Config::for_tests()).unwrap();
        assert!(credentials.matches("barbeiro", "segredo-forte"));
        assert!(credentials.matches(" barbeiro ", "segredo-forte"));
        assert!(!credentials.matches("barbeiro", "1234"));
        assert!(!credentials.matches("Miguel", "segredo-forte"));
    }

    #[actix_web::test]
    async fn login_issues_valid_session() {
        let state = AppState::for_tests().await;
        let session = login(&state, "barbeiro", "segredo-forte")
            .await
            .unwrap()
            .expect("session");
        assert!(session.expires_at > Utc::now() + Duration::hours(23));

        let validated = validate_session(&state.db, &session.token).await.unwrap();
        assert_eq!(validated.map(|s| s.username), Some("barbeiro".to_string()));
    }

    #[actix_web::test]
    async fn wrong_password_creates_nothing() {
        let state = AppState::for_tests().await;
        assert!(login(&state, "barbeiro", "errada").await.unwrap().is_none());
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM admin_sessions")
            .fetch_one(&state.db)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[actix_web::test]
    async fn expired_session_fails_even_when_active() {
        let state = AppState::for_tests().await;
        let past = Utc::now() - Duration::hours(1);
        sqlx::query(
            r#"INSERT INTO admin_sessions (id, session_token, username, created_at, expires_at, is_active)
               VALUES (?, 'admin_old', 'barbeiro', ?, ?, 1)"#,
        )
        .bind(new_id())
        .bind(timestamp(past - Duration::hours(24)))
        .bind(timestamp(past))
        .execute(&state.db)
        .await
        .unwrap();

        assert!(validate_session(&state.db, "admin_old").await.unwrap().is_none());
        let remaining = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM admin_sessions")
            .fetch_one(&state.db)
            .await
            .unwrap();
        assert_eq!(remaining, 0, "expired rows are swept");
    }

    #[actix_web::test]
    async fn logout_invalidates_token() {
        let state = AppState::for_tests().await;
        let session = create_session(&state.db, "barbeiro", 24).await.unwrap();
        assert!(invalidate_session(&state.db, &session.token).await.unwrap());
        assert!(validate_session(&state.db, &session.token).await.unwrap().is_none());
        assert!(!invalidate_session(&state.db, "admin_unknown").await.unwrap());
    }
}
