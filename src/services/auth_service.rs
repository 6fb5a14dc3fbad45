use crate::config::AuthConfig;
use crate::domain::auth::{Claims, Password, validate_credentials};
use crate::domain::auth_session::AuthSession;
use crate::domain::user::{User, UserProfile};
use crate::error::{AppError, Result};
use crate::storage::UserStore;
use opentelemetry::{global, metrics::Counter};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone, Debug)]
struct Metrics {
    signup_total: Counter<u64>,
    login_total: Counter<u64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("parley-server");
        Self {
            signup_total: meter
                .u64_counter("parley_auth_signup_total")
                .with_description("Total number of successful signups")
                .build(),
            login_total: meter
                .u64_counter("parley_auth_login_total")
                .with_description("Total number of successful login attempts")
                .build(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AuthService {
    config: AuthConfig,
    users: Arc<dyn UserStore>,
    metrics: Metrics,
}

impl AuthService {
    #[must_use]
    pub fn new(config: AuthConfig, users: Arc<dyn UserStore>) -> Self {
        Self { config, users, metrics: Metrics::new() }
    }

    /// # Errors
    /// Returns `AppError::Validation` for unacceptable credentials and
    /// `AppError::Conflict` if the username is taken.
    #[tracing::instrument(skip(self, password), fields(user_id = tracing::field::Empty), err(level = "warn"))]
    pub async fn signup(&self, username: String, password: String) -> Result<AuthSession> {
        validate_credentials(&username, &password)?;

        if self.users.find_by_username(&username).await?.is_some() {
            return Err(AppError::Conflict("Username already taken".into()));
        }

        let password_hash = self.hash_password(password).await?;
        let user = self.users.create_user(&username, &password_hash).await?;
        tracing::Span::current().record("user_id", tracing::field::display(user.id()));

        tracing::info!("User registered successfully");
        self.metrics.signup_total.add(1, &[]);
        self.create_session(&user)
    }

    /// # Errors
    /// Returns `AppError::AuthError` if the username is unknown or the password is wrong.
    #[tracing::instrument(skip(self, username, password), fields(user_id = tracing::field::Empty), err(level = "warn"))]
    pub async fn login(&self, username: String, password: String) -> Result<AuthSession> {
        let Some(user) = self.users.find_by_username(&username).await? else {
            tracing::warn!("Login failed: user not found");
            return Err(AppError::AuthError);
        };

        tracing::Span::current().record("user_id", tracing::field::display(user.id()));

        if !self.verify_password(password, user.password_hash.clone()).await? {
            tracing::warn!("Login failed: invalid password");
            return Err(AppError::AuthError);
        }

        self.metrics.login_total.add(1, &[]);
        self.create_session(&user)
    }

    /// Resolves a bearer token to the identity it was issued for.
    ///
    /// # Errors
    /// Returns `AppError::AuthError` if the token is invalid or expired.
    pub fn verify_token(&self, token: &str) -> Result<Uuid> {
        Claims::decode(token, &self.config.jwt_secret).map(|claims| claims.sub)
    }

    /// # Errors
    /// Returns `AppError::AuthError` if the identity no longer exists.
    pub async fn profile(&self, user_id: Uuid) -> Result<UserProfile> {
        self.users.find_by_id(user_id).await?.map(|u| u.profile()).ok_or(AppError::AuthError)
    }

    fn create_session(&self, user: &User) -> Result<AuthSession> {
        let token = Claims::new(user.id(), self.config.access_token_ttl_secs).encode(&self.config.jwt_secret)?;
        Ok(AuthSession { token, user: user.profile() })
    }

    async fn hash_password(&self, password: String) -> Result<String> {
        tokio::task::spawn_blocking(move || Password::hash(&password)).await.map_err(|_| AppError::Internal)?
    }

    async fn verify_password(&self, password: String, password_hash: String) -> Result<bool> {
        tokio::task::spawn_blocking(move || Password::verify(&password, &password_hash))
            .await
            .map_err(|_| AppError::Internal)?
    }
}
