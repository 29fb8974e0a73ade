use sqlx::SqlitePool;
use tracing::{info, instrument, warn};

use crate::db::users::{NewUser, create_user_with_profile, get_auth_user};
use crate::db::is_unique_violation;
use crate::error::AppError;

use super::{
    AuthUser, CredentialOrigin, CredentialSource, Credentials, LegacyStore, LocalStore,
    PasswordHasher, Role, TokenService, UserStatus,
};

#[derive(Debug)]
pub struct LoginOutcome {
    pub user: AuthUser,
    pub token: String,
    pub provisioned: bool,
}

impl LoginOutcome {
    pub fn needs_profile(&self) -> bool {
        self.user.needs_profile()
    }

    pub fn needs_password_change(&self) -> bool {
        self.user.must_change_password
    }
}

/// Dependencies of a login attempt.
pub struct Authenticator<'a> {
    pub pool: &'a SqlitePool,
    pub legacy: &'a LegacyStore,
    pub hasher: &'a dyn PasswordHasher,
    pub tokens: &'a TokenService,
}

impl Authenticator<'_> {
    /// Local store first, then the legacy store. A legacy match is copied
    /// into the local store so later logins never reach the legacy path.
    #[instrument(skip(self, password))]
    pub async fn login(&self, code: &str, password: &str) -> Result<LoginOutcome, AppError> {
        let local = LocalStore::new(self.pool.clone());
        let sources: [&dyn CredentialSource; 2] = [&local, self.legacy];

        for source in sources {
            let Some(credentials) = source.find(code).await? else {
                info!(source = source.name(), "Code not present in store");
                continue;
            };

            if !self.hasher.verify(password, &credentials.password_hash) {
                warn!(source = source.name(), "Password mismatch");
                return Err(AppError::InvalidCredentials);
            }

            return match credentials.origin {
                CredentialOrigin::Local { user_id, status } => {
                    self.admit_local(&user_id, status, false).await
                }
                CredentialOrigin::Legacy => self.migrate(&local, &credentials, password).await,
            };
        }

        warn!("Code not present in any store");
        Err(AppError::InvalidCredentials)
    }

    async fn migrate(
        &self,
        local: &LocalStore,
        credentials: &Credentials,
        password: &str,
    ) -> Result<LoginOutcome, AppError> {
        let new_user = NewUser {
            code: credentials.code.clone(),
            name: credentials.name.clone(),
            password_hash: self.hasher.hash(password)?,
            role: Role::User,
            status: UserStatus::Active,
            must_change_password: false,
            course: None,
            year: None,
            semester: None,
            completed_profile: false,
        };

        match create_user_with_profile(self.pool, &new_user).await {
            Ok(user_id) => {
                info!(user_id = %user_id, "Provisioned local account from legacy store");
                self.admit_local(&user_id, UserStatus::Active, true).await
            }
            Err(e) if is_unique_violation(&e) => {
                // A concurrent first login won the insert; finish through the local path.
                warn!("Legacy provisioning raced another login, using local record");
                let existing = local
                    .find(&credentials.code)
                    .await?
                    .ok_or(AppError::InvalidCredentials)?;
                if !self.hasher.verify(password, &existing.password_hash) {
                    return Err(AppError::InvalidCredentials);
                }
                match existing.origin {
                    CredentialOrigin::Local { user_id, status } => {
                        self.admit_local(&user_id, status, false).await
                    }
                    CredentialOrigin::Legacy => Err(AppError::InvalidCredentials),
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn admit_local(
        &self,
        user_id: &str,
        status: UserStatus,
        provisioned: bool,
    ) -> Result<LoginOutcome, AppError> {
        if status != UserStatus::Active {
            return Err(AppError::UserInactive);
        }

        let user = get_auth_user(self.pool, user_id)
            .await?
            .ok_or(AppError::UserNotFound)?;
        let token = self.tokens.issue(&user.id)?;

        info!(user_id = %user.id, role = %user.role, "Login succeeded");
        Ok(LoginOutcome {
            user,
            token,
            provisioned,
        })
    }
}
