//! Authentication-related models

use crate::error::{AppError, Result};

use super::Role;

/// Utente autenticato dal token di sessione
#[derive(Clone, Debug)]
pub struct CurrentUser {
    pub id: String,
    pub role: Role,
    pub is_verified: bool,
}

/// Authenticated user information extracted from request
#[derive(Clone, Debug, Default)]
pub struct AuthInfo {
    /// None for guest (unauthenticated) requests
    pub user: Option<CurrentUser>,
    /// Client IP address
    pub client_ip: Option<String>,
}

impl AuthInfo {
    pub fn is_guest(&self) -> bool {
        self.user.is_none()
    }

    /// Richiede un utente autenticato
    pub fn user(&self) -> Result<&CurrentUser> {
        self.user
            .as_ref()
            .ok_or_else(|| AppError::Unauthorized("Autenticazione richiesta".to_string()))
    }

    /// Richiede un utente autenticato con il ruolo indicato
    pub fn require_role(&self, role: Role) -> Result<&CurrentUser> {
        let user = self.user()?;
        if user.role != role {
            return Err(AppError::Forbidden(format!(
                "Operazione riservata al ruolo {}",
                role
            )));
        }
        Ok(user)
    }

    pub fn require_admin(&self) -> Result<&CurrentUser> {
        self.require_role(Role::Admin)
            .map_err(|e| match e {
                AppError::Forbidden(_) => AppError::Forbidden(
                    "Questa operazione richiede privilegi admin".to_string(),
                ),
                other => other,
            })
    }
}
