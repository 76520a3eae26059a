use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, FromRow, Row};
use utoipa::{IntoParams, ToSchema};

/// Ruoli degli account
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Customer,
    Worker,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Customer => "customer",
            Role::Worker => "worker",
            Role::Admin => "admin",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "customer" => Ok(Role::Customer),
            "worker" => Ok(Role::Worker),
            "admin" => Ok(Role::Admin),
            other => Err(format!("ruolo sconosciuto: {}", other)),
        }
    }
}

/// Utente nel database
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub name: String,
    pub phone: Option<String>,
    pub role: Role,
    pub bio: Option<String>,
    pub location: Option<String>,
    pub skills: Vec<String>,
    pub avatar_url: Option<String>,
    pub is_verified: bool,
    pub is_active: bool,
    pub two_factor_enabled: bool,
    #[serde(skip_serializing)]
    pub token_version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl<'r> FromRow<'r, SqliteRow> for User {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let role: String = row.try_get("role")?;
        let skills: String = row.try_get("skills")?;
        Ok(Self {
            id: row.try_get("id")?,
            email: row.try_get("email")?,
            password_hash: row.try_get("password_hash")?,
            name: row.try_get("name")?,
            phone: row.try_get("phone")?,
            role: role.parse().map_err(|e: String| sqlx::Error::Decode(e.into()))?,
            bio: row.try_get("bio")?,
            location: row.try_get("location")?,
            skills: serde_json::from_str(&skills).unwrap_or_default(),
            avatar_url: row.try_get("avatar_url")?,
            is_verified: row.try_get("is_verified")?,
            is_active: row.try_get("is_active")?,
            two_factor_enabled: row.try_get("two_factor_enabled")?,
            token_version: row.try_get("token_version")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            last_login_at: row.try_get("last_login_at")?,
        })
    }
}

/// Profilo pubblico (senza email e telefono)
#[derive(Debug, Serialize, ToSchema)]
pub struct PublicProfile {
    pub id: String,
    pub name: String,
    pub role: Role,
    pub bio: Option<String>,
    pub location: Option<String>,
    pub skills: Vec<String>,
    pub avatar_url: Option<String>,
    pub is_verified: bool,
    pub average_rating: Option<f64>,
    pub review_count: i64,
    pub member_since: DateTime<Utc>,
}

impl PublicProfile {
    pub fn new(user: User, average_rating: Option<f64>, review_count: i64) -> Self {
        Self {
            id: user.id,
            name: user.name,
            role: user.role,
            bio: user.bio,
            location: user.location,
            skills: user.skills,
            avatar_url: user.avatar_url,
            is_verified: user.is_verified,
            average_rating,
            review_count,
            member_since: user.created_at,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: String,
    pub role: Role,
    pub phone: Option<String>,
    pub captcha_token: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    pub captcha_token: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginOtpRequest {
    pub email: String,
    pub code: String,
}

/// Sessione emessa dopo login o registrazione
#[derive(Debug, Serialize, ToSchema)]
pub struct AuthResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: User,
}

/// Risposta del login: sessione oppure richiesta del secondo fattore
#[derive(Debug, Serialize, ToSchema)]
#[serde(untagged)]
pub enum LoginResponse {
    Session(AuthResponse),
    TwoFactorRequired { two_factor_required: bool },
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub bio: Option<String>,
    pub location: Option<String>,
    pub skills: Option<Vec<String>>,
    pub avatar_url: Option<String>,
    pub two_factor_enabled: Option<bool>,
}

/// Scopo di un codice OTP
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OtpPurpose {
    Login,
    PasswordChange,
    EmailChange,
    AccountDeletion,
}

impl OtpPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            OtpPurpose::Login => "login",
            OtpPurpose::PasswordChange => "password_change",
            OtpPurpose::EmailChange => "email_change",
            OtpPurpose::AccountDeletion => "account_deletion",
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            OtpPurpose::Login => "accedere al tuo account",
            OtpPurpose::PasswordChange => "cambiare la password",
            OtpPurpose::EmailChange => "cambiare l'indirizzo email",
            OtpPurpose::AccountDeletion => "eliminare il tuo account",
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct OtpRequest {
    pub purpose: OtpPurpose,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OtpSentResponse {
    pub purpose: OtpPurpose,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ChangePasswordRequest {
    pub code: String,
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ChangeEmailRequest {
    pub code: String,
    pub new_email: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct DeleteAccountRequest {
    pub code: String,
}

/// Filtri dell'elenco lavoratori
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct WorkersQuery {
    pub skill: Option<String>,
    pub location: Option<String>,
    pub verified: Option<bool>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse() {
        assert_eq!("Worker".parse::<Role>().unwrap(), Role::Worker);
        assert_eq!(Role::Customer.to_string(), "customer");
        assert!("guest".parse::<Role>().is_err());
    }

    #[test]
    fn test_otp_purpose_wire_format() {
        let purpose: OtpPurpose = serde_json::from_str("\"password_change\"").unwrap();
        assert_eq!(purpose, OtpPurpose::PasswordChange);
        assert_eq!(purpose.as_str(), "password_change");
    }

    #[test]
    fn test_two_factor_response_shape() {
        let response = LoginResponse::TwoFactorRequired {
            two_factor_required: true,
        };
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            serde_json::json!({ "two_factor_required": true })
        );
    }
}
