//! Accesso ai dati degli utenti

use sqlx::QueryBuilder;

use super::{new_id, now, DbPool};
use crate::error::Result as AppResult;
use crate::models::{Pagination, Role, UpdateProfileRequest, User};
use crate::services::passwords;

const USER_COLUMNS: &str = r#"
    id, email, password_hash, name, phone, role, bio, location, skills, avatar_url,
    is_verified, is_active, two_factor_enabled, token_version,
    created_at, updated_at, last_login_at
"#;

/// Dati per inserire un nuovo utente
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub name: String,
    pub phone: Option<String>,
    pub role: Role,
}

/// Modifiche amministrative a un account
#[derive(Debug, Default, Clone, serde::Deserialize, utoipa::ToSchema)]
pub struct AdminUserUpdate {
    pub is_active: Option<bool>,
    pub role: Option<Role>,
    pub is_verified: Option<bool>,
}

/// Filtri della lista utenti admin
#[derive(Debug, Default, Clone, serde::Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct UsersQuery {
    pub role: Option<Role>,
    /// Cerca in nome ed email
    pub q: Option<String>,
    pub active: Option<bool>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

pub async fn create_user(pool: &DbPool, new_user: &NewUser) -> Result<User, sqlx::Error> {
    let id = new_id();
    let now = now();

    sqlx::query(
        r#"
        INSERT INTO users (id, email, password_hash, name, phone, role, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(new_user.email.to_lowercase())
    .bind(&new_user.password_hash)
    .bind(&new_user.name)
    .bind(&new_user.phone)
    .bind(new_user.role.as_str())
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    find_by_id(pool, &id).await?.ok_or(sqlx::Error::RowNotFound)
}

pub async fn find_by_id(pool: &DbPool, id: &str) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>(&format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS))
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn find_by_email(pool: &DbPool, email: &str) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>(&format!(
        "SELECT {} FROM users WHERE email = ?",
        USER_COLUMNS
    ))
    .bind(email.trim().to_lowercase())
    .fetch_optional(pool)
    .await
}

pub async fn email_exists(pool: &DbPool, email: &str) -> Result<bool, sqlx::Error> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE email = ?")
        .bind(email.trim().to_lowercase())
        .fetch_one(pool)
        .await?;
    Ok(row.0 > 0)
}

/// Una stringa vuota cancella il campo
fn blank_to_null(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Aggiorna i campi non sensibili del profilo
pub async fn update_profile(
    pool: &DbPool,
    id: &str,
    update: &UpdateProfileRequest,
) -> Result<bool, sqlx::Error> {
    let mut builder = QueryBuilder::new("UPDATE users SET updated_at = ");
    builder.push_bind(now());

    if let Some(ref name) = update.name {
        builder.push(", name = ").push_bind(name.trim().to_string());
    }
    if let Some(ref phone) = update.phone {
        builder.push(", phone = ").push_bind(blank_to_null(phone));
    }
    if let Some(ref bio) = update.bio {
        builder.push(", bio = ").push_bind(blank_to_null(bio));
    }
    if let Some(ref location) = update.location {
        builder.push(", location = ").push_bind(blank_to_null(location));
    }
    if let Some(ref skills) = update.skills {
        let json = serde_json::to_string(skills).unwrap_or_else(|_| "[]".to_string());
        builder.push(", skills = ").push_bind(json);
    }
    if let Some(ref avatar_url) = update.avatar_url {
        builder.push(", avatar_url = ").push_bind(blank_to_null(avatar_url));
    }
    if let Some(enabled) = update.two_factor_enabled {
        builder.push(", two_factor_enabled = ").push_bind(enabled);
    }

    builder.push(" WHERE id = ").push_bind(id);

    let result = builder.build().execute(pool).await?;
    Ok(result.rows_affected() > 0)
}

/// Cambia la password e invalida i token emessi
pub async fn update_password(
    pool: &DbPool,
    id: &str,
    password_hash: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE users SET password_hash = ?, token_version = token_version + 1, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(password_hash)
    .bind(now())
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn update_email(pool: &DbPool, id: &str, email: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE users SET email = ?, updated_at = ? WHERE id = ?")
        .bind(email.trim().to_lowercase())
        .bind(now())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn touch_last_login(pool: &DbPool, id: &str) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE users SET last_login_at = ? WHERE id = ?")
        .bind(now())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn set_verified(pool: &DbPool, id: &str, verified: bool) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE users SET is_verified = ?, updated_at = ? WHERE id = ?")
        .bind(verified)
        .bind(now())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Eliminazione logica: anonimizza i dati personali e disattiva l'account.
/// Job, recensioni e pagamenti restano per lo storico delle controparti.
pub async fn soft_delete(pool: &DbPool, id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE users SET
            email = 'deleted-' || id || '@workday.invalid',
            password_hash = '',
            name = 'Utente eliminato',
            phone = NULL,
            bio = NULL,
            location = NULL,
            skills = '[]',
            avatar_url = NULL,
            is_active = 0,
            two_factor_enabled = 0,
            token_version = token_version + 1,
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(now())
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Aggiornamento admin di stato, ruolo e verifica
pub async fn admin_update(
    pool: &DbPool,
    id: &str,
    update: &AdminUserUpdate,
) -> Result<bool, sqlx::Error> {
    let mut builder = QueryBuilder::new("UPDATE users SET updated_at = ");
    builder.push_bind(now());

    if let Some(is_active) = update.is_active {
        builder.push(", is_active = ").push_bind(is_active);
        // Un account disattivato perde le sessioni aperte
        if !is_active {
            builder.push(", token_version = token_version + 1");
        }
    }
    if let Some(role) = update.role {
        builder.push(", role = ").push_bind(role.as_str());
    }
    if let Some(is_verified) = update.is_verified {
        builder.push(", is_verified = ").push_bind(is_verified);
    }

    builder.push(" WHERE id = ").push_bind(id);

    let result = builder.build().execute(pool).await?;
    Ok(result.rows_affected() > 0)
}

/// Lista utenti con filtri (pannello admin)
pub async fn list_users(
    pool: &DbPool,
    query: &UsersQuery,
    page: Pagination,
) -> Result<(Vec<User>, i64), sqlx::Error> {
    fn push_filters<'a>(builder: &mut QueryBuilder<'a, sqlx::Sqlite>, query: &'a UsersQuery) {
        if let Some(role) = query.role {
            builder.push(" AND role = ").push_bind(role.as_str());
        }
        if let Some(active) = query.active {
            builder.push(" AND is_active = ").push_bind(active);
        }
        if let Some(ref q) = query.q {
            let pattern = format!("%{}%", q.trim().to_lowercase());
            builder
                .push(" AND (lower(name) LIKE ")
                .push_bind(pattern.clone())
                .push(" OR email LIKE ")
                .push_bind(pattern)
                .push(")");
        }
    }

    let mut count = QueryBuilder::new("SELECT COUNT(*) FROM users WHERE 1=1");
    push_filters(&mut count, query);
    let total: (i64,) = count.build_query_as().fetch_one(pool).await?;

    let mut data = QueryBuilder::new(format!("SELECT {} FROM users WHERE 1=1", USER_COLUMNS));
    push_filters(&mut data, query);
    data.push(" ORDER BY created_at DESC LIMIT ")
        .push_bind(page.limit)
        .push(" OFFSET ")
        .push_bind(page.offset());

    let users = data.build_query_as::<User>().fetch_all(pool).await?;
    Ok((users, total.0))
}

/// Elenco pubblico dei lavoratori attivi
pub async fn list_workers(
    pool: &DbPool,
    skill: Option<&str>,
    location: Option<&str>,
    verified: Option<bool>,
    page: Pagination,
) -> Result<(Vec<User>, i64), sqlx::Error> {
    fn push_filters(
        builder: &mut QueryBuilder<'_, sqlx::Sqlite>,
        skill: Option<&str>,
        location: Option<&str>,
        verified: Option<bool>,
    ) {
        builder.push(" WHERE role = 'worker' AND is_active = 1");
        if let Some(skill) = skill {
            let pattern = format!("%\"{}\"%", skill.trim().to_lowercase());
            builder.push(" AND lower(skills) LIKE ").push_bind(pattern);
        }
        if let Some(location) = location {
            let pattern = format!("%{}%", location.trim().to_lowercase());
            builder.push(" AND lower(location) LIKE ").push_bind(pattern);
        }
        if let Some(verified) = verified {
            builder.push(" AND is_verified = ").push_bind(verified);
        }
    }

    let mut count = QueryBuilder::new("SELECT COUNT(*) FROM users");
    push_filters(&mut count, skill, location, verified);
    let total: (i64,) = count.build_query_as().fetch_one(pool).await?;

    let mut data = QueryBuilder::new(format!("SELECT {} FROM users", USER_COLUMNS));
    push_filters(&mut data, skill, location, verified);
    data.push(" ORDER BY is_verified DESC, created_at DESC LIMIT ")
        .push_bind(page.limit)
        .push(" OFFSET ")
        .push_bind(page.offset());

    let users = data.build_query_as::<User>().fetch_all(pool).await?;
    Ok((users, total.0))
}

pub async fn count_active_admins(pool: &DbPool) -> Result<i64, sqlx::Error> {
    let count: (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM users WHERE role = 'admin' AND is_active = 1")
            .fetch_one(pool)
            .await?;
    Ok(count.0)
}

/// Verifica se esiste almeno un admin attivo
pub async fn has_admin(pool: &DbPool) -> Result<bool, sqlx::Error> {
    Ok(count_active_admins(pool).await? > 0)
}

/// Admin creato al primo avvio
#[derive(Debug)]
pub struct InitialAdmin {
    pub email: String,
    /// Presente solo se la password non era configurata
    pub generated_password: Option<String>,
}

/// Crea l'admin iniziale se non ne esiste nessuno
pub async fn ensure_initial_admin(
    pool: &DbPool,
    email: &str,
    password: Option<&str>,
) -> AppResult<Option<InitialAdmin>> {
    if has_admin(pool).await? {
        return Ok(None);
    }

    let generated_password = match password {
        Some(_) => None,
        None => Some(passwords::generate_password()),
    };
    let plain = password
        .or(generated_password.as_deref())
        .unwrap_or_default();

    let admin = create_user(
        pool,
        &NewUser {
            email: email.to_string(),
            password_hash: passwords::hash_password(plain)?,
            name: "Amministratore".to_string(),
            phone: None,
            role: Role::Admin,
        },
    )
    .await?;

    Ok(Some(InitialAdmin {
        email: admin.email,
        generated_password,
    }))
}
