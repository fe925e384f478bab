use authz::Role;
use chrono::Utc;
use sqlx::{migrate::MigrateDatabase, Pool, Sqlite, SqlitePool};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::auth::password;
use crate::auth::types::{NewUser, PortalUser, UserRow};
use crate::error::{Result, UserError};

/// Configuration for the user database
#[derive(Debug, Clone)]
pub struct UserDatabaseConfig {
    /// Path to the database file
    pub database_path: PathBuf,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Connection timeout in seconds
    pub connection_timeout: u64,
}

impl Default for UserDatabaseConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data/user-backend/portal_user.db"),
            max_connections: 5,
            connection_timeout: 30,
        }
    }
}

impl UserDatabaseConfig {
    /// Default layout under a data directory.
    pub fn in_data_dir(data_path: &Path) -> Self {
        Self {
            database_path: data_path.join("user-backend").join("portal_user.db"),
            ..Self::default()
        }
    }
}

const USER_COLUMNS: &str =
    "id, email, name, role, password_hash, is_active, created_at, updated_at, last_login";

/// User database manager
pub struct UserDatabase {
    pool: Pool<Sqlite>,
}

impl UserDatabase {
    /// Initialize the user database
    pub async fn new(config: UserDatabaseConfig) -> Result<Self> {
        if let Some(parent) = config.database_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db_url = format!("sqlite:{}", config.database_path.display());

        if !Sqlite::database_exists(&db_url).await.unwrap_or(false) {
            info!(
                "Creating user database at: {}",
                config.database_path.display()
            );
            Sqlite::create_database(&db_url).await.map_err(|e| {
                UserError::Initialization(format!("Failed to create database: {}", e))
            })?;
        }

        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout))
            .connect_with(
                sqlx::sqlite::SqliteConnectOptions::new()
                    .filename(&config.database_path)
                    .create_if_missing(true)
                    .foreign_keys(true),
            )
            .await?;

        let db = Self { pool };
        db.run_migrations().await?;

        info!("User database initialized successfully");
        Ok(db)
    }

    /// Run database migrations
    async fn run_migrations(&self) -> Result<()> {
        info!("Running user database migrations");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                name TEXT,
                role TEXT NOT NULL
                    CHECK (role IN ('TRAINEE', 'EMPLOYER', 'MENTOR', 'ADMIN')),
                password_hash TEXT,
                is_active BOOLEAN NOT NULL DEFAULT 1,
                created_at TIMESTAMP NOT NULL,
                updated_at TIMESTAMP NOT NULL,
                last_login TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS magic_link_tokens (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                token_hash TEXT NOT NULL UNIQUE,
                email TEXT NOT NULL,
                expires_at TIMESTAMP NOT NULL,
                used BOOLEAN NOT NULL DEFAULT 0,
                created_at TIMESTAMP NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_users_role ON users(role)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_magic_link_email ON magic_link_tokens(email)",
        )
        .execute(&self.pool)
        .await?;

        info!("User database migrations completed");
        Ok(())
    }

    /// Get the database pool for external use
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Create an account.
    ///
    /// ADMIN accounts sign in with a password and must be given one. Every
    /// other role signs in with one-time links and must not have one.
    pub async fn create_user(&self, new_user: NewUser) -> Result<PortalUser> {
        let email = new_user.validated_email()?;

        let password_hash = match (new_user.role, new_user.password.as_deref()) {
            (Role::Admin, Some(password)) => Some(password::hash_password(password)?),
            (Role::Admin, None) => {
                return Err(UserError::Validation(
                    "ADMIN accounts require a password".to_string(),
                ))
            }
            (_, None) => None,
            (role, Some(_)) => {
                return Err(UserError::Validation(format!(
                    "{} accounts sign in with one-time links and cannot have a password",
                    role
                )))
            }
        };

        if self.find_by_email(&email).await?.is_some() {
            return Err(UserError::DuplicateEmail(email));
        }

        let id = ulid::Ulid::new().to_string();
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO users (id, email, name, role, password_hash, is_active, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, 1, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&email)
        .bind(&new_user.name)
        .bind(new_user.role.as_str())
        .bind(&password_hash)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                UserError::DuplicateEmail(email.clone())
            }
            other => UserError::Database(other),
        })?;

        info!("Created {} account {}", new_user.role, id);
        self.find_by_id(&id)
            .await?
            .ok_or_else(|| UserError::UserNotFound(id))
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<PortalUser>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE id = ?",
            USER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(UserRow::into_user).transpose()
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<PortalUser>> {
        Ok(self
            .find_with_password_hash(email)
            .await?
            .map(|(user, _)| user))
    }

    /// Look up an account together with its stored password hash.
    pub(crate) async fn find_with_password_hash(
        &self,
        email: &str,
    ) -> Result<Option<(PortalUser, Option<String>)>> {
        let email = email.trim().to_ascii_lowercase();
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE email = ?",
            USER_COLUMNS
        ))
        .bind(&email)
        .fetch_optional(&self.pool)
        .await?;
        row.map(UserRow::into_parts).transpose()
    }

    /// All accounts, oldest first.
    pub async fn list_users(&self) -> Result<Vec<PortalUser>> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users ORDER BY created_at, id",
            USER_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(UserRow::into_user).collect()
    }

    pub async fn record_login(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE users SET last_login = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Enable or disable an account. Disabled accounts resolve to no identity.
    pub async fn set_active(&self, id: &str, active: bool) -> Result<()> {
        let result = sqlx::query("UPDATE users SET is_active = ?, updated_at = ? WHERE id = ?")
            .bind(active)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(UserError::UserNotFound(id.to_string()));
        }
        info!("Account {} active={}", id, active);
        Ok(())
    }

    /// Verify database integrity
    pub async fn verify_integrity(&self) -> Result<bool> {
        for table in ["users", "magic_link_tokens"] {
            let exists = sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?)",
            )
            .bind(table)
            .fetch_one(&self.pool)
            .await?;

            if !exists {
                warn!("Missing table: {}", table);
                return Ok(false);
            }
        }

        info!("Database integrity check passed");
        Ok(true)
    }

    /// Close the database connection
    pub async fn close(self) -> Result<()> {
        self.pool.close().await;
        info!("User database connection closed");
        Ok(())
    }
}
