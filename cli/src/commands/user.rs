use anyhow::{Context, Result};
use authz::Role;
use colored::*;
use user::{database::UserDatabase, NewUser, UserDatabaseConfig};

use crate::utils::env_paths::EnvPaths;

async fn open() -> Result<UserDatabase> {
    let paths = EnvPaths::load()?;
    let config = UserDatabaseConfig {
        database_path: paths.user_database_path(),
        ..UserDatabaseConfig::default()
    };
    UserDatabase::new(config)
        .await
        .context("Failed to open the user database")
}

/// Create an account.
pub async fn add(
    email: String,
    role: String,
    name: Option<String>,
    password: Option<String>,
) -> Result<()> {
    let role: Role = role.parse()?;
    let db = open().await?;

    let mut new_user = NewUser::new(email, role);
    new_user.name = name;
    new_user.password = password;

    let created = db.create_user(new_user).await?;
    println!(
        "{} created {} {} ({})",
        "OK".green().bold(),
        created.role.to_string().cyan(),
        created.email,
        created.id
    );
    db.close().await?;
    Ok(())
}

/// List accounts.
pub async fn list(format: String) -> Result<()> {
    let db = open().await?;
    let users = db.list_users().await?;
    db.close().await?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&users)?);
        return Ok(());
    }

    if users.is_empty() {
        println!("No users");
        return Ok(());
    }
    for user in users {
        let status = if user.is_active {
            "active".green()
        } else {
            "inactive".red()
        };
        println!(
            "{:<28} {:<10} {:<8} {}",
            user.email,
            user.role.to_string(),
            status,
            user.id
        );
    }
    Ok(())
}
