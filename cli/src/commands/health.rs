use crate::utils::env_paths::EnvPaths;
use anyhow::Result;
use audit::{AuditLog, AuditLogConfig, ChainVerification};
use authz::RoutePolicy;
use colored::*;
use serde_json::json;
use user::{database::UserDatabase, UserDatabaseConfig};

/// Execute the health check command
pub async fn execute(format: String) -> Result<()> {
    let paths = EnvPaths::load()?;
    let health_status = check_system_health(&paths).await;

    match format.as_str() {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&health_status)?);
        }
        _ => {
            print_health_status_text(&health_status);
        }
    }

    Ok(())
}

/// Check the health of various system components
async fn check_system_health(paths: &EnvPaths) -> serde_json::Value {
    let components = json!({
        "database": check_database_health(paths).await,
        "route_policy": check_policy_health(paths),
        "audit_log": check_audit_health(paths),
        "api": check_api_health().await,
    });

    let all_healthy = components
        .as_object()
        .map(|components| {
            components
                .values()
                .all(|v| matches!(v["status"].as_str(), Some("healthy") | Some("offline")))
        })
        .unwrap_or(false);

    json!({
        "status": if all_healthy { "healthy" } else { "degraded" },
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "components": components,
    })
}

async fn check_database_health(paths: &EnvPaths) -> serde_json::Value {
    let db_path = paths.user_database_path();
    if !db_path.exists() {
        return json!({
            "status": "not_initialized",
            "message": format!("User database not found at {}", db_path.display())
        });
    }

    let config = UserDatabaseConfig {
        database_path: db_path,
        ..UserDatabaseConfig::default()
    };
    let db = match UserDatabase::new(config).await {
        Ok(db) => db,
        Err(e) => {
            return json!({
                "status": "unhealthy",
                "message": format!("Failed to open user database: {}", e)
            })
        }
    };

    let status = match (db.verify_integrity().await, db.list_users().await) {
        (Ok(true), Ok(users)) => json!({
            "status": "healthy",
            "message": "Integrity check passed",
            "users": users.len()
        }),
        (Ok(false), _) => json!({
            "status": "unhealthy",
            "message": "Integrity check failed"
        }),
        (Err(e), _) | (_, Err(e)) => json!({
            "status": "unhealthy",
            "message": format!("Database query failed: {}", e)
        }),
    };
    if let Err(e) = db.close().await {
        tracing::warn!("Failed to close user database: {}", e);
    }
    status
}

fn check_policy_health(paths: &EnvPaths) -> serde_json::Value {
    let path = paths.route_policy_path();
    let (policy, source) = if path.exists() {
        match RoutePolicy::load(&path) {
            Ok(policy) => (policy, path.display().to_string()),
            Err(e) => {
                return json!({
                    "status": "unhealthy",
                    "message": format!("Invalid route policy: {}", e)
                })
            }
        }
    } else {
        match RoutePolicy::portal_default() {
            Ok(policy) => (policy, "built-in".to_string()),
            Err(e) => {
                return json!({
                    "status": "unhealthy",
                    "message": format!("Built-in route policy invalid: {}", e)
                })
            }
        }
    };

    match policy.check_coverage(api::routed_paths()) {
        Ok(()) => json!({
            "status": "healthy",
            "message": format!("All routes covered ({})", source)
        }),
        Err(e) => json!({
            "status": "unhealthy",
            "message": e.to_string()
        }),
    }
}

fn check_audit_health(paths: &EnvPaths) -> serde_json::Value {
    let log_path = paths.audit_log_path();
    if !log_path.exists() {
        return json!({
            "status": "not_initialized",
            "message": format!("No audit log at {}", log_path.display())
        });
    }

    let config = AuditLogConfig {
        log_path,
        ..AuditLogConfig::default()
    };
    let verification = AuditLog::open(config).and_then(|log| log.verify_chain());
    match verification {
        Ok(ChainVerification::Intact { entries, segments }) => json!({
            "status": "healthy",
            "message": format!("Chain intact: {} entries in {} segment(s)", entries, segments)
        }),
        Ok(ChainVerification::Broken { file, line, reason }) => json!({
            "status": "unhealthy",
            "message": format!("Chain broken at {}:{}: {}", file.display(), line, reason)
        }),
        Err(e) => json!({
            "status": "unhealthy",
            "message": format!("Failed to read audit log: {}", e)
        }),
    }
}

/// Check API health
async fn check_api_health() -> serde_json::Value {
    let base_url = std::env::var("PORTAL_BASE_URL")
        .unwrap_or_else(|_| "http://localhost:3030".to_string());
    let api_url = format!("{}/api/v1/health", base_url.trim_end_matches('/'));

    let client = match reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(3))
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            return json!({
                "status": "unhealthy",
                "message": format!("Failed to build HTTP client: {}", e)
            })
        }
    };

    match client.get(&api_url).send().await {
        Ok(response) if response.status().is_success() => json!({
            "status": "healthy",
            "message": "API server is running and responsive",
            "endpoint": base_url
        }),
        Ok(response) => json!({
            "status": "unhealthy",
            "message": format!("API server returned status: {}", response.status()),
            "endpoint": base_url
        }),
        Err(_) => json!({
            "status": "offline",
            "message": "API server is not running or not reachable",
            "endpoint": base_url
        }),
    }
}

/// Print health status in a formatted text output
fn print_health_status_text(status: &serde_json::Value) {
    println!("{}", "=== Portal Health Check ===".bold());
    println!();

    let status_display = match status["status"].as_str().unwrap_or("unknown") {
        "healthy" => "HEALTHY".green().bold(),
        "degraded" => "DEGRADED".yellow().bold(),
        _ => "UNKNOWN".white().bold(),
    };
    println!("Overall Status: {}", status_display);
    println!("Timestamp: {}", status["timestamp"].as_str().unwrap_or(""));
    println!();

    println!("{}", "Components:".bold());
    println!("{}", "─".repeat(50));

    if let Some(components) = status["components"].as_object() {
        for (name, component) in components {
            let comp_status = component["status"].as_str().unwrap_or("unknown");
            let status_icon = match comp_status {
                "healthy" => "✓".green(),
                "unhealthy" => "✗".red(),
                "offline" | "not_initialized" => "○".white(),
                _ => "?".white(),
            };
            let status_text = match comp_status {
                "healthy" => comp_status.green(),
                "unhealthy" => comp_status.red(),
                _ => comp_status.white(),
            };

            println!(
                "{} {} ({})",
                status_icon,
                name.to_uppercase().bold(),
                status_text
            );
            if let Some(message) = component["message"].as_str() {
                println!("  {}", message);
            }
            println!();
        }
    }
}
