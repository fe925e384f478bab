use anyhow::{bail, Result};
use audit::{AuditLog, AuditLogConfig, ChainVerification};
use colored::*;

use crate::utils::env_paths::EnvPaths;

fn open() -> Result<AuditLog> {
    let paths = EnvPaths::load()?;
    let config = AuditLogConfig {
        log_path: paths.audit_log_path(),
        ..AuditLogConfig::default()
    };
    Ok(AuditLog::open(config)?)
}

/// Walk the hash chain across every segment.
pub async fn verify() -> Result<()> {
    let log = open()?;

    match log.verify_chain()? {
        ChainVerification::Intact { entries, segments } => {
            println!(
                "{} audit chain intact: {} entries in {} segment(s)",
                "OK".green().bold(),
                entries,
                segments
            );
            Ok(())
        }
        ChainVerification::Broken { file, line, reason } => {
            println!(
                "{} audit chain broken at {}:{}: {}",
                "BROKEN".red().bold(),
                file.display(),
                line,
                reason
            );
            bail!("audit chain verification failed")
        }
    }
}

/// Print the newest entries.
pub async fn tail(count: usize, format: String) -> Result<()> {
    let log = open()?;
    let entries = log.recent(count)?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No audit entries in {}", log.path().display());
        return Ok(());
    }
    for entry in entries {
        let target = match &entry.entity_id {
            Some(id) => format!("{}:{}", entry.entity, id),
            None => entry.entity.clone(),
        };
        println!(
            "{}  {:<20} {:<8} {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.action.bold(),
            entry.actor_role.to_string(),
            target
        );
    }
    Ok(())
}
