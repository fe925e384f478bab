use anyhow::{bail, Context, Result};
use authz::{AuthzError, RoutePolicy};
use colored::*;
use serde_json::json;
use std::path::{Path, PathBuf};

use crate::utils::env_paths::EnvPaths;

/// Policy file to use: `--file`, else the configured one, else the built-in table.
fn load(file: Option<PathBuf>) -> Result<(RoutePolicy, String)> {
    let path = match file {
        Some(path) => Some(path),
        None => {
            let configured = EnvPaths::load()?.route_policy_path();
            configured.exists().then_some(configured)
        }
    };

    match path {
        Some(path) => {
            let policy = RoutePolicy::load(&path)
                .with_context(|| format!("Failed to load route policy {}", path.display()))?;
            Ok((policy, path.display().to_string()))
        }
        None => Ok((RoutePolicy::portal_default()?, "built-in".to_string())),
    }
}

/// Prove the policy covers every route the server mounts.
pub async fn check(file: Option<PathBuf>) -> Result<()> {
    let (policy, source) = load(file)?;

    match policy.check_coverage(api::routed_paths()) {
        Ok(()) => {
            println!(
                "{} route policy ({}) covers all {} routes",
                "OK".green().bold(),
                source,
                api::routed_paths().len()
            );
            Ok(())
        }
        Err(AuthzError::PolicyGap(gaps)) => {
            println!(
                "{} route policy ({}) leaves {} route(s) unmatched:",
                "GAP".red().bold(),
                source,
                gaps.len()
            );
            for gap in &gaps {
                println!("  {}", gap);
            }
            bail!("route policy does not cover every route")
        }
        Err(e) => Err(e.into()),
    }
}

/// Print the table.
pub async fn list(file: Option<PathBuf>, format: String) -> Result<()> {
    let (policy, source) = load(file)?;

    match format.as_str() {
        "json" => {
            let doc = json!({
                "source": source,
                "public": policy.public_prefixes(),
                "protected": policy.protected_entries(),
            });
            println!("{}", serde_json::to_string_pretty(&doc)?);
        }
        "yaml" => {
            let doc = json!({
                "public": policy.public_prefixes(),
                "protected": policy.protected_entries(),
            });
            print!("{}", serde_yaml::to_string(&doc)?);
        }
        _ => print_text(&policy, &source),
    }
    Ok(())
}

fn print_text(policy: &RoutePolicy, source: &str) {
    println!("{}", "=== Route Policy ===".bold());
    println!("Source: {}", source);
    println!();

    println!("{}", "Public:".bold());
    for prefix in policy.public_prefixes() {
        println!("  {}", prefix);
    }
    println!();

    println!("{}", "Protected:".bold());
    let width = policy
        .protected_entries()
        .iter()
        .map(|entry| entry.prefix.len())
        .max()
        .unwrap_or(0);
    for entry in policy.protected_entries() {
        println!(
            "  {:width$}  {}",
            entry.prefix,
            entry.requires.to_string().cyan(),
            width = width
        );
    }
}

/// Write the built-in table to `path`, refusing to overwrite.
pub async fn init(path: &Path) -> Result<()> {
    if path.exists() {
        bail!("{} already exists", path.display());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, RoutePolicy::portal_default_yaml())
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("{} wrote {}", "OK".green().bold(), path.display());
    Ok(())
}
