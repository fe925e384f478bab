use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::*;
use std::path::PathBuf;

mod commands;
mod logging;
mod utils;

/// portalctl - Command line interface for the training portal
#[derive(Parser)]
#[command(name = "portalctl")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the portal server
    Serve {
        /// Port to listen on, overrides PORTAL_PORT
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Check system health and status
    Health {
        /// Output format (json, text)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Route policy commands
    Policy {
        #[command(subcommand)]
        action: PolicyAction,
    },

    /// Audit log commands
    Audit {
        #[command(subcommand)]
        action: AuditAction,
    },

    /// Account management
    User {
        #[command(subcommand)]
        action: UserAction,
    },
}

#[derive(Subcommand)]
enum PolicyAction {
    /// Verify the policy covers every route the server mounts
    Check {
        /// Policy file, defaults to CONFIGURATION_PATH/route-policy.yaml
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Print the policy table
    List {
        #[arg(long)]
        file: Option<PathBuf>,

        /// Output format (json, yaml, text)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Write the built-in policy table to a file
    Init {
        /// Destination, defaults to CONFIGURATION_PATH/route-policy.yaml
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum AuditAction {
    /// Verify the audit hash chain
    Verify,

    /// Show the newest audit entries
    Tail {
        /// Number of entries
        #[arg(short = 'n', long, default_value_t = 20)]
        count: usize,

        /// Output format (json, text)
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

#[derive(Subcommand)]
enum UserAction {
    /// Create an account
    Add {
        #[arg(long)]
        email: String,

        /// TRAINEE, EMPLOYER, MENTOR or ADMIN
        #[arg(long)]
        role: String,

        #[arg(long)]
        name: Option<String>,

        /// Required for ADMIN accounts
        #[arg(long, env = "PORTAL_ADMIN_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// List accounts
    List {
        /// Output format (json, text)
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Serve { port } => commands::serve::execute(port).await,
        Commands::Health { format } => commands::health::execute(format).await,
        Commands::Policy { action } => match action {
            PolicyAction::Check { file } => commands::policy::check(file).await,
            PolicyAction::List { file, format } => commands::policy::list(file, format).await,
            PolicyAction::Init { file } => {
                let path = match file {
                    Some(path) => path,
                    None => utils::env_paths::EnvPaths::load()?.route_policy_path(),
                };
                commands::policy::init(&path).await
            }
        },
        Commands::Audit { action } => match action {
            AuditAction::Verify => commands::audit::verify().await,
            AuditAction::Tail { count, format } => commands::audit::tail(count, format).await,
        },
        Commands::User { action } => match action {
            UserAction::Add {
                email,
                role,
                name,
                password,
            } => commands::user::add(email, role, name, password).await,
            UserAction::List { format } => commands::user::list(format).await,
        },
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // `serve` installs its own file + console subscriber.
    if !matches!(cli.command, Commands::Serve { .. }) {
        logging::init_console_logging(cli.verbose);
    }

    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}
