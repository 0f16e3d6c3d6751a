//! Argument parsing

use clap::{Parser, Subcommand};

/// Operator CLI for the storefront back-office API
#[derive(Debug, Parser)]
#[command(name = "storefront-admin")]
#[command(about = "Sign in to the storefront API and send authenticated requests")]
pub struct Cli {
    /// Path to the TOML config (falls back to CONFIG_PATH, then storefront-admin.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// What the user asked for.
#[derive(Debug, PartialEq, Subcommand)]
pub enum Command {
    /// Sign in; the password is read from STOREFRONT_PASSWORD
    Login { email: String },

    /// Revoke and forget the stored session
    Logout,

    /// GET a resource, e.g. `get /admins`
    Get { path: String },

    /// DELETE a resource
    Delete { path: String },

    /// POST a JSON body
    Post {
        path: String,
        #[arg(value_parser = parse_json)]
        body: serde_json::Value,
    },

    /// PUT a JSON body
    Put {
        path: String,
        #[arg(value_parser = parse_json)]
        body: serde_json::Value,
    },

    /// PATCH a JSON body
    Patch {
        path: String,
        #[arg(value_parser = parse_json)]
        body: serde_json::Value,
    },
}

fn parse_json(raw: &str) -> Result<serde_json::Value, String> {
    serde_json::from_str(raw).map_err(|e| format!("request body is not valid JSON: {e}"))
}
