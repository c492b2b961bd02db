mod cli;

use std::io;

use babylog_server::{Opts as ServerOpts, Server, ServerError};
use babylog_store::{Database, StoreError};
use cli::{FamilyCmd, Opts, OptsCmd, TokenCmd};
use clap::Parser;
use snafu::{FromString, ResultExt, Snafu, Whatever};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

pub const LOG_TARGET: &str = "babylog::cli";

type WhateverResult<T> = std::result::Result<T, Whatever>;

#[derive(Debug, Snafu)]
pub enum CliError {
    #[snafu(transparent)]
    Server { source: ServerError },
    #[snafu(transparent)]
    Store { source: StoreError },
    #[snafu(display("{source}"))]
    Whatever { source: Whatever },
    #[snafu(display("{message}"))]
    InvalidToken { message: String },
}

pub type CliResult<T> = std::result::Result<T, CliError>;

#[snafu::report]
#[tokio::main]
async fn main() -> CliResult<()> {
    init_logging().context(WhateverSnafu)?;

    let opts = Opts::parse();
    let output = handle_cmd(opts).await?;
    if !output.is_null() {
        println!("{}", serde_json::to_string_pretty(&output).expect("value always serializes"));
    }
    Ok(())
}

async fn handle_cmd(opts: Opts) -> CliResult<serde_json::Value> {
    Ok(match opts.cmd {
        OptsCmd::Serve {
            listen,
            admin_token,
            cors_origin,
            busy_timeout_secs,
        } => {
            let server = Server::init(ServerOpts {
                listen,
                data_dir: opts.global.data_dir().to_path_buf(),
                cors_origin,
                admin_token,
                busy_timeout: busy_timeout_secs.map(std::time::Duration::from_secs),
            })
            .await?;
            server.run().await?;
            serde_json::Value::Null
        }

        OptsCmd::Family(cmd) => {
            let db = open_store(&opts.global).await?;
            match cmd {
                FamilyCmd::Create { name, notes } => {
                    let family = db.create_family(name, notes).await?;
                    serde_json::to_value(family).expect("value always serializes")
                }
                FamilyCmd::List => {
                    let families = db.list_families().await?;
                    serde_json::to_value(families).expect("value always serializes")
                }
                FamilyCmd::Rename {
                    family_id,
                    name,
                    notes,
                } => {
                    let family = db.rename_family(family_id, name, notes).await?;
                    serde_json::to_value(family).expect("value always serializes")
                }
                FamilyCmd::Archive { family_id, archived } => {
                    let family = db.set_family_archived(family_id, archived).await?;
                    serde_json::to_value(family).expect("value always serializes")
                }
            }
        }

        OptsCmd::Token(cmd) => {
            let db = open_store(&opts.global).await?;
            match cmd {
                TokenCmd::Issue {
                    family_id,
                    label,
                    expires_at,
                } => {
                    let token = db
                        .issue_token(family_id, label, expires_at.map(babylog_core::Timestamp))
                        .await?;
                    serde_json::to_value(token).expect("value always serializes")
                }
                TokenCmd::List { family_id } => {
                    let tokens = db.list_tokens(family_id).await?;
                    serde_json::to_value(tokens).expect("value always serializes")
                }
                TokenCmd::Revoke { token } => {
                    let token = token.parse::<babylog_core::AccessTokenValue>().map_err(|err| {
                        CliError::InvalidToken {
                            message: err.to_string(),
                        }
                    })?;
                    db.revoke_token(token).await?;
                    serde_json::json!({ "revoked": true })
                }
            }
        }
    })
}

async fn open_store(global: &cli::GlobalOpts) -> CliResult<Database> {
    let path = global.data_dir().join("babylog.redb");
    Ok(Database::open(path).await?)
}

pub fn init_logging() -> WhateverResult<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .try_init()
        .map_err(|_| Whatever::without_source("failed to initialize logging".to_string()))?;

    Ok(())
}
