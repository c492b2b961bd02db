//! Command-line surface: start the sync server, or administer families and
//! access tokens offline by talking to the record store directly, the way
//! the teacher's own CLI lets an operator act without a running server.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use babylog_core::FamilyId;
use clap::{Args, Parser, Subcommand};

/// Command-line options for the sync server and its operator tooling.
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Opts {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub cmd: OptsCmd,
}

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Directory holding the record store file. Defaults to the platform
    /// data directory.
    #[arg(env = "BABYLOG_DATA_DIR", long)]
    pub data_dir: Option<PathBuf>,
}

static PROJECT_DIRS: LazyLock<directories::ProjectDirs> = LazyLock::new(|| {
    directories::ProjectDirs::from("org", "Babylog", "babylog")
        .expect("unable to determine the platform project directory")
});

impl GlobalOpts {
    pub fn data_dir(&self) -> &Path {
        self.data_dir
            .as_deref()
            .unwrap_or_else(|| PROJECT_DIRS.data_local_dir())
    }
}

#[derive(Debug, Subcommand)]
pub enum OptsCmd {
    /// Run the sync server.
    Serve {
        #[arg(env = "BABYLOG_LISTEN", long, default_value = "127.0.0.1:8080")]
        listen: String,

        /// Operator bearer token for the `/admin` surface.
        #[arg(env = "BABYLOG_ADMIN_TOKEN", long)]
        admin_token: String,

        /// Value for `Access-Control-Allow-Origin`. Defaults to the listen
        /// address if unset.
        #[arg(env = "BABYLOG_CORS_ORIGIN", long)]
        cors_origin: Option<String>,

        /// Seconds a record store write waits for the writer slot before
        /// failing. Defaults to the store's own default if unset.
        #[arg(env = "BABYLOG_BUSY_TIMEOUT_SECS", long)]
        busy_timeout_secs: Option<u64>,
    },

    /// Manage families, offline.
    #[command(subcommand)]
    Family(FamilyCmd),

    /// Manage access tokens, offline.
    #[command(subcommand)]
    Token(TokenCmd),
}

#[derive(Debug, Subcommand)]
pub enum FamilyCmd {
    /// Create a new family.
    Create {
        name: String,
        #[arg(long, default_value = "")]
        notes: String,
    },
    /// List every family.
    List,
    /// Rename a family.
    Rename {
        family_id: FamilyId,
        name: String,
        #[arg(long, default_value = "")]
        notes: String,
    },
    /// Archive or unarchive a family.
    Archive {
        family_id: FamilyId,
        #[arg(long)]
        archived: bool,
    },
}

#[derive(Debug, Subcommand)]
pub enum TokenCmd {
    /// Issue a new access token for a family.
    Issue {
        family_id: FamilyId,
        #[arg(long)]
        label: Option<String>,
        /// Expiry as milliseconds since the Unix epoch.
        #[arg(long)]
        expires_at: Option<i64>,
    },
    /// List every token issued to a family.
    List { family_id: FamilyId },
    /// Revoke a token.
    Revoke { token: String },
}
