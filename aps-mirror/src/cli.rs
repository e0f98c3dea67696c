use clap::{Args, Parser, Subcommand, ValueEnum};

use aps_mirror::storage::TokenKind;

/// Mirrors APS hubs, projects, folders and items into a local SQLite database
#[derive(Debug, Parser)]
#[command(name = "aps-mirror", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Pull remote state into the mirror
    Sync {
        #[command(subcommand)]
        command: SyncCommands,
    },

    /// Make sure an item has a viewable derivative, submitting a translation job if needed
    Translate { content_id: String },

    /// List mirrored projects
    Projects,

    /// Print the mirrored folder tree of a project
    Contents(ContentsArgs),

    /// Clear mirrored rows
    Delete {
        #[arg(value_enum)]
        target: DeleteTarget,
    },

    /// Manage stored OAuth credentials and tokens
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },
}

#[derive(Debug, Subcommand)]
pub enum SyncCommands {
    /// Upsert all hubs and their projects
    Hubs,
    /// Mirror a project's folders and items
    Contents {
        project_id: String,
        /// Walk every level instead of stopping below the top folders' children
        #[arg(long)]
        all_levels: bool,
    },
    /// Refresh the direct children of one mirrored folder
    Folder { folder_id: String },
    /// Refresh viewer info of one mirrored item
    Item { content_id: String },
}

#[derive(Debug, Args)]
pub struct ContentsArgs {
    pub project_id: String,
    /// Report rows whose parent is missing and fail if any exist
    #[arg(long)]
    pub check: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DeleteTarget {
    HubsProjects,
    Contents,
}

#[derive(Debug, Subcommand)]
pub enum TokenCommands {
    /// List stored token rows with their values masked
    List,
    /// Store a token row
    Set {
        #[arg(value_parser = parse_token_kind)]
        kind: TokenKind,
        value: String,
        /// Lifetime in seconds, counted from now
        #[arg(long)]
        expires_in: Option<i64>,
    },
    /// Delete a token row
    Delete {
        #[arg(value_parser = parse_token_kind)]
        kind: TokenKind,
    },
    /// Force an access token refresh
    Refresh,
    /// Print a valid access token, refreshing it first when close to expiry
    Show,
    /// Trade an authorization code for access and refresh tokens
    Exchange {
        code: String,
        #[arg(long)]
        redirect_uri: String,
    },
    /// Print the authorization URL for the stored client id
    LoginUrl {
        #[arg(long)]
        redirect_uri: String,
        #[arg(long)]
        scope: Option<String>,
    },
}

fn parse_token_kind(value: &str) -> Result<TokenKind, String> {
    TokenKind::parse(value).map_err(|err| {
        let known: Vec<&str> = TokenKind::ALL.iter().map(TokenKind::as_str).collect();
        format!("{err} (expected one of: {})", known.join(", "))
    })
}
