mod cli;

use std::sync::Arc;

use anyhow::{Context, bail};
use aps_core::ApsClient;
use aps_mirror::config::MirrorConfig;
use aps_mirror::storage::{MirrorStore, TokenRecord};
use aps_mirror::sync::{
    Depth, MirrorSync, SyncOutcome, SyncReport, build_tree, orphans, render_tree,
};
use aps_mirror::token_provider::TokenProvider;
use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Commands, ContentsArgs, DeleteTarget, SyncCommands, TokenCommands};

const DEFAULT_LOG_FILTER: &str = "aps_mirror=info,aps_core=info";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = MirrorConfig::from_env()?;
    init_tracing(config.log_json);

    let store = Arc::new(
        config
            .open_store()
            .await
            .context("failed to open mirror database")?,
    );
    let tokens = Arc::new(
        TokenProvider::new(
            Arc::clone(&store),
            config.api_base_url.clone(),
            config.refresh_margin,
        )
        .with_scope(Some(config.oauth_scope.clone())),
    );
    let client = ApsClient::with_base_url(&config.api_base_url)
        .with_context(|| format!("invalid APS base url {}", config.api_base_url))?;
    let mirror = MirrorSync::new(client, Arc::clone(&store), tokens)
        .with_region(config.translation_region.clone());

    match cli.command {
        Commands::Sync { command } => run_sync(&mirror, command).await,
        Commands::Translate { content_id } => {
            let outcome = mirror
                .ensure_viewable(&content_id)
                .await
                .with_context(|| format!("failed to ensure viewable for {content_id}"))?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(())
        }
        Commands::Projects => {
            for project in store.list_projects().await? {
                println!("{}\t{}\t{}", project.id, project.name, project.hub_name);
            }
            Ok(())
        }
        Commands::Contents(args) => print_contents(&store, args).await,
        Commands::Delete { target } => {
            match target {
                DeleteTarget::HubsProjects => {
                    let (hubs, projects) = mirror.delete_hubs_and_projects().await?;
                    println!("deleted {hubs} hubs and {projects} projects");
                }
                DeleteTarget::Contents => {
                    let contents = mirror.delete_contents().await?;
                    println!("deleted {contents} contents");
                }
            }
            Ok(())
        }
        Commands::Token { command } => run_token(&mirror, command).await,
    }
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn run_sync(mirror: &MirrorSync, command: SyncCommands) -> anyhow::Result<()> {
    let report = match command {
        SyncCommands::Hubs => mirror
            .sync_hubs_and_projects()
            .await
            .context("failed to sync hubs and projects")?,
        SyncCommands::Contents {
            project_id,
            all_levels,
        } => {
            let depth = if all_levels {
                Depth::AllLevels
            } else {
                Depth::FirstLevel
            };
            mirror
                .sync_project_contents(&project_id, depth)
                .await
                .with_context(|| format!("failed to sync contents of {project_id}"))?
        }
        SyncCommands::Folder { folder_id } => mirror
            .sync_folder_children(&folder_id)
            .await
            .with_context(|| format!("failed to sync children of {folder_id}"))?,
        SyncCommands::Item { content_id } => {
            let record = mirror
                .sync_content_info(&content_id)
                .await
                .with_context(|| format!("failed to sync content info of {content_id}"))?;
            println!("{}", serde_json::to_string_pretty(&record)?);
            return Ok(());
        }
    };
    finish_report(&report)
}

fn finish_report(report: &SyncReport) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    if report.outcome() == SyncOutcome::Failed {
        bail!("sync failed: {} failures, nothing written", report.failures.len());
    }
    Ok(())
}

async fn print_contents(store: &MirrorStore, args: ContentsArgs) -> anyhow::Result<()> {
    let contents = store.list_contents_by_project(&args.project_id).await?;
    if args.check {
        let stray = orphans(&args.project_id, &contents);
        for row in &stray {
            println!("orphan\t{}\t{}\tparent={}", row.id, row.name, row.parent_id);
        }
        if !stray.is_empty() {
            bail!("{} rows reference a missing parent", stray.len());
        }
        println!("ok: {} rows, no orphans", contents.len());
        return Ok(());
    }
    print!("{}", render_tree(&build_tree(contents)));
    Ok(())
}

async fn run_token(mirror: &MirrorSync, command: TokenCommands) -> anyhow::Result<()> {
    let store = mirror.store();
    match command {
        TokenCommands::List => {
            for token in store.list_tokens().await? {
                println!("{}", describe_token(&token));
            }
        }
        TokenCommands::Set {
            kind,
            value,
            expires_in,
        } => {
            store.upsert_token(kind, &value, expires_in).await?;
            println!("{kind} stored");
        }
        TokenCommands::Delete { kind } => {
            if store.delete_token(kind).await? {
                println!("{kind} deleted");
            } else {
                println!("{kind} was not stored");
            }
        }
        TokenCommands::Refresh => {
            mirror
                .tokens()
                .refresh_now()
                .await
                .context("failed to refresh access token")?;
            println!("access token refreshed");
        }
        TokenCommands::Show => {
            println!("{}", mirror.get_access_token().await?);
        }
        TokenCommands::Exchange { code, redirect_uri } => {
            mirror
                .tokens()
                .exchange_code(&code, &redirect_uri)
                .await
                .context("failed to exchange authorization code")?;
            println!("access and refresh tokens stored");
        }
        TokenCommands::LoginUrl {
            redirect_uri,
            scope,
        } => {
            let url = mirror
                .tokens()
                .authorize_url(&redirect_uri, scope.as_deref())
                .await?;
            println!("{url}");
        }
    }
    Ok(())
}

fn describe_token(token: &TokenRecord) -> String {
    let expires = token
        .expires_in
        .map(|secs| format!("expires_in={secs}"))
        .unwrap_or_else(|| "expires_in=-".to_string());
    format!(
        "{}\t{}\t{expires}\tupdated_at={}",
        token.kind,
        mask(&token.value),
        token.updated_at
    )
}

fn mask(value: &str) -> String {
    let visible: String = value.chars().take(4).collect();
    if value.chars().count() <= 8 {
        "****".to_string()
    } else {
        format!("{visible}****")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_hides_short_values_entirely() {
        assert_eq!(mask("abc"), "****");
        assert_eq!(mask("eyJhbGciOiJSUzI1NiJ9"), "eyJh****");
    }

    #[test]
    fn report_with_nothing_written_is_an_error() {
        let mut report = SyncReport::default();
        assert!(finish_report(&report).is_ok());
        report.record_failure("hub b.1", "denied");
        assert!(finish_report(&report).is_err());
    }
}
