use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use stratum_common::Error;
use stratum_config::{AppConfig, ConfigLoader, ResolvedEnvironment};
use stratum_core::{
    BatchReport, CancellationFlag, ManagerConfig, MigrationLoader, MigrationManager,
    RollbackTarget,
};
use stratum_db::SqliteAdapter;
use tracing::{info, warn};

use crate::output;
use crate::{Cli, Commands};

const EXIT_FAILURE: u8 = 1;
const EXIT_CONFIG: u8 = 2;

/// Configuration problems exit with 2, everything else with 1.
pub fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<Error>() {
        Some(Error::Config(_)) => EXIT_CONFIG,
        _ => EXIT_FAILURE,
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    let (config, config_path) = ConfigLoader::load(cli.config.as_deref())?;
    let base_dir = if config_path.exists() {
        ConfigLoader::base_dir(&config_path)
    } else {
        PathBuf::from(".")
    };

    match cli.command {
        Commands::Create { name, format, dir } => {
            let dir = match dir {
                Some(dir) => dir,
                None => first_migration_dir(&config, &base_dir)?,
            };
            let path = MigrationLoader::create(&dir, &name, format)?;
            println!("created {}", path.display());
            Ok(())
        }
        Commands::Migrate { target } => {
            let env = config.environment(cli.env.as_deref(), &base_dir)?;
            let report = with_manager(env, move |m| m.migrate(target)).await?;
            finish_batch(report)
        }
        Commands::Rollback { target, steps } => {
            let env = config.environment(cli.env.as_deref(), &base_dir)?;
            let target = match (target, steps) {
                (Some(version), _) => RollbackTarget::Version(version),
                (None, Some(steps)) => RollbackTarget::Steps(steps),
                (None, None) => RollbackTarget::Steps(1),
            };
            let report = with_manager(env, move |m| m.rollback(target)).await?;
            finish_batch(report)
        }
        Commands::Redo => {
            let env = config.environment(cli.env.as_deref(), &base_dir)?;
            let report = with_manager(env, |m| m.redo()).await?;
            finish_batch(report)
        }
        Commands::Status { json } => {
            let env = config.environment(cli.env.as_deref(), &base_dir)?;
            let status = with_manager(env, |m| m.status()).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print!("{}", output::status_table(&status));
            }
            Ok(())
        }
        Commands::Breakpoint {
            target,
            set,
            unset,
            remove_all,
        } => {
            let env = config.environment(cli.env.as_deref(), &base_dir)?;
            if remove_all {
                let cleared = with_manager(env, |m| m.clear_breakpoints()).await?;
                println!("cleared {cleared} breakpoint(s)");
                return Ok(());
            }
            let version = target.ok_or_else(|| anyhow!("--target is required"))?;
            let enabled = with_manager(env, move |m| {
                if set || unset {
                    m.set_breakpoint(version, set).map(|()| set)
                } else {
                    m.toggle_breakpoint(version)
                }
            })
            .await?;
            println!(
                "breakpoint on {version} {}",
                if enabled { "set" } else { "cleared" }
            );
            Ok(())
        }
    }
}

fn first_migration_dir(config: &AppConfig, base_dir: &Path) -> Result<PathBuf> {
    let dir = config
        .migrations
        .paths
        .first()
        .ok_or_else(|| Error::Config("no migration paths configured".into()))?;
    Ok(if dir.is_absolute() {
        dir.clone()
    } else {
        base_dir.join(dir)
    })
}

fn finish_batch(report: BatchReport) -> Result<()> {
    print!("{}", output::batch_lines(&report));

    if let Some(blocked) = report.blocked() {
        return Err(Error::BreakpointBlocked(blocked.version).into());
    }
    let cancelled = report.cancelled;
    report.into_result()?;
    if cancelled {
        return Err(anyhow!("interrupted; remaining migrations were not run"));
    }
    Ok(())
}

/// Loads migrations, opens the database and runs `action` on a blocking
/// thread. Ctrl-C sets the cancellation flag; the batch stops before the
/// next migration.
async fn with_manager<T, F>(env: ResolvedEnvironment, action: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&mut MigrationManager<SqliteAdapter>) -> stratum_common::Result<T> + Send + 'static,
{
    let cancel = CancellationFlag::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received; stopping after the current migration");
                cancel.cancel();
            }
        })
    };

    info!(
        "environment {} ({})",
        env.name,
        env.database.display()
    );
    let task = tokio::task::spawn_blocking(move || {
        let migrations = MigrationLoader::new(env.migration_paths.clone()).load()?;
        let adapter = SqliteAdapter::open(&env.database, &env.ledger_table)?;
        let config = ManagerConfig {
            version_order: env.version_order,
            environment: Some(env.name.clone()),
        };
        let mut manager = MigrationManager::new(adapter, migrations, config).with_cancellation(cancel);
        action(&mut manager)
    });

    let result = task.await.context("migration task panicked");
    interrupt.abort();
    Ok(result??)
}
