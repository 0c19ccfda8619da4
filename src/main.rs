mod cli;

use clap::Parser;
use tokio::runtime::Handle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Commands, ConfigChanges, ConfigCommands};

use gtags_engine::command::CommandKind;
use gtags_engine::config::EngineConfig;
use gtags_engine::engine::Engine;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gtags_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let format = cli.format;

    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default().with_env_overrides(),
    };
    let (engine, mut pump) = Engine::start(&config, Handle::current())?;

    match cli.command {
        Commands::Create { path, libraries } => {
            cli::create_database(&engine, &mut pump, &path, libraries, format).await?;
        }
        Commands::Update { file } => {
            cli::update_file(&engine, &mut pump, &file, format).await?;
        }
        Commands::Delete { path } => {
            cli::delete_database(&engine, &path, format)?;
        }
        Commands::Def { tag, path, query } => {
            cli::query(&engine, &mut pump, CommandKind::FindDefinition, &path, &tag, query.into(), format).await?;
        }
        Commands::Ref { tag, path, query } => {
            cli::query(&engine, &mut pump, CommandKind::FindReference, &path, &tag, query.into(), format).await?;
        }
        Commands::Symbol { tag, path, query } => {
            cli::query(&engine, &mut pump, CommandKind::FindSymbol, &path, &tag, query.into(), format).await?;
        }
        Commands::File { pattern, path, query } => {
            cli::query(&engine, &mut pump, CommandKind::FindFile, &path, &pattern, query.into(), format).await?;
        }
        Commands::Grep { pattern, path, query } => {
            cli::query(&engine, &mut pump, CommandKind::Grep, &path, &pattern, query.into(), format).await?;
        }
        Commands::Complete {
            prefix,
            path,
            files,
            query,
        } => {
            cli::complete(&engine, &mut pump, &path, &prefix, files, query.into(), format).await?;
        }
        Commands::Version => {
            cli::show_version(&engine, &mut pump, format).await?;
        }
        Commands::Watch { path } => {
            cli::watch(&engine, &mut pump, &path).await?;
        }
        Commands::Config { command } => match command {
            ConfigCommands::Show { path } => {
                cli::show_config(&engine, &path, format)?;
            }
            ConfigCommands::Set {
                path,
                parser,
                auto_update,
                use_library_dbs,
                libraries_from,
            } => {
                let changes = ConfigChanges {
                    parser,
                    auto_update,
                    use_library_dbs,
                    libraries_from,
                };
                cli::set_config(&engine, &path, changes)?;
            }
        },
    }

    Ok(())
}
