use awsync_core::{PostgresConfig, RemoteConfig, RemoteShell, RunConfig, TriggerConfig};
use awsync_integrations::{PostgresSink, RusshConnector};
use awsync_server::backends::Backends;
use awsync_server::cli::{Cli, Commands, with_preset};
use awsync_server::server::{self, AppState};
use clap::Parser;
use std::net::SocketAddr;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let dotenv = dotenvy::dotenv();
    awsync_core::o11y::init_global_from_env()?;
    if let Err(e) = dotenv {
        if !e.not_found() {
            tracing::warn!(error = %e, "failed to load .env");
        }
    }

    let cli = Cli::parse();
    let cmd = cli.command.unwrap_or_else(Commands::default_serve);

    match cmd {
        Commands::Serve { host, port } => {
            let addr: SocketAddr = format!("{host}:{port}").parse()?;
            let trigger = TriggerConfig::from_env()?;
            let backends = Backends::connect(
                RemoteConfig::from_env()?,
                &PostgresConfig::from_env()?,
                RunConfig::from_env()?,
            )
            .await?;

            let state = AppState::new(backends.pipeline.clone(), trigger);
            let res = server::serve(addr, state).await;
            backends.shutdown().await;
            res?;
        }
        Commands::Run {
            mode,
            preset_ms,
            key_path,
        } => {
            let mut remote = RemoteConfig::from_env()?;
            if let Some(path) = key_path {
                remote = remote.with_key_path(path);
            }
            let backends =
                Backends::connect(remote, &PostgresConfig::from_env()?, RunConfig::from_env()?)
                    .await?;

            let mode = with_preset(mode, preset_ms);
            let res = backends.pipeline.run(mode).await;
            backends.shutdown().await;
            match res {
                Ok(summary) => {
                    tracing::info!(
                        mode = %summary.mode,
                        buckets = summary.buckets,
                        events = summary.events,
                        "run completed"
                    );
                    println!("{}", serde_json::to_string_pretty(&summary)?);
                }
                Err(e) => {
                    tracing::error!(error = %e, "run failed");
                    return Err(e.into());
                }
            }
        }
        Commands::Config => {
            match RemoteConfig::from_env() {
                Ok(cfg) => println!("{cfg:#?}"),
                Err(e) => println!("remote: {e}"),
            }
            match PostgresConfig::from_env() {
                Ok(cfg) => println!("{cfg:#?}"),
                Err(e) => println!("postgres: {e}"),
            }
            match TriggerConfig::from_env() {
                Ok(cfg) => println!("{cfg:#?}"),
                Err(e) => println!("trigger: {e}"),
            }
            match RunConfig::from_env() {
                Ok(cfg) => println!("{cfg:#?}"),
                Err(e) => println!("run: {e}"),
            }
        }
        Commands::Check => {
            let sink = PostgresSink::connect(&PostgresConfig::from_env()?).await?;
            sink.ping().await?;
            sink.close().await;
            tracing::info!("postgres ok");

            let connector = RusshConnector::new(RemoteConfig::from_env()?)?;
            let mut shell = connector.shell();
            shell.open().await?;
            shell.close().await;
            tracing::info!(remote = %connector.config().target(), "ssh ok");
        }
    }

    Ok(())
}
