mod error_presentation;

use clap::{Args, Parser, Subcommand};
use quarry_core::ConnectionConfig;

use error_presentation::{CliError, CliResult, render_runtime_error};

#[derive(Debug, Parser)]
#[command(name = "quarry", about = "Connection harness for the quarry query pipeline")]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct ConnectionArgs {
    /// Full connection string; individual flags override its keys.
    #[arg(long)]
    connection_string: Option<String>,

    #[arg(long)]
    hostname: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    #[arg(long)]
    database: Option<String>,

    #[arg(long)]
    username: Option<String>,

    #[arg(long)]
    password: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Connects to the server and runs a liveness probe.
    Check,
    /// Parses the connection input and re-emits the canonical string.
    Config,
}

impl ConnectionArgs {
    fn resolve(&self) -> CliResult<ConnectionConfig> {
        if self.connection_string.is_none() && self.hostname.is_none() {
            return Err(CliError::MissingConnectionInput);
        }

        let mut builder = match &self.connection_string {
            Some(raw) => {
                let parsed = ConnectionConfig::parse(raw).map_err(quarry_core::Error::from)?;
                let mut builder = ConnectionConfig::builder()
                    .hostname(parsed.hostname.clone())
                    .database(parsed.database.clone());
                if let Some(port) = parsed.port {
                    builder = builder.port(port);
                }
                if let Some(username) = &parsed.username {
                    builder = builder.username(username.clone());
                }
                if let Some(password) = &parsed.password {
                    builder = builder.password(password.clone());
                }
                if let Some(timeout) = parsed.connection_timeout {
                    builder = builder.connection_timeout(timeout);
                }
                if let (Some(min), Some(max)) = (parsed.min_pool_size, parsed.max_pool_size) {
                    builder = builder.pool_bounds(min, max);
                }
                if let Some(idle) = parsed.idle_timeout {
                    builder = builder.idle_timeout(idle);
                }
                builder = builder
                    .pooling(parsed.pooling)
                    .encrypt(parsed.encrypt)
                    .trust_server_certificate(parsed.trust_server_certificate)
                    .integrated_security(parsed.integrated_security);
                for (key, value) in &parsed.extra {
                    builder = builder.extra(key.clone(), value.clone());
                }
                builder
            }
            None => ConnectionConfig::builder(),
        };

        if let Some(hostname) = &self.hostname {
            builder = builder.hostname(hostname.clone());
        }
        if let Some(port) = self.port {
            builder = builder.port(port);
        }
        if let Some(database) = &self.database {
            builder = builder.database(database.clone());
        }
        if let Some(username) = &self.username {
            builder = builder.username(username.clone());
        }
        if let Some(password) = &self.password {
            builder = builder.password(password.clone());
        }

        Ok(builder.build().map_err(quarry_core::Error::from)?)
    }
}

#[cfg(feature = "mssql")]
async fn check(config: ConnectionConfig) -> CliResult<()> {
    use std::sync::Arc;

    use quarry_core::{Pool, PoolConfig};
    use quarry_dialect_mssql::{MssqlConnectionFactory, MssqlDialect};
    use tokio_util::sync::CancellationToken;

    let pool = Pool::new(
        Arc::new(MssqlDialect),
        Box::new(MssqlConnectionFactory::new(config.clone())),
        PoolConfig::from_connection_config(&config),
    );
    let cancel = CancellationToken::new();
    let mut conn = pool.acquire(&cancel).await?;
    conn.ping().await?;
    pool.dispose();

    println!("connection to {} OK", config);
    Ok(())
}

#[cfg(not(feature = "mssql"))]
async fn check(_config: ConnectionConfig) -> CliResult<()> {
    Err(CliError::NoDialectsEnabled)
}

async fn run(cli: Cli) -> CliResult<()> {
    let config = cli.connection.resolve()?;

    match cli.command {
        Command::Check => check(config).await,
        Command::Config => {
            println!("{}", config.to_connection_string());
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    if let Err(error) = run(cli).await {
        let exit_code = match &error {
            CliError::MissingConnectionInput => 2,
            _ => 1,
        };
        eprintln!("{}", render_runtime_error(error));
        std::process::exit(exit_code);
    }
}
