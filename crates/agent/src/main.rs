use clap::Parser;
use tracing_subscriber::EnvFilter;

use ba_agent::cli::{self, Cli, Command, ConfigCommand, SecretCommand};
use ba_domain::config::LoggingConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let (config, path) = cli::load_config()?;
    init_tracing(&config.logging);

    match cli.command {
        Command::Ask { task, max_steps } => {
            let finished = cli::ask::run(config, task, max_steps).await?;
            if !finished {
                std::process::exit(2);
            }
            Ok(())
        }
        Command::Providers => {
            cli::providers::list(&config);
            Ok(())
        }
        Command::Config(ConfigCommand::Validate) => {
            let valid = cli::config::validate(&config, &cli::describe_path(path.as_deref()));
            if !valid {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Config(ConfigCommand::Show) => cli::config::show(&config),
        Command::Secret(cmd) => {
            let store = cli::keychain(&config);
            match cmd {
                SecretCommand::Set { name } => cli::secret::set(&store, &name).await,
                SecretCommand::Get { name } => cli::secret::get(&store, &name).await,
                SecretCommand::Remove { name } => cli::secret::remove(&store, &name).await,
            }
        }
    }
}

/// Compact (or JSON) logs on stderr. `RUST_LOG` overrides `[logging].filter`.
fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.filter))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}
