use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use secrecy::SecretString;

use thetapilot_core::{AppConfig, ConfigLoader};
use thetapilot_engine::Engine;
use thetapilot_tastytrade::{
    build_close_order, submit_order, SessionConfig, SessionManager, TastyClient, TastyClientConfig,
};

#[derive(Parser)]
#[command(name = "thetapilot")]
#[command(about = "Autonomous options trading engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the trading engine
    Run {
        /// Config file path
        #[arg(short, long, default_value = "config/Config.toml")]
        config: String,
    },
    /// Validate configuration and broker connectivity, then exit
    Check {
        /// Config file path
        #[arg(short, long, default_value = "config/Config.toml")]
        config: String,
    },
    /// Link the brokerage account with an OAuth authorization code
    Link {
        /// Config file path
        #[arg(short, long, default_value = "config/Config.toml")]
        config: String,
        /// Authorization code from the OAuth redirect
        #[arg(long)]
        code: String,
        /// Redirect URI registered with the broker
        #[arg(long)]
        redirect_uri: String,
    },
    /// Close an open structure at market (certainty over price)
    Close {
        /// Config file path
        #[arg(short, long, default_value = "config/Config.toml")]
        config: String,
        /// Underlying symbol of the structure to close
        #[arg(long)]
        underlying: String,
        /// Restrict to a specific expiry (YYYY-MM-DD)
        #[arg(long)]
        expiry: Option<NaiveDate>,
    },
}

fn build_client(config: &AppConfig) -> Result<TastyClient> {
    let session = SessionManager::new(
        SessionConfig::new(
            config.broker.base_url.clone(),
            config.broker.client_id.clone(),
            SecretString::from(config.broker.client_secret.clone()),
            config.broker.account_number.clone(),
        ),
        config.broker.refresh_token.clone(),
    )
    .context("building broker session")?;

    TastyClient::new(
        TastyClientConfig::default().with_base_url(config.broker.base_url.clone()),
        Arc::new(session),
    )
    .context("building broker client")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => {
            let config = ConfigLoader::load_from(&config)?;
            Engine::new(config)?.run().await
        }
        Commands::Check { config } => {
            let config = ConfigLoader::load_from(&config)?;
            tracing::info!(
                account = %config.broker.account_number,
                risk_level = %config.engine.risk_level,
                ws_url = %config.transport.ws_url,
                "Configuration loaded"
            );
            // Building the engine validates credentials and the journal.
            Engine::new(config)?;
            tracing::info!("Engine construction succeeded");
            Ok(())
        }
        Commands::Link {
            config,
            code,
            redirect_uri,
        } => {
            let config = ConfigLoader::load_from(&config)?;
            let client = build_client(&config)?;
            client
                .session()
                .link_with_authorization_code(&code, &redirect_uri)
                .await?;
            println!(
                "Account linked. Store this refresh token in your configuration:\n{}",
                client.session().refresh_token()
            );
            Ok(())
        }
        Commands::Close {
            config,
            underlying,
            expiry,
        } => {
            let config = ConfigLoader::load_from(&config)?;
            let client = build_client(&config)?;
            let account = config.broker.account_number.clone();

            let legs = client.get_positions(&account).await?;
            let structures = thetapilot_portfolio::reconstruct(&legs);
            let target = structures.iter().find(|s| {
                s.underlying.eq_ignore_ascii_case(&underlying)
                    && expiry.map_or(true, |e| s.expiry == e)
            });

            let Some(structure) = target else {
                bail!("no open structure found for {underlying}");
            };

            tracing::info!(
                kind = ?structure.kind,
                expiry = %structure.expiry,
                pnl = %structure.unrealized_pnl,
                "Closing structure at market"
            );
            let order = build_close_order(structure)?;
            let receipt = submit_order(&client, &account, &order).await?;
            println!("Close order {} routed ({})", receipt.id, receipt.status);
            Ok(())
        }
    }
}
