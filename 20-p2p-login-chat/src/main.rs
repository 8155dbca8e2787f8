use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use p2p_login_chat::{
    cli::{ClientArgs, Cli, Command, ServerArgs},
    client::PeerClient,
    credentials::FileCredentials,
    relay::Relay,
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Server(args) => run_server(args).await?,
        Command::Client(args) => {
            let code = match run_client(args).await {
                Ok(()) => 0,
                Err(err) => {
                    error!("client exited with error: {err:?}");
                    1
                }
            };
            // A blocking stdin read may still be parked on its thread; exit
            // without waiting for the runtime to reap it.
            std::process::exit(code);
        }
    }

    Ok(())
}

async fn run_server(args: ServerArgs) -> Result<()> {
    let credentials = FileCredentials::open(&args.credentials)?;
    let listener = TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("failed to bind {}", args.listen))?;

    let relay = Relay::new(listener, credentials, args.relay_config());
    let addr = relay.local_addr()?;
    info!("relay listening on {}", addr);
    if let Err(err) = relay.run_until_ctrl_c().await {
        warn!("relay exited with error: {err:?}");
        return Err(err);
    }
    Ok(())
}

async fn run_client(args: ClientArgs) -> Result<()> {
    let client = PeerClient::connect(args.client_config()).await?;
    client.run(tokio::io::stdin(), tokio::io::stdout()).await
}
