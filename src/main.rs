use anyhow::{bail, Context};
use clap::Parser;
use log::warn;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use pulsar_client::client::console::{Console, Flow};
use pulsar_client::client::{ClientConfig, LoginResult, Session};
use pulsar_client::common::crypto::CredentialHasher;
use pulsar_client::common::protocol::{DEFAULT_CHANNEL, USER_SIGIL};
use pulsar_client::utils::PulsarLogger;

#[derive(Parser, Debug)]
#[command(name = "pulsar-client", version, about = "Console client for Pulsar chat servers")]
struct Args {
    /// Username, with or without the leading '@'
    username: String,
    password: String,
    /// Where typed messages go until changed with !dest
    #[arg(default_value = DEFAULT_CHANNEL)]
    destination: String,
    /// Overrides PULSAR_HOST
    #[arg(long)]
    host: Option<String>,
    /// Overrides PULSAR_PORT
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = ClientConfig::from_env();
    PulsarLogger::init(&config.log_level)?;

    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    config.log_summary();

    let username = if args.username.starts_with(USER_SIGIL) {
        args.username.clone()
    } else {
        format!("{}{}", USER_SIGIL, args.username)
    };

    let hasher: Arc<dyn CredentialHasher> = Arc::new(config.hasher());
    let mut session = Session::connect(&config, &username, hasher)
        .await
        .with_context(|| format!("cannot reach {}", config.address()))?;

    match session.login(&args.password).await? {
        LoginResult::Success => println!("Logged in as {}", username),
        LoginResult::FailUsername => {
            println!("No account named {}, registering...", username);
            let registered = session.register(&args.password).await?;
            if registered != LoginResult::Success {
                session.disconnect().await;
                bail!("registration failed: {:?}", registered);
            }
        }
        other => {
            session.disconnect().await;
            bail!("login failed: {:?}", other);
        }
    }

    if let Err(e) = session.hydrate_cache().await {
        warn!("Could not load user record: {}", e);
    }
    match session.sync_unread().await {
        Ok(0) => {}
        Ok(n) => println!("You have {} unread messages, type !unread to list them.", n),
        Err(e) => warn!("Could not fetch unread messages: {}", e),
    }

    let mut console = Console::new(session, &args.destination);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("Writing to {}. Type !help for commands.", console.dest());

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = line?.unwrap_or_else(|| "!exit".to_string());
                if console.run(&line).await? == Flow::Exit {
                    break;
                }
            }
            incoming = console.session_mut().next_message() => match incoming {
                Some(msg) => println!("{}", msg),
                None => {
                    println!("Connection closed by the server.");
                    break;
                }
            },
        }
    }

    Ok(())
}
