//! rollcall: send a check-in prompt to everyone on the roster over IRC,
//! acknowledge replies, and report to the recipient once all have answered.
//!
//! Exit status: 0 once the report is delivered, 130 when interrupted,
//! 1 on any other failure.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use rollcall_sdk::client::{self, ConnectConfig};
use rollcall_sdk::event::Event;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use rollcall_bot::config::{self, Args};
use rollcall_bot::coordinator::{Coordinator, Outcome};
use rollcall_bot::session::Session;
use rollcall_bot::transport::{self, IrcTransport};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let _ = dotenvy::dotenv();
    init_logging()?;

    let args = Args::parse();
    let network = args.network();
    let roster = config::load_roster(&args.roster, &network)?;
    let recipient = args.recipient_address()?;

    tracing::info!(
        server = %args.server,
        nick = %args.nick,
        participants = roster.len(),
        recipient = %recipient,
        "Starting roll call"
    );

    let connect = args.connect_config();
    let conn = client::establish_connection(&connect).await?;
    let (handle, mut sdk_events) = client::connect_with_stream(conn, connect.clone());

    wait_for_registration(&mut sdk_events, &connect, &args).await?;

    let (inbound_tx, mut inbound_rx) = mpsc::channel(256);
    let pump = tokio::spawn(transport::forward_events(sdk_events, inbound_tx));

    let transport = IrcTransport::new(handle);
    transport.join_recipient(&recipient).await?;

    let mut coordinator = Coordinator::new(Session::new(roster, recipient), transport);
    if let Err(e) = coordinator.start().await {
        coordinator.shutdown().await;
        return Err(e.into());
    }

    let outcome = coordinator.run(&mut inbound_rx, shutdown_signal()).await;
    coordinator.shutdown().await;
    // The pump ends once the connection task has written QUIT and dropped
    // its event sender; wait for that, bounded.
    drop(inbound_rx);
    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), pump).await;

    match outcome? {
        Outcome::Completed => {
            tracing::info!("Roll call complete");
            Ok(ExitCode::SUCCESS)
        }
        Outcome::Interrupted => Ok(ExitCode::from(130)),
        Outcome::StreamClosed => anyhow::bail!("connection closed before everyone answered"),
    }
}

fn init_logging() -> Result<()> {
    // JSON logs with ROLLCALL_LOG_JSON=1, human-readable otherwise
    let json_logs = std::env::var("ROLLCALL_LOG_JSON").unwrap_or_default() == "1";
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("rollcall_bot=info,rollcall=info,rollcall_sdk=info"))?;
    if json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

/// Wait for the server to accept our registration. Prompts sent before this
/// would only sit in the client's queue.
async fn wait_for_registration(
    events: &mut mpsc::Receiver<Event>,
    connect: &ConnectConfig,
    args: &Args,
) -> Result<()> {
    let registered = async {
        while let Some(event) = events.recv().await {
            match event {
                Event::Registered { nick } => {
                    tracing::info!(nick = %nick, "Registered");
                    return Ok(());
                }
                Event::Disconnected { reason } => {
                    anyhow::bail!("disconnected during registration: {reason}");
                }
                Event::ServerNotice { text } => tracing::info!(text = %text, "Server notice"),
                _ => {}
            }
        }
        anyhow::bail!("connection closed during registration")
    };
    let limit = args.register_timeout();
    tokio::time::timeout(limit, registered)
        .await
        .with_context(|| format!("no registration from {} within {limit:?}", connect.server_addr))?
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
