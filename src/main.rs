//! Beacon Configuration Client - Main Entry Point

use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use beacon_config::{
    BeaconSession,
    backend::{BluerLink, GattLink},
    config::{CliArgs, Settings},
    core::{
        events::EventStream,
        types::{BeaconAttributes, BeaconField, PasswordOutcome},
    },
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,beacon_config=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse CLI arguments
    let args = CliArgs::parse();
    info!(address = %args.address, "Starting beacon configuration client");

    let settings = Settings::try_from(args).inspect_err(|e| error!("Invalid configuration: {}", e))?;

    let link = BluerLink::new(settings.adapter.as_deref()).await?;
    let session = BeaconSession::new(link, settings.session.clone());
    let printer = tokio::spawn(print_events(session.subscribe(), settings.json_events));

    let result = tokio::select! {
        result = run(&session, &settings) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT (Ctrl+C), shutting down gracefully");
            Ok(())
        }
        _ = shutdown_signal() => {
            info!("Received SIGTERM, shutting down gracefully");
            Ok(())
        }
    };

    if let Err(e) = session.disconnect().await {
        error!("Disconnect failed: {}", e);
    }
    printer.abort();

    if let Err(e) = &result {
        error!("{}", e);
    }
    result
}

/// Connect, show the current configuration and apply requested edits
async fn run<L: GattLink>(
    session: &BeaconSession<L>,
    settings: &Settings,
) -> Result<(), Box<dyn std::error::Error>> {
    session.connect(settings.address).await?;

    let mut attributes = BeaconAttributes::default();
    for field in BeaconField::ALL {
        match session.read_field(field).await {
            Ok(value) => attributes.apply(value),
            Err(e) => warn!(%field, error = %e, "Could not read field"),
        }
    }
    print_attributes(&attributes, settings.json_events)?;

    if settings.changes.is_empty() {
        return Ok(());
    }

    let password = settings
        .password
        .as_deref()
        .ok_or("changing fields requires --password")?;
    if session.submit_password(password).await? == PasswordOutcome::Rejected {
        return Err("password rejected by device".into());
    }

    let written = session.apply(&settings.changes).await?;
    if written.is_empty() {
        info!("All requested values already set, nothing written");
    }
    for field in written {
        println!("updated {}", field);
    }
    Ok(())
}

fn print_attributes(
    attributes: &BeaconAttributes,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        println!("{}", serde_json::to_string(attributes)?);
        return Ok(());
    }

    for field in BeaconField::ALL {
        match attributes.get(field) {
            Some(value) => println!("{:>9}: {}", field, value),
            None => println!("{:>9}: <unknown>", field),
        }
    }
    Ok(())
}

async fn print_events(mut events: EventStream, json: bool) {
    while let Some(event) = events.recv().await {
        if !json {
            debug!(?event, "Session event");
            continue;
        }
        match serde_json::to_string(&event) {
            Ok(line) => println!("{}", line),
            Err(e) => warn!("Failed to serialize event: {}", e),
        }
    }
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!("Failed to register SIGTERM handler: {}", e);
            std::future::pending::<()>().await
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    // On non-Unix platforms, just wait forever
    std::future::pending::<()>().await
}
