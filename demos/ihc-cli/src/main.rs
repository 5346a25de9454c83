use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use ihc::prelude::*;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(author, version, about = "IntelliHome control client", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Transport, overrides the configuration file
    #[arg(short, long, value_enum)]
    mode: Option<Mode>,

    /// Server host, multicast group or broadcast address
    #[arg(long)]
    host: Option<String>,

    #[arg(short, long)]
    port: Option<u16>,

    #[arg(short, long)]
    user: Option<String>,

    /// MD5 hex digest of the password
    #[arg(long, conflicts_with = "password")]
    password_hash: Option<String>,

    /// Plain password, hashed before login
    #[arg(long)]
    password: Option<String>,

    /// Seconds to wait for the connection and for each result
    #[arg(short, long, default_value = "15")]
    wait: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Mode {
    Multicast,
    Broadcast,
    Udp,
    Tcp,
}

impl From<Mode> for TransportMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Multicast => Self::Multicast,
            Mode::Broadcast => Self::Broadcast,
            Mode::Udp => Self::Udp,
            Mode::Tcp => Self::Tcp,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List device types
    Types,
    /// List devices
    Devices {
        #[arg(long)]
        type_id: Option<u32>,
    },
    /// List users
    Users,
    /// Count history entries
    Count(FilterArgs),
    /// List history entries
    History {
        #[command(flatten)]
        filter: FilterArgs,
        #[arg(long, default_value = "50")]
        limit: u32,
        #[arg(long, default_value = "0")]
        offset: u32,
    },
    /// Send a command to a device
    Send {
        device: String,
        command: u32,
        parameter: Option<String>,
    },
    /// Create a user
    AddUser { username: String, password: String },
    /// Change a user's name and password
    EditUser {
        id: u32,
        username: String,
        password: String,
    },
    /// Delete a user
    DeleteUser { id: u32 },
    /// Print every notification until interrupted
    Watch,
}

#[derive(clap::Args, Debug)]
struct FilterArgs {
    /// Start of the range, seconds since the epoch
    #[arg(long)]
    from: Option<i64>,
    /// End of the range, seconds since the epoch
    #[arg(long)]
    to: Option<i64>,
    #[arg(long)]
    device: Option<String>,
}

impl From<FilterArgs> for HistoryFilter {
    fn from(args: FilterArgs) -> Self {
        Self {
            from: args.from,
            to: args.to,
            device_id: args.device,
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(args: &Args) -> Result<IhcConfig, IhcError> {
    let mut config = match &args.config {
        Some(path) => IhcConfig::from_file(path)?,
        None => IhcConfig::default(),
    };

    let connection = &mut config.connection;
    if let Some(mode) = args.mode {
        connection.mode = mode.into();
    }
    if let Some(host) = &args.host {
        connection.host = Some(host.clone());
    }
    if let Some(port) = args.port {
        connection.port = port;
    }
    if let Some(user) = &args.user {
        connection.username = user.clone();
    }
    if let Some(hash) = &args.password_hash {
        connection.password_hash = hash.clone();
        connection.password = None;
    }
    if let Some(password) = &args.password {
        connection.password = Some(password.clone());
    }
    Ok(config)
}

fn print_json(value: &impl Serialize) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(e) => tracing::error!(error = %e, "failed to serialize output"),
    }
}

/// Waits for the first notification `pick` accepts.
async fn wait_for<T>(
    rx: &mut broadcast::Receiver<Notification>,
    timeout: Duration,
    mut pick: impl FnMut(Notification) -> Option<T>,
) -> Option<T> {
    let wait = async {
        loop {
            match rx.recv().await {
                Ok(notification) => {
                    if let Some(found) = pick(notification) {
                        return Some(found);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "notifications dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    };
    tokio::time::timeout(timeout, wait).await.ok().flatten()
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let args = Args::parse();
    let config = load_config(&args)?;
    let wait = Duration::from_secs(args.wait);

    let client = IhcClient::new(config);
    let mut rx = client.subscribe();
    client.start().await?;

    let connected = wait_for(&mut rx, wait, |n| match n {
        Notification::ConnectivityChanged { connected: true, .. } => Some(()),
        _ => None,
    })
    .await;
    if connected.is_none() {
        client.stop().await;
        return Err(format!("not connected after {wait:?}").into());
    }
    tracing::info!(administrator = client.is_administrator().await, "connected");

    match args.command {
        Command::Types => {
            client.request_device_types().await?;
            let listed = wait_for(&mut rx, wait, |n| match n {
                Notification::DeviceTypesListed { error } => Some(error),
                _ => None,
            })
            .await;
            match listed {
                Some(None) => {
                    let types = client.registry().list();
                    let types: Vec<&DeviceType> = types.iter().map(AsRef::as_ref).collect();
                    print_json(&types);
                }
                Some(Some(error)) => eprintln!("listing failed: {error}"),
                None => eprintln!("no reply"),
            }
        }
        Command::Devices { type_id } => {
            client.request_devices(type_id).await?;
            let result = wait_for(&mut rx, wait, |n| match n {
                Notification::DeviceListUpdated { result } => Some(result),
                _ => None,
            })
            .await;
            match result {
                Some(Ok(devices)) => print_json(&devices),
                Some(Err(error)) => eprintln!("listing failed: {error}"),
                None => eprintln!("no reply"),
            }
        }
        Command::Users => {
            client.request_users().await?;
            let result = wait_for(&mut rx, wait, |n| match n {
                Notification::UsersListed { result } => Some(result),
                _ => None,
            })
            .await;
            match result {
                Some(Ok(users)) => print_json(&users),
                Some(Err(error)) => eprintln!("listing failed: {error}"),
                None => eprintln!("no reply"),
            }
        }
        Command::Count(filter) => match client.count_history(&filter.into()).await {
            Some(count) => println!("{count}"),
            None => eprintln!("no reply"),
        },
        Command::History {
            filter,
            limit,
            offset,
        } => match client.list_history(&filter.into(), limit, offset).await {
            Some(entries) => print_json(&entries),
            None => eprintln!("no reply"),
        },
        Command::Send {
            device,
            command,
            parameter,
        } => {
            // stop() sends it ahead of the logoff.
            client
                .send_command(&device, command, parameter.as_deref())
                .await?;
        }
        Command::AddUser { username, password } => {
            client
                .create_user(&username, &hash_password(&password))
                .await?;
        }
        Command::EditUser {
            id,
            username,
            password,
        } => {
            client
                .edit_user(id, &username, &hash_password(&password))
                .await?;
        }
        Command::DeleteUser { id } => client.delete_user(id).await?,
        Command::Watch => loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                notification = rx.recv() => match notification {
                    Ok(notification) => print_json(&notification),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "notifications dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        },
    }

    client.stop().await;
    Ok(())
}
