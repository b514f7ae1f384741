//! scannerd daemon entry point
//!
//! Logs the employee in (or reuses a stored session), then runs one scanner
//! session: discover the ESP32 over BLE, connect, relay the bearer token, and
//! keep the link alive until Ctrl-C or the link drops.

use clap::Parser;
use log::{error, info, warn};
use scannerd::api::{AuthClient, AuthError, LoginRequest};
use scannerd::config::{ScannerConfig, DEFAULT_SERVER_URL};
use scannerd::session::{ScannerSession, SessionCallback};
use scannerd::store::{SessionStore, StoredSession};
use scannerd::transport::PeripheralHandle;
use scannerd::types::DisconnectReason;
use scannerd::BlueZTransport;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "scannerd")]
#[command(about = "Relay courier login tokens to an ESP32 scanner over BLE")]
struct Args {
    /// Login server base URL
    #[arg(long, default_value = DEFAULT_SERVER_URL)]
    server_url: String,

    /// Employee ID; omit to reuse the stored session
    #[arg(long)]
    user_id: Option<String>,

    /// Password for a fresh login
    #[arg(long)]
    password: Option<String>,

    /// Override the scanner's advertised device name
    #[arg(long)]
    device_name: Option<String>,

    /// Override the accepted device-name prefix
    #[arg(long)]
    device_name_prefix: Option<String>,

    /// Directory holding session state and the device UUID
    #[arg(long, default_value = ".scannerd")]
    state_dir: PathBuf,

    /// Scan timeout in seconds
    #[arg(long, default_value = "10")]
    scan_timeout: u64,

    /// Clear the stored session and exit
    #[arg(long)]
    logout: bool,
}

/// Session events forwarded from the callback into the main loop
enum AppEvent {
    Found(PeripheralHandle),
    NotFound,
    Ready,
    Disconnected(DisconnectReason),
    TokenResult(bool),
}

struct ChannelCallback {
    events: mpsc::Sender<AppEvent>,
}

impl SessionCallback for ChannelCallback {
    fn on_peripheral_found(&self, peripheral: &PeripheralHandle) {
        let _ = self.events.try_send(AppEvent::Found(peripheral.clone()));
    }

    fn on_not_found(&self) {
        let _ = self.events.try_send(AppEvent::NotFound);
    }

    fn on_ready(&self) {
        let _ = self.events.try_send(AppEvent::Ready);
    }

    fn on_disconnected(&self, reason: &DisconnectReason) {
        let _ = self.events.try_send(AppEvent::Disconnected(reason.clone()));
    }

    fn on_token_result(&self, success: bool) {
        let _ = self.events.try_send(AppEvent::TokenResult(success));
    }
}

/// Obtain a usable login session: fresh credentials win, otherwise the
/// stored session is verified against the server
async fn obtain_session(
    args: &Args,
    store: &SessionStore,
) -> Result<StoredSession, Box<dyn std::error::Error>> {
    let client = AuthClient::new(args.server_url.clone());
    let device_uuid = store.device_uuid()?;

    if let (Some(user_id), Some(password)) = (&args.user_id, &args.password) {
        let request = LoginRequest {
            user_id: user_id.clone(),
            password: password.clone(),
            device_uuid,
            device_name: std::env::var("HOSTNAME").ok(),
        };
        let grant = match client.login(&request).await {
            Ok(grant) => grant,
            Err(AuthError::DeviceMismatch(msg)) => {
                error!("This account is registered to another device: {}", msg);
                return Err(msg.into());
            }
            Err(e) => {
                error!("Login failed: {}", e);
                return Err(e.into());
            }
        };
        let session = StoredSession {
            access_token: grant.access_token.clone(),
            user_id: user_id.clone(),
            expires_at: grant.expires_at.clone(),
            expiry_date: grant.expiry_date.clone(),
            is_logged_in: true,
        };
        store.save(&session)?;
        return Ok(session);
    }

    let session = match store.load()? {
        Some(session) if session.is_logged_in => session,
        _ => {
            error!("No stored session; pass --user-id and --password to log in");
            return Err("not logged in".into());
        }
    };

    match client.verify_token(&session.access_token, &device_uuid).await {
        Ok(_) => info!("Stored token still valid for user {}", session.user_id),
        Err(AuthError::InvalidToken(msg)) => {
            warn!("Stored token rejected ({}); clearing session", msg);
            store.clear()?;
            return Err("stored token expired, log in again".into());
        }
        // Offline or server trouble: proceed with the stored token
        Err(e) => warn!("Could not verify stored token ({}), using it anyway", e),
    }
    Ok(session)
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let store = SessionStore::open(&args.state_dir)?;

    if args.logout {
        store.clear()?;
        info!("Logged out");
        return Ok(());
    }

    let session_info = obtain_session(&args, &store).await?;
    let access_token = session_info.access_token.clone();

    let mut config = ScannerConfig {
        scan_timeout: Duration::from_secs(args.scan_timeout),
        ..ScannerConfig::default()
    };
    if let Some(name) = &args.device_name {
        config.device_name = name.clone();
    }
    if let Some(prefix) = &args.device_name_prefix {
        config.device_name_prefix = prefix.clone();
    }

    let transport = Arc::new(BlueZTransport::from_default_adapter().await?);
    let (app_tx, mut app_rx) = mpsc::channel(16);
    let session = ScannerSession::spawn(
        config,
        transport,
        Arc::new(ChannelCallback { events: app_tx }),
    );

    info!("Searching for the scanner...");
    session.start_discovery().await;

    loop {
        tokio::select! {
            Some(event) = app_rx.recv() => match event {
                AppEvent::Found(peripheral) => {
                    info!("Scanner found: '{}' ({})", peripheral.name, peripheral.address);
                }
                AppEvent::NotFound => {
                    error!("Scanner not found; check that the device is powered on");
                    break;
                }
                AppEvent::Ready => {
                    info!("Scanner connected, sending token");
                    if !session.send_token(&access_token).await {
                        error!("Token write could not be submitted");
                    }
                }
                AppEvent::TokenResult(true) => {
                    info!("Token accepted by the scanner");
                }
                AppEvent::TokenResult(false) => {
                    error!("Token write failed; retry with a new discovery run");
                }
                AppEvent::Disconnected(reason) => {
                    warn!("Session ended: {}", reason);
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    session.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    run(args).await
}
