//! PeerLink terminal client
//!
//! Registers a name with the relay, places or answers one call at a time and
//! chats over the data channel, falling back to the relay while no channel
//! is open.
//!
//! # Usage
//!
//! ```bash
//! # Register as alice and wait for calls
//! cargo run -p peerlink-cli -- --name alice
//!
//! # Register as bob and call alice right away
//! cargo run -p peerlink-cli -- --name bob --call alice
//!
//! # Private relay, no local media, verbose engine logs
//! RUST_LOG=peerlink_webrtc=debug cargo run -p peerlink-cli -- \
//!   --relay-url ws://localhost:8080 \
//!   --no-media
//! ```
//!
//! Commands on stdin: `/call <name>`, `/answer`, `/hangup`, `/register <name>`,
//! `/to <name>`, `/log`, `/quit`. Any other line is sent as chat.

mod commands;

use anyhow::Context;
use clap::Parser;
use commands::Command;
use peerlink_webrtc::config::{DEFAULT_CHANNEL_LABEL, DEFAULT_RELAY_URL};
use peerlink_webrtc::media::{CaptureKind, MediaConstraints, StaticMediaSource};
use peerlink_webrtc::{
    ChatMessage, ChatVia, ClientEvent, NegotiationState, PeerLinkClient, PeerLinkConfig,
    RelayClient, WebRtcBackend,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast::error::RecvError, Notify};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const REGISTER_TIMEOUT: Duration = Duration::from_secs(10);

/// PeerLink video chat
///
/// One-to-one WebRTC calls negotiated through a WebSocket message relay.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// WebSocket relay URL
    #[arg(long, default_value = DEFAULT_RELAY_URL, env = "PEERLINK_RELAY_URL")]
    relay_url: String,

    /// Display name to register on start
    #[arg(short, long, env = "PEERLINK_NAME")]
    name: Option<String>,

    /// Peer to call once registered
    #[arg(long, env = "PEERLINK_CALL")]
    call: Option<String>,

    /// STUN servers (comma-separated), library defaults when omitted
    #[arg(long, value_delimiter = ',', env = "PEERLINK_STUN_SERVERS")]
    stun_server: Vec<String>,

    /// Join calls without local tracks
    #[arg(long, default_value_t = false, env = "PEERLINK_NO_MEDIA")]
    no_media: bool,

    /// What to capture when media is enabled
    #[arg(long, value_enum, default_value = "camera", env = "PEERLINK_CAPTURE")]
    capture: Capture,

    /// Data channel label
    #[arg(long, default_value = DEFAULT_CHANNEL_LABEL, env = "PEERLINK_DATA_CHANNEL_LABEL")]
    data_channel_label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum Capture {
    /// Camera and microphone
    Camera,
    /// Screen share
    Screen,
}

impl From<Capture> for CaptureKind {
    fn from(capture: Capture) -> Self {
        match capture {
            Capture::Camera => CaptureKind::Camera,
            Capture::Screen => CaptureKind::Screen,
        }
    }
}

impl Args {
    fn config(&self) -> PeerLinkConfig {
        let mut config = PeerLinkConfig::with_relay(&self.relay_url);
        if !self.stun_server.is_empty() {
            config.stun_servers = self.stun_server.clone();
        }
        config.data_channel_label = self.data_channel_label.clone();
        config
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let shutdown = Arc::new(Notify::new());
    let shutdown_handler = Arc::clone(&shutdown);
    let interrupted = Arc::new(AtomicBool::new(false));

    ctrlc::set_handler(move || {
        if interrupted.swap(true, Ordering::SeqCst) {
            eprintln!("\nShutdown already in progress, forcing exit");
            std::process::exit(130);
        }
        eprintln!("\nCtrl+C received, hanging up...");
        shutdown_handler.notify_one();
    })
    .context("Failed to set Ctrl+C handler")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .thread_name("peerlink-worker")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(args, shutdown))
}

async fn async_main(args: Args, shutdown: Arc<Notify>) -> anyhow::Result<()> {
    init_tracing();

    let config = args.config();
    config.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        relay = %config.relay_url,
        "PeerLink starting"
    );

    let relay = Arc::new(RelayClient::new(&config.relay_url, config.event_capacity));
    relay.connect().await?;

    let backend = Arc::new(WebRtcBackend::new(&config)?);
    let client = PeerLinkClient::new(config, relay.clone(), backend)?;
    let mut events = client.subscribe();

    if !args.no_media {
        // A denial is logged by the engine; the session goes on without media
        client
            .acquire_media(
                &StaticMediaSource::granting(),
                args.capture.into(),
                MediaConstraints::default(),
            )
            .await;
    }

    if let Some(name) = &args.name {
        register(&client, &mut events, name).await?;
    }

    let mut target = args.call.clone();
    if let Some(peer) = &args.call {
        client.call(Some(peer.as_str())).await?;
        println!("* calling {}", peer);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = shutdown.notified() => break,
            event = events.recv() => match event {
                Ok(event) => {
                    print_event(&event);
                    // Whoever called us becomes the relay recipient
                    if target.is_none() && event == ClientEvent::State(NegotiationState::Answering) {
                        target = client.engine().peer_name().await;
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Display lagged behind"),
                Err(RecvError::Closed) => break,
            },
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                let command = match Command::parse(&line) {
                    Ok(command) => command,
                    Err(reason) => {
                        println!("! {}", reason);
                        continue;
                    }
                };
                if !run_command(&client, &mut target, command).await {
                    break;
                }
            }
        }
    }

    client.hang_up().await;
    relay.disconnect();
    info!("PeerLink stopped");
    Ok(())
}

async fn register(
    client: &PeerLinkClient,
    events: &mut tokio::sync::broadcast::Receiver<ClientEvent>,
    name: &str,
) -> anyhow::Result<()> {
    client.register(name).await?;

    let outcome = tokio::time::timeout(REGISTER_TIMEOUT, async {
        loop {
            match events.recv().await {
                Ok(ClientEvent::Registered(outcome)) => return Ok(outcome),
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return Err(anyhow::anyhow!("client stopped")),
            }
        }
    })
    .await
    .context("Relay did not answer the registration")??;

    if !outcome.result {
        anyhow::bail!("Relay rejected the name {}", name);
    }
    println!("* registered as {}", name);
    Ok(())
}

/// Returns false when the user asked to quit
async fn run_command(
    client: &PeerLinkClient,
    target: &mut Option<String>,
    command: Command,
) -> bool {
    let result = match command {
        Command::Quit => return false,
        Command::Call(peer) => {
            *target = Some(peer.clone());
            client
                .call(Some(peer.as_str()))
                .await
                .map(|_| println!("* calling {}", peer))
        }
        Command::Answer => client
            .call(None)
            .await
            .map(|_| println!("* waiting for an offer")),
        Command::HangUp => {
            client.hang_up().await;
            println!("* call ended");
            Ok(())
        }
        Command::Register(name) => client.register(&name).await,
        Command::To(peer) => {
            println!("* relay chat goes to {}", peer);
            *target = Some(peer);
            Ok(())
        }
        Command::Log => {
            for message in client.chat_log().snapshot() {
                print_chat(&message);
            }
            Ok(())
        }
        Command::Say(text) => {
            let to = relay_recipient(target.as_deref(), client.engine().peer_name().await);
            client.send_message(&to, &text).await.map(|via| {
                if via == ChatVia::Relay {
                    println!("* sent to {} via relay", to);
                }
            })
        }
    };

    if let Err(e) = result {
        println!("! {}", e);
    }
    true
}

/// The `/to` target, else the peer of the current call
fn relay_recipient(target: Option<&str>, call_peer: Option<String>) -> String {
    target.map(str::to_string).or(call_peer).unwrap_or_default()
}

fn print_chat(message: &ChatMessage) {
    let via = match message.via {
        ChatVia::Relay => "relay",
        ChatVia::Channel => "p2p",
    };
    println!("[{}] {}: {}", via, message.from, message.message);
}

fn print_event(event: &ClientEvent) {
    match event {
        ClientEvent::Chat(message) => print_chat(message),
        ClientEvent::Registered(outcome) if outcome.result => {
            println!("* registered as {}", outcome.name.as_deref().unwrap_or("?"))
        }
        ClientEvent::Registered(_) => println!("! registration rejected"),
        ClientEvent::State(state) => println!("* call state: {}", state),
        ClientEvent::ChannelReady(true) => println!("* data channel open, chatting peer to peer"),
        ClientEvent::ChannelReady(false) => println!("* data channel closed, chat goes via relay"),
        ClientEvent::NegotiationFailed(failure) => println!("! {}", failure),
        ClientEvent::RemoteTrack(track) => println!("* remote {:?} track {}", track.kind, track.id),
        ClientEvent::RelayClosed => println!("! relay connection lost"),
    }
}

fn init_tracing() {
    // RUST_LOG support, info by default
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
