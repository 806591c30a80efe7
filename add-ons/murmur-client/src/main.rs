//! Murmur voice client
//!
//! Connects the default microphone and speakers to a speech server over a
//! WebSocket, and runs until the server goes away or CTRL-C is pressed.
//!
//! Keyboard commands (followed by Enter): `m` toggles response mute,
//! `+`/`-` change the volume, `q` quits.

mod console;

use anyhow::Context;
use console::ConsoleDisplay;
use murmur_voice::{
    connect, websocket_url, AudioConfig, CpalFrameSource, RodioPlayback, SessionConfig,
    SessionEnd, VoiceSession,
};
use std::path::PathBuf;
use std::rc::Rc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn load_config() -> anyhow::Result<SessionConfig> {
    let config = match std::env::var("MURMUR_CONFIG") {
        Ok(path) => {
            let path = PathBuf::from(path);
            SessionConfig::load_from_path(&path)
                .with_context(|| format!("loading config from {}", path.display()))?
        }
        Err(_) => SessionConfig::from_env()?,
    };
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (before any env::var calls)
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[murmur-client] .env not loaded: {} (using system environment)", e);
    }

    let config = load_config()?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.filter_directive().into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let url = websocket_url(&config.server_url)?;
    let mut transport = connect(&url)
        .await
        .with_context(|| format!("connecting to {}", url))?;

    let source = CpalFrameSource::new(AudioConfig::from(&config));
    let playback = Rc::new(RodioPlayback::new(config.start_muted)?);
    if config.start_muted {
        println!("-- Responses are muted. Type m and Enter to unmute.");
    }
    let mut session = VoiceSession::new(
        config,
        source,
        Rc::clone(&playback),
        ConsoleDisplay::default(),
    )?;

    if let Err(e) = session.start(transport.outbound.clone()) {
        transport.shutdown().await;
        return Err(e).context("starting voice session");
    }

    {
        let run = session.run(&mut transport.inbound);
        tokio::pin!(run);
        let mut commands = BufReader::new(tokio::io::stdin()).lines();
        let mut stdin_open = true;
        let mut volume = 1.0f32;

        loop {
            tokio::select! {
                end = &mut run => {
                    match end {
                        Ok(SessionEnd::TransportClosed { reason }) => {
                            tracing::info!(reason = reason.as_deref().unwrap_or("-"), "Server connection ended");
                        }
                        Ok(SessionEnd::CaptureEnded) => tracing::warn!("Microphone stream ended"),
                        Err(e) => tracing::error!(error = %e, "Voice session failed"),
                    }
                    break;
                }
                line = commands.next_line(), if stdin_open => match line {
                    Ok(Some(cmd)) => match cmd.trim() {
                        "m" => {
                            let muted = playback.toggle_mute();
                            println!("-- Responses {}", if muted { "muted" } else { "unmuted" });
                        }
                        "+" | "-" => {
                            let step = if cmd.trim() == "+" { 0.1 } else { -0.1 };
                            volume = (volume + step).clamp(0.0, 1.0);
                            playback.set_volume(volume);
                            println!("-- Volume {:.0}%", volume * 100.0);
                        }
                        "q" => break,
                        "" => {}
                        other => println!("-- Unknown command: {}", other),
                    },
                    // keep running without commands
                    Ok(None) | Err(_) => stdin_open = false,
                },
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("CTRL-C received; shutting down");
                    break;
                }
            }
        }
    }

    session.stop();
    let stats = session.stats();
    tracing::info!(
        utterances = stats.utterances,
        responses = stats.responses_played,
        failed_responses = stats.responses_failed,
        "Session summary"
    );
    transport.shutdown().await;
    Ok(())
}
