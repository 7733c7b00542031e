//! eduequi-speech: narration service for the EduEqui accessible e-learning client.

mod config;
mod settings;
mod speech;

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use settings::{CachedSpeed, Language, ProfileUpdate, SettingsStore};
use speech::api::{start_speech_api, SpeechApiState};
use speech::audio::RodioOutput;
use speech::coordinator::{LifecycleEvent, SpeechCoordinator};
use speech::synth::HttpSynthesizer;

#[derive(Parser, Debug)]
#[command(name = "eduequi-speech", about = "Queued text-to-speech narration service")]
struct Args {
    /// Path to config.yaml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the narration service (default)
    Serve,
    /// Show or change the persisted user settings
    Settings {
        #[command(subcommand)]
        action: Option<SettingsAction>,
    },
}

#[derive(Subcommand, Debug)]
enum SettingsAction {
    /// Print the current settings as JSON
    Show,
    /// Default narration speed (0.5 - 2.0)
    Speed { value: f32 },
    /// Base font size in px (14 - 32)
    FontSize { value: u32 },
    /// High-contrast mode
    Contrast {
        #[arg(action = ArgAction::Set)]
        enabled: bool,
    },
    /// Interface language: tamil, english or bilingual
    Language { value: Language },
    /// Update profile fields
    Profile {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        preferred_name: Option<String>,
    },
    /// Restore defaults and delete the settings file
    Reset,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging (suppress noisy HTTP internals)
    let filter = if args.verbose {
        EnvFilter::new("debug,hyper=info,reqwest=info")
    } else {
        EnvFilter::new("info,hyper=warn,reqwest=warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = config::Config::load(args.config.as_deref());

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Settings { action } => {
            run_settings(&config, action.unwrap_or(SettingsAction::Show))
        }
    }
}

async fn serve(config: config::Config) -> Result<(), Box<dyn std::error::Error>> {
    info!("eduequi-speech starting");
    info!("TTS endpoint: {}", config.tts.endpoint);

    let synthesizer = Arc::new(HttpSynthesizer::new(&config.tts)?);
    let output = Arc::new(RodioOutput::open_default()?);

    // Refreshed in the background so speed changes apply without a restart
    let settings_path = config.narration.settings_file();
    info!("Default speed from {}", settings_path.display());
    let speed = CachedSpeed::load(settings_path);
    let refresh = speed.clone().spawn_refresh(config.narration.speed_refresh());
    let default_speed = Box::new(move || speed.current());

    let coordinator = Arc::new(SpeechCoordinator::new(synthesizer, output, default_speed));

    if config.api.enabled {
        let state = SpeechApiState {
            coordinator: coordinator.clone(),
            default_language: config.narration.default_language.clone(),
        };
        start_speech_api(state, config.api.port).await;
    } else {
        warn!("Speech API disabled, nothing can queue narration");
    }

    shutdown_signal().await?;

    coordinator.handle_lifecycle(LifecycleEvent::Unload);
    coordinator.shutdown();
    refresh.abort();
    info!("eduequi-speech stopped");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("Received Ctrl+C, shutting down");
            }
            _ = terminate.recv() => {
                info!("Received SIGTERM, shutting down");
            }
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C, shutting down");
        Ok(())
    }
}

fn run_settings(
    config: &config::Config,
    action: SettingsAction,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut store = SettingsStore::open(config.narration.settings_file());

    match action {
        SettingsAction::Show => {}
        SettingsAction::Speed { value } => store.update_tts_speed(value)?,
        SettingsAction::FontSize { value } => store.update_font_size(value)?,
        SettingsAction::Contrast { enabled } => store.update_high_contrast(enabled)?,
        SettingsAction::Language { value } => store.update_language(value)?,
        SettingsAction::Profile {
            name,
            email,
            preferred_name,
        } => store.update_profile(ProfileUpdate {
            name,
            email,
            preferred_name,
        })?,
        SettingsAction::Reset => {
            store.reset()?;
            info!("Settings reset to defaults");
        }
    }

    println!("{}", serde_json::to_string_pretty(store.settings())?);
    info!("Settings file: {}", store.path().display());
    Ok(())
}
