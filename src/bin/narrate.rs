//! narrate: command-line client for the eduequi-speech control API.
//!
//! Queues narration, stops it, or reports what is playing. Uses short
//! timeouts and exits non-zero when the service is unreachable.

use std::io::Read;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use reqwest::Client;
use serde::{Deserialize, Serialize};

const DEFAULT_API: &str = "http://127.0.0.1:8790";

#[derive(Parser)]
#[command(name = "narrate", about = "Send narration to the eduequi-speech service")]
struct Args {
    /// Base URL of the speech API
    #[arg(long, default_value = DEFAULT_API)]
    api: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Speak text (reads stdin when TEXT is omitted)
    Say {
        text: Option<String>,
        /// Language code, e.g. en-US or ta-IN
        #[arg(short, long)]
        lang: Option<String>,
        /// Interrupt current narration and clear the queue
        #[arg(short, long)]
        force: bool,
        /// Playback speed (0.5 - 2.0)
        #[arg(short, long)]
        speed: Option<f32>,
        /// Wait until the text has been spoken
        #[arg(short, long)]
        wait: bool,
    },
    /// Stop narration and clear the queue
    Stop,
    /// Show what is playing
    Status,
}

// --- API request/response shapes ---

#[derive(Serialize)]
struct SpeakRequest {
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    lang: Option<String>,
    force: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    speed: Option<f32>,
    wait: bool,
}

#[derive(Deserialize)]
struct SimpleResponse {
    status: String,
}

#[derive(Deserialize)]
struct StatusResponse {
    playing: bool,
    queued: usize,
    current_text: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();
    let api = args.api.trim_end_matches('/').to_string();

    match run(&api, args.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("narrate: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(api: &str, command: Command) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Say {
            text,
            lang,
            force,
            speed,
            wait,
        } => {
            let text = match text {
                Some(t) => t,
                None => read_stdin()?,
            };
            // waiting can take as long as the utterance itself
            let client = client(if wait { None } else { Some(Duration::from_secs(3)) })?;
            let resp: SimpleResponse = client
                .post(format!("{api}/speak"))
                .json(&SpeakRequest {
                    text,
                    lang,
                    force,
                    speed,
                    wait,
                })
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            println!("{}", resp.status);
        }
        Command::Stop => {
            let resp: SimpleResponse = client(Some(Duration::from_secs(3)))?
                .post(format!("{api}/stop"))
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            println!("{}", resp.status);
        }
        Command::Status => {
            let status: StatusResponse = client(Some(Duration::from_secs(3)))?
                .get(format!("{api}/status"))
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            print_status(&status);
        }
    }
    Ok(())
}

fn client(timeout: Option<Duration>) -> reqwest::Result<Client> {
    let builder = Client::builder().connect_timeout(Duration::from_millis(300));
    match timeout {
        Some(t) => builder.timeout(t).build(),
        None => builder.build(),
    }
}

fn read_stdin() -> std::io::Result<String> {
    let mut input = String::new();
    std::io::stdin().read_to_string(&mut input)?;
    Ok(input.trim().to_string())
}

fn print_status(status: &StatusResponse) {
    match (&status.current_text, status.playing) {
        (Some(text), true) => {
            let preview: String = text.chars().take(80).collect();
            println!("playing: \"{preview}\"");
        }
        (_, true) => println!("playing"),
        _ => println!("idle"),
    }
    println!("queued: {}", status.queued);
}
