use anyhow::{Context, Result};
use clap::Parser;
use panel_core::config::{Difficulty, InterviewConfig, InterviewType};
use panel_core::speech::TranscriptBuffer;
use panel_service::config::Config;
use panel_service::console::{self, Console, ConsoleInput};
use panel_service::runtime::PanelFactory;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::fmt::time::ChronoLocal;

#[derive(Parser)]
#[command(version, about = "Practice a panel interview from the terminal")]
struct Cli {
    /// behavioral, technical, rapid_fire, situational or hr_basics
    #[arg(long, default_value_t = InterviewType::Behavioral)]
    interview_type: InterviewType,
    /// easy, medium or hard
    #[arg(long, default_value_t = Difficulty::Medium)]
    difficulty: Difficulty,
}

#[tokio::main]
async fn main() -> Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load application configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Configuration loaded successfully. Starting panel service...");

    // --- 3. Parse Command-Line Arguments ---
    let args = Cli::parse();
    let interview = InterviewConfig {
        interview_type: args.interview_type,
        difficulty: args.difficulty,
    };

    // --- 4. Build the panel ---
    let user_id = config.user_id.clone();
    let factory = PanelFactory::from_config(config)?;
    let speech = Arc::new(TranscriptBuffer::new());
    // Create the command channel to decouple core logic from the runtime.
    let (command_tx, mut command_rx) = tokio::sync::mpsc::channel::<panel_core::Command>(64);
    let panel = factory.panel(interview, speech.clone(), command_tx, &user_id);

    println!("{} interview, {} difficulty", interview.interview_type, interview.difficulty);
    println!("{}", console::roster());

    // This task renders the panel's commands: speech becomes printed lines.
    let command_handler = tokio::spawn(async move {
        while let Some(command) = command_rx.recv().await {
            tracing::debug!("COMMAND RECEIVED: {:?}", command);
            if let Some(line) = console::render(&command) {
                println!("{line}");
            }
        }
    });

    // This task reads the user's lines and drives the panel.
    let mut console = Console::new(panel.clone(), speech);
    let input_handle = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if console.handle(ConsoleInput::parse(&line)).await.is_break() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::error!("Failed to read from stdin: {}", e);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = input_handle => {},
        _ = command_handler => {},
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl-C, shutting down...");
            panel.abandon().await;
        }
    }
    // Let an in-flight interview save finish.
    panel.settled().await;
    tracing::info!("Shutting down...");
    Ok(())
}
