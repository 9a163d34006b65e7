// Decoycall terminal front end
// Renders the call screen on stdout and reads commands from stdin

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, watch};
use tracing_subscriber::EnvFilter;

use decoycall_lib::audio::CpalBackend;
use decoycall_lib::settings::AppSettings;
use decoycall_lib::{CallEvent, CallHandle, CallPhase, CallRuntime, CallSessionController, CallSnapshot};

const HELP: &str = "commands: o <file> | m (mute) | s (speaker) | e (end) | c (call) | q (quit)";

#[derive(Parser, Debug)]
#[command(name = "decoycall", version, about = "Play music behind a phone call screen")]
struct Cli {
    /// JSON settings file
    #[arg(long, env = "DECOYCALL_SETTINGS")]
    settings: Option<PathBuf>,

    /// Start playing this file right away
    file: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.settings {
        Some(path) => AppSettings::load(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => AppSettings::default(),
    };
    init_tracing(&settings.logging.filter)?;

    let backend = CpalBackend::new(settings.playback.clone());
    let controller = CallSessionController::new(backend, settings.timer.clone());
    let (runtime, handle) = CallRuntime::new(controller);

    // The screen is always presented in a call
    handle.start_call();
    if let Some(path) = &cli.file {
        open_file(&handle, path).await;
    }

    println!("{}", HELP);
    tokio::spawn(render(handle.watch()));
    tokio::spawn(print_notices(handle.subscribe()));
    tokio::spawn(read_commands(handle));

    // Playback handles stay on this thread, so the loop is driven here rather than spawned
    runtime.run().await;
    println!();
    Ok(())
}

fn init_tracing(default_filter: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_filter)
            .with_context(|| format!("invalid log filter `{}`", default_filter))?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

async fn open_file(handle: &CallHandle, path: &Path) {
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            handle.select_file(bytes, name);
        }
        Err(e) => println!("\n! cannot read {}: {}", path.display(), e),
    }
}

async fn read_commands(handle: CallHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        let (command, arg) = line
            .split_once(' ')
            .map(|(c, a)| (c, a.trim()))
            .unwrap_or((line, ""));

        match command {
            "o" | "open" if !arg.is_empty() => open_file(&handle, Path::new(arg)).await,
            "m" | "mute" => handle.toggle_mute(),
            "s" | "speaker" => handle.toggle_speaker(),
            "e" | "end" => handle.end_call(),
            "c" | "call" => handle.start_call(),
            "q" | "quit" => break,
            "" => {}
            _ => println!("\n{}", HELP),
        }
    }

    handle.shutdown();
}

async fn render(mut state: watch::Receiver<CallSnapshot>) {
    loop {
        let line = render_line(&state.borrow_and_update());
        print!("\r\x1b[2K{}", line);
        let _ = std::io::stdout().flush();

        if state.changed().await.is_err() {
            break;
        }
    }
}

fn render_line(snapshot: &CallSnapshot) -> String {
    if snapshot.phase == CallPhase::Idle {
        return "call ended, `c` to call again".to_string();
    }

    let mut line = format!("{}  {}", snapshot.title, snapshot.elapsed);
    if snapshot.is_muted {
        line.push_str("  [muted]");
    }
    if snapshot.is_speaker_on {
        line.push_str("  [speaker]");
    }
    line
}

async fn print_notices(mut events: broadcast::Receiver<CallEvent>) {
    loop {
        match events.recv().await {
            Ok(CallEvent::LoadFailed { name, reason }) => {
                println!("\n! could not play {}: {}", name, reason);
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
