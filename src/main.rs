use clap::Parser;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use phase_recorder::common::OperatorStatus;
use phase_recorder::logging;
use phase_recorder::operator::{self, OperatorKey};
use phase_recorder::pipeline::UnavailableClassifier;
use phase_recorder::session::ControllerState;
use phase_recorder::{AppError, SessionConfig, SessionControllerBuilder, Settings};

#[derive(Parser, Debug)]
#[command(
    name = "phase-recorder",
    about = "Record a procedure video annotated with the current surgical phase"
)]
struct Args {
    /// Input video file
    video: PathBuf,

    /// TOML settings file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Also append logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    #[arg(long, default_value = "")]
    trainee: String,

    #[arg(long, default_value = "")]
    trainer: String,

    #[arg(long, default_value = "")]
    bed: String,

    #[arg(long, default_value = "")]
    case: String,

    /// Classify and log every Nth frame
    #[arg(long)]
    down_ratio: Option<u64>,

    #[arg(long)]
    save_folder: Option<PathBuf>,

    /// Process frames as fast as they decode instead of at the stream rate
    #[arg(long)]
    no_realtime: bool,
}

fn print_keys(status: OperatorStatus) {
    println!("{}", operator::override_help());
    println!("{}", operator::status_help(status));
    println!("q stops the session");
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let args = Args::parse();
    let settings = Settings::load(args.config.as_deref())?;
    let log_file = args.log_file.as_deref().or(settings.logging.file.as_deref());
    logging::init(settings.log_level(), log_file)?;

    let (controller, supervisor) = SessionControllerBuilder::with_settings(&settings)
        .classifier(Arc::new(UnavailableClassifier))
        .realtime(settings.session.realtime && !args.no_realtime)
        .build()?;

    let mut config = SessionConfig::new(&args.video, &settings.session)
        .trainee(args.trainee)
        .trainer(args.trainer)
        .bed(args.bed)
        .case(args.case);
    if let Some(down_ratio) = args.down_ratio {
        config = config.down_ratio(down_ratio);
    }
    if let Some(save_folder) = args.save_folder {
        config = config.save_folder(save_folder);
    }

    let session_id = controller.start(config).await?;
    info!("Recording session {}", session_id);
    let mut status = OperatorStatus::default();
    print_keys(status);

    let mut lines = operator::spawn_line_reader(io::BufReader::new(io::stdin()), 8)?;
    let mut state_rx = controller.subscribe_state();
    loop {
        tokio::select! {
            line = lines.recv() => match line {
                Some(Ok(line)) => match operator::parse_key(&line) {
                    Some(OperatorKey::Override(phase)) => controller.set_override(phase).await?,
                    Some(OperatorKey::Status(next)) => {
                        if next == status {
                            warn!("Operator status is already {}", status);
                        } else {
                            controller.set_status(next).await?;
                            status = next;
                            println!("{}", operator::status_help(status));
                        }
                    }
                    Some(OperatorKey::Quit) => break,
                    None if line.trim().is_empty() => {}
                    None => warn!("Unknown key {:?}", line.trim()),
                },
                None => {
                    info!("Input closed, stopping");
                    break;
                }
                Some(Err(e)) => {
                    error!("Failed to read operator input: {}", e);
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping");
                break;
            }
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *state_rx.borrow_and_update();
                if matches!(state, ControllerState::Stopped | ControllerState::Faulted) {
                    break;
                }
            }
        }
    }

    let report = match controller.stop().await? {
        Some(report) => Some(report),
        None => controller.status().await?.last_report,
    };
    if let Some(report) = report {
        println!("{}", report);
    }

    drop(controller);
    if let Err(e) = supervisor.await {
        error!("Session supervisor failed: {}", e);
    }
    Ok(())
}
