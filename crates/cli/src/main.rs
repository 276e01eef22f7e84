use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use clap::Parser;
use serde::Serialize;

use facewatch_core::detection::domain::face_detector::FaceDetector;
use facewatch_core::detection::infrastructure::rustface_detector::{DetectorParams, RustfaceDetector};
use facewatch_core::pipeline::capture_session::{CaptureDeps, CaptureParams, CaptureSession};
use facewatch_core::pipeline::frame_annotator::FrameAnnotator;
use facewatch_core::pipeline::pipeline_logger::{
    LogPipelineLogger, NullPipelineLogger, PipelineLogger,
};
use facewatch_core::pipeline::pipeline_loop::{LoopSettings, PipelineLoop};
use facewatch_core::pipeline::recognition_service::RecognitionService;
use facewatch_core::pipeline::shared_state::SharedState;
use facewatch_core::recognition::domain::vote_stabilizer::VoteStabilizer;
use facewatch_core::recognition::infrastructure::face_store::FaceStore;
use facewatch_core::recognition::infrastructure::lbph_recognizer::LbphTrainer;
use facewatch_core::recognition::recognizer_manager::RecognizerManager;
use facewatch_core::shared::cancellation::CancellationToken;
use facewatch_core::shared::config::AppConfig;
use facewatch_core::shared::constants::{DETECTOR_MODEL_NAME, DETECTOR_MODEL_URL};
use facewatch_core::shared::model_resolver;
use facewatch_core::video::infrastructure::ffmpeg_camera_source::FfmpegCameraSource;
use facewatch_core::video::infrastructure::jpeg_frame_encoder::JpegFrameEncoder;

/// Live face detection and recognition with an enrollment console.
#[derive(Parser)]
#[command(name = "facewatch")]
struct Cli {
    /// JSON config file (defaults to the platform config directory).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Camera device or stream URL, overriding the config.
    #[arg(long)]
    camera: Option<String>,

    /// Training-data root, overriding the config.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Maximum accepted recognition distance, overriding the config.
    #[arg(long)]
    threshold: Option<f64>,
}

/// One console line, parsed.
#[derive(Debug, PartialEq)]
enum Command {
    People,
    Labels,
    Status,
    Capture {
        label: String,
        count: Option<usize>,
        interval_ms: Option<u64>,
    },
    Register {
        label: String,
        count: Option<usize>,
        interval_ms: Option<u64>,
    },
    Stop,
    Snap {
        label: String,
        n: usize,
    },
    Enroll {
        label: String,
        image: PathBuf,
    },
    Delete {
        label: String,
    },
    Clear,
    Reload,
    Counts,
    Health,
    Frame {
        path: PathBuf,
    },
    Help,
    Quit,
}

const HELP: &str = "\
commands:
  people                         faces seen within the expiry window
  labels                         enrolled labels
  status                         capture session status
  capture <label> [n] [ms]       start a capture session
  register <label> [n] [ms]      capture and wait for it to finish
  stop                           stop the capture session
  snap <label> [n]               store n copies of the current face
  enroll <label> <image>         add an image file as a sample
  delete <label>                 remove a label and retrain
  clear                          remove every label
  reload                         retrain from disk
  counts                         samples per label
  health                         readiness and settings
  frame <path>                   write the latest JPEG frame
  quit";

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let detector = build_detector(&config)?;
    let store = Arc::new(FaceStore::new(&config.data_dir));
    let recognizers = Arc::new(RecognizerManager::new(
        store,
        Box::new(LbphTrainer::default()),
    ));
    let shared = Arc::new(SharedState::new(config.current_expire()));

    let pipeline = build_pipeline(&config, &detector, &recognizers, &shared)?;
    let cancel = CancellationToken::new();
    let pipeline_handle = spawn_pipeline(pipeline, cancel.clone());

    let session = CaptureSession::new(
        CaptureDeps {
            shared: shared.clone(),
            detector: detector.clone(),
            recognizers: recognizers.clone(),
            input_size: config.recog_input_size,
        },
        config.stop_wait(),
    );
    let service = RecognitionService::new(shared, recognizers, session, detector, config);

    run_console(&service)?;

    service.stop_capture();
    cancel.cancel();
    if pipeline_handle.join().is_err() {
        log::warn!("Pipeline thread panicked");
    }
    Ok(())
}

fn load_config(cli: &Cli) -> Result<AppConfig, Box<dyn std::error::Error>> {
    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(camera) = &cli.camera {
        config.camera = camera.clone();
    }
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(threshold) = cli.threshold {
        config.recog_threshold = threshold;
    }
    config.validate()?;
    Ok(config)
}

fn build_detector(config: &AppConfig) -> Result<Arc<dyn FaceDetector>, Box<dyn std::error::Error>> {
    log::info!("Resolving model: {DETECTOR_MODEL_NAME}");
    let model_path = model_resolver::resolve(
        DETECTOR_MODEL_NAME,
        DETECTOR_MODEL_URL,
        config.detector_model_path.as_deref(),
    )?;
    let detector = RustfaceDetector::from_file(
        &model_path,
        DetectorParams {
            scale_factor: config.detector_scale_factor,
            score_threshold: config.detector_score_threshold,
            min_size: config.detector_min_size,
        },
    )?;
    Ok(Arc::new(detector))
}

fn build_pipeline(
    config: &AppConfig,
    detector: &Arc<dyn FaceDetector>,
    recognizers: &Arc<RecognizerManager>,
    shared: &Arc<SharedState>,
) -> Result<PipelineLoop, Box<dyn std::error::Error>> {
    let source = FfmpegCameraSource::new(&config.camera, config.width, config.height, config.fps);
    let annotator = FrameAnnotator::from_font_file(config.overlay_font_path.as_deref())?;
    let logger: Box<dyn PipelineLogger> = if config.print_stats {
        Box::new(LogPipelineLogger::new(
            config.stats_interval(),
            format!(
                "detect_every={} recog_every={} vote={}/{}",
                config.detect_every_n, config.recog_every_n, config.vote_window, config.vote_require
            ),
        ))
    } else {
        Box::new(NullPipelineLogger)
    };

    Ok(PipelineLoop::new(
        Box::new(source),
        detector.clone(),
        recognizers.clone(),
        Box::new(JpegFrameEncoder::new(config.jpeg_quality)),
        annotator,
        shared.clone(),
        logger,
        VoteStabilizer::new(config.vote_window, config.vote_require),
        LoopSettings::from_config(config),
    ))
}

fn spawn_pipeline(mut pipeline: PipelineLoop, cancel: CancellationToken) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        if let Err(e) = pipeline.run(&cancel) {
            log::error!("Pipeline aborted: {e}");
        }
    })
}

fn run_console(service: &RecognitionService) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("{HELP}");
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match parse_command(&line) {
            Ok(Command::Quit) => break,
            Ok(Command::Help) => eprintln!("{HELP}"),
            Ok(command) => {
                let reply = execute(service, command);
                writeln!(stdout, "{reply}")?;
                stdout.flush()?;
            }
            Err(e) => eprintln!("{e}"),
        }
    }
    Ok(())
}

/// Runs one command and renders its result as JSON.
fn execute(service: &RecognitionService, command: Command) -> String {
    match command {
        Command::People => json(&service.current_people(SystemTime::now())),
        Command::Labels => json(&service.labels()),
        Command::Status => json(&service.capture_status()),
        Command::Capture {
            label,
            count,
            interval_ms,
        } => {
            let params = with_overrides(service, label, count, interval_ms);
            render(service.start_capture(params))
        }
        Command::Register {
            label,
            count,
            interval_ms,
        } => {
            let params = with_overrides(service, label, count, interval_ms);
            render(service.register(params, true, None))
        }
        Command::Stop => json(&service.stop_capture()),
        Command::Snap { label, n } => render(service.capture_now(&label, n, true, true)),
        Command::Enroll { label, image } => match std::fs::read(&image) {
            Ok(bytes) => render(service.enroll_one(&label, &bytes)),
            Err(e) => error_json(&format!("{}: {e}", image.display())),
        },
        Command::Delete { label } => render(service.delete_label(&label)),
        Command::Clear => render(service.clear_all()),
        Command::Reload => render(service.reload()),
        Command::Counts => render(service.label_counts()),
        Command::Health => json(&service.health()),
        Command::Frame { path } => match service.latest_frame() {
            Some(frame) => match std::fs::write(&path, frame.encoded.as_slice()) {
                Ok(()) => json(&path),
                Err(e) => error_json(&e.to_string()),
            },
            None => error_json("no frame available yet"),
        },
        Command::Help | Command::Quit => String::new(),
    }
}

fn with_overrides(
    service: &RecognitionService,
    label: String,
    count: Option<usize>,
    interval_ms: Option<u64>,
) -> CaptureParams {
    let mut params = service.default_params(label);
    if let Some(n) = count {
        params.target_count = n;
    }
    if let Some(ms) = interval_ms {
        params.interval = Duration::from_millis(ms);
    }
    params
}

fn parse_command(line: &str) -> Result<Command, String> {
    let mut words = line.split_whitespace();
    let name = words.next().unwrap_or_default();
    let args: Vec<&str> = words.collect();

    let label = |i: usize| -> Result<String, String> {
        args.get(i)
            .map(|s| s.to_string())
            .ok_or_else(|| format!("{name}: missing label"))
    };
    let number = |i: usize| -> Result<Option<u64>, String> {
        args.get(i)
            .map(|s| s.parse::<u64>().map_err(|e| format!("{name}: bad number {s:?}: {e}")))
            .transpose()
    };

    let command = match name {
        "people" => Command::People,
        "labels" => Command::Labels,
        "status" => Command::Status,
        "capture" => Command::Capture {
            label: label(0)?,
            count: number(1)?.map(|n| n as usize),
            interval_ms: number(2)?,
        },
        "register" => Command::Register {
            label: label(0)?,
            count: number(1)?.map(|n| n as usize),
            interval_ms: number(2)?,
        },
        "stop" => Command::Stop,
        "snap" => Command::Snap {
            label: label(0)?,
            n: number(1)?.unwrap_or(1) as usize,
        },
        "enroll" => Command::Enroll {
            label: label(0)?,
            image: args
                .get(1)
                .map(PathBuf::from)
                .ok_or_else(|| "enroll: missing image path".to_string())?,
        },
        "delete" => Command::Delete { label: label(0)? },
        "clear" => Command::Clear,
        "reload" => Command::Reload,
        "counts" => Command::Counts,
        "health" => Command::Health,
        "frame" => Command::Frame {
            path: args
                .first()
                .map(PathBuf::from)
                .ok_or_else(|| "frame: missing output path".to_string())?,
        },
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(format!("unknown command {other:?}, try 'help'")),
    };
    Ok(command)
}

fn render<T: Serialize, E: std::fmt::Display>(result: Result<T, E>) -> String {
    match result {
        Ok(value) => json(&value),
        Err(e) => error_json(&e.to_string()),
    }
}

fn json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| error_json(&e.to_string()))
}

fn error_json(message: &str) -> String {
    serde_json::json!({ "ok": false, "error": message }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_capture_with_overrides() {
        assert_eq!(
            parse_command("capture alice 10 250").unwrap(),
            Command::Capture {
                label: "alice".into(),
                count: Some(10),
                interval_ms: Some(250),
            }
        );
    }

    #[test]
    fn test_parse_capture_defaults() {
        assert_eq!(
            parse_command("capture bob").unwrap(),
            Command::Capture {
                label: "bob".into(),
                count: None,
                interval_ms: None,
            }
        );
    }

    #[test]
    fn test_parse_snap_defaults_to_one() {
        assert_eq!(
            parse_command("snap carol").unwrap(),
            Command::Snap {
                label: "carol".into(),
                n: 1,
            }
        );
    }

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!(parse_command("people").unwrap(), Command::People);
        assert_eq!(parse_command("  clear  ").unwrap(), Command::Clear);
        assert_eq!(parse_command("exit").unwrap(), Command::Quit);
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_command("capture").is_err());
        assert!(parse_command("capture alice ten").is_err());
        assert!(parse_command("enroll alice").is_err());
        assert!(parse_command("dance").is_err());
    }

    #[test]
    fn test_error_json_shape() {
        let value: serde_json::Value = serde_json::from_str(&error_json("nope")).unwrap();
        assert_eq!(value["ok"], false);
        assert_eq!(value["error"], "nope");
    }
}
