use std::path::PathBuf;
use std::process;

use clap::Parser;
use tracing::{debug, error};

use latexsnip::config::{self, Config, LogLevel, Overrides};
use latexsnip::dispatch::Dispatcher;
use latexsnip::latex::LatexRenderer;
use latexsnip::ocr::MistralOcrClient;
use latexsnip::pipeline::Orchestrator;
use latexsnip::system::{self, Capture, ExistingImage};

/// Exit status for configuration errors.
const EXIT_CONFIG: i32 = 2;

#[derive(Parser, Debug)]
#[command(name = "latexsnip")]
#[command(version, about = "Capture a screen region, OCR it with Mistral and render any LaTeX it contains", long_about = None)]
struct Cli {
    /// Use this image instead of an interactive screen selection
    #[arg(long, value_name = "PATH")]
    image: Option<PathBuf>,

    /// Directory for rendered LaTeX images
    #[arg(short, long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Do not open the rendered image in the default viewer
    #[arg(long)]
    no_open: bool,

    /// Do not show a desktop notification
    #[arg(long)]
    no_notify: bool,

    /// Config file (default: ~/.config/latexsnip/config.json)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// error, warn, info, debug or trace
    #[arg(long, value_parser = parse_log_level)]
    log_level: Option<LogLevel>,

    /// Render resolution
    #[arg(long)]
    dpi: Option<u32>,
}

fn parse_log_level(s: &str) -> Result<LogLevel, String> {
    LogLevel::from_str(s).ok_or_else(|| format!("unknown log level `{s}`"))
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            output_dir: self.output_dir.clone(),
            dpi: self.dpi,
            open_viewer: self.no_open.then_some(false),
            notify: self.no_notify.then_some(false),
            log_level: self.log_level,
        }
    }
}

fn main() {
    let cli = Cli::parse();

    // Before logging, so a `.env` can also carry RUST_LOG.
    let dotenv = config::load_dotenv(None);
    let raw = config::load_raw_config(cli.config.as_deref());
    let file_level = raw.as_ref().ok().and_then(|raw| raw.log_level());
    latexsnip::init_logging(cli.log_level.or(file_level).unwrap_or_default());
    if let Ok(Some(path)) = &dotenv {
        debug!(path = %path.display(), "Loaded .env");
    }

    let config = match dotenv.and_then(|_| raw).and_then(|raw| {
        Config::resolve(raw, |key| std::env::var(key).ok(), &cli.overrides())
    }) {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {e}");
            process::exit(EXIT_CONFIG);
        }
    };
    debug!(
        output_dir = %config.output_dir.display(),
        dpi = config.dpi,
        open_viewer = config.open_viewer,
        notify = config.notify,
        "Configuration resolved"
    );

    let ocr = match MistralOcrClient::new(&config) {
        Ok(client) => client,
        Err(e) => {
            error!("{e}");
            process::exit(1);
        }
    };
    let capture: Box<dyn Capture> = match &cli.image {
        Some(path) => Box::new(ExistingImage::new(path)),
        None => system::default_capture(&config),
    };

    let mut orchestrator = Orchestrator::new(
        capture,
        Box::new(ocr),
        Box::new(LatexRenderer::new(&config)),
        Dispatcher::new(&config),
    );
    let outcome = orchestrator.run();
    process::exit(outcome.exit_code());
}
