use std::error::Error;
use std::fs;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use agri_advisor::config::{AdvisorConfig, DEFAULT_BASE_URL};
use agri_advisor::format::{FragmentKind, plain_text};
use agri_advisor::page::{CONDITIONS_REGION, FORECAST_REGION, HUMIDITY_REGION, TEMPERATURE_REGION};
use agri_advisor::{
    AdviceRequest, Fragment, HandlerOutcome, Handlers, HttpBackend, ImageUpload, Page,
    RenderToken, RetryPolicy, RevealTarget, Revealer, WeatherReport, final_html,
    format_response,
};
use atty::Stream;
use clap::{ArgAction, Parser, Subcommand};
use termimad::crossterm::queue;
use termimad::crossterm::style::{Attribute, SetAttribute};
use termimad::{FmtText, MadSkin, terminal_size};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "agri-advisor-rs",
    about = "Ask the farming advice service and read its answers in the terminal",
    version
)]
pub struct Cli {
    /// Base URL of the advice service.
    #[arg(long, global = true, default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Emit the formatted fragments (or weather report) as JSON.
    #[arg(long, global = true, conflicts_with = "html")]
    json: bool,

    /// Emit the final HTML of the result region.
    #[arg(long, global = true)]
    html: bool,

    /// Print the answer at once instead of typing it out.
    #[arg(long, global = true)]
    no_animate: bool,

    /// Delay between revealed characters.
    #[arg(long, global = true, default_value_t = 10)]
    char_delay_ms: u64,

    /// Request timeout in seconds.
    #[arg(long, global = true, default_value_t = 60)]
    timeout_secs: u64,

    /// Show short answers as they arrive instead of asking again.
    #[arg(long, global = true)]
    no_retry: bool,

    /// Raise log verbosity (-v info, -vv debug). `RUST_LOG` takes precedence.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ask a free-form farming question.
    Advice {
        /// The question; multiple words are joined with spaces.
        question: Vec<String>,
    },
    /// Irrigation advice for a crop and soil.
    Water {
        #[arg(long)]
        crop: String,
        #[arg(long)]
        soil: String,
        #[arg(long)]
        language: Option<String>,
    },
    /// Identify a crop from a photo and get advice for it.
    CropImage {
        /// Path to a JPEG, PNG, GIF or WebP image.
        image: PathBuf,
    },
    /// Diagnose plant disease from a photo.
    Disease {
        image: PathBuf,
    },
    /// Bio-fertilizer recommendations for a crop at a growth stage.
    BioFertilizer {
        #[arg(long)]
        crop: String,
        #[arg(long)]
        soil: String,
        #[arg(long)]
        stage: String,
        #[arg(long)]
        language: Option<String>,
    },
    /// Government schemes for a state and category.
    Schemes {
        #[arg(long)]
        state: String,
        #[arg(long)]
        category: String,
    },
    /// Current weather and forecast for a city.
    Weather {
        city: Vec<String>,
    },
    /// Format response text offline, from a file or stdin.
    Format {
        file: Option<PathBuf>,
    },
    /// Run the response preview server (needs the `web` feature).
    Serve {
        #[arg(long, default_value = "127.0.0.1:8080")]
        addr: SocketAddr,
        #[arg(long, value_enum, default_value_t = ThemeArg::Bootstrap)]
        theme: ThemeArg,
    },
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum ThemeArg {
    Tailwind,
    Bootstrap,
}

#[cfg(feature = "web")]
impl From<ThemeArg> for agri_advisor::web::WebTheme {
    fn from(value: ThemeArg) -> Self {
        match value {
            ThemeArg::Tailwind => agri_advisor::web::WebTheme::Tailwind,
            ThemeArg::Bootstrap => agri_advisor::web::WebTheme::Bootstrap,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Plain,
    Json,
    Html,
}

#[derive(Debug, Clone)]
struct Settings {
    mode: OutputMode,
    animate: bool,
    /// Requested pacing, kept even when terminal output is instant.
    char_delay: Duration,
    config: AdvisorConfig,
}

impl Settings {
    fn from_cli(cli: &Cli) -> Self {
        let mode = if cli.json {
            OutputMode::Json
        } else if cli.html {
            OutputMode::Html
        } else {
            OutputMode::Plain
        };
        let animate = mode == OutputMode::Plain && !cli.no_animate && stdout_is_tty();
        let char_delay = Duration::from_millis(cli.char_delay_ms);
        let mut config = AdvisorConfig::default().with_base_url(cli.base_url.clone());
        config.timeout = Duration::from_secs(cli.timeout_secs.max(1));
        config.reveal.char_delay = char_delay;
        if cli.no_retry {
            config.retry = RetryPolicy::disabled();
        }
        if !animate {
            config = config.instant();
        }
        Self {
            mode,
            animate,
            char_delay,
            config,
        }
    }
}

pub fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, is_serve(&cli.command));
    let settings = Settings::from_cli(&cli);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(dispatch(cli.command, settings))
}

fn is_serve(command: &Command) -> bool {
    matches!(command, Command::Serve { .. })
}

fn init_tracing(verbose: u8, serving: bool) {
    let level = match verbose.max(u8::from(serving)) {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "agri_advisor={level},agri_advisor_rs={level},tower_http={level}"
        ))
    });
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

async fn dispatch(command: Command, settings: Settings) -> Result<(), Box<dyn Error>> {
    let request = match command {
        Command::Format { file } => return handle_format(file, &settings).await,
        Command::Serve { addr, theme } => return handle_serve(addr, theme, &settings).await,
        Command::Advice { question } => AdviceRequest::Advice {
            question: question.join(" "),
        },
        Command::Water {
            crop,
            soil,
            language,
        } => AdviceRequest::WaterManagement {
            crop_type: crop,
            soil_type: soil,
            language,
        },
        Command::CropImage { image } => AdviceRequest::CropImage {
            image: Some(ImageUpload::from_path(&image)?),
        },
        Command::Disease { image } => AdviceRequest::Disease {
            image: Some(ImageUpload::from_path(&image)?),
        },
        Command::BioFertilizer {
            crop,
            soil,
            stage,
            language,
        } => AdviceRequest::BioFertilizer {
            crop_type: crop,
            soil_type: soil,
            growth_stage: stage,
            language,
        },
        Command::Schemes { state, category } => AdviceRequest::Schemes { state, category },
        Command::Weather { city } => AdviceRequest::Weather {
            city: city.join(" "),
        },
    };
    handle_request(request, &settings).await
}

#[cfg(feature = "web")]
async fn handle_serve(
    addr: SocketAddr,
    theme: ThemeArg,
    settings: &Settings,
) -> Result<(), Box<dyn Error>> {
    let config = agri_advisor::web::WebConfig {
        addr,
        theme: theme.into(),
        reveal: agri_advisor::RevealConfig {
            char_delay: settings.char_delay,
            ..Default::default()
        },
    };
    agri_advisor::web::serve(config).await?;
    Ok(())
}

#[cfg(not(feature = "web"))]
async fn handle_serve(
    _addr: SocketAddr,
    _theme: ThemeArg,
    _settings: &Settings,
) -> Result<(), Box<dyn Error>> {
    Err("the preview server is disabled. Rebuild with `--features web` to enable it.".into())
}

async fn handle_request(request: AdviceRequest, settings: &Settings) -> Result<(), Box<dyn Error>> {
    let region = request.endpoint().result_region();
    let page = Page::standard();
    if settings.animate {
        page.attach_mirror(region, Box::new(TerminalTarget::default()));
    }
    let backend = HttpBackend::new(&settings.config)?;
    let revealer = Revealer::new(settings.config.reveal, settings.config.retry);
    let handlers = Handlers::new(backend, page, revealer);

    match handlers.submit(request).await {
        HandlerOutcome::Rejected(message) | HandlerOutcome::Failed(message) => Err(message.into()),
        HandlerOutcome::Weather(report) => print_weather(&report, handlers.page(), settings.mode),
        HandlerOutcome::Revealed { fragments, .. } => {
            let html = handlers.page().region_html(region).unwrap_or_default();
            print_fragments(&fragments, &html, settings)
        }
    }
}

async fn handle_format(file: Option<PathBuf>, settings: &Settings) -> Result<(), Box<dyn Error>> {
    let text = match file {
        Some(path) => fs::read_to_string(&path)
            .map_err(|err| format!("Failed to read {}: {err}", path.display()))?,
        None => {
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer)?;
            buffer
        }
    };
    let fragments = format_response(&text);
    if settings.animate {
        let token = RenderToken::default();
        let revealer = Revealer::new(settings.config.reveal, RetryPolicy::disabled());
        revealer
            .reveal(&mut TerminalTarget::default(), &token.begin(), &fragments)
            .await;
    }
    print_fragments(&fragments, &final_html(&fragments), settings)
}

fn print_fragments(
    fragments: &[Fragment],
    html: &str,
    settings: &Settings,
) -> Result<(), Box<dyn Error>> {
    match settings.mode {
        OutputMode::Json => println!("{}", serde_json::to_string_pretty(fragments)?),
        OutputMode::Html => println!("{html}"),
        OutputMode::Plain if settings.animate => println!(),
        OutputMode::Plain => render_markdown_block(&fragments_to_markdown(fragments)),
    }
    Ok(())
}

fn print_weather(
    report: &WeatherReport,
    page: &Page,
    mode: OutputMode,
) -> Result<(), Box<dyn Error>> {
    match mode {
        OutputMode::Json => println!("{}", serde_json::to_string_pretty(report)?),
        OutputMode::Html => {
            for region in [
                TEMPERATURE_REGION,
                HUMIDITY_REGION,
                CONDITIONS_REGION,
                FORECAST_REGION,
            ] {
                println!("<!-- {region} -->");
                println!("{}", page.region_html(region).unwrap_or_default());
            }
        }
        OutputMode::Plain => render_markdown_block(&weather_markdown(report)),
    }
    Ok(())
}

/// Maps fragments back to markdown termimad understands, keeping bold runs.
fn fragments_to_markdown(fragments: &[Fragment]) -> String {
    fragments
        .iter()
        .map(|fragment| match fragment.kind {
            FragmentKind::Break => String::new(),
            FragmentKind::Heading => format!("### {}", fragment.text),
            FragmentKind::Paragraph => plain_text(
                &fragment
                    .markup
                    .replace("<strong>", "**")
                    .replace("</strong>", "**"),
            ),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn weather_markdown(report: &WeatherReport) -> String {
    let temperature = &report.temperature_data;
    let humidity = &report.humidity_data;
    let conditions = &report.weather_conditions;
    let mut lines = vec![
        "### Current Weather".to_string(),
        format!(
            "**Temperature:** {}°C, trending {} (range {}°C - {}°C)",
            temperature.current,
            trend_word(temperature.trend.is_rising()),
            temperature.min,
            temperature.max
        ),
        format!(
            "**Humidity:** {}%, trending {} ({}h of high humidity)",
            humidity.current,
            trend_word(humidity.trend.is_rising()),
            humidity.high_humidity_hours
        ),
        format!(
            "**Conditions:** {}, rain chance {}%, wind {} m/s",
            conditions.current,
            conditions.precipitation_probability,
            report.water_management.wind_speed
        ),
    ];
    if !temperature.forecast.is_empty() {
        lines.push(String::new());
        lines.push("### Forecast".to_string());
        lines.extend(
            temperature
                .forecast
                .iter()
                .map(|point| format!("* {}: {}°C", point.time, point.temp)),
        );
    }
    lines.join("\n")
}

fn trend_word(rising: bool) -> &'static str {
    if rising { "up" } else { "down" }
}

/// Writes revealed text straight to stdout as it grows.
#[derive(Default)]
struct TerminalTarget {
    nodes: Vec<TerminalNode>,
}

struct TerminalNode {
    kind: FragmentKind,
    printed: usize,
}

impl RevealTarget for TerminalTarget {
    fn clear(&mut self) {
        self.nodes.clear();
    }

    fn append_placeholder(&mut self, kind: FragmentKind, _class: &str) -> usize {
        let mut out = io::stdout().lock();
        if !self.nodes.is_empty() {
            let _ = writeln!(out);
        }
        if kind == FragmentKind::Heading {
            let _ = queue!(out, SetAttribute(Attribute::Bold));
        }
        let _ = out.flush();
        self.nodes.push(TerminalNode { kind, printed: 0 });
        self.nodes.len() - 1
    }

    fn set_text(&mut self, index: usize, text: &str) {
        let Some(node) = self.nodes.get_mut(index) else {
            return;
        };
        let fresh: String = text.chars().skip(node.printed).collect();
        node.printed += fresh.chars().count();
        let mut out = io::stdout().lock();
        let _ = write!(out, "{fresh}");
        let _ = out.flush();
    }

    fn set_markup(&mut self, index: usize, _markup: &str) {
        if self
            .nodes
            .get(index)
            .is_some_and(|node| node.kind == FragmentKind::Heading)
        {
            let mut out = io::stdout().lock();
            let _ = queue!(out, SetAttribute(Attribute::Reset));
            let _ = out.flush();
        }
    }

    fn move_cursor(&mut self, _index: Option<usize>) {}
}

fn stdout_is_tty() -> bool {
    atty::is(Stream::Stdout)
}

fn markdown_width() -> usize {
    let (width, _) = terminal_size();
    width.max(60) as usize
}

fn markdown_skin() -> MadSkin {
    MadSkin::default()
}

fn render_markdown_block(body: &str) {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        println!("(empty response)");
        return;
    }
    if stdout_is_tty() {
        let skin = markdown_skin();
        let formatted = FmtText::from(&skin, trimmed, Some(markdown_width()));
        println!("{formatted}");
    } else {
        println!("{trimmed}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_water_with_global_flags() {
        let cli = Cli::try_parse_from([
            "agri-advisor-rs",
            "water",
            "--crop",
            "rice",
            "--soil",
            "clay",
            "--json",
            "-vv",
        ])
        .unwrap();
        assert!(cli.json);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.base_url, DEFAULT_BASE_URL);
        match cli.command {
            Command::Water {
                crop,
                soil,
                language,
            } => {
                assert_eq!((crop.as_str(), soil.as_str()), ("rice", "clay"));
                assert_eq!(language, None);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn serve_defaults_to_bootstrap_and_accepts_tailwind() {
        let cli = Cli::try_parse_from(["agri-advisor-rs", "serve"]).unwrap();
        let Command::Serve { addr, theme } = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(addr, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(theme, ThemeArg::Bootstrap);

        let cli = Cli::try_parse_from([
            "agri-advisor-rs",
            "serve",
            "--addr",
            "0.0.0.0:9000",
            "--theme",
            "tailwind",
        ])
        .unwrap();
        let Command::Serve { addr, theme } = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(addr.port(), 9000);
        assert_eq!(theme, ThemeArg::Tailwind);
        assert!(Cli::try_parse_from(["agri-advisor-rs", "serve", "--theme", "plain"]).is_err());
    }

    #[test]
    fn json_and_html_conflict() {
        assert!(Cli::try_parse_from(["agri-advisor-rs", "format", "--json", "--html"]).is_err());
    }

    #[test]
    fn machine_output_never_animates() {
        let cli =
            Cli::try_parse_from(["agri-advisor-rs", "advice", "when", "to", "sow", "--html"])
                .unwrap();
        let settings = Settings::from_cli(&cli);
        assert_eq!(settings.mode, OutputMode::Html);
        assert!(!settings.animate);
        assert!(settings.config.reveal.char_delay.is_zero());
    }

    #[test]
    fn no_retry_disables_retries() {
        let cli = Cli::try_parse_from(["agri-advisor-rs", "--no-retry", "weather", "Pune"]).unwrap();
        assert_eq!(Settings::from_cli(&cli).config.retry.max_attempts, 0);
    }

    #[test]
    fn markdown_keeps_headings_and_bold() {
        let fragments = format_response("# Soil\n- **pH:** 6.5\n\nDone");
        assert_eq!(
            fragments_to_markdown(&fragments),
            "### Soil\n• **pH:** 6.5\n\nDone"
        );
    }
}
