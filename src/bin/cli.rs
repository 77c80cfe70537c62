//! Sampleterm CLI - command-line client
//!
//! Connects to a device over TCP or a serial line, prints framed responses and
//! sends commands typed on stdin.

use clap::{Args, Parser, Subcommand, ValueEnum};
use sampleterm_core::core::logger::ResponseLog;
use sampleterm_core::core::sample_id;
use sampleterm_core::core::transport::list_ports;
use sampleterm_core::{
    CliResult, Client, ExitCodes, LineEnding, Message, ResponseFormat, SerialConfig,
    SerialFlowControl, SerialParity, Settings, TcpConfig, TextEncoding, TransportParams,
};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Cadence at which the message queue is drained
const DRAIN_INTERVAL: Duration = Duration::from_millis(100);

/// CLI output format
#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Human-readable text
    Text,
    /// One JSON object per line
    Json,
}

/// Sampleterm CLI
#[derive(Parser, Debug)]
#[command(
    name = "sampleterm",
    version,
    about = "Command/response client for lab devices over TCP or serial",
    long_about = None
)]
struct Cli {
    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Quiet mode (errors only)
    #[arg(short, long)]
    quiet: bool,

    /// Settings file (defaults to the platform config directory)
    #[arg(long, env = "SAMPLETERM_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List available serial ports
    ListPorts,

    /// Connect to a TCP host
    Tcp {
        /// Host address
        #[arg(short = 'H', long)]
        host: String,

        /// Port number
        #[arg(short, long, default_value = "23")]
        port: u16,

        /// Connection timeout (seconds)
        #[arg(long, default_value = "5")]
        timeout: u64,

        /// Do not answer or strip Telnet negotiation
        #[arg(long)]
        no_telnet: bool,

        #[command(flatten)]
        session: SessionArgs,
    },

    /// Connect to a serial port
    Serial {
        /// Serial port name (e.g., COM3, /dev/ttyUSB0)
        #[arg(short, long)]
        port: String,

        /// Baud rate
        #[arg(short, long, default_value = "9600")]
        baud: u32,

        /// Data bits (5-8)
        #[arg(long, default_value = "8")]
        data_bits: u8,

        /// Parity (none, odd, even)
        #[arg(long, default_value = "none")]
        parity: SerialParity,

        /// Stop bits (1, 2)
        #[arg(long, default_value = "1")]
        stop_bits: u8,

        /// Flow control (none, hw, sw)
        #[arg(long, default_value = "none")]
        flow: SerialFlowControl,

        #[command(flatten)]
        session: SessionArgs,
    },

    /// Connect using the saved settings
    Connect {
        #[command(flatten)]
        session: SessionArgs,
    },

    /// Find the Sample ID in a text file and show where its log would go
    Identify {
        /// Response text file
        file: PathBuf,

        /// Log root directory
        #[arg(short = 'l', long)]
        log_dir: Option<PathBuf>,
    },

    /// List saved command presets
    Presets,
}

#[derive(Args, Debug)]
struct SessionArgs {
    /// Line ending (cr, lf, crlf)
    #[arg(long)]
    line_ending: Option<LineEnding>,

    /// Text encoding (utf-8, ascii, latin-1)
    #[arg(long)]
    encoding: Option<TextEncoding>,

    /// Show responses as hex dump
    #[arg(long)]
    hex: bool,

    /// Silence (ms) that ends a response
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    idle_ms: Option<u64>,

    /// Log root directory
    #[arg(short = 'l', long)]
    log_dir: Option<PathBuf>,

    /// Send command and exit
    #[arg(short = 'c', long)]
    command: Option<String>,

    /// Send a named preset and exit
    #[arg(long, conflicts_with = "command")]
    preset: Option<String>,

    /// How long to collect responses in command mode (ms)
    #[arg(long, default_value = "3000")]
    wait_ms: u64,

    /// Save the collected responses to the sample log before exiting
    #[arg(long)]
    save: bool,
}

impl SessionArgs {
    fn apply(&self, settings: &mut Settings) {
        if let Some(line_ending) = self.line_ending {
            settings.line_ending = line_ending;
        }
        if let Some(encoding) = self.encoding {
            settings.encoding = encoding;
        }
        if self.hex {
            settings.response_format = ResponseFormat::Hex;
        }
        if let Some(idle_ms) = self.idle_ms {
            settings.idle_timeout_ms = idle_ms;
        }
        if let Some(dir) = &self.log_dir {
            settings.log_dir.clone_from(dir);
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else if cli.quiet {
        tracing::Level::ERROR
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .with_writer(io::stderr)
        .init();

    let result = match run(&cli).await {
        Ok(result) => result,
        Err(e) => CliResult::error(ExitCodes::INTERNAL_ERROR, format!("{:#}", e)),
    };

    if let Some(msg) = result.message() {
        if result.is_success() {
            if !cli.quiet {
                eprintln!("{}", msg);
            }
        } else {
            eprintln!("Error: {}", msg);
        }
    }
    result.to_exit_code()
}

async fn run(cli: &Cli) -> anyhow::Result<CliResult> {
    let loaded = match &cli.config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    };
    let mut settings = match loaded {
        Ok(settings) => settings,
        Err(e) => return Ok(e.into()),
    };

    let (params, session) = match &cli.command {
        Commands::ListPorts => return list_serial_ports(cli),
        Commands::Identify { file, log_dir } => {
            if let Some(dir) = log_dir {
                settings.log_dir.clone_from(dir);
            }
            return identify_file(cli, &settings, file);
        }
        Commands::Presets => return show_presets(cli, &settings),
        Commands::Tcp {
            host,
            port,
            timeout,
            no_telnet,
            session,
        } => {
            settings.tcp = TcpConfig::new(host, *port)
                .timeout(*timeout)
                .telnet(!*no_telnet);
            (TransportParams::Tcp(settings.tcp.clone()), session)
        }
        Commands::Serial {
            port,
            baud,
            data_bits,
            parity,
            stop_bits,
            flow,
            session,
        } => {
            settings.serial = SerialConfig::new(port, *baud)
                .data_bits(*data_bits)
                .parity(*parity)
                .stop_bits(*stop_bits)
                .flow_control(*flow);
            (TransportParams::Serial(settings.serial.clone()), session)
        }
        Commands::Connect { session } => (settings.transport_params(), session),
    };

    session.apply(&mut settings);
    run_session(cli, &settings, &params, session).await
}

fn list_serial_ports(cli: &Cli) -> anyhow::Result<CliResult> {
    let ports = match list_ports() {
        Ok(ports) => ports,
        Err(e) => return Ok(e.into()),
    };

    match cli.format {
        OutputFormat::Json => {
            let json: Vec<serde_json::Value> = ports
                .iter()
                .map(|p| {
                    serde_json::json!({
                        "name": p.port_name,
                        "type": format!("{:?}", p.port_type)
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Text => {
            if ports.is_empty() && !cli.quiet {
                println!("No serial ports found.");
            }
            for port in &ports {
                println!("{}", port.port_name);
            }
        }
    }

    Ok(CliResult::success())
}

fn identify_file(cli: &Cli, settings: &Settings, file: &Path) -> anyhow::Result<CliResult> {
    let bytes = match std::fs::read(file) {
        Ok(bytes) => bytes,
        Err(e) => return Ok(e.into()),
    };
    let text = settings.encoding.decode_lossy(&bytes);

    let Some(found) = sample_id::classify(&text, &settings.log_dir) else {
        return Ok(CliResult::error(
            ExitCodes::PATTERN_NOT_FOUND,
            format!("No Sample ID in {}", file.display()),
        ));
    };

    match cli.format {
        OutputFormat::Json => println!("{}", serde_json::to_string(&found)?),
        OutputFormat::Text => {
            println!("Sample ID: {}", found.id.raw);
            println!("Sanitized: {}", found.id.sanitized);
            println!("Category:  {}", found.id.category);
            println!("Log path:  {}", found.path.display());
        }
    }

    Ok(CliResult::success())
}

fn show_presets(cli: &Cli, settings: &Settings) -> anyhow::Result<CliResult> {
    match cli.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&settings.presets)?),
        OutputFormat::Text => {
            for (name, command) in &settings.presets {
                println!("{:<16} {}", name, command);
            }
        }
    }
    Ok(CliResult::success())
}

async fn run_session(
    cli: &Cli,
    settings: &Settings,
    params: &TransportParams,
    args: &SessionArgs,
) -> anyhow::Result<CliResult> {
    let mut client = Client::new();
    if let Err(e) = client
        .connect(params, settings.framing(), settings.command_format())
        .await
    {
        return Ok(e.into());
    }

    if !cli.quiet {
        if let Some(connection) = client.connection() {
            eprintln!("Connected to {}.", connection.connection_info());
        }
    }

    let mut log = ResponseLog::new(settings.encoding);

    let one_shot = match (&args.command, &args.preset) {
        (Some(command), _) => Some(command.clone()),
        (None, Some(name)) => match settings.preset(name) {
            Some(command) => Some(command.to_string()),
            None => {
                client.disconnect().await;
                return Ok(CliResult::error(
                    ExitCodes::INVALID_ARGS,
                    format!("Unknown preset: {}", name),
                ));
            }
        },
        (None, None) => None,
    };

    let result = match one_shot {
        Some(command) => run_command(cli, settings, args, &mut client, &mut log, &command).await,
        None => run_interactive(cli, settings, &mut client, &mut log).await,
    };

    client.disconnect().await;
    Ok(result)
}

async fn run_command(
    cli: &Cli,
    settings: &Settings,
    args: &SessionArgs,
    client: &mut Client,
    log: &mut ResponseLog,
    command: &str,
) -> CliResult {
    if let Err(e) = client.send(command).await {
        return e.into();
    }
    log.record_sent(command);

    let deadline = tokio::time::Instant::now() + Duration::from_millis(args.wait_ms);
    let mut ticker = tokio::time::interval(DRAIN_INTERVAL);
    while tokio::time::Instant::now() < deadline {
        ticker.tick().await;
        for message in client.poll().await {
            print_message(cli, settings, &message);
            log.record(&message);
        }
        if client.connection().is_none() {
            break;
        }
    }

    if args.save {
        match log.save(&settings.log_dir) {
            Ok(saved) => {
                return CliResult::success_with_message(format!(
                    "Saved log to {}",
                    saved.path.display()
                ))
            }
            Err(e) => return e.into(),
        }
    }

    CliResult::success()
}

async fn run_interactive(
    cli: &Cli,
    settings: &Settings,
    client: &mut Client,
    log: &mut ResponseLog,
) -> CliResult {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || r.store(false, Ordering::SeqCst)) {
        return CliResult::error(ExitCodes::INTERNAL_ERROR, e.to_string());
    }

    if !cli.quiet {
        eprintln!("Type commands, :preset NAME, :save or :quit. Ctrl+C exits.");
    }

    // Blocking stdin reader feeding the async loop
    let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();
    std::thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if line_tx.send(line).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    let mut ticker = tokio::time::interval(DRAIN_INTERVAL);
    while running.load(Ordering::SeqCst) {
        ticker.tick().await;

        for message in client.poll().await {
            print_message(cli, settings, &message);
            log.record(&message);
        }
        if client.connection().is_none() {
            return CliResult::error(ExitCodes::CONNECTION_LOST, "Connection lost");
        }

        while let Ok(line) = line_rx.try_recv() {
            let line = line.trim();
            let command = match line.split_once(' ') {
                _ if line == ":quit" => return CliResult::success(),
                _ if line == ":save" => {
                    match log.save(&settings.log_dir) {
                        Ok(saved) => {
                            eprintln!("Saved log to {}", saved.path.display());
                            log.clear();
                        }
                        Err(e) => eprintln!("Error: {}", e),
                    }
                    continue;
                }
                Some((":preset", name)) => match settings.preset(name.trim()) {
                    Some(command) => command.to_string(),
                    None => {
                        eprintln!("Unknown preset: {}", name.trim());
                        continue;
                    }
                },
                _ => line.to_string(),
            };

            match client.send(&command).await {
                Ok(_) => log.record_sent(&command),
                Err(e) => eprintln!("Error: {}", e),
            }
        }
    }

    CliResult::success()
}

fn print_message(cli: &Cli, settings: &Settings, message: &Message) {
    let timestamp = message.enqueued_at().format("%H:%M:%S%.3f");

    match cli.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "timestamp": message.enqueued_at().to_rfc3339(),
                    "kind": message.kind(),
                    "text": message.text(settings.encoding),
                })
            );
        }
        OutputFormat::Text if message.is_error() => {
            eprintln!("[{}] !! {}", timestamp, message.text(settings.encoding));
        }
        OutputFormat::Text => {
            let body = settings
                .response_format
                .render(message.payload(), settings.encoding);
            let mut stdout = io::stdout().lock();
            let _ = writeln!(stdout, "[{}] {}", timestamp, body.trim_end());
            let _ = stdout.flush();
        }
    }
}
