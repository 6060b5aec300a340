use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use gcodelink::{
    connect, event_bus, init_logging, list_ports, AppEvent, Config, ConnectionEvent, EventCategory,
    EventFilter, LineTransport, ProtocolVariant, SerialTransport, Session, StreamEvent,
    TelemetryEvent, UploadSource,
};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "Flow-controlled G-code streamer", long_about = None)]
struct Args {
    /// Serial port (overrides the config file)
    #[arg(short, long, global = true)]
    port: Option<String>,

    /// Baud rate (overrides the config file)
    #[arg(short, long, global = true)]
    baud: Option<u32>,

    /// Path to a TOML or JSON config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Expected protocol variant: generic, grbl, g2core
    #[arg(long, global = true)]
    variant: Option<ProtocolVariant>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List serial ports that look like CNC controllers
    Ports,
    /// Upload a G-code file
    Stream {
        /// File to upload
        file: PathBuf,
    },
    /// Forward stdin lines to the controller
    Console,
}

fn main() {
    let args = Args::parse();

    if let Err(e) = init_logging(args.verbose) {
        eprintln!("{}", e);
    }

    if let Err(e) = run(args) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    let mut config = Config::load_or_default(args.config.as_deref())
        .context("failed to load configuration")?;
    if let Some(port) = args.port {
        config.connection.port = port;
    }
    if let Some(baud) = args.baud {
        config.connection.baud_rate = baud;
    }
    if let Some(variant) = args.variant {
        config.streaming.variant = variant;
    }
    config.validate()?;

    match args.command {
        Command::Ports => print_ports(),
        Command::Stream { file } => stream(&config, file),
        Command::Console => console(&config),
    }
}

fn print_ports() -> anyhow::Result<()> {
    let ports = list_ports()?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        match port.usb_ids {
            Some((vid, pid)) => println!(
                "{}\t{}\t{:04x}:{:04x}",
                port.port_name, port.description, vid, pid
            ),
            None => println!("{}\t{}", port.port_name, port.description),
        }
    }
    Ok(())
}

fn open_session(config: &Config) -> anyhow::Result<Session> {
    let bus = event_bus();
    bus.subscribe(
        EventFilter::Categories(vec![
            EventCategory::Connection,
            EventCategory::Telemetry,
            EventCategory::Stream,
        ]),
        print_event,
    );

    let session = connect(config.session_config(), bus, || {
        Arc::new(SerialTransport::new()) as Arc<dyn LineTransport>
    })
    .with_context(|| format!("failed to connect to {}", config.connection.port))?;
    info!("Session open ({})", session.variant());
    Ok(session)
}

fn print_event(event: AppEvent) {
    match &event {
        AppEvent::Telemetry(TelemetryEvent::BufferStatus { .. })
        | AppEvent::Stream(StreamEvent::ProgressLine(_)) => {
            tracing::debug!("{}", event.description())
        }
        AppEvent::Telemetry(TelemetryEvent::Echo(text)) => println!("{}", text),
        AppEvent::Telemetry(TelemetryEvent::Ack) => println!("ok"),
        AppEvent::Connection(ConnectionEvent::ConnectionFailed { .. })
        | AppEvent::Stream(StreamEvent::Failed { .. }) => error!("{}", event.description()),
        _ => info!("{}", event.description()),
    }
}

fn stream(config: &Config, file: PathBuf) -> anyhow::Result<()> {
    let source = UploadSource::from_file(&file)
        .with_context(|| format!("cannot read {}", file.display()))?
        .with_options(config.source_options());

    let mut session = open_session(config)?;
    session.start_upload(source)?;
    session.wait_for_upload()?;
    session.close()?;
    Ok(())
}

fn console(config: &Config) -> anyhow::Result<()> {
    let mut session = open_session(config)?;
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        if !session.is_alive() {
            break;
        }
        match line.trim() {
            "exit" | "quit" => break,
            command => {
                if let Err(e) = session.send_command(command) {
                    error!("{}", e);
                }
            }
        }
    }
    session.close()?;
    Ok(())
}
