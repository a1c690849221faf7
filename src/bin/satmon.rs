use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use colored::*;
use satmon::config::{Config, StoreConfig};
use satmon::frame::{self, TelemetryRecord};
use satmon::health::Severity;
use satmon::{HealthEvaluator, IngestListener, IngestStats, Pipeline, StoreHandle};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::{error, info, Level};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("satmon")
        .version("0.1.0")
        .author("Space Systems Engineering Team")
        .about("🛰️  Satellite housekeeping telemetry monitor")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("JSON configuration file")
                .takes_value(true)
                .global(true),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Enable debug logging")
                .global(true),
        )
        .subcommand(
            SubCommand::with_name("listen")
                .about("📡 Run the UDP ingest service until Ctrl+C")
                .arg(
                    Arg::with_name("bind")
                        .short("b")
                        .long("bind")
                        .value_name("ADDR")
                        .help("Listener address, e.g. 0.0.0.0:5005")
                        .takes_value(true)
                        .validator(|v| match v.parse::<SocketAddr>() {
                            Ok(_) => Ok(()),
                            Err(_) => Err("Bind address must be HOST:PORT".into()),
                        }),
                )
                .arg(
                    Arg::with_name("sqlite")
                        .long("sqlite")
                        .value_name("PATH")
                        .help("Persist to a SQLite database instead of memory")
                        .takes_value(true),
                ),
        )
        .subcommand(
            SubCommand::with_name("decode")
                .about("🔍 Decode one hex frame and show the alerts it would raise")
                .arg(
                    Arg::with_name("hex")
                        .help("Hex-encoded frame")
                        .required(true),
                ),
        )
        .subcommand(
            SubCommand::with_name("crc")
                .about("🧮 Compute the frame CRC-16 of hex bytes")
                .arg(
                    Arg::with_name("hex")
                        .help("Hex-encoded bytes")
                        .required(true),
                ),
        )
        .get_matches();

    let level = if matches.is_present("verbose") { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).init();

    let config = match matches.value_of("config") {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    match matches.subcommand() {
        ("listen", Some(sub)) => handle_listen(sub, config).await,
        ("decode", Some(sub)) => handle_decode(sub, &config),
        ("crc", Some(sub)) => handle_crc(sub),
        _ => Ok(()),
    }
}

async fn handle_listen(matches: &ArgMatches<'_>, mut config: Config) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(bind) = matches.value_of("bind") {
        config.listener.bind = bind.parse()?;
    }
    if let Some(path) = matches.value_of("sqlite") {
        config.store = StoreConfig::Sqlite { path: PathBuf::from(path) };
    }
    config.validate()?;

    let store = StoreHandle::open(&config.store)?;
    let pipeline = Pipeline::new(store, config.evaluator()?).with_retry(config.retry);

    let listener = match IngestListener::bind(config.listener.bind, pipeline, config.listener.max_datagram_bytes).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, "startup aborted");
            eprintln!("{} {}", "❌".red(), e.to_string().bright_red());
            return Err(e.into());
        }
    };

    println!("{}", "🛰️  Satellite Telemetry Monitor".bright_blue().bold());
    println!("   UDP listener : {}", listener.local_addr().to_string().bright_white());
    println!("   Store        : {}", describe_store(&config.store).bright_white());
    println!("   Rules        : {}", config.rules.len().to_string().bright_white());

    let shutdown = listener.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl+C received, shutting down");
            shutdown.shutdown();
        }
    });

    let stats = listener.run().await?;
    print_stats(&stats);
    Ok(())
}

fn handle_decode(matches: &ArgMatches<'_>, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let text = matches.value_of("hex").unwrap_or_default();

    let record = match frame::decode_hex(text).and_then(|bytes| frame::decode(&bytes)) {
        Ok(record) => record,
        Err(e) => {
            println!("{} {} ({})", "❌".red(), e.to_string().bright_red(), e.kind());
            return Err(e.into());
        }
    };

    print_record(&record);

    let evaluator: HealthEvaluator = config.evaluator()?;
    let alerts = evaluator.evaluate(&record);
    if alerts.is_empty() {
        println!("{} {}", "✅".green(), "All readings nominal".bright_green());
    }
    for alert in &alerts {
        let label = match alert.severity {
            Severity::Warning => alert.severity.as_str().yellow().bold(),
            Severity::Critical => alert.severity.as_str().red().bold(),
        };
        println!("{} {}", label, alert.message);
    }
    Ok(())
}

fn handle_crc(matches: &ArgMatches<'_>) -> Result<(), Box<dyn std::error::Error>> {
    let bytes = frame::decode_hex(matches.value_of("hex").unwrap_or_default())?;
    println!("0x{:04X}", frame::crc16(&bytes));
    Ok(())
}

fn describe_store(store: &StoreConfig) -> String {
    match store {
        StoreConfig::Memory => "memory".to_string(),
        StoreConfig::Sqlite { path } => format!("sqlite ({})", path.display()),
    }
}

fn print_record(record: &TelemetryRecord) {
    println!("{}", "🛰️  Housekeeping Frame".bright_blue().bold());
    println!("   Satellite ID    : {}", record.satellite_id.to_string().bright_white());
    println!("   Timestamp       : {}", record.timestamp.to_string().bright_white());
    println!("   Battery voltage : {} mV", record.battery_voltage_mv.to_string().bright_cyan());
    println!("   Battery temp    : {} °C", record.battery_temp_c.to_string().bright_cyan());
    println!("   MSI temperature : {} °C", record.msi_temperature_c.to_string().bright_cyan());
    println!("   SSR used        : {} MB", record.ssr_used_mb.to_string().bright_cyan());
    println!("   Checksum        : {}", "valid".green());
}

fn print_stats(stats: &IngestStats) {
    println!("\n{}", "📊 Ingest Statistics".bright_white().bold());
    println!("   Received        : {}", stats.received);
    println!("   Decoded         : {}", stats.decoded);
    println!("   Ingested        : {}", stats.ingested.to_string().green());
    println!("   Dropped         : {}", stats.dropped.total().to_string().yellow());
    println!("     truncated         {}", stats.dropped.truncated);
    println!("     bad sync          {}", stats.dropped.bad_sync);
    println!("     bad length        {}", stats.dropped.bad_length);
    println!("     unsupported type  {}", stats.dropped.unsupported_type);
    println!("     checksum mismatch {}", stats.dropped.checksum_mismatch);
    println!("     hex decode        {}", stats.dropped.hex_decode);
    println!("     unverified        {}", stats.dropped.unverified);
    println!("   Alerts created  : {}", stats.alerts_created.to_string().red());
    println!("   Alert duplicates: {}", stats.alerts_duplicate);
    println!(
        "   Store failures  : {} records, {} alerts",
        stats.record_store_failures, stats.alert_store_failures
    );
    println!("{}", "🚀 Satellite Telemetry Monitor stopped".bright_blue());
}
