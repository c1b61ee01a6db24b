//! `crowdbike` - CLI for the crowdbike logger
//!
//! This binary runs the sampling loop on the bike and provides the
//! commands used to set up, test and read out a logger.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::fmt::Display;
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use chrono::Utc;
use clap::Parser;
use tracing::{info, warn};

use crowdbike::cli::{
    Cli, Command, ConfigCommand, ExportCommand, GpsCommand, RecordCommand, StatusCommand,
    VapourCommand,
};
use crowdbike::gps::{self, FixHandle, GpsFix, PositionSource};
use crowdbike::physics::{round_to, saturation_vapour_pressure, vapour_pressure};
use crowdbike::record::{logfile_name, Identity};
use crowdbike::recorder::{shutdown_signal, Recorder};
use crowdbike::sensor::{ClimateSensor, StopHandle};
use crowdbike::sink::{export_csv, CsvLog, StorageSink};
use crowdbike::{doctor, hardware, init_logging, Config, Storage};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    let config_path = cli.config;

    // Execute the command
    match cli.command {
        Command::Record(cmd) => handle_record(Config::load_from(config_path)?, &cmd).await,
        Command::Read(cmd) => handle_read(&Config::load_from(config_path)?, cmd.json).await,
        Command::Vapour(cmd) => handle_vapour(&cmd),
        Command::Gps(cmd) => handle_gps(&Config::load_from(config_path)?, &cmd).await,
        Command::Status(cmd) => handle_status(&Config::load_from(config_path)?, &cmd),
        Command::Export(cmd) => handle_export(&Config::load_from(config_path)?, &cmd),
        Command::Config(cmd) => handle_config(config_path, cmd),
        Command::Doctor => handle_doctor(&Config::load_from(config_path)?).await,
    }
}

/// Spawn `source` on the runtime, feeding `fix` until `stop` fires.
fn spawn_position_source(
    mut source: Box<dyn PositionSource>,
    fix: &FixHandle,
    stop: &StopHandle,
) -> tokio::task::JoinHandle<crowdbike::Result<()>> {
    let fix = fix.clone();
    let stop = stop.clone();
    tokio::spawn(async move { source.run(fix, stop).await })
}

async fn join_position_source(task: tokio::task::JoinHandle<crowdbike::Result<()>>) {
    match task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "GPS source failed"),
        Err(e) => warn!(error = %e, "GPS task did not finish cleanly"),
    }
}

async fn handle_record(mut config: Config, cmd: &RecordCommand) -> anyhow::Result<()> {
    if cmd.no_csv {
        config.storage.csv_enabled = false;
    }
    if cmd.no_db {
        config.storage.database_enabled = false;
    }
    config.validate()?;

    let started = Utc::now();
    let identity = Identity {
        bike_id: config.user.bike_nr.clone(),
        student: config.user.studentname.clone(),
        mac: hardware::device_mac(&config.user.network_interface),
    };

    let climate =
        hardware::open_climate_sensor(&config.dht22).context("cannot open the DHT22")?;
    let particulate = hardware::open_particulate_sensor(&config.pm_sensor)
        .context("cannot open the particulate sensor")?;
    let source = hardware::position_source(&config.gps)?;

    let fix = FixHandle::new();
    let mut recorder = Recorder::new(
        identity.clone(),
        config.calibration.to_calibration(),
        climate,
        fix.clone(),
        config.sampling_interval(),
    );
    if let Some(sensor) = particulate {
        recorder = recorder.with_particulate_sensor(sensor);
    }

    let mut logfile = None;
    if config.storage.csv_enabled {
        let log = CsvLog::create(&config.logfile_dir(), &logfile_name(&identity, started))?;
        logfile = Some(log.path().display().to_string());
        recorder = recorder.with_sink(Box::new(log));
    }

    let mut session = None;
    if config.storage.database_enabled {
        let storage = Storage::open(config.database_path())?;
        if let Some(max_age) = config.max_age() {
            storage.prune_older_than(chrono::Duration::from_std(max_age)?)?;
        }
        let id = storage.begin_session(&identity, started, logfile.as_deref())?;
        session = Some(id);
        recorder = recorder.with_sink(Box::new(StorageSink::new(storage, id)));
    }

    let stop = StopHandle::new();
    let gps_task = spawn_position_source(source, &fix, &stop);
    let signal_task = {
        let stop = stop.clone();
        tokio::spawn(async move {
            match shutdown_signal().await {
                Ok(()) => stop.stop(),
                Err(e) => warn!(error = %e, "Cannot listen for shutdown signals"),
            }
        })
    };

    info!(
        bike = %identity.bike_id,
        student = %identity.student,
        gps = %config.gps.source,
        "Recording"
    );
    let summary = recorder.run(&stop, cmd.samples).await;

    stop.stop();
    signal_task.abort();
    join_position_source(gps_task).await;

    println!("Recording finished");
    println!("  Ticks:              {}", summary.ticks);
    println!("  Records written:    {}", summary.written);
    println!("  Skipped (no fix):   {}", summary.skipped_no_fix);
    println!("  Climate failures:   {}", summary.climate_failures);
    if config.pm_sensor.enabled {
        println!("  PM failures:        {}", summary.pm_failures);
    }
    if summary.sink_failures > 0 {
        println!("  Sink failures:      {}", summary.sink_failures);
    }
    if let Some(path) = &logfile {
        println!("  CSV log:            {path}");
    }
    if let Some(id) = session {
        println!("  Session:            {id}");
    }
    Ok(())
}

async fn handle_read(config: &Config, json: bool) -> anyhow::Result<()> {
    let mut sensor = hardware::open_climate_sensor(&config.dht22)?;
    let reading = sensor.read().await?;
    let climate = config.calibration.to_calibration().apply(reading);

    if json {
        println!("{}", serde_json::to_string_pretty(&climate)?);
    } else {
        println!(
            "Temperature:     {:.1} °C (raw {:.1} °C)",
            climate.temperature, climate.temperature_raw
        );
        println!(
            "Humidity:        {:.1} % (raw {:.1} %)",
            climate.rel_humidity, climate.rel_humidity_raw
        );
        println!("Vapour pressure: {:.3} kPa", climate.vapour_pressure);
    }
    Ok(())
}

fn handle_vapour(cmd: &VapourCommand) -> anyhow::Result<()> {
    if !cmd.temperature.is_finite() {
        bail!("temperature must be a finite number");
    }
    if !(0.0..=100.0).contains(&cmd.humidity) {
        bail!("humidity must be between 0 and 100 %");
    }

    let saturation = saturation_vapour_pressure(cmd.temperature);
    let es = round_to(saturation, 5);
    let ea = round_to(vapour_pressure(cmd.humidity, saturation), 5);

    if cmd.json {
        let result = serde_json::json!({
            "temperature": cmd.temperature,
            "rel_humidity": cmd.humidity,
            "saturation_vapour_pressure": es,
            "vapour_pressure": ea,
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("Saturation vapour pressure: {es} kPa");
        println!("Vapour pressure:            {ea} kPa");
    }
    Ok(())
}

async fn handle_gps(config: &Config, cmd: &GpsCommand) -> anyhow::Result<()> {
    let source = hardware::position_source(&config.gps)?;
    let fix = FixHandle::new();
    let stop = StopHandle::new();

    info!(source = source.name(), timeout_secs = cmd.timeout, "Waiting for GPS fix");
    let task = spawn_position_source(source, &fix, &stop);
    let result = gps::wait_for_fix(&fix, Duration::from_secs(cmd.timeout)).await;
    stop.stop();
    join_position_source(task).await;

    let current = result?;
    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&current)?);
    } else {
        print_fix(&current);
    }
    Ok(())
}

fn print_fix(fix: &GpsFix) {
    println!("Mode:       {}", fix.mode);
    println!("Time:       {}", show(fix.time.map(|t| t.to_rfc3339())));
    println!("Latitude:   {}", show(fix.latitude));
    println!("Longitude:  {}", show(fix.longitude));
    println!("Altitude:   {} m", show(fix.altitude));
    println!(
        "Speed:      {} km/h",
        show(fix.speed_kmh.map(|s| round_to(s, 2)))
    );
    println!("Satellites: {}", show(fix.satellites));
}

fn show<T: Display>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

fn handle_status(config: &Config, cmd: &StatusCommand) -> anyhow::Result<()> {
    let path = config.database_path();
    if !path.exists() {
        if cmd.json {
            let status = serde_json::json!({
                "database_path": path,
                "exists": false,
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
        } else {
            println!("No database at {} yet.", path.display());
        }
        return Ok(());
    }

    let storage = Storage::open(&path)?;
    let stats = storage.stats()?;
    let sessions = storage.list_sessions(cmd.limit)?;

    if cmd.json {
        let status = serde_json::json!({
            "database_path": path,
            "exists": true,
            "stats": stats,
            "sessions": sessions,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("crowdbike status");
    println!("----------------");
    println!("Database:      {}", path.display());
    println!("Size:          {} bytes", stats.db_size_bytes);
    println!("Sessions:      {}", stats.total_sessions);
    println!("Records:       {}", stats.total_records);
    println!(
        "First sample:  {}",
        show(stats.first_sample.map(|t| t.format("%Y-%m-%d %H:%M:%S")))
    );
    println!(
        "Last sample:   {}",
        show(stats.last_sample.map(|t| t.format("%Y-%m-%d %H:%M:%S")))
    );

    if !sessions.is_empty() {
        println!();
        println!("Recent sessions:");
        for session in &sessions {
            println!(
                "  #{:<5} {}  bike {:<6} {:<12} {:>6} records",
                session.id,
                session.started_at.format("%Y-%m-%d %H:%M"),
                session.bike_id,
                session.student,
                session.records,
            );
        }
    }
    Ok(())
}

fn handle_export(config: &Config, cmd: &ExportCommand) -> anyhow::Result<()> {
    let storage = Storage::open(config.database_path())?;
    let session = match cmd.session {
        Some(id) => storage
            .get_session(id)?
            .with_context(|| format!("no session with id {id}"))?,
        None => storage
            .latest_session()?
            .context("no sessions have been recorded yet")?,
    };

    let records = storage.session_records(session.id)?;
    let rows = match &cmd.output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("cannot create {}", path.display()))?;
            export_csv(&records, BufWriter::new(file))?
        }
        None => export_csv(&records, std::io::stdout().lock())?,
    };

    info!(session = session.id, rows, "Exported session");
    Ok(())
}

fn handle_config(config_path: Option<PathBuf>, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            let config = Config::load_from(config_path)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                print_config(&config);
            }
        }
        ConfigCommand::Path => {
            println!(
                "{}",
                config_path
                    .unwrap_or_else(Config::default_config_path)
                    .display()
            );
        }
        ConfigCommand::Validate { file } => {
            let path = file
                .or(config_path)
                .unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => bail!("configuration error: {e}"),
            }
        }
    }
    Ok(())
}

fn print_config(config: &Config) {
    println!("Current Configuration");
    println!("=====================");
    println!();
    println!("[User]");
    println!("  Bike:               {}", config.user.bike_nr);
    println!("  Student:            {}", config.user.studentname);
    println!("  Log directory:      {}", config.logfile_dir().display());
    println!("  Sampling rate (s):  {}", config.user.sampling_rate);
    println!("  Network interface:  {}", config.user.network_interface);
    println!();
    println!("[Calibration]");
    println!(
        "  Temperature:        a1 = {}, a0 = {}",
        config.calibration.temp_cal_a1, config.calibration.temp_cal_a0
    );
    println!(
        "  Humidity:           a1 = {}, a0 = {}",
        config.calibration.hum_cal_a1, config.calibration.hum_cal_a0
    );
    println!();
    println!("[Sensors]");
    println!("  DHT22 GPIO (BCM):   {}", config.dht22.gpio_pin);
    println!("  DHT22 retries:      {}", config.dht22.retries);
    if config.pm_sensor.enabled {
        println!(
            "  SDS011:             {} @ {} baud",
            config.pm_sensor.device, config.pm_sensor.baud_rate
        );
    } else {
        println!("  SDS011:             disabled");
    }
    println!();
    println!("[GPS]");
    println!("  Source:             {}", config.gps.source);
    match config.gps.source {
        crowdbike::config::GpsSourceKind::Gpsd => {
            println!("  gpsd:               {}", config.gpsd_address());
        }
        crowdbike::config::GpsSourceKind::Nmea => {
            println!(
                "  Serial:             {} @ {} baud",
                config.gps.serial_device, config.gps.baud_rate
            );
        }
    }
    println!();
    println!("[Storage]");
    println!("  Database path:      {}", config.database_path().display());
    println!("  CSV log:            {}", config.storage.csv_enabled);
    println!("  Database:           {}", config.storage.database_enabled);
    println!("  Max age (days):     {}", config.storage.max_age_days);
}

async fn handle_doctor(config: &Config) -> anyhow::Result<()> {
    let checks = doctor::run_checks(config).await;
    for check in &checks {
        println!("{check}");
    }

    let failed = checks.iter().filter(|c| !c.ok).count();
    if failed > 0 {
        bail!("{failed} of {} checks failed", checks.len());
    }
    println!();
    println!("All {} checks passed.", checks.len());
    Ok(())
}
