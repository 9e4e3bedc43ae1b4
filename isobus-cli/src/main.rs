//! ISOBUS Decoder CLI Application
//!
//! This is the command-line front end for the isobus-decoder library.
//! It adds what the library leaves to its callers:
//! - Loading definition files (TOML/JSON/CSV) into a definition table
//! - Reading frame logs from a file or stdin
//! - Writing decoded frames as JSON lines or text
//! - Parallel decoding for logs without multi-frame messages

use anyhow::{bail, Context, Result};
use clap::Parser;
use isobus_decoder::{decode_at, Decoder, FrameRecord};
use rayon::prelude::*;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;

mod config;
mod input;
mod loader;
mod report;

use config::AppConfig;
use report::{FrameWriter, OutputFormat, Summary};

/// ISOBUS Decoder - Decode proprietary ISOBUS/J1939 frames
#[derive(Parser, Debug)]
#[command(name = "isobus-cli")]
#[command(about = "Decode proprietary ISOBUS/J1939 CAN frames into physical values", long_about = None)]
#[command(version)]
struct Args {
    /// Path to definition file(s), TOML, JSON or CSV (can be repeated)
    #[arg(short, long, value_name = "FILE")]
    definitions: Vec<PathBuf>,

    /// Frame log to decode (default: stdin)
    #[arg(short, long, value_name = "FILE")]
    input: Option<PathBuf>,

    /// Output file for decoded frames (default: stdout)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Path to configuration file (config.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum)]
    format: Option<OutputFormat>,

    /// Do not print frames that match no definition
    #[arg(long)]
    skip_unknown: bool,

    /// Decode frames in parallel (disables multi-frame reassembly)
    #[arg(long)]
    parallel: bool,

    /// Maximum number of frames to decode
    #[arg(long, value_name = "COUNT")]
    max_frames: Option<usize>,

    /// Verbosity level (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.verbose, args.quiet);

    log::info!("ISOBUS Decoder CLI v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Using decoder library v{}", isobus_decoder::VERSION);

    let config = match &args.config {
        Some(path) => {
            log::info!("Loading configuration from: {:?}", path);
            config::load_config(path)?
        }
        None => AppConfig::default(),
    };

    let summary = run(&args, config)?;
    log::info!("Done: {}", summary);
    Ok(())
}

/// Load definitions, decode the frame log, write results
fn run(args: &Args, config: AppConfig) -> Result<Summary> {
    // Flags override config: -d replaces [input].definitions
    let definition_paths = if args.definitions.is_empty() {
        &config.input.definitions
    } else {
        &args.definitions
    };
    if definition_paths.is_empty() {
        bail!("No definition files given (use --definitions or [input].definitions)");
    }

    let table = loader::load_table(definition_paths)?;
    let stats = table.stats();
    log::info!(
        "Definition table: {} definitions, {} fields",
        stats.num_definitions,
        stats.num_fields
    );

    let decoder = Decoder::with_config(table, config.decoder.clone());

    let reader: Box<dyn BufRead> = match args.input.as_ref().or(config.input.frames.as_ref()) {
        Some(path) => {
            log::info!("Decoding frame log: {:?}", path);
            Box::new(BufReader::new(
                File::open(path).with_context(|| format!("Failed to open frame log: {:?}", path))?,
            ))
        }
        None => {
            log::info!("Decoding frames from stdin");
            Box::new(BufReader::new(io::stdin()))
        }
    };

    let out: Box<dyn Write> = match args.output.as_ref().or(config.output.path.as_ref()) {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("Failed to create output file: {:?}", path))?,
        )),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };

    let format = args.format.unwrap_or(config.output.format);
    let skip_unknown = args.skip_unknown || config.output.skip_unknown;
    let mut writer = FrameWriter::new(out, format, skip_unknown);

    let mut input_errors = 0usize;
    let records = input::read_records(reader)
        .filter_map(|record| match record {
            Ok(record) => Some(record),
            Err(e) => {
                log::warn!("Skipping input: {}", e);
                input_errors += 1;
                None
            }
        })
        .take(args.max_frames.unwrap_or(usize::MAX));

    if args.parallel {
        decode_parallel(&decoder, records.collect(), &mut writer)?;
    } else {
        for result in decoder.decode_stream(records) {
            writer.write(result)?;
        }
    }

    for _ in 0..input_errors {
        writer.record_input_error();
    }
    writer.finish()
}

/// Decode all records against one table snapshot using the rayon pool
///
/// Results are written in input order. Multi-frame PGNs are decoded frame
/// by frame, so they only match definitions written for single fragments.
fn decode_parallel<W: Write>(
    decoder: &Decoder,
    records: Vec<FrameRecord>,
    writer: &mut FrameWriter<W>,
) -> Result<()> {
    let table = decoder.table();
    log::debug!("Decoding {} frames in parallel", records.len());

    let results: Vec<_> = records
        .par_iter()
        .map(|record| decode_at(&record.hex, record.timestamp, &table))
        .collect();

    for result in results {
        writer.write(result)?;
    }
    Ok(())
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    const DEFINITIONS: &str = r#"
        [[definition]]
        pgn = 65267
        manufacturer = "John Deere"
        source_address = 28
        pgn_length_bytes = 8

        [[definition.fields]]
        spn_name = "Latitude"
        start_position = "1.1"
        bit_length = 32
        scale_factor = 1e-7
        offset = -210.0

        [[definition.fields]]
        spn_name = "Longitude"
        start_position = "5.1"
        bit_length = 32
        scale_factor = 1e-7
        offset = -210.0
    "#;

    const FRAMES: &str = "\
        # sample\n\
        0.5\t18FEF31C3D422397722E724B\n\
        0.6\t18FEF3013D422397722E724B\n\
        bad line here\n\
        0.7\t18FEF31\n";

    fn args(dir: &std::path::Path, extra: &[&str]) -> Args {
        let defs = dir.join("defs.toml");
        let frames = dir.join("frames.log");
        std::fs::write(&defs, DEFINITIONS).unwrap();
        std::fs::write(&frames, FRAMES).unwrap();

        let mut argv = vec![
            "isobus-cli".to_string(),
            "-d".to_string(),
            defs.display().to_string(),
            "-i".to_string(),
            frames.display().to_string(),
            "-o".to_string(),
            dir.join("out.jsonl").display().to_string(),
        ];
        argv.extend(extra.iter().map(|s| s.to_string()));
        Args::parse_from(argv)
    }

    #[test]
    fn test_args_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_run_sequential() {
        let dir = tempfile::tempdir().unwrap();
        let summary = run(&args(dir.path(), &[]), AppConfig::default()).unwrap();
        assert_eq!(
            summary,
            Summary {
                frames: 3,
                decoded: 1,
                unknown: 1,
                errors: 2
            }
        );

        let out = std::fs::read_to_string(dir.path().join("out.jsonl")).unwrap();
        let first: serde_json::Value = serde_json::from_str(out.lines().next().unwrap()).unwrap();
        assert_eq!(first["spn_vals"]["Longitude"], -83.4225806);
        assert_eq!(first["header"]["timestamp"], 0.5);
        assert_eq!(out.lines().count(), 2);
    }

    #[test]
    fn test_run_parallel_matches_sequential() {
        let dir = tempfile::tempdir().unwrap();
        let summary = run(&args(dir.path(), &["--parallel", "--skip-unknown"]), AppConfig::default())
            .unwrap();
        assert_eq!(summary.decoded, 1);
        assert_eq!(summary.unknown, 1);

        let out = std::fs::read_to_string(dir.path().join("out.jsonl")).unwrap();
        assert_eq!(out.lines().count(), 1);
    }

    #[test]
    fn test_run_max_frames() {
        let dir = tempfile::tempdir().unwrap();
        let summary = run(&args(dir.path(), &["--max-frames", "1", "-f", "text"]), AppConfig::default())
            .unwrap();
        assert_eq!(summary.frames, 1);

        let out = std::fs::read_to_string(dir.path().join("out.jsonl")).unwrap();
        assert!(out.starts_with("1970-01-01T00:00:00.500Z PGN 65267 src 28 prio 6 (John Deere)"));
    }

    #[test]
    fn test_definition_flag_replaces_config() {
        let dir = tempfile::tempdir().unwrap();
        let args = args(dir.path(), &[]);

        let config_path = dir.path().join("config.toml");
        std::fs::write(&config_path, "[input]\ndefinitions = [\"defs.toml\"]\n").unwrap();
        let config = config::load_config(&config_path).unwrap();
        assert_eq!(config.input.definitions, args.definitions);

        let summary = run(&args, config).unwrap();
        assert_eq!(summary.decoded, 1);
        assert_eq!(summary.errors, 2);
    }

    #[test]
    fn test_config_definitions_used_without_flag() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = args(dir.path(), &[]);
        args.definitions.clear();

        let config_path = dir.path().join("config.toml");
        std::fs::write(&config_path, "[input]\ndefinitions = [\"defs.toml\"]\n").unwrap();
        let summary = run(&args, config::load_config(&config_path).unwrap()).unwrap();
        assert_eq!(summary.decoded, 1);
    }

    #[test]
    fn test_run_without_definitions() {
        let args = Args::parse_from(["isobus-cli"]);
        assert!(run(&args, AppConfig::default()).is_err());
    }
}
