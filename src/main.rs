use anyhow::Context;
use std::io::BufRead;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use sheet_qrcode_lib::config::DEFAULT_SETTINGS_FILE;
use sheet_qrcode_lib::{process, ConversionReport, ErrorKind, Settings, SheetQrError};

const USAGE: &str = "usage: sheet-qrcode [SETTINGS_FILE] [--json] [--pause]";

struct Args {
    settings_path: PathBuf,
    json: bool,
    pause: bool,
}

fn parse_args() -> Result<Args, String> {
    let mut settings_path = None;
    let mut json = false;
    let mut pause = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--json" => json = true,
            "--pause" => pause = true,
            "-h" | "--help" => return Err(USAGE.to_string()),
            flag if flag.starts_with("--") => return Err(format!("unknown option '{flag}'\n{USAGE}")),
            path if settings_path.is_none() => settings_path = Some(PathBuf::from(path)),
            _ => return Err(USAGE.to_string()),
        }
    }
    Ok(Args {
        settings_path: settings_path.unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE)),
        json,
        pause,
    })
}

fn execute(args: &Args) -> anyhow::Result<ConversionReport> {
    let settings = Settings::from_file(&args.settings_path)?;
    let report = process(&settings).with_context(|| {
        format!(
            "converting column '{}' of '{}'",
            settings.url_column_name,
            settings.input_file.display()
        )
    })?;
    Ok(report)
}

fn print_report(report: &ConversionReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        println!("\nProcess Completed:");
        println!("Total records read: {}", report.summary.total_records);
        println!("Total QR codes created: {}", report.summary.qr_codes_created);
        println!(
            "QR codes have been generated and saved to '{}' successfully.",
            report.output_file.display()
        );
    }
    Ok(())
}

fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<SheetQrError>().map(SheetQrError::kind) {
        Some(ErrorKind::Config) => 2,
        Some(ErrorKind::ColumnNotFound) => 3,
        Some(ErrorKind::EncodingOverflow) => 4,
        Some(ErrorKind::Io) | None => 5,
    }
}

fn wait_for_enter() {
    println!("\nPress Enter to close the console...");
    let _ = std::io::stdin().lock().read_line(&mut String::new());
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{message}");
            return ExitCode::from(2);
        }
    };

    let code = match execute(&args).and_then(|report| print_report(&report, args.json)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::from(exit_code(&err))
        }
    };

    if args.pause {
        wait_for_enter();
    }
    code
}
