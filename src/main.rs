#[cfg(test)]
mod tests;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use hl7_mllp_tester::config::DEFAULT_CONFIG_PATH;
use hl7_mllp_tester::report::{self, BatchReport};
use hl7_mllp_tester::{run_batch, split_messages, BatchOptions, Endpoint, MetricsHistory, Settings};

#[derive(Parser)]
#[command(author, version, about = "Send HL7v2 messages over MLLP and inspect the ACKs", long_about = None)]
struct Cli {
    /// Path to the saved default host/port
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH, global = true)]
    config: PathBuf,

    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Send messages and report the acknowledgments
    Send(SendArgs),
    /// Save host and port as the defaults for later sends
    SaveConfig {
        /// Host address of the HL7 server
        #[arg(short = 'H', long)]
        host: String,

        /// Port number of the HL7 server
        #[arg(short, long)]
        port: u16,
    },
}

#[derive(Args)]
struct SendArgs {
    /// Host address of the HL7 server [default: saved config]
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Port number of the HL7 server [default: saved config]
    #[arg(short, long)]
    port: Option<u16>,

    /// Path to the HL7 message file, one or more messages; stdin when omitted or `-`
    #[arg(short, long)]
    message: Option<PathBuf>,

    /// Times each message is sent
    #[arg(short, long, default_value = "1", value_parser = clap::value_parser!(u64).range(1..))]
    repeat: u64,

    /// Replace MSH-10 with a fresh id on every attempt
    #[arg(short, long)]
    generate_ids: bool,

    /// Build ACKs locally instead of contacting the server
    #[arg(short, long)]
    simulate: bool,

    /// Timeout in seconds
    #[arg(short, long, default_value = "10", value_parser = clap::value_parser!(u64).range(1..))]
    timeout: u64,

    /// Run the whole batch this many times and print per-run metrics
    #[arg(long, default_value = "1", value_parser = clap::value_parser!(u64).range(1..))]
    rounds: u64,

    /// Print the report as JSON, one object per round
    #[arg(long)]
    json: bool,
}

fn read_message_source(path: Option<&Path>) -> Result<String, String> {
    let bytes = match path {
        Some(path) if path != Path::new("-") => {
            fs::read(path).map_err(|e| format!("Failed to read message file: {}", e))?
        }
        _ => {
            let mut bytes = Vec::new();
            io::stdin()
                .read_to_end(&mut bytes)
                .map_err(|e| format!("Failed to read message from stdin: {}", e))?;
            bytes
        }
    };
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn output_err(e: io::Error) -> String {
    format!("Failed to write output: {}", e)
}

fn send<W: Write>(args: SendArgs, settings: Settings, out: &mut W) -> Result<(), String> {
    let endpoint = Endpoint::new(
        args.host.unwrap_or(settings.host),
        args.port.unwrap_or(settings.port),
    );

    let raw = read_message_source(args.message.as_deref())?;
    let messages = split_messages(&raw);
    if messages.is_empty() {
        return Err("Please provide a valid HL7 message.".to_string());
    }

    let options = BatchOptions {
        repeat_count: usize::try_from(args.repeat).map_err(|e| format!("Invalid repeat count: {}", e))?,
        generate_ids: args.generate_ids,
        simulate: args.simulate,
        timeout: Duration::from_secs(args.timeout),
    };

    if !args.json {
        let target = if options.simulate {
            "simulated ACKs".to_string()
        } else {
            endpoint.to_string()
        };
        writeln!(
            out,
            "Sending {} message(s) x {} to {}",
            messages.len(),
            options.repeat_count,
            target
        )
        .map_err(output_err)?;
    }

    let mut history = MetricsHistory::new();
    let mut stopped = None;
    for round in 1..=args.rounds {
        let result = run_batch(&messages, &endpoint, &options);
        history.record(&result);

        let report = BatchReport::new(&result);
        if args.json {
            serde_json::to_writer(&mut *out, &report)
                .map_err(|e| format!("Failed to write output: {}", e))?;
            writeln!(out).map_err(output_err)?;
        } else {
            if args.rounds > 1 {
                writeln!(out, "== round {} ==", round).map_err(output_err)?;
            }
            report.write_text(out).map_err(output_err)?;
        }

        if let Some(failure) = result.failure {
            stopped = Some(failure.to_string());
            break;
        }
    }

    if args.rounds > 1 && !args.json {
        writeln!(out).map_err(output_err)?;
        report::write_history(&history, out).map_err(output_err)?;
    }

    match stopped {
        Some(failure) => Err(format!("Batch stopped early at {}", failure)),
        None => Ok(()),
    }
}

fn run<W: Write>(cli: Cli, out: &mut W) -> Result<(), String> {
    match cli.command {
        Command::Send(args) => send(args, Settings::load(&cli.config), out),
        Command::SaveConfig { host, port } => {
            let settings = Settings { host, port };
            settings.save(&cli.config).map_err(|e| e.to_string())?;
            writeln!(
                out,
                "Saved default HOST={}, PORT={}.",
                settings.host, settings.port
            )
            .map_err(output_err)
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let stdout = io::stdout();
    if let Err(e) = run(cli, &mut stdout.lock()) {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
