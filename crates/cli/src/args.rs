//! Command-line parsing

use std::path::PathBuf;

use anyhow::{anyhow, bail, Context};

/// Parsed invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Run(RunArgs),
    Status { batch_id: String, json: bool },
    List,
    Delete { batch_id: String },
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunArgs {
    pub items: PathBuf,
    /// URL template; `{id}` is replaced by each item
    pub url: String,
    pub batch_id: Option<String>,
    pub dependency: Option<String>,
    pub workers: Option<usize>,
    pub json: bool,
}

/// Parse everything after the program name
pub fn parse<I>(args: I) -> anyhow::Result<Command>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    match args.next().as_deref() {
        Some("run") => parse_run(args).map(Command::Run),
        Some("status") => {
            let mut batch_id = None;
            let mut json = false;
            for arg in args {
                match arg.as_str() {
                    "--json" => json = true,
                    flag if flag.starts_with("--") => bail!("unknown option for status: {flag}"),
                    _ if batch_id.is_none() => batch_id = Some(arg),
                    _ => bail!("unexpected argument: {arg}"),
                }
            }
            let batch_id = batch_id.ok_or_else(|| anyhow!("status requires a batch id"))?;
            Ok(Command::Status { batch_id, json })
        }
        Some("list") => Ok(Command::List),
        Some("delete") => {
            let batch_id = args.next().ok_or_else(|| anyhow!("delete requires a batch id"))?;
            Ok(Command::Delete { batch_id })
        }
        Some("help" | "--help" | "-h") | None => Ok(Command::Help),
        Some(unknown) => bail!("unknown command: {unknown}"),
    }
}

fn parse_run(mut args: impl Iterator<Item = String>) -> anyhow::Result<RunArgs> {
    let mut items = None;
    let mut url = None;
    let mut batch_id = None;
    let mut dependency = None;
    let mut workers = None;
    let mut json = false;

    while let Some(flag) = args.next() {
        if flag == "--json" {
            json = true;
            continue;
        }
        let value = args.next().ok_or_else(|| anyhow!("{flag} requires a value"))?;
        match flag.as_str() {
            "--items" => items = Some(PathBuf::from(value)),
            "--url" => url = Some(value),
            "--batch-id" => batch_id = Some(value),
            "--dependency" => dependency = Some(value),
            "--workers" => {
                let parsed = value
                    .parse::<usize>()
                    .with_context(|| format!("--workers expects a number, got {value:?}"))?;
                workers = Some(parsed);
            }
            other => bail!("unknown option for run: {other}"),
        }
    }

    let url = url.ok_or_else(|| anyhow!("run requires --url"))?;
    if !url.contains("{id}") {
        bail!("--url must contain an {{id}} placeholder");
    }

    Ok(RunArgs {
        items: items.ok_or_else(|| anyhow!("run requires --items"))?,
        url,
        batch_id,
        dependency,
        workers,
        json,
    })
}

pub fn print_help() {
    println!("rxflow - resumable, rate-limited batch lookups");
    println!();
    println!("USAGE:");
    println!("    rxflow <COMMAND> [OPTIONS]");
    println!();
    println!("COMMANDS:");
    println!("    run       Look up every identifier in a file");
    println!("              --items <FILE>       One identifier per line");
    println!("              --url <TEMPLATE>     Endpoint with an {{id}} placeholder");
    println!("              --batch-id <ID>      Checkpoint name (default: derived from items + url)");
    println!("              --dependency <NAME>  Configured dependency to call through");
    println!("              --workers <N>        Concurrent lookups");
    println!("              --json               Print the result as JSON");
    println!("    status    Show a checkpoint: rxflow status <BATCH_ID> [--json]");
    println!("    list      List stored checkpoints");
    println!("    delete    Remove a checkpoint: rxflow delete <BATCH_ID>");
    println!("    help      Show this help message");
}
