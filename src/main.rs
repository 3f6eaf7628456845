use anyhow::Result;
use clap::Parser;

use std::path::PathBuf;
use std::process::ExitCode;

use gdbsearch::{
    registry, render_report, CallPath, Config, DebuggerOps, DebuggerSession, FindingIndex,
    Predicate, RawFindings, SearchContext, SearchDriver, SearchError, SourceResolver,
    DEFAULT_PROBE,
};

/// Search a debugged program for source lines that change a measured
/// property (memory, io, file descriptors) of the running target.
#[derive(Debug, Parser)]
#[command(name = "gdbsearch", version)]
struct Cli {
    /// Shell command that starts the debugger attached to the target,
    /// e.g. "gdb ./myapp"
    debugger_command: Option<String>,

    /// Metric probe name; see the error on a bad name for the full list
    metric: Option<String>,

    /// Call paths to bootstrap the queue, as a JSON list of lists,
    /// e.g. "[[2], [0, 1]]"
    paths: Option<String>,

    /// Track deeper when this holds for a new measurement `n` and the
    /// previous one `p`
    #[arg(short = 'e', value_name = "EXPR", default_value = "n > p")]
    expression: String,

    /// Output directory for HTML pages
    #[arg(short = 'o', value_name = "DIR")]
    output: Option<PathBuf>,

    /// Write the raw findings file instead of HTML pages
    #[arg(short = 'd')]
    dump_raw: bool,

    /// Render HTML from a previously saved raw findings file, without
    /// running the debugger
    #[arg(short = 'l', value_name = "FILE")]
    load_raw: Option<PathBuf>,

    /// Config file with source directories and reply timeouts
    #[arg(long, value_name = "FILE", default_value = "gdbsearch.toml")]
    config: PathBuf,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return match err.kind() {
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
                    ExitCode::SUCCESS
                }
                // clap would exit 2; usage problems are exit 1 here
                _ => ExitCode::from(1),
            };
        }
    };

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("ERROR: {err:#}");
            let debugger_fatal = err.downcast_ref::<SearchError>().is_some_and(|e| {
                matches!(
                    e,
                    SearchError::SpawnFailed(_)
                        | SearchError::NoPrompt(_)
                        | SearchError::EntryBreakpointFailed(_)
                        | SearchError::PidUnparseable(_)
                        | SearchError::Protocol(_)
                        | SearchError::ProbeUnavailable(_)
                )
            });
            ExitCode::from(if debugger_fatal { 2 } else { 1 })
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = Config::load_optional(&cli.config);
    let out_dir = cli.output.clone().unwrap_or_else(std::env::temp_dir);

    if let Some(raw_path) = &cli.load_raw {
        let index = RawFindings::read_json(raw_path)?.into_index()?;
        let mut resolver = SourceResolver::new(config.source_dirs.clone());
        let written = render_report(&index, &mut resolver, &out_dir)?;
        for page in &written {
            println!("{}", page.display());
        }
        return Ok(());
    }

    let Some(command) = &cli.debugger_command else {
        return Err(SearchError::InvalidArgument(
            "debugger command missing (try --help)".to_string(),
        )
        .into());
    };

    let probes = registry();
    let metric = cli.metric.as_deref().unwrap_or(DEFAULT_PROBE);
    let Some(probe) = probes.get(metric) else {
        let known: Vec<&str> = probes.keys().copied().collect();
        return Err(SearchError::InvalidArgument(format!(
            "unknown metric {metric:?}; available: {}",
            known.join(", ")
        ))
        .into());
    };

    let predicate = Predicate::parse(&cli.expression)?;
    let initial_paths = match &cli.paths {
        Some(text) => CallPath::parse_list(text)?,
        None => vec![CallPath::root()],
    };

    tracing::info!("debugger command: {command}");
    tracing::info!("measuring function: {metric}");
    tracing::info!(
        "paths to inspected subroutines: [{}]",
        initial_paths
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let mut ctx = SearchContext::new(config.clone());
    let mut driver = SearchDriver::new(probe, &predicate, initial_paths);
    let mut factory = || -> gdbsearch::SearchResult<Box<dyn DebuggerOps>> {
        let session = DebuggerSession::start(command, &config)?;
        Ok(Box::new(session))
    };
    driver.run(&mut ctx, &mut factory)?;

    emit(&ctx.index, &mut ctx.resolver, &out_dir, cli.dump_raw)
}

fn emit(
    index: &FindingIndex,
    resolver: &mut SourceResolver,
    out_dir: &std::path::Path,
    dump_raw: bool,
) -> Result<()> {
    if dump_raw {
        let raw_path = out_dir.join("gdbsearch.json");
        RawFindings::from_index(index).write_json(&raw_path)?;
        println!("{}", raw_path.display());
        return Ok(());
    }
    let written = render_report(index, resolver, out_dir)?;
    if written.is_empty() {
        tracing::warn!("no findings and no resolvable entry file; nothing rendered");
    }
    for page in &written {
        println!("{}", page.display());
    }
    Ok(())
}
