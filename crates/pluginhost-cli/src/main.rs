//! Command-line interface for the pluginhost extension host.

use std::io;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use pluginhost_core::config::env_vars;
use pluginhost_core::dispatch::write_banner;
use pluginhost_core::prelude::*;
use pluginhost_sdk::ABI_VERSION;

/// pluginhost - discover extension modules and run them from the console.
#[derive(Parser, Debug)]
#[command(name = "pluginhost")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform. Defaults to `run`.
    #[command(subcommand)]
    command: Option<Command>,

    /// Configuration file.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Primary plugins directory.
    #[arg(long, global = true, value_name = "DIR")]
    plugins_dir: Option<PathBuf>,

    /// Extra search root, scanned after the plugins directory.
    #[arg(long = "search-root", global = true, value_name = "DIR")]
    search_roots: Vec<PathBuf>,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Discover extensions and start the interactive loop.
    Run,
    /// Discover extensions and print them.
    List,
    /// Load one module and print what it exports.
    Inspect {
        /// Path to the module file.
        #[arg(required = true)]
        path: PathBuf,
    },
}

/// Discovered extensions plus the loader keeping their libraries mapped.
struct Host {
    discovery: Discovery,
    _native: NativeLoader,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    match args.command {
        Some(Command::Inspect { ref path }) => inspect(path),
        Some(Command::List) => {
            let config = load_config(&args)?;
            list(&config)
        }
        Some(Command::Run) | None => {
            let config = load_config(&args)?;
            run(&config)
        }
    }
}

fn init_logging(verbose: bool) {
    let default_directive = if verbose {
        "pluginhost=debug"
    } else {
        "pluginhost=info"
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(default_directive)
            .add_directive(tracing::Level::WARN.into())
    });

    if env_vars::log_json() {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .with_writer(io::stderr)
            .init();
    }
}

/// File, then environment, then flags.
fn load_config(args: &Args) -> Result<HostConfig> {
    let mut config =
        HostConfig::resolve(args.config.as_deref()).context("Failed to load configuration")?;

    if let Some(dir) = &args.plugins_dir {
        config.discovery.plugins_dir = Some(dir.clone());
    }
    for root in &args.search_roots {
        if !config.discovery.search_roots.contains(root) {
            config.discovery.search_roots.push(root.clone());
        }
    }

    tracing::debug!("Search roots: {:?}", config.search_roots());
    Ok(config)
}

fn discover_host(config: &HostConfig) -> Result<Host> {
    let plugins_dir = config.plugins_dir();
    std::fs::create_dir_all(&plugins_dir).with_context(|| {
        format!(
            "Failed to create plugins directory {}",
            plugins_dir.display()
        )
    })?;

    let scanner = CandidateScanner::new(ScanOptions::from_config(config));
    let mut native = NativeLoader::new();
    let discovery = discover(&scanner, &BuiltinLoader::new(), &mut native);

    for failure in &discovery.composition.failed {
        tracing::warn!("{}", failure);
    }

    Ok(Host {
        discovery,
        _native: native,
    })
}

fn run(config: &HostConfig) -> Result<()> {
    let mut stdout = io::stdout();
    write_banner(&mut stdout)?;

    let host = discover_host(config)?;

    // Unlocked stdout: a streaming extension prints from its own threads.
    let dispatch = DispatchLoop::with_config(
        &host.discovery.registry,
        ConsoleInput,
        io::stdout(),
        config.dispatch.clone(),
    );
    let (summary, _) = dispatch.run()?;

    tracing::debug!(
        "Session ended: {} invocation(s), {} failure(s), {} invalid selection(s)",
        summary.invocations,
        summary.failures,
        summary.invalid_selections
    );
    Ok(())
}

fn list(config: &HostConfig) -> Result<()> {
    let host = discover_host(config)?;
    let registry = &host.discovery.registry;

    if registry.is_empty() {
        println!("No plugins were found.");
    } else {
        for (i, entry) in registry.iter().enumerate() {
            let streaming = if entry.descriptor.streaming {
                " [streaming]"
            } else {
                ""
            };
            println!("{}. {}{}", i + 1, entry.descriptor, streaming);
            println!("   {}", entry.origin);
        }
    }

    let discovery = &host.discovery;
    println!();
    println!("Modules scanned:    {}", discovery.scan.modules.len());
    println!("Modules loaded:     {}", discovery.load.modules_loaded);
    println!("Duplicates removed: {}", discovery.composition.duplicates_removed);
    if !discovery.load.failures.is_empty() || !discovery.composition.failed.is_empty() {
        println!(
            "Failures:           {}",
            discovery.load.failures.len() + discovery.composition.failed.len()
        );
    }
    Ok(())
}

fn inspect(path: &Path) -> Result<()> {
    let mut loader = NativeLoader::new();
    let candidates = match loader.load(path) {
        Ok(Some(candidates)) => candidates,
        Ok(None) => bail!(
            "{} is a native library but exports no pluginhost module entry",
            path.display()
        ),
        Err(e) => return Err(e).context("Failed to inspect module"),
    };

    println!("Module:      {}", path.display());
    println!("ABI version: {}", ABI_VERSION);
    println!("Extensions:  {}", candidates.len());
    for candidate in &candidates {
        let descriptor = &candidate.descriptor;
        println!();
        println!("  {}", descriptor);
        println!("    identity:  {}", descriptor.identity);
        println!("    streaming: {}", descriptor.streaming);
        println!("    semver:    {}", descriptor.semver().is_some());
    }
    Ok(())
}
