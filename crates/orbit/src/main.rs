use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::{error, info};
use serde_json::json;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter};

use orbit_core::kernel::{Application, KernelComponent};
use orbit_core::plugin_system::{DirectoryFetcher, InstalledPlugin, Plugin, PluginStatus, UninstallPolicy};
use orbit_core::storage::Settings;

/// Orbit: a versioned plugin runtime
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Simple ping command for testing
    #[arg(long)]
    ping: bool,

    /// Home directory holding orbit.json, manifest.json and .orbit/
    #[arg(long, default_value = ".")]
    home: PathBuf,

    /// Do not register plugins listed in .orbitlinks
    #[arg(long)]
    ignore_links: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List registered plugins
    List,
    /// Show details of the highest version matching an identifier
    Info {
        /// `name` or `name@range`
        id: String,
    },
    /// Start one plugin (and whatever it requires), then shut down
    Start { id: String },
    /// Install plugins and their missing dependencies
    Install {
        #[arg(required = true)]
        identifiers: Vec<String>,
        /// Extra package repository, searched after those in orbit.json
        #[arg(long = "repository", short = 'r')]
        repositories: Vec<PathBuf>,
    },
    /// Install everything the host manifest depends on
    InstallAll {
        #[arg(long = "repository", short = 'r')]
        repositories: Vec<PathBuf>,
    },
    /// Uninstall every version matching each identifier
    Uninstall {
        #[arg(required = true)]
        identifiers: Vec<String>,
        /// force, refuse or cascade
        #[arg(long)]
        policy: Option<UninstallPolicy>,
    },
}

fn init_logging(verbose: u8) {
    let fallback = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr));

    if let Err(e) = tracing_log::LogTracer::init() {
        eprintln!("Failed to bridge log records: {}", e);
    }
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to install log subscriber: {}", e);
    }
}

fn describe(plugin: &Plugin) -> serde_json::Value {
    let manifest = plugin.manifest();
    let dependencies: serde_json::Map<String, serde_json::Value> = manifest
        .dependencies
        .values()
        .map(|d| (d.name.clone(), json!(d.spec.to_string())))
        .collect();
    json!({
        "name": plugin.name(),
        "version": plugin.version().to_string(),
        "status": plugin.status().to_string(),
        "dir": plugin.dir(),
        "description": manifest.description,
        "activator": manifest.activator,
        "dependencies": dependencies,
        "singleton": manifest.singleton,
        "dynamic": manifest.dynamic,
        "error": plugin.last_error().map(|e| e.to_string()),
    })
}

async fn build_app(home: &Path, ignore_links: bool, repositories: Vec<PathBuf>, policy: Option<UninstallPolicy>) -> orbit_core::kernel::Result<Application> {
    let mut settings = Settings::load(home).await?;
    if let Some(policy) = policy {
        settings.uninstall_policy = policy;
    }
    let mut all_repositories = settings.repositories.clone();
    all_repositories.extend(repositories);
    let fetcher = Arc::new(DirectoryFetcher::new(all_repositories));

    Application::builder(home)
        .settings(settings)
        .fetcher(fetcher)
        .ignore_links(ignore_links)
        .build()
        .await
}

async fn run(args: CliArgs) -> orbit_core::kernel::Result<bool> {
    let home = args.home.clone();
    let (repositories, policy) = match &args.command {
        Some(Commands::Install { repositories, .. }) | Some(Commands::InstallAll { repositories }) => {
            (repositories.clone(), None)
        }
        Some(Commands::Uninstall { policy, .. }) => (Vec::new(), *policy),
        _ => (Vec::new(), None),
    };
    let app = build_app(&home, args.ignore_links, repositories, policy).await?;
    app.initialize().await?;
    let manager = app.plugin_manager();

    match args.command {
        Some(Commands::List) => {
            let plugins = manager.all();
            println!("{} plugin(s) registered:", plugins.len());
            for plugin in plugins {
                println!("  - {} [{}] {}", plugin.identity(), plugin.status(), plugin.dir().display());
            }
            Ok(true)
        }
        Some(Commands::Info { id }) => match manager.resolve(&id)? {
            Some(plugin) => {
                let text = serde_json::to_string_pretty(&describe(&plugin)).unwrap_or_default();
                println!("{}", text);
                Ok(true)
            }
            None => {
                eprintln!("No plugin matches '{}'", id);
                Ok(false)
            }
        },
        Some(Commands::Start { id }) => {
            let started = manager.start(&id)?;
            let ok = match manager.resolve(&id)? {
                Some(plugin) => {
                    println!("{} is {}", plugin.identity(), plugin.status());
                    if let Some(e) = plugin.last_error() {
                        eprintln!("{}", e);
                    }
                    started || plugin.status() == PluginStatus::Started
                }
                None => false,
            };
            app.stop().await?;
            Ok(ok)
        }
        Some(Commands::Install { identifiers, .. }) => {
            for report in app.install(&identifiers).await? {
                print_installed(&report.from, &report.installed);
            }
            Ok(true)
        }
        Some(Commands::InstallAll { .. }) => {
            let reports = app.install_all().await?;
            if reports.is_empty() {
                println!("Nothing to install");
            }
            for report in reports {
                print_installed(&report.from, &report.installed);
            }
            Ok(true)
        }
        Some(Commands::Uninstall { identifiers, .. }) => {
            for report in app.uninstall(&identifiers).await? {
                if report.uninstalled.is_empty() {
                    println!("Nothing matched {}@{}", report.name, report.range);
                }
                for plugin in &report.uninstalled {
                    println!("Uninstalled {}@{}", plugin.name, plugin.version);
                }
            }
            Ok(true)
        }
        None => {
            app.start().await?;
            let started = manager.all().iter().filter(|p| p.status() == PluginStatus::Started).count();
            println!("{} of {} plugin(s) started", started, manager.all().len());
            app.stop().await?;
            Ok(true)
        }
    }
}

fn print_installed(from: &str, installed: &[InstalledPlugin]) {
    if installed.is_empty() {
        println!("{} is already satisfied", from);
    }
    for plugin in installed {
        println!("Installed {}@{} (from {})", plugin.name, plugin.version, plugin.from);
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();

    if args.ping {
        println!("pong");
        return ExitCode::SUCCESS;
    }

    init_logging(args.verbose);
    info!("Orbit home: {}", args.home.display());

    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
