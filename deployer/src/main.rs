use archive::{FileId, GoogleDriveSource};
use clap::{Parser, Subcommand};
use deployer::{ArchiveStep, Deployment, SetupOptions, Settings, DEFAULT_CONFIG_FILE};
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "flowdeploy")]
#[command(about = "Deploy n8n with Docker Compose behind an ngrok static domain")]
struct Cli {
    /// Settings file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    /// Deployment directory holding the generated files and data
    #[arg(short, long, global = true, default_value = ".")]
    dir: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install packages, restore the data archive and write configuration
    Setup {
        /// Sharing link or file id of the data archive
        #[arg(long)]
        archive_url: Option<String>,
        /// Do not install system packages
        #[arg(long)]
        skip_packages: bool,
        /// Do not download the data archive
        #[arg(long)]
        skip_archive: bool,
        /// Replace an existing data directory
        #[arg(long)]
        force: bool,
    },
    /// Start the service and the tunnel
    Start,
    /// Stop the tunnel and the service
    Stop,
    /// Show service logs
    Logs {
        /// Keep streaming new output
        #[arg(short, long)]
        follow: bool,
        /// Only show the last N lines
        #[arg(short = 'n', long)]
        tail: Option<usize>,
    },
    /// Show service and tunnel state
    Status,
    /// Write the environment file and compose manifest only
    Render,
    /// Print the file id contained in a sharing link
    ArchiveId {
        /// Sharing link or bare file id
        link: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("✗ {}", e);
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let Cli {
        config,
        dir,
        command,
    } = cli;
    let load = || -> Result<Deployment, Box<dyn std::error::Error>> {
        let mut settings = Settings::load(&config)?;
        settings.apply_process_env()?;
        Ok(Deployment::new(settings, dir.clone())?)
    };

    match command {
        Commands::Setup {
            archive_url,
            skip_packages,
            skip_archive,
            force,
        } => {
            let options = SetupOptions {
                archive_url,
                skip_packages,
                skip_archive,
                force,
                skip_chown: false,
            };
            setup(&load()?, &options).await?;
        }
        Commands::Start => {
            let report = load()?.start().await?;
            println!("✓ Service is up ({}).", report.runtime);
            println!("✓ Tunnel running (pid {}).", report.tunnel_pid);
            println!("  Public URL: {}", report.public_url);
        }
        Commands::Stop => {
            load()?.stop()?;
            println!("✓ Stopped.");
        }
        Commands::Logs { follow, tail } => {
            load()?.logs(follow, tail)?;
        }
        Commands::Status => {
            status(&load()?)?;
        }
        Commands::Render => {
            let files = load()?.render_files()?;
            println!("✓ Wrote {}", files.env_file.display());
            println!("✓ Wrote {}", files.compose_file.display());
        }
        Commands::ArchiveId { link } => {
            println!("{}", FileId::parse(&link)?);
        }
    }

    Ok(())
}

async fn setup(
    deployment: &Deployment,
    options: &SetupOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let source = GoogleDriveSource::with_default_config()?;
    let report = deployment.setup(options, &source).await?;

    if report.installed_packages.is_empty() {
        println!("✓ System packages ready.");
    } else {
        println!("✓ Installed: {}", report.installed_packages.join(", "));
    }

    match &report.archive {
        ArchiveStep::Skipped => println!("- Archive step skipped."),
        ArchiveStep::NotConfigured => println!("- No archive configured."),
        ArchiveStep::DataPresent => println!("- Data directory already populated."),
        ArchiveStep::Restored { id, bytes, entries } => {
            println!(
                "✓ Restored archive {} ({:.1} MB, {} entries).",
                id,
                *bytes as f64 / 1_000_000.0,
                entries
            );
        }
    }

    println!("✓ Wrote {}", report.files.env_file.display());
    println!("✓ Wrote {}", report.files.compose_file.display());
    info!("Setup complete");
    println!("\nRun `flowdeploy start` to bring the service up.");
    Ok(())
}

fn status(deployment: &Deployment) -> Result<(), Box<dyn std::error::Error>> {
    let report = deployment.status()?;

    match &report.services {
        Some(services) => println!("{}", services.trim_end()),
        None => println!("Service: not deployed or no container runtime found"),
    }
    match (report.tunnel_pid, &report.public_url) {
        (Some(pid), Some(url)) => println!("Tunnel: running (pid {}) at {}", pid, url),
        (Some(pid), None) => println!("Tunnel: running (pid {})", pid),
        (None, _) => println!("Tunnel: stopped"),
    }
    Ok(())
}
