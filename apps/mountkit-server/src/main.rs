use anyhow::Result;
use api_ingress::{ApiIngress, ApiIngressConfig};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use mountkit::{
    BootReport, Collaborators, HostRuntime, ManifestLoader, RunOptions, ShutdownOptions,
};
use mountkit_bootstrap::{AppConfig, CliArgs};

use std::path::{Path, PathBuf};
use std::sync::Arc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// MountKit Server - serves a project assembled from convention-named modules
#[derive(Parser)]
#[command(name = "mountkit-server")]
#[command(about = "MountKit Server - serves a project assembled from convention-named modules")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port override for HTTP server (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Project root to discover modules in (overrides config)
    #[arg(long)]
    project: Option<PathBuf>,

    /// Print effective configuration (YAML) and exit
    #[arg(long)]
    print_config: bool,

    /// Log verbosity level (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server
    Run,
    /// Validate configuration, boot once without serving and report problems
    Check,
    /// Boot once and print the mount plan as JSON
    Routes,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let args = CliArgs {
        config: cli.config.as_ref().map(|p| p.to_string_lossy().to_string()),
        port: cli.port,
        project: cli.project.clone(),
        print_config: cli.print_config,
        verbose: cli.verbose,
    };

    // Layered config:
    // 1) defaults -> 2) YAML (if provided) -> 3) env (APP__*) -> 4) CLI overrides
    let mut config = AppConfig::load_or_default(cli.config.as_deref())?;
    config.apply_cli_overrides(&args)?;

    if cli.print_config {
        println!("{}", config.to_yaml()?);
        return Ok(());
    }

    let logging_config = config.logging.clone().unwrap_or_default();
    mountkit_bootstrap::init_logging(&logging_config, Path::new(&config.server.home_dir));

    tracing::info!(
        project_root = %config.discovery.project_root.display(),
        "MountKit Server starting"
    );

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_server(config).await,
        Commands::Check => check(config).await,
        Commands::Routes => print_routes(config).await,
    }
}

fn build_ingress(config: &AppConfig) -> Result<Arc<ApiIngress>> {
    let ingress_cfg = config
        .module_config::<ApiIngressConfig>("api_ingress")?
        .with_default_bind(&config.server.host, config.server.port);
    ingress_cfg.validate()?;
    Ok(Arc::new(ApiIngress::new(ingress_cfg)))
}

async fn run_server(config: AppConfig) -> Result<()> {
    let ingress = build_ingress(&config)?;
    let collaborators = Collaborators::default().with_docs(ingress.route_index());

    let report = mountkit::run(RunOptions {
        discovery: config.discovery.clone(),
        loader: Arc::new(ManifestLoader::default()),
        collaborators,
        host: ingress,
        fs: None,
        shutdown: ShutdownOptions::Signals,
    })
    .await?;

    tracing::info!(
        mounted = report.mounted.len(),
        failures = report.failures.len(),
        "MountKit Server stopped"
    );
    Ok(())
}

/// Boot against the configured project without binding a socket.
async fn dry_boot(config: &AppConfig) -> Result<BootReport> {
    let ingress = build_ingress(config)?;
    let collaborators = Collaborators::default().with_docs(ingress.route_index());
    let boot = HostRuntime::new(
        config.discovery.clone(),
        Arc::new(ManifestLoader::default()),
        collaborators,
    )
    .with_host(ingress)
    .boot()
    .await?;
    Ok(boot.report)
}

async fn check(config: AppConfig) -> Result<()> {
    tracing::info!("Checking configuration…");
    let report = dry_boot(&config).await?;

    println!("Configuration is valid");
    println!(
        "{} module(s), {} middleware(s), {} route version(s) mounted",
        report.modules.len(),
        report.middlewares.len(),
        report.mounted.len()
    );
    for failure in &report.failures {
        println!("  failed: {}", mountkit::error_chain(&failure.error));
    }
    for err in &report.scan_errors {
        println!("  unreadable: {}", mountkit::error_chain(err));
    }

    if !report.is_clean() {
        anyhow::bail!(
            "{} unit(s) failed to load, {} director(ies) could not be read",
            report.failures.len(),
            report.scan_errors.len()
        );
    }
    Ok(())
}

async fn print_routes(config: AppConfig) -> Result<()> {
    let report = dry_boot(&config).await?;
    let plan: Vec<serde_json::Value> = report
        .mount_plan()
        .into_iter()
        .map(|(mount_path, version, fallback_to)| {
            serde_json::json!({
                "mount_path": mount_path,
                "version": version,
                "fallback_to": fallback_to,
            })
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn project(files: &[(&str, &str)]) -> (TempDir, AppConfig) {
        let dir = TempDir::new().unwrap();
        for (rel, contents) in files {
            let path = dir.path().join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, contents).unwrap();
        }
        let mut config = AppConfig::default();
        config.discovery.project_root = dir.path().to_path_buf();
        (dir, config)
    }

    #[test]
    fn cli_parses_subcommands_and_overrides() {
        let cli = Cli::try_parse_from([
            "mountkit-server",
            "--project",
            "/srv/site",
            "-p",
            "9000",
            "-vv",
            "routes",
        ])
        .unwrap();
        assert_eq!(cli.project, Some(PathBuf::from("/srv/site")));
        assert_eq!(cli.port, Some(9000));
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Some(Commands::Routes)));
    }

    #[tokio::test]
    async fn check_passes_on_a_clean_project() {
        let (_dir, config) = project(&[(
            "src/routes/users.router.yaml",
            "endpoints:\n  - { path: /, body: ok }\n",
        )]);
        check(config).await.unwrap();
    }

    #[tokio::test]
    async fn check_fails_when_a_unit_fails() {
        let (_dir, config) = project(&[("src/routes/users.router.yaml", "endpoints: [")]);
        let err = check(config).await.unwrap_err();
        assert!(err.to_string().contains("1 unit(s) failed"));
    }

    #[test]
    fn invalid_ingress_config_is_rejected_before_boot() {
        let mut config = AppConfig::default();
        config.modules.insert(
            "api_ingress".into(),
            serde_json::json!({ "config": { "route_index_path": "routes" } }),
        );
        let err = build_ingress(&config).err().unwrap();
        assert!(err.to_string().contains("route_index_path"));
    }

    #[test]
    fn ingress_binds_to_the_server_section_by_default() {
        let mut config = AppConfig::default();
        config.server.host = "0.0.0.0".into();
        config.server.port = 9001;
        let ingress = build_ingress(&config).unwrap();
        assert_eq!(ingress.get_config().bind_addr(), "0.0.0.0:9001");
    }
}
