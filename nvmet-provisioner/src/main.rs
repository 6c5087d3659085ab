use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

use nvmet_provisioner::config::{CleanupScope, ConfigError, ProvisionConfig};
use nvmet_provisioner::configfs::{AddressFamily, DriveUuid, Transport};
use nvmet_provisioner::inspect::{self, TreeSnapshot};
use nvmet_provisioner::provision::{ProvisionReport, Provisioner};
use nvmet_provisioner::SystemRunner;

#[derive(Parser, Debug)]
#[command(name = "nvmet-provisioner")]
#[command(about = "Export local drives as NVMe-oF subsystems through Linux nvmet configfs")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// JSON configuration file; command-line options override its values
    #[arg(long, env = "NVMET_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Filesystem UUID of a drive to export (repeatable, order sets the index)
    #[arg(long = "drive", env = "NVMET_DRIVES", value_delimiter = ',', global = true)]
    drives: Vec<DriveUuid>,

    /// Prefix of every subsystem name. A labelled drive is exported as
    /// <prefix><label>; labels with characters other than ASCII letters,
    /// digits, '_', '-', '.' or ':' (spaces, for example) fall back to
    /// <prefix><NN>, the drive's 1-based position
    #[arg(long, env = "NVMET_PREFIX", global = true)]
    prefix: Option<String>,

    /// Address the port listens on
    #[arg(long, env = "NVMET_LISTEN_ADDR", global = true)]
    listen_addr: Option<IpAddr>,

    /// Transport service id (TCP port)
    #[arg(long, env = "NVMET_PORT", global = true)]
    port: Option<u16>,

    /// Transport type (tcp, rdma, loop)
    #[arg(long, global = true)]
    transport: Option<Transport>,

    /// Address family (ipv4, ipv6)
    #[arg(long, global = true)]
    adrfam: Option<AddressFamily>,

    /// Mount point of the nvmet configfs tree
    #[arg(long, env = "NVMET_CONFIGFS_ROOT", global = true)]
    configfs_root: Option<PathBuf>,

    /// Which existing subsystems to remove first (positional, prefix)
    #[arg(long, global = true)]
    cleanup_scope: Option<CleanupScope>,

    /// Attempts to enable a namespace before giving up
    #[arg(long, global = true)]
    enable_attempts: Option<u32>,

    /// Delay between enable attempts in milliseconds
    #[arg(long, global = true)]
    enable_delay_ms: Option<u64>,

    /// Run modprobe and lsblk through sudo
    #[arg(long, env = "NVMET_USE_SUDO", global = true)]
    use_sudo: bool,

    /// Do not load kernel modules
    #[arg(long, global = true)]
    skip_modules: bool,

    /// Report format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    output: OutputFormat,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Load modules, clean up and configure the port and all drives (default)
    Apply,
    /// Only remove the port and previously provisioned subsystems
    Cleanup,
    /// Print the current configfs tree
    Status,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize tracing with configured log level
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    ExitCode::from(execute(&args).await)
}

/// Run the selected command and map the outcome to a process exit status.
async fn execute(args: &Args) -> u8 {
    match run(args).await {
        Ok(status) => status,
        Err(e) => {
            error!("{}", e);
            EXIT_FATAL
        }
    }
}

async fn run(args: &Args) -> Result<u8, Box<dyn std::error::Error>> {
    let config = build_config(args).await?;
    let command = args.command.unwrap_or(Command::Apply);

    if command == Command::Status {
        let snapshot = inspect::snapshot(&config.layout()).await?;
        match args.output {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&snapshot)?),
            OutputFormat::Text => {
                for line in snapshot_lines(&snapshot) {
                    println!("{}", line);
                }
            }
        }
        return Ok(EXIT_OK);
    }

    info!("Configfs root: {}", config.configfs_root.display());
    info!("Subsystem prefix: {}", config.subsystem_prefix);
    info!(
        "Listen address: {}:{} ({}, {})",
        config.listen_addr, config.port, config.transport, config.address_family
    );
    info!("Drives: {}", config.drives.len());

    let runner = SystemRunner::new(config.use_sudo);
    let provisioner = Provisioner::new(config, runner)?;

    if command == Command::Cleanup {
        let report = provisioner.cleanup().await;
        match args.output {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
            OutputFormat::Text => {
                for path in &report.removed {
                    println!("removed  {}", path.display());
                }
                for failure in &report.failed {
                    println!("FAILED   {}: {}", failure.path.display(), failure.error);
                }
            }
        }
        return Ok(exit_status(report.is_complete()));
    }

    let report = provisioner.run().await?;
    match args.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print_summary(&report),
    }
    Ok(exit_status(report.is_complete()))
}

/// Defaults, then the config file, then command-line overrides.
async fn build_config(args: &Args) -> Result<ProvisionConfig, ConfigError> {
    let mut config = match &args.config {
        Some(path) => ProvisionConfig::load(path).await?,
        None => ProvisionConfig::default(),
    };

    if !args.drives.is_empty() {
        config.drives = args.drives.clone();
    }
    if let Some(prefix) = &args.prefix {
        config.subsystem_prefix = prefix.clone();
    }
    if let Some(addr) = args.listen_addr {
        config.listen_addr = addr;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(transport) = args.transport {
        config.transport = transport;
    }
    if let Some(adrfam) = args.adrfam {
        config.address_family = adrfam;
    }
    if let Some(root) = &args.configfs_root {
        config.configfs_root = root.clone();
    }
    if let Some(scope) = args.cleanup_scope {
        config.cleanup_scope = scope;
    }
    if let Some(attempts) = args.enable_attempts {
        config.enable_retry.max_attempts = attempts;
    }
    if let Some(delay) = args.enable_delay_ms {
        config.enable_retry.delay_ms = delay;
    }
    if args.use_sudo {
        config.use_sudo = true;
    }
    if args.skip_modules {
        config.modules.clear();
    }

    Ok(config)
}

fn print_summary(report: &ProvisionReport) {
    for drive in &report.drives {
        let name = drive
            .subsystem
            .as_ref()
            .map(|s| s.as_str())
            .unwrap_or("-");
        let state = match drive.namespace {
            Some(state) => state.to_string(),
            None => "not created".to_string(),
        };
        println!("{:<32} {:<56} {}", name, drive.device_path.as_str(), state);
    }
    println!(
        "{}/{} drives configured{}",
        report.configured_drives(),
        report.drives.len(),
        if report.is_complete() { "" } else { " (see log for errors)" }
    );
}

/// One line for the port, then one per subsystem.
fn snapshot_lines(snapshot: &TreeSnapshot) -> Vec<String> {
    let mut lines = Vec::with_capacity(snapshot.subsystems.len() + 1);
    match &snapshot.port {
        Some(port) => {
            let attr = |name: &str| port.attributes.get(name).map_or("-", String::as_str);
            lines.push(format!(
                "port 1: {} {}:{} ({})",
                attr("addr_trtype"),
                attr("addr_traddr"),
                attr("addr_trsvcid"),
                attr("addr_adrfam")
            ));
        }
        None => lines.push("port 1: not configured".to_string()),
    }

    let linked = snapshot.linked();
    for (name, subsystem) in &snapshot.subsystems {
        let namespace = subsystem.namespaces.values().next();
        let device_path = namespace
            .and_then(|ns| ns.device_path.as_deref())
            .unwrap_or("-");
        let enabled = namespace.and_then(|ns| ns.enable.as_deref()) == Some("1");
        lines.push(format!(
            "{:<32} {:<56} {} {}",
            name,
            device_path,
            if enabled { "enabled" } else { "disabled" },
            if linked.contains(&name.as_str()) { "linked" } else { "unlinked" }
        ));
    }
    lines
}

const EXIT_OK: u8 = 0;
const EXIT_FATAL: u8 = 1;
const EXIT_PARTIAL: u8 = 2;

fn exit_status(complete: bool) -> u8 {
    if complete { EXIT_OK } else { EXIT_PARTIAL }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::io::Write;

    use clap::CommandFactory;
    use nvmet_provisioner::inspect::{NamespaceSnapshot, PortSnapshot, SubsystemSnapshot};
    use tempfile::{NamedTempFile, TempDir};

    const UUID_A: &str = "a52c88ab-41e1-4c3a-9e0c-a276b4146b1e";
    const UUID_B: &str = "cafd9e45-177a-4b28-8fc9-a1872871182b";

    fn args(argv: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("nvmet-provisioner").chain(argv.iter().copied()))
            .unwrap()
    }

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_prefix_help_mentions_label_fallback() {
        let cmd = Args::command();
        let prefix = cmd
            .get_arguments()
            .find(|a| a.get_id() == "prefix")
            .unwrap();
        let help = prefix.get_help().unwrap().to_string();
        assert!(help.contains("<prefix><label>"));
        assert!(help.contains("fall back to <prefix><NN>"));
    }

    #[test]
    fn test_exit_status() {
        assert_eq!(exit_status(true), 0);
        assert_eq!(exit_status(false), 2);
    }

    #[tokio::test]
    async fn test_build_config_file_then_overrides() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{ "drives": ["{}"], "subsystem_prefix": "file-", "port": 4421 }}"#,
            UUID_A
        )
        .unwrap();
        let path = file.path().to_str().unwrap();

        // File values replace defaults
        let config = build_config(&args(&["--config", path])).await.unwrap();
        assert_eq!(config.subsystem_prefix, "file-");
        assert_eq!(config.port, 4421);
        assert_eq!(config.drives, vec![DriveUuid::parse(UUID_A).unwrap()]);
        assert_eq!(config.modules, vec!["nvme_tcp", "nvmet", "nvmet-tcp"]);

        // Command-line values replace file values
        let config = build_config(&args(&[
            "--config",
            path,
            "--prefix",
            "cli-",
            "--drive",
            UUID_B,
            "--enable-attempts",
            "3",
        ]))
        .await
        .unwrap();
        assert_eq!(config.subsystem_prefix, "cli-");
        assert_eq!(config.port, 4421);
        assert_eq!(config.drives, vec![DriveUuid::parse(UUID_B).unwrap()]);
        assert_eq!(config.enable_retry.max_attempts, 3);
        assert_eq!(config.enable_retry.delay_ms, 1000);
    }

    #[tokio::test]
    async fn test_skip_modules_clears_module_list() {
        let config = build_config(&args(&["--skip-modules", "--drive", UUID_A]))
            .await
            .unwrap();
        assert!(config.modules.is_empty());

        let config = build_config(&args(&["--drive", UUID_A])).await.unwrap();
        assert_eq!(config.modules.len(), 3);
    }

    #[tokio::test]
    async fn test_execute_fatal_on_invalid_config() {
        let root = TempDir::new().unwrap();
        let root = root.path().to_str().unwrap();

        // No drives
        assert_eq!(execute(&args(&["cleanup", "--configfs-root", root])).await, EXIT_FATAL);
        // Missing config file
        assert_eq!(
            execute(&args(&["--config", "/nonexistent/nvmet.json"])).await,
            EXIT_FATAL
        );
    }

    #[tokio::test]
    async fn test_execute_complete_and_partial() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_str().unwrap();

        let cleanup = args(&["cleanup", "--configfs-root", root, "--drive", UUID_A]);
        assert_eq!(execute(&cleanup).await, EXIT_OK);

        // Nothing creates the enable attribute under a plain directory
        let apply = args(&[
            "apply",
            "--configfs-root",
            root,
            "--drive",
            UUID_A,
            "--skip-modules",
            "--enable-attempts",
            "1",
            "--output",
            "json",
        ]);
        assert_eq!(execute(&apply).await, EXIT_PARTIAL);

        let status = args(&["status", "--configfs-root", root, "--output", "text"]);
        assert_eq!(execute(&status).await, EXIT_OK);
    }

    #[test]
    fn test_snapshot_lines() {
        assert_eq!(
            snapshot_lines(&TreeSnapshot::default()),
            vec!["port 1: not configured"]
        );

        let mut port = PortSnapshot::default();
        for (name, value) in [
            ("addr_trtype", "tcp"),
            ("addr_traddr", "0.0.0.0"),
            ("addr_trsvcid", "4420"),
            ("addr_adrfam", "ipv4"),
        ] {
            port.attributes.insert(name.to_string(), value.to_string());
        }
        port.subsystems
            .insert("mckenna-01".to_string(), "mckenna-01".to_string());

        let namespace = NamespaceSnapshot {
            device_path: Some(format!("/dev/disk/by-uuid/{}", UUID_A)),
            enable: Some("1".to_string()),
        };
        let mut subsystems = BTreeMap::new();
        subsystems.insert(
            "mckenna-01".to_string(),
            SubsystemSnapshot {
                allow_any_host: Some("1".to_string()),
                namespaces: BTreeMap::from([("1".to_string(), namespace)]),
            },
        );
        subsystems.insert("mckenna-02".to_string(), SubsystemSnapshot::default());

        let lines = snapshot_lines(&TreeSnapshot {
            port: Some(port),
            subsystems,
        });

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "port 1: tcp 0.0.0.0:4420 (ipv4)");
        assert!(lines[1].starts_with("mckenna-01"));
        assert!(lines[1].contains(&format!("/dev/disk/by-uuid/{}", UUID_A)));
        assert!(lines[1].ends_with("enabled linked"));
        assert!(lines[2].starts_with("mckenna-02"));
        assert!(lines[2].ends_with("disabled unlinked"));
    }
}
