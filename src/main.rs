//! storage-deploy CLI - install, uninstall and upgrade the storage platform

use anyhow::{Result, anyhow};
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use storage_deploy::commands::portal::PortalAction;
use storage_deploy::commands::{self, RunOptions};
use storage_deploy::config::defaults;
use storage_deploy::config::{Component, InstallConfig, PortalCredentials, Settings};
use storage_deploy::utils::{Remediation, logger};

#[derive(Parser)]
#[command(name = "storage-deploy")]
#[command(author, version, about = "Install, uninstall and upgrade the storage platform on Kubernetes", long_about = None)]
struct Cli {
    /// Verbose output (can be used multiple times: -v, -vv, -vvv)
    /// -v: INFO, -vv: DEBUG, -vvv: TRACE
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Dry-run mode: write built manifests under DIR instead of applying them
    #[arg(long, global = true, value_name = "DIR")]
    dry_run: Option<PathBuf>,

    /// Answer yes to confirmation prompts
    #[arg(short, long, global = true)]
    yes: bool,

    /// Let panics propagate with a backtrace instead of reporting a clean failure
    #[arg(long, global = true)]
    stack_trace: bool,

    /// Path to kubeconfig file
    #[arg(short, long, global = true, env = "KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install the storage platform
    Install {
        #[command(flatten)]
        platform: PlatformArgs,

        #[command(flatten)]
        portal: PortalArgs,

        /// Also install the portal manager (needs the --portal-* credentials)
        #[arg(long)]
        with_portal: bool,

        /// Do not create the cluster namespace
        #[arg(long)]
        no_create_namespace: bool,
    },

    /// Uninstall the storage platform
    Uninstall {
        #[command(flatten)]
        platform: PlatformArgs,

        /// Leave the platform namespaces in place
        #[arg(long)]
        skip_namespace_deletion: bool,

        /// Do not save removed manifests locally
        #[arg(long)]
        no_backup: bool,

        /// Also remove the portal manager
        #[arg(long)]
        with_portal: bool,
    },

    /// Upgrade the installed storage platform
    Upgrade {
        #[command(flatten)]
        platform: PlatformArgs,

        #[command(flatten)]
        portal: PortalArgs,

        /// Install the portal manager alongside the new version
        #[arg(long)]
        with_portal: bool,
    },

    /// Manage the portal manager add-on
    Portal {
        #[command(subcommand)]
        command: PortalCommands,
    },

    /// Print an example configuration file
    Config,

    /// Generate shell completion scripts
    Completion {
        /// Shell type
        #[arg(value_enum)]
        shell: Shell,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum PortalCommands {
    /// Turn the portal manager on in the cluster resource
    Enable {
        #[command(flatten)]
        platform: PlatformArgs,
    },

    /// Turn the portal manager off in the cluster resource
    Disable {
        #[command(flatten)]
        platform: PlatformArgs,
    },

    /// Install the portal manager configuration and enable it
    Install {
        #[command(flatten)]
        platform: PlatformArgs,

        #[command(flatten)]
        portal: PortalArgs,
    },

    /// Disable the portal manager and remove its configuration
    Uninstall {
        #[command(flatten)]
        platform: PlatformArgs,
    },
}

#[derive(Args, Debug, Clone, Default)]
struct PlatformArgs {
    /// Platform version, or "latest"
    #[arg(long)]
    version: Option<String>,

    /// Namespace of the storage operator
    #[arg(long)]
    operator_namespace: Option<String>,

    /// Namespace of the storage cluster (defaults to the operator namespace)
    #[arg(long)]
    cluster_namespace: Option<String>,

    /// Namespace of the bundled etcd
    #[arg(long)]
    etcd_namespace: Option<String>,

    /// Use existing etcd endpoints instead of installing etcd
    #[arg(long)]
    skip_etcd: bool,

    /// Comma-separated external etcd endpoints
    #[arg(long, env = "STORAGE_ETCD_ENDPOINTS")]
    etcd_endpoints: Option<String>,

    /// Talk to etcd over TLS
    #[arg(long)]
    etcd_tls: bool,

    /// Secret holding the etcd client certificates
    #[arg(long)]
    etcd_tls_secret: Option<String>,

    /// Storage class for the bundled etcd volumes
    #[arg(long)]
    etcd_storage_class: Option<String>,

    /// Skip the round-trip check of external etcd endpoints
    #[arg(long)]
    skip_etcd_validation: bool,

    /// Enable platform metrics
    #[arg(long)]
    metrics: bool,

    /// Read a component manifest from a local file (COMPONENT=PATH)
    #[arg(long, value_name = "COMPONENT=PATH", value_parser = parse_override)]
    manifest_path: Vec<(Component, String)>,

    /// Fetch a component manifest from a URL (COMPONENT=URL)
    #[arg(long, value_name = "COMPONENT=URL", value_parser = parse_override)]
    manifest_url: Vec<(Component, String)>,

    /// Extract a component manifest from a container image (COMPONENT=IMAGE)
    #[arg(long, value_name = "COMPONENT=IMAGE", value_parser = parse_override)]
    manifest_image: Vec<(Component, String)>,
}

#[derive(Args, Debug, Clone, Default)]
struct PortalArgs {
    #[arg(long, env = "STORAGE_PORTAL_CLIENT_ID")]
    portal_client_id: Option<String>,

    #[arg(long, env = "STORAGE_PORTAL_SECRET", hide_env_values = true)]
    portal_secret: Option<String>,

    #[arg(long, env = "STORAGE_PORTAL_API_URL")]
    portal_api_url: Option<String>,

    #[arg(long, env = "STORAGE_PORTAL_TENANT_ID")]
    portal_tenant_id: Option<String>,
}

fn parse_override(raw: &str) -> std::result::Result<(Component, String), String> {
    let (name, location) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected COMPONENT=LOCATION, got '{raw}'"))?;
    let component = Component::from_name(name.trim()).ok_or_else(|| {
        let valid: Vec<&str> = Component::ALL.iter().map(|c| c.name()).collect();
        format!("unknown component '{name}' (valid: {})", valid.join(", "))
    })?;
    Ok((component, location.trim().to_string()))
}

impl PlatformArgs {
    /// Layer the flags over the settings-derived config
    fn apply(self, config: &mut InstallConfig) {
        if let Some(version) = self.version {
            config.version = version;
        }
        if let Some(ns) = self.operator_namespace {
            config.namespaces.operator = ns;
        }
        if let Some(ns) = self.cluster_namespace {
            config.namespaces.cluster = Some(ns);
        }
        if let Some(ns) = self.etcd_namespace {
            config.namespaces.etcd = ns;
        }

        config.etcd.skip |= self.skip_etcd;
        config.etcd.tls |= self.etcd_tls;
        if let Some(endpoints) = self.etcd_endpoints {
            config.etcd.endpoints = endpoints;
        }
        if let Some(secret) = self.etcd_tls_secret {
            config.etcd.tls_secret_name = secret;
        }
        if self.etcd_storage_class.is_some() {
            config.etcd.storage_class = self.etcd_storage_class;
        }
        if self.skip_etcd_validation {
            config.etcd.validate = false;
        }
        config.metrics |= self.metrics;

        for (component, path) in self.manifest_path {
            config.sources.entry(component).or_default().path = Some(PathBuf::from(path));
        }
        for (component, url) in self.manifest_url {
            config.sources.entry(component).or_default().url = Some(url);
        }
        for (component, image) in self.manifest_image {
            config.sources.entry(component).or_default().image = Some(image);
        }
    }
}

impl PortalArgs {
    fn credentials(self) -> Option<PortalCredentials> {
        Some(PortalCredentials {
            client_id: self.portal_client_id?,
            secret: self.portal_secret?,
            api_url: self.portal_api_url?,
            tenant_id: self.portal_tenant_id?,
        })
    }
}

struct Context {
    settings: Settings,
    dry_run: Option<PathBuf>,
    options: RunOptions,
}

impl Context {
    fn config(&self, platform: PlatformArgs) -> InstallConfig {
        let mut config = self.settings.install_config();
        config.dry_run = self.dry_run.clone();
        platform.apply(&mut config);
        config
    }
}

fn main() {
    let cli = Cli::parse();
    logger::init(cli.verbose);

    let result = if cli.stack_trace {
        run(cli)
    } else {
        // Report panics through the normal failure path instead of a raw dump
        panic::set_hook(Box::new(|_| {}));
        match panic::catch_unwind(AssertUnwindSafe(|| run(cli))) {
            Ok(result) => result,
            Err(payload) => Err(anyhow!(
                "internal error: {} (re-run with --stack-trace for details)",
                panic_message(payload.as_ref())
            )),
        }
    };

    if let Err(e) = result {
        Remediation::from_error(&e).display();
        std::process::exit(1);
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        return s.to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "unknown panic".to_string()
}

fn run(cli: Cli) -> Result<()> {
    let settings = Settings::load();
    let ctx = Context {
        options: RunOptions {
            kubeconfig: cli.kubeconfig,
            assume_yes: cli.yes,
            confirm: settings.behavior.confirm_destructive,
        },
        dry_run: cli.dry_run,
        settings,
    };

    match cli.command {
        Commands::Install {
            platform,
            portal,
            with_portal,
            no_create_namespace,
        } => {
            let mut config = ctx.config(platform);
            config.options.portal_manager = with_portal;
            config.portal = portal.credentials();
            config.create_namespace = !no_create_namespace;
            commands::install::install(&config, &ctx.options)
        }
        Commands::Uninstall {
            platform,
            skip_namespace_deletion,
            no_backup,
            with_portal,
        } => {
            let mut config = ctx.config(platform);
            config.skip_namespace_deletion = skip_namespace_deletion;
            config.backup &= !no_backup;
            config.options.portal_manager = with_portal;
            commands::uninstall::uninstall(&config, &ctx.options)
        }
        Commands::Upgrade {
            platform,
            portal,
            with_portal,
        } => {
            let mut config = ctx.config(platform);
            config.options.portal_manager = with_portal;
            config.portal = portal.credentials();
            commands::upgrade::upgrade(&config, &ctx.options)
        }
        Commands::Portal { command } => handle_portal_command(&ctx, command),
        Commands::Config => {
            print!("{}", Settings::example_config());
            Ok(())
        }
        Commands::Completion { shell } => handle_completion_command(shell),
        Commands::Version => handle_version_command(),
    }
}

fn handle_portal_command(ctx: &Context, command: PortalCommands) -> Result<()> {
    let (action, platform, portal) = match command {
        PortalCommands::Enable { platform } => (PortalAction::Enable, platform, None),
        PortalCommands::Disable { platform } => (PortalAction::Disable, platform, None),
        PortalCommands::Install { platform, portal } => (PortalAction::Install, platform, Some(portal)),
        PortalCommands::Uninstall { platform } => (PortalAction::Uninstall, platform, None),
    };

    let mut config = ctx.config(platform);
    config.options.portal_manager = true;
    config.portal = portal.and_then(PortalArgs::credentials);
    commands::portal::run(action, &config, &ctx.options)
}

fn handle_completion_command(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "storage-deploy", &mut io::stdout());
    Ok(())
}

fn handle_version_command() -> Result<()> {
    println!("storage-deploy {}", env!("CARGO_PKG_VERSION"));
    println!(
        "Supported platform versions: {} to {}",
        defaults::OLDEST_SUPPORTED_VERSION,
        defaults::LATEST_SUPPORTED_VERSION
    );
    Ok(())
}
