//! buildrig - container build engine CLI
//!
//! ## Usage
//!
//! ```sh
//! buildrig platform
//! buildrig backends
//! buildrig images [--runtime podman]
//! buildrig build <dockerfile> <image> [linux/amd64,linux/arm64] [--context <bundle>]
//! buildrig cp-out <container> <path>
//! ```
//!
//! ## Runtime Selection
//!
//! The backend comes from the configuration file or `BUILDRIG_RUNTIME`;
//! `--runtime` and `--socket` override both.

use anyhow::{Context, Result, bail};
use buildrig::{
    BackendRegistry, ContainerManager, EngineConfig, MultiArchRequest, Platform, PlatformSpec,
    platform::resolve_build_platforms,
};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

// =============================================================================
// CLI Parsing
// =============================================================================

#[derive(Debug)]
enum Command {
    Platform,
    Backends,
    Images,
    Build {
        dockerfile: PathBuf,
        image: String,
        platforms: Option<String>,
        context: Option<PathBuf>,
    },
    CopyOut {
        container: String,
        path: String,
    },
    Version,
    Help,
}

#[derive(Debug, Default)]
struct Overrides {
    runtime: Option<String>,
    socket: Option<PathBuf>,
}

/// Splits `--flag value` pairs out of the positional arguments.
fn take_flag(args: &mut Vec<String>, names: &[&str]) -> Result<Option<String>, String> {
    let Some(pos) = args.iter().position(|a| names.contains(&a.as_str())) else {
        return Ok(None);
    };
    if pos + 1 >= args.len() {
        return Err(format!("{} requires a value", names[0]));
    }
    let value = args.remove(pos + 1);
    args.remove(pos);
    Ok(Some(value))
}

fn parse_args() -> Result<(Command, Overrides), String> {
    let mut args: Vec<String> = std::env::args().skip(1).collect();

    let overrides = Overrides {
        runtime: take_flag(&mut args, &["--runtime", "-r"])?,
        socket: take_flag(&mut args, &["--socket", "-s"])?.map(PathBuf::from),
    };
    let context = take_flag(&mut args, &["--context", "-c"])?.map(PathBuf::from);

    let Some(command) = args.first() else {
        return Ok((Command::Help, overrides));
    };

    let command = match command.as_str() {
        "platform" => Command::Platform,
        "backends" => Command::Backends,
        "images" => Command::Images,
        "build" => {
            if args.len() < 3 {
                return Err("build requires <dockerfile> <image>".to_string());
            }
            Command::Build {
                dockerfile: PathBuf::from(&args[1]),
                image: args[2].clone(),
                platforms: args.get(3).cloned(),
                context,
            }
        }
        "cp-out" => {
            if args.len() < 3 {
                return Err("cp-out requires <container> <path>".to_string());
            }
            Command::CopyOut {
                container: args[1].clone(),
                path: args[2].clone(),
            }
        }
        "version" | "--version" | "-v" => Command::Version,
        "help" | "--help" | "-h" => Command::Help,
        unknown => return Err(format!("unknown command: {}", unknown)),
    };
    Ok((command, overrides))
}

// =============================================================================
// Command Implementations
// =============================================================================

async fn connect(config: &EngineConfig) -> Result<Arc<dyn ContainerManager>> {
    BackendRegistry::with_defaults()
        .connect_configured(config)
        .await
        .with_context(|| format!("cannot reach {} backend", config.runtime))
}

fn cmd_platform() {
    let platform = Platform::detect();
    println!("host:      {}", platform.host());
    println!("container: {}", platform.container());
    let builds: Vec<String> = resolve_build_platforms(&platform)
        .iter()
        .map(ToString::to_string)
        .collect();
    println!("builds:    {}", builds.join(", "));
}

fn cmd_backends(config: &EngineConfig) {
    for name in BackendRegistry::with_defaults().names() {
        let marker = if name == config.runtime { "*" } else { " " };
        println!("{} {}", marker, name);
    }
}

async fn cmd_images(config: &EngineConfig) -> Result<()> {
    let manager = connect(config).await?;
    let images = manager.list_images().await?;

    println!("{:<20} {:>12}  TAGS", "ID", "SIZE");
    for image in images {
        let id = image.id.trim_start_matches("sha256:");
        println!(
            "{:<20} {:>12}  {}",
            &id[..id.len().min(12)],
            image.size,
            image.repo_tags.join(", ")
        );
    }
    Ok(())
}

async fn cmd_build(
    config: &EngineConfig,
    dockerfile: PathBuf,
    image: String,
    platforms: Option<String>,
    context: Option<PathBuf>,
) -> Result<()> {
    let dockerfile = tokio::fs::read(&dockerfile)
        .await
        .with_context(|| format!("cannot read {}", dockerfile.display()))?;

    let platforms: Vec<PlatformSpec> = match platforms {
        Some(list) => list
            .split(',')
            .map(|p| p.trim().parse())
            .collect::<buildrig::Result<_>>()?,
        None => vec![Platform::detect().container().clone()],
    };

    let manager = connect(config).await?;
    let request = MultiArchRequest {
        dockerfile,
        image_name: image,
        platforms,
        context,
        registry_auth: config.registry_auth.clone(),
    };
    let output = manager.build_multi_arch_image(request).await?;

    print!("{}", output.log);
    for id in output.image_ids {
        println!("{}", id);
    }
    Ok(())
}

async fn cmd_copy_out(config: &EngineConfig, container: String, path: String) -> Result<()> {
    let manager = connect(config).await?;
    match manager.copy_file_from_container(&container, &path).await? {
        Some(content) => {
            std::io::stdout().write_all(&content)?;
            Ok(())
        }
        None => bail!("{} does not exist in {}", path, container),
    }
}

fn cmd_version() {
    println!("buildrig version {}", env!("CARGO_PKG_VERSION"));
}

fn cmd_help() {
    println!(
        r#"buildrig - container build engine

USAGE:
    buildrig <command> [options]

COMMANDS:
    platform                             Show host, container and build platforms
    backends                             List registered backends
    images                               List local images
    build <dockerfile> <image> [plats]   Build an image (comma-separated platforms
                                         build and push a manifest list)
    cp-out <container> <path>            Write a file from a container to stdout
    version                              Show version info
    help                                 Show this help

OPTIONS:
    --runtime, -r <name>   Backend: docker, podman
    --socket, -s <path>    Daemon socket (skips discovery)
    --context, -c <path>   Build context bundle (tar or tar.gz)

ENVIRONMENT:
    BUILDRIG_CONFIG        Configuration file
    BUILDRIG_RUNTIME       Backend name
    BUILDRIG_SOCKET        Daemon socket
    BUILDRIG_REGISTRY_AUTH base64 registry credentials
    BUILDRIG_LOG           Log filter (RUST_LOG takes precedence)
"#
    );
}

fn init_tracing(config: &EngineConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(command: Command, config: EngineConfig) -> Result<()> {
    match command {
        Command::Platform => cmd_platform(),
        Command::Backends => cmd_backends(&config),
        Command::Images => cmd_images(&config).await?,
        Command::Build {
            dockerfile,
            image,
            platforms,
            context,
        } => cmd_build(&config, dockerfile, image, platforms, context).await?,
        Command::CopyOut { container, path } => cmd_copy_out(&config, container, path).await?,
        Command::Version => cmd_version(),
        Command::Help => cmd_help(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let (command, overrides) = match parse_args() {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("error: {}", e);
            cmd_help();
            return ExitCode::FAILURE;
        }
    };

    let mut config = match EngineConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(runtime) = overrides.runtime {
        config.runtime = runtime;
    }
    if let Some(socket) = overrides.socket {
        config.socket = Some(socket);
    }

    init_tracing(&config);

    match run(command, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
