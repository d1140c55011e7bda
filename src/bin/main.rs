use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use distrobuild::{
    build::{
        registry, BuildContext, Builder, Capabilities, Capability, PackageBuilder, Toolchain,
    },
    error::ErrorKind,
    source::GitRef,
    triplet::Triplet,
};
use std::{path::PathBuf, process::ExitCode, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[clap(long, global = true, default_value_t = Level::INFO)]
    level: tracing::Level,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build one package
    Build(BuildArgs),

    /// List the packages that can be built and the inputs they accept
    List {},
}

#[derive(Args)]
struct BuildArgs {
    package: String,

    /// Existing checkout to build from instead of a fresh clone
    #[clap(long)]
    source_directory_path: Option<PathBuf>,

    /// Cleared before the build; a temporary directory is used if unset
    #[clap(long)]
    output_directory_path: Option<PathBuf>,

    /// HEAD, refs/heads/<name>, refs/tags/<name> or a full commit id
    #[clap(long)]
    git_ref: Option<GitRef>,

    /// Directory containing usr/bin/{clang,clang++,ld.lld} [default: /]
    #[clap(long)]
    toolchain_directory_path: Option<PathBuf>,

    /// [default: <host machine>-linux-musl]
    #[clap(long)]
    target_triplet: Option<Triplet>,

    #[clap(long)]
    root_fs_directory_path: Option<PathBuf>,

    #[clap(long)]
    kconfig_path: Option<PathBuf>,

    #[clap(long)]
    check_host_requirements_only: bool,

    #[clap(long)]
    skip_verification: bool,

    /// Cancel the build after this many seconds
    #[clap(long)]
    timeout: Option<u64>,
}

fn context(args: &BuildArgs, capabilities: Capabilities, cancel: CancellationToken) -> BuildContext {
    let mut context = BuildContext::new(cancel);

    if let Some(path) = &args.source_directory_path {
        context = context.with_source_directory(path);
    }

    if let Some(path) = &args.output_directory_path {
        context = context.with_output_directory(path);
    }

    if let Some(git_ref) = &args.git_ref {
        context = context.with_git_ref(git_ref.clone());
    }

    if let Some(path) = &args.root_fs_directory_path {
        context = context.with_root_fs_directory(path);
    }

    if let Some(path) = &args.kconfig_path {
        context = context.with_kconfig_path(path);
    }

    let triplet = args
        .target_triplet
        .clone()
        .unwrap_or_else(Triplet::default_target);

    if capabilities.contains(Capability::Toolchain) || args.toolchain_directory_path.is_some() {
        let directory = args
            .toolchain_directory_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("/"));
        context = context.with_toolchain(Toolchain::new(directory, triplet.clone()));
    }

    // a triplet without a toolchain is only meaningful to recipes that take one
    if capabilities.contains(Capability::TargetTriplet)
        || (args.target_triplet.is_some() && !capabilities.contains(Capability::Toolchain))
    {
        context = context.with_target_triplet(triplet);
    }

    context
}

fn cancel_on_signals(cancel: &CancellationToken, timeout: Option<u64>) {
    let interrupted = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling build");
            interrupted.cancel();
        }
    });

    if let Some(seconds) = timeout {
        let expired = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(seconds)).await;
            warn!("timed out after {}s, cancelling build", seconds);
            expired.cancel();
        });
    }
}

async fn build(args: &BuildArgs) -> Result<()> {
    let recipe = registry::find(&args.package).ok_or_else(|| {
        anyhow!(
            "unknown package '{}', expected one of: {}",
            args.package,
            registry::names().join(", ")
        )
    })?;

    let cancel = CancellationToken::new();
    cancel_on_signals(&cancel, args.timeout);

    let context = context(args, recipe.capabilities(), cancel);
    let mut builder = PackageBuilder::new(recipe, context)?;

    builder.check_host_requirements().await?;

    if args.check_host_requirements_only {
        return Ok(());
    }

    builder.build().await?;

    if let Some(output) = builder.output_directory() {
        info!(package = %args.package, output = %output.display(), "build output");
    }

    if args.skip_verification {
        warn!(package = %args.package, "skipping verification");
        return Ok(());
    }

    builder.verify_build().await
}

fn list() -> Result<()> {
    for recipe in registry::catalog() {
        let inputs = recipe
            .capabilities()
            .iter()
            .map(|capability| capability.to_string())
            .collect::<Vec<_>>()
            .join(", ");

        println!("{:<16} {}", recipe.name(), inputs);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut subscriber = tracing_subscriber::FmtSubscriber::builder().with_max_level(cli.level);

    // when we run the command with `TRACE` or `DEBUG` level, we want to see
    // the file and line number...
    if [Level::DEBUG, Level::TRACE].contains(&cli.level) {
        subscriber = subscriber.with_file(true).with_line_number(true);
    }
    let subscriber = subscriber.finish();
    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("failed to set default subscriber: {}", err);
        return ExitCode::FAILURE;
    }

    let result = match &cli.command {
        Command::Build(args) => build(args).await,
        Command::List {} => list(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(kind = %ErrorKind::of(&err), "{:?}", err);
            ExitCode::FAILURE
        }
    }
}
