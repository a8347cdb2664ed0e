//! CLI around dcm2niix running in a Docker or Singularity container.
//!
//! Converts single DICOM directories or batches listed in CSV/JSON, prints the
//! parsed conversion result, and writes success/failure reports in CSV/JSON.
use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::*;
use futures::stream::{self, StreamExt};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use log::info;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dcm2niix_runner::config::{
    self, apply_options, load_runtime_config, parse_key_val, sanitize_optional_string,
    EffectiveConfig, RuntimeConfigFile, DEFAULT_CONFIG_PATH,
};
use dcm2niix_runner::dcm2niix::command_line_args;
use dcm2niix_runner::processor::{process_single_input, write_reports, ProcessResult};
use dcm2niix_runner::registry::RegistryClient;
use dcm2niix_runner::runtime::{Backend, DOCKER_REPOSITORY};
use dcm2niix_runner::{CommandRuntime, ContainerRuntime, ConversionOutput, Dcm2niix, Options};

#[derive(Parser)]
#[command(name = "dcm2niix_runner")]
#[command(about = "Containerized dcm2niix DICOM to NIfTI converter", long_about = None)]
#[command(version)]
/// Entry CLI that dispatches to subcommands.
struct Cli {
    /// Optional runtime config in TOML that supplies defaults for the CLI.
    #[arg(short, long, help = "TOML config file")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert one DICOM directory
    Convert(ConvertArgs),
    /// Convert every directory listed in a CSV or JSON file
    Batch(BatchArgs),
    /// Print the dcm2niix arguments the current options render to
    Args(ArgsCommand),
    /// Download the dcm2niix image into a folder
    Pull(PullArgs),
    /// List published dcm2niix image versions
    Tags(ImageArgs),
}

#[derive(Args, Clone, Default)]
struct ImageArgs {
    /// Container backend: docker or singularity.
    #[arg(long)]
    backend: Option<String>,

    /// dcm2niix image tag, e.g. 1.0.20211006.
    #[arg(long, value_name = "TAG")]
    image_version: Option<String>,

    /// Docker Hub API base URL.
    #[arg(long)]
    registry_url: Option<String>,
}

#[derive(Args, Clone, Default)]
struct OptionArgs {
    /// dcm2niix option override, e.g. `--set compress=true --set filename=%p_%s`.
    #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_key_val)]
    set: Vec<(String, String)>,
}

#[derive(Args, Clone)]
struct ArgsCommand {
    #[command(flatten)]
    options: OptionArgs,

    /// List every option with its config key, flag, current value and description.
    #[arg(long)]
    list: bool,
}

#[derive(Args, Clone)]
struct SharedArgs {
    #[command(flatten)]
    image: ImageArgs,

    #[command(flatten)]
    options: OptionArgs,

    /// Download the image once into this folder and run it from there (singularity only).
    #[arg(long, value_name = "DIR")]
    download_folder: Option<PathBuf>,

    /// Fail before converting if the image version is not published.
    #[arg(long)]
    verify_version: bool,
}

#[derive(Args, Clone)]
struct ConvertArgs {
    #[command(flatten)]
    shared: SharedArgs,

    /// Directory containing the DICOM files.
    #[arg(short, long, value_name = "DIR")]
    input: PathBuf,

    /// Directory to write NIfTI files to (defaults to the input directory).
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Extra arguments passed to dcm2niix as-is.
    #[arg(last = true)]
    extra: Vec<String>,
}

#[derive(Args, Clone)]
struct BatchArgs {
    #[command(flatten)]
    shared: SharedArgs,

    /// Path to the CSV or JSON file listing DICOM directories to convert.
    #[arg(short, long)]
    input: PathBuf,

    /// Root directory for outputs; each input gets a sub-directory named after it.
    #[arg(long, value_name = "DIR")]
    output_root: Option<PathBuf>,

    /// Optional destination for the CSV output report.
    #[arg(long)]
    report_csv: Option<PathBuf>,

    /// Optional destination for the JSON output report.
    #[arg(long)]
    report_json: Option<PathBuf>,

    /// Maximum number of conversions running at the same time.
    #[arg(long)]
    concurrency: Option<usize>,
}

#[derive(Args, Clone)]
struct PullArgs {
    #[command(flatten)]
    image: ImageArgs,

    /// Folder the image file is written to (singularity only).
    #[arg(long, value_name = "DIR")]
    download_folder: Option<PathBuf>,
}

/// Entrypoint that wires CLI args, runtime config, the container runtime and the batch workers.
#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    init_logging(args.verbose);
    let cfg_path = args.config.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let runtime_file = load_runtime_config(Some(&cfg_path))?;

    match args.command {
        Commands::Convert(cmd) => run_convert(cmd, runtime_file).await,
        Commands::Batch(cmd) => run_batch(cmd, runtime_file).await,
        Commands::Args(cmd) => run_args(cmd, runtime_file),
        Commands::Pull(cmd) => run_pull(cmd, runtime_file),
        Commands::Tags(cmd) => run_tags(cmd, runtime_file).await,
    }
}

fn init_logging(verbose: bool) {
    let mut builder = env_logger::Builder::from_default_env();
    if let Some(level) = default_log_level(verbose, std::env::var_os("RUST_LOG").is_some()) {
        builder.filter_level(level);
    }
    builder.init();
}

/// `--verbose` forces debug output; otherwise `RUST_LOG` wins and info is the fallback.
fn default_log_level(verbose: bool, rust_log_set: bool) -> Option<log::LevelFilter> {
    match (verbose, rust_log_set) {
        (true, _) => Some(log::LevelFilter::Debug),
        (false, false) => Some(log::LevelFilter::Info),
        (false, true) => None,
    }
}

/// Merge CLI overrides with a parsed runtime config, falling back to crate defaults.
///
/// CLI flags take precedence, followed by the runtime file, and finally `EffectiveConfig::defaults()`.
fn merge_config(cli: &ImageArgs, download_folder: Option<PathBuf>, file: Option<RuntimeConfigFile>) -> EffectiveConfig {
    let mut cfg = EffectiveConfig::defaults();
    let f = file.unwrap_or_default();

    cfg.backend = sanitize_optional_string(cli.backend.clone()).or(sanitize_optional_string(f.backend)).unwrap_or(cfg.backend);
    cfg.version = sanitize_optional_string(cli.image_version.clone()).or(sanitize_optional_string(f.version)).unwrap_or(cfg.version);
    cfg.registry_url = cli.registry_url.clone().or(f.registry_url).unwrap_or(cfg.registry_url);
    cfg.download_folder = download_folder.or(f.download_folder);
    cfg.concurrency = f.concurrency.unwrap_or(cfg.concurrency);
    cfg.report_csv = f.report_csv.unwrap_or(cfg.report_csv);
    cfg.report_json = f.report_json.unwrap_or(cfg.report_json);
    cfg.options = f.options.unwrap_or_default();

    cfg
}

/// Builds a configured dcm2niix for the effective config, downloading the image if requested.
async fn build_dcm2niix(shared: &SharedArgs, effective: &EffectiveConfig) -> Result<Dcm2niix> {
    if shared.verify_version {
        verify_version(effective).await?;
    }

    let mut dcm2niix = Dcm2niix::new(effective.version.clone(), &effective.backend)
        .context("Failed to select container backend")?;
    apply_options(dcm2niix.options_mut(), &effective.options, &shared.options.set)?;
    if let Some(folder) = &effective.download_folder {
        dcm2niix
            .enable_download(folder)
            .context("Failed to download the dcm2niix image")?;
    }
    Ok(dcm2niix)
}

async fn verify_version(effective: &EffectiveConfig) -> Result<()> {
    let registry = RegistryClient::new(&effective.registry_url)?;
    let exists = registry
        .tag_exists(DOCKER_REPOSITORY, &effective.version)
        .await
        .context("Failed to look up image version")?;
    if !exists {
        bail!(
            "dcm2niix version '{}' is not published as {}",
            effective.version,
            DOCKER_REPOSITORY
        );
    }
    info!("Image {}:{} is published", DOCKER_REPOSITORY, effective.version);
    Ok(())
}

async fn run_convert(args: ConvertArgs, file: Option<RuntimeConfigFile>) -> Result<()> {
    let effective = merge_config(&args.shared.image, args.shared.download_folder.clone(), file);
    let dcm2niix = build_dcm2niix(&args.shared, &effective).await?;

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap(),
    );
    pb.enable_steady_tick(Duration::from_millis(100));

    let line_pb = pb.clone();
    let output = tokio::task::spawn_blocking(move || {
        dcm2niix.convert_with(&args.input, args.output.as_deref(), &args.extra, |line| {
            line_pb.set_message(line.to_string())
        })
    })
    .await
    .context("Conversion task failed")?;
    pb.finish_and_clear();

    let output = output.context("Conversion failed")?;
    print_output(&output);
    Ok(())
}

fn print_output(output: &ConversionOutput) {
    match &output.output_path {
        Some(path) => println!("{} {}", "✓".green(), path.display()),
        None => println!("{} No image was converted", "✗".red()),
    }
    if let Some(shape) = output.image_shape {
        println!("  shape:  {}x{}x{}x{}", shape[0], shape[1], shape[2], shape[3]);
    }
    if let Some(n_slices) = &output.n_slices {
        println!("  slices: {}", n_slices);
    }
    for warning in &output.warnings {
        println!("  {} {}", "warning:".yellow(), warning);
    }
    if output.no_direction {
        println!("  {}", "slice direction could not be determined".yellow().bold());
    }
}

async fn run_batch(args: BatchArgs, file: Option<RuntimeConfigFile>) -> Result<()> {
    let mut effective = merge_config(&args.shared.image, args.shared.download_folder.clone(), file);
    effective.concurrency = args.concurrency.unwrap_or(effective.concurrency).max(1);
    effective.report_csv = args.report_csv.clone().unwrap_or(effective.report_csv);
    effective.report_json = args.report_json.clone().unwrap_or(effective.report_json);

    let dcm2niix = Arc::new(build_dcm2niix(&args.shared, &effective).await?);
    let inputs = config::parse_input_file(&args.input).context("Parse input failed")?;
    if let Some(root) = &args.output_root {
        std::fs::create_dir_all(root)
            .with_context(|| format!("Failed to create {}", root.display()))?;
    }
    let mp = Arc::new(MultiProgress::new());

    println!("Converting {} directories with {}...", inputs.len(), dcm2niix.container_backend());

    let results: Vec<ProcessResult> = stream::iter(inputs)
        .map(|input| {
            let dcm2niix = dcm2niix.clone();
            let output_root = args.output_root.clone();
            let mp = mp.clone();
            async move { process_single_input(dcm2niix, input, output_root, mp).await }
        })
        .buffer_unordered(effective.concurrency)
        .collect()
        .await;

    write_reports(&effective.report_csv, &effective.report_json, &results)?;

    let ok = results.iter().filter(|r| r.status == "Success").count();
    println!("Summary: {} Success, {} Failed/Partial.", ok, results.len() - ok);
    Ok(())
}

fn run_args(args: ArgsCommand, file: Option<RuntimeConfigFile>) -> Result<()> {
    let file_options = file.and_then(|f| f.options).unwrap_or_default();
    let mut options = Options::default();
    apply_options(&mut options, &file_options, &args.options.set)?;

    if args.list {
        for (spec, value) in options.entries() {
            println!(
                "{} {:<13} {:<14} {}",
                format!("{:<30}", spec.id.key()).bold(),
                spec.token,
                value.unwrap_or("-"),
                spec.help.dimmed()
            );
        }
        return Ok(());
    }
    println!("{}", command_line_args(&options, &[]).join(" "));
    Ok(())
}

/// Only singularity can write the image to a chosen folder.
fn check_pull_target(backend: Backend, download_folder: Option<&Path>) -> dcm2niix_runner::Result<()> {
    match (backend, download_folder) {
        (Backend::Docker, Some(_)) => Err(dcm2niix_runner::Error::DownloadRequiresSingularity(backend)),
        _ => Ok(()),
    }
}

fn run_pull(args: PullArgs, file: Option<RuntimeConfigFile>) -> Result<()> {
    let effective = merge_config(&args.image, args.download_folder, file);
    let backend: Backend = effective.backend.parse()?;
    check_pull_target(backend, effective.download_folder.as_deref())?;
    let runtime = CommandRuntime;
    if !runtime.is_installed(backend) {
        bail!(dcm2niix_runner::Error::BackendNotInstalled(backend));
    }

    match (backend, &effective.download_folder) {
        (Backend::Singularity, Some(folder)) => {
            let mut dcm2niix = Dcm2niix::new(effective.version.clone(), &effective.backend)?;
            dcm2niix.enable_download(folder)?;
            if let Some(image) = dcm2niix.downloaded_image() {
                println!("{} {}", "✓".green(), image.display());
            }
        }
        _ => {
            let image = backend.image_url(&effective.version);
            runtime.pull(backend, &image, None)?;
            println!("{} {}", "✓".green(), image);
        }
    }
    Ok(())
}

async fn run_tags(args: ImageArgs, file: Option<RuntimeConfigFile>) -> Result<()> {
    let effective = merge_config(&args, None, file);
    let registry = RegistryClient::new(&effective.registry_url)?;
    let tags = registry
        .list_tags(DOCKER_REPOSITORY)
        .await
        .context("Failed to list image versions")?;
    for tag in tags {
        if tag == effective.version {
            println!("{} {}", tag.green(), "(configured)".dimmed());
        } else {
            println!("{}", tag);
        }
    }
    Ok(())
}
