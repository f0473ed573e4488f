mod cli;

use castforged::config::{self, Config};
use castforged::recorder::{
    CommandPlatform, Platform, Recorder, RecordingRequest, RecordingResult, TwitcastingPlatform,
};
use castforged_process::{check_tools, resolve_tool, ProcessEngine};
use castforged_retry::RetryExecutor;
use castforged_verify::{Container, Expectations, FileVerifier};

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Per-run overrides from the command line.
struct RunOptions {
    attempts: Option<u32>,
    timeout: Option<u64>,
    json: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "castforged=trace,castforged_process=trace,castforged_retry=trace,castforged_verify=debug".to_string()
        } else {
            "castforged=debug,castforged_process=info,castforged_retry=info,castforged_verify=info".to_string()
        }
    });

    // Logs go to stderr so --json output on stdout stays parseable
    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    let code = match cli.command {
        Commands::Record {
            url,
            output,
            quality,
            attempts,
            timeout,
            json,
        } => {
            let options = RunOptions { attempts, timeout, json };
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(record(url, output, quality, options, cli.config.as_deref()))?
        }
        Commands::Exec {
            output,
            attempts,
            timeout,
            no_verify,
            json,
            command,
        } => {
            let options = RunOptions { attempts, timeout, json };
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(exec(command, output, no_verify, options, cli.config.as_deref()))?
        }
        Commands::Verify {
            file,
            format,
            expected_duration,
            elapsed,
            json,
        } => verify_file(&file, format.as_deref(), expected_duration, elapsed, json, cli.config.as_deref())?,
        Commands::CheckTools => check_tools_cmd(cli.config.as_deref())?,
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())?
        }
        Commands::Version => {
            println!("castforged {}", env!("CARGO_PKG_VERSION"));
            0
        }
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

fn build_recorder(config: &Config, attempts: Option<u32>, verify: bool) -> Result<Recorder> {
    let mut settings = config.recorder_settings()?;
    if let Some(n) = attempts {
        settings.policy.max_attempts = n;
    }
    settings.policy.validate().context("Invalid retry settings")?;
    settings.verify &= verify;

    let engine = Arc::new(ProcessEngine::new(config.engine.to_engine_config()));
    let retry = Arc::new(RetryExecutor::new());
    let verifier = Arc::new(FileVerifier::new(config.verify.clone()));
    Ok(Recorder::new(engine, retry, verifier, settings))
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_interrupt(token: &CancellationToken) {
    let token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping recording");
            token.cancel();
        }
    });
}

async fn record(
    url: String,
    output: PathBuf,
    quality: Option<String>,
    options: RunOptions,
    config_path: Option<&Path>,
) -> Result<i32> {
    let config = config::load_config_or_default(config_path)?;

    let streamlink = resolve_tool("streamlink", config.twitcasting.streamlink_path.as_deref())
        .unwrap_or_else(|e| {
            tracing::warn!("{e}");
            PathBuf::from("streamlink")
        });
    let mut settings = config.twitcasting.to_settings(streamlink);
    if let Some(quality) = quality {
        settings.quality = quality;
    }
    if let Some(secs) = options.timeout {
        settings.timeout = Duration::from_secs(secs);
    }

    let platform = TwitcastingPlatform::new(url.clone(), settings).with_diagnostics(config.diagnostic_table()?);
    let recorder = build_recorder(&config, options.attempts, true)?;
    let request = RecordingRequest::new(output).with_label(url);

    run(&recorder, &platform, request, &config, options.json).await
}

async fn exec(
    command: Vec<String>,
    output: PathBuf,
    no_verify: bool,
    options: RunOptions,
    config_path: Option<&Path>,
) -> Result<i32> {
    let config = config::load_config_or_default(config_path)?;

    let label = command.join(" ");
    let platform = CommandPlatform::new(command)
        .with_timeout(options.timeout.map(Duration::from_secs))
        .with_diagnostics(config.diagnostic_table()?);
    let recorder = build_recorder(&config, options.attempts, !no_verify)?;
    let request = RecordingRequest::new(output).with_label(label);

    run(&recorder, &platform, request, &config, options.json).await
}

async fn run(
    recorder: &Recorder,
    platform: &dyn Platform,
    request: RecordingRequest,
    config: &Config,
    json: bool,
) -> Result<i32> {
    let cancel = CancellationToken::new();
    cancel_on_interrupt(&cancel);

    let result = recorder.record(platform, request, &cancel).await;

    if let Some(dir) = &config.recorder.result_log_dir {
        let log_path = dir.join(format!("{}.json", result.id));
        match result.save_json(&log_path) {
            Ok(()) => tracing::info!("Result log written to {:?}", log_path),
            Err(e) => tracing::warn!("Failed to write result log {:?}: {}", log_path, e),
        }
    }

    print_result(&result, json)?;
    Ok(result.exit_code())
}

fn print_result(result: &RecordingResult, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }

    println!("Status: {}", result.status);
    println!("Summary: {}", result.summary);
    println!("Attempts: {}", result.attempts_made);
    if let Some(ref path) = result.output_path {
        println!("Output: {}", path.display());
    }
    if result.segments_downloaded > 0 {
        println!("Segments downloaded: {}", result.segments_downloaded);
    }
    if let Some(ref process) = result.last_process {
        if !result.is_success() {
            if let Some(line) = process.last_diagnostic() {
                println!("Last output: {}", line);
            }
        }
    }
    Ok(())
}

fn verify_file(
    file: &Path,
    format: Option<&str>,
    expected_duration: Option<f64>,
    elapsed: Option<f64>,
    json: bool,
    config_path: Option<&Path>,
) -> Result<i32> {
    let config = config::load_config_or_default(config_path)?;

    let mut expect = Expectations::default();
    if let Some(name) = format {
        let container: Container = name.parse().map_err(|e: String| anyhow::anyhow!(e))?;
        expect = expect.with_format(container);
    }
    if let Some(secs) = expected_duration {
        expect = expect.with_expected_duration(
            Duration::try_from_secs_f64(secs).context("--expected-duration must be a non-negative number")?,
        );
    }
    if let Some(secs) = elapsed {
        expect = expect.with_elapsed(Duration::try_from_secs_f64(secs).context("--elapsed must be a non-negative number")?);
    }

    let verifier = FileVerifier::new(config.verify);
    let report = verifier.verify(file, &expect);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("File: {}", file.display());
        println!("Status: {}", report.status);
        if let Some(format) = report.format {
            println!("Container: {}", format);
        }
        println!("Size: {} ({} bytes)", castforged_common::human_bytes(report.size), report.size);
        if let Some(duration) = report.duration {
            println!("Duration: {}", castforged_common::human_duration(duration));
        }
        if let Some(ref message) = report.message {
            println!("Detail: {}", message);
        }
    }

    Ok(if report.is_complete() { 0 } else { 1 })
}

fn check_tools_cmd(config_path: Option<&Path>) -> Result<i32> {
    let config = config::load_config_or_default(config_path)?;
    let capture_tool = config
        .twitcasting
        .streamlink_path
        .as_ref()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|| "streamlink".to_string());

    println!("Checking external tools...\n");

    let tools = check_tools(&capture_tool);
    let mut all_ok = true;

    for tool in &tools {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({})", version);
        }

        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }

        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. Install them to enable all features.");
    }

    Ok(0)
}

fn validate_config(path: Option<&Path>) -> Result<i32> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            config
        }
        None => {
            println!("No config file specified, using defaults");
            Config::default()
        }
    };

    let policy = config.retry.to_policy()?;
    println!(
        "  Engine: {} concurrent, {}s grace period",
        config.engine.max_concurrent, config.engine.grace_period_secs
    );
    println!(
        "  Retry: preset {:?}, {} attempts, {:?} strategy",
        config.retry.preset, policy.max_attempts, policy.strategy
    );
    println!(
        "  Recorder: verify {}, partial files {:?}",
        config.recorder.verify, config.recorder.partial_file_action
    );
    println!("  TwitCasting quality: {}", config.twitcasting.quality);
    println!("  Diagnostic rules: {}", config.diagnostics.len());

    Ok(0)
}
