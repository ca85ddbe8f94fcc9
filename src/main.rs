use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use faultfix::config::Config;
use faultfix::github::GitHubClient;
use faultfix::llm::{Analysis, ModelResponseValidator};
use faultfix::patch::PatchPreparer;
use faultfix::pipeline::{Pipeline, PipelineOutcome, ProcessedError};
use faultfix::report::ReportRenderer;
use serde_json::Value;
use std::io::Read;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(
    name = "faultfix",
    about = "Normalize client error telemetry and generate validated fix suggestions",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the full pipeline on a telemetry payload
    Process(ProcessArgs),
    /// Print the prompt that would be sent for a payload
    Prompt(PromptArgs),
    /// Validate a stored model reply
    Validate(ValidateArgs),
    /// Fetch a file from the configured GitHub repository
    Fetch(FetchArgs),
    /// Write the default config file
    InitConfig,
}

#[derive(Args, Debug)]
struct ProcessArgs {
    /// Payload JSON file, or `-` for stdin
    input: String,
    /// Project checkout to read source context from
    #[arg(long)]
    root: Option<PathBuf>,
    /// Stop after prompt assembly
    #[arg(long)]
    dry_run: bool,
    /// Write a Markdown report here
    #[arg(long)]
    report: Option<PathBuf>,
    /// Write a pull-request plan (JSON) here when a fix validated
    #[arg(long)]
    patch: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct PromptArgs {
    input: String,
    #[arg(long)]
    root: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ValidateArgs {
    /// Reply file (JSON or raw text), or `-` for stdin
    input: String,
}

#[derive(Args, Debug)]
struct FetchArgs {
    path: String,
    /// Branch, tag or commit (defaults to the configured branch)
    #[arg(long = "ref")]
    git_ref: Option<String>,
    /// Report whether the file changed since this blob SHA
    #[arg(long)]
    known_sha: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let config = Config::load();

    match cli.command {
        Commands::Process(args) => run_process(config, args).await,
        Commands::Prompt(args) => run_prompt(config, args).await,
        Commands::Validate(args) => run_validate(&config, &args),
        Commands::Fetch(args) => run_fetch(&config, args).await,
        Commands::InitConfig => {
            let path = config.save().map_err(|e| anyhow!(e))?;
            println!("{}", path.display());
            Ok(())
        }
    }
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn read_input(input: &str) -> Result<String> {
    if input == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read stdin")?;
        return Ok(buf);
    }
    std::fs::read_to_string(input).with_context(|| format!("Failed to read {}", input))
}

fn read_payload(input: &str) -> Result<Value> {
    let text = read_input(input)?;
    serde_json::from_str(&text).with_context(|| format!("{} is not valid JSON", input))
}

fn with_root(mut config: Config, root: Option<PathBuf>) -> Config {
    if let Some(root) = root {
        config.project_root = root;
    }
    config
}

async fn run_process(config: Config, args: ProcessArgs) -> Result<()> {
    let config = with_root(config, args.root);
    let body = read_payload(&args.input)?;

    let outcome = if args.dry_run {
        Pipeline::dry_run(&config).process(body).await
    } else {
        Pipeline::from_config(&config)?.process(body).await
    }
    .context("Telemetry payload rejected")?;

    let processed = match outcome {
        PipelineOutcome::Suppressed { key } => {
            println!(
                "{}",
                serde_json::json!({ "outcome": "suppressed", "key": key })
            );
            return Ok(());
        }
        PipelineOutcome::Processed(processed) => processed,
    };

    println!("{}", serde_json::to_string_pretty(&processed)?);

    if let (Some(path), Some(analysis)) = (&args.report, &processed.analysis) {
        let page = ReportRenderer::new().render(&processed.event, &processed.contexts, analysis);
        write_output(path, &page)?;
    }

    if let Some(path) = &args.patch {
        write_patch_plan(&processed, path)?;
    }
    Ok(())
}

fn write_patch_plan(processed: &ProcessedError, out: &Path) -> Result<()> {
    let Some(validated) = processed.analysis.as_ref().and_then(Analysis::validated) else {
        tracing::warn!("no validated fix; skipping patch plan");
        return Ok(());
    };
    // fixCode only replaces a whole file when the model was shown one
    let Some(target) = &processed.target else {
        tracing::warn!("fix was scoped to a source window; skipping patch plan");
        return Ok(());
    };

    let plan = PatchPreparer::new().prepare(
        &processed.event,
        validated,
        &target.path,
        target.sha.as_deref(),
    );
    write_output(out, &serde_json::to_string_pretty(&plan)?)
}

async fn run_prompt(config: Config, args: PromptArgs) -> Result<()> {
    let config = with_root(config, args.root);
    let body = read_payload(&args.input)?;
    let outcome = Pipeline::dry_run(&config)
        .process(body)
        .await
        .context("Telemetry payload rejected")?;
    let processed = outcome
        .processed()
        .ok_or_else(|| anyhow!("payload was suppressed"))?;
    println!("{}", processed.prompt.prompt);
    Ok(())
}

fn run_validate(config: &Config, args: &ValidateArgs) -> Result<()> {
    let text = read_input(&args.input)?;
    let reply = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));
    let analysis = ModelResponseValidator::new(config.raw_capture_limit).validate(&reply);
    println!("{}", serde_json::to_string_pretty(&analysis)?);
    if analysis.is_fallback() {
        std::process::exit(2);
    }
    Ok(())
}

async fn run_fetch(config: &Config, args: FetchArgs) -> Result<()> {
    let (Some(owner), Some(repo)) = (&config.github_owner, &config.github_repo) else {
        return Err(anyhow!(
            "github_owner and github_repo must be set in {}",
            Config::config_path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "the config file".to_string())
        ));
    };
    let git_ref = args.git_ref.as_deref().unwrap_or(&config.github_branch);
    let remote = GitHubClient::new(config.github_token())?
        .fetch_file(owner, repo, &args.path, git_ref)
        .await?;

    eprintln!("{} @ {} ({})", remote.path, git_ref, remote.sha);
    if let Some(known) = &args.known_sha {
        if remote.is_stale(known) {
            eprintln!("stale: file changed since {}", known);
        } else {
            eprintln!("up to date");
        }
    }
    print!("{}", remote.content);
    Ok(())
}

fn write_output(path: &Path, content: &str) -> Result<()> {
    std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
    tracing::info!(path = %path.display(), "wrote output");
    Ok(())
}
