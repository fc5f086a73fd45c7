use clap::{Parser, Subcommand};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use vibecad::agents::{AgentContext, AgentManager, AgentOutcome};
use vibecad::command::CommandBatch;
use vibecad::config::{AgentConfig, Provider};
use vibecad::dispatcher::{CreationMode, Dispatcher, PromptParser};
use vibecad::document::{export, Document, Workspace};
use vibecad::error_handling::{
    display_info, display_status, display_success, display_tip, display_warning, enhance_error,
};
use vibecad::executor::GuardedExecutor;
use vibecad::logging::{get_logger, init_logger, with_logger};
use vibecad::parametric::{ParametricManager, PARAMS_SHEET};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "vibecad")]
#[command(version)]
#[command(
    about = "🛠️  VibeCAD: describe a part, get parametric geometry",
    long_about = "Turns prompts like 'create a box 8x8x8 cm' into CAD objects using a local model or an offline keyword parser."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    options: PromptOptions,

    /// What to build
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    prompt: Vec<String>,
}

#[derive(clap::Args, Clone, Default)]
struct PromptOptions {
    /// Use the offline keyword parser only
    #[arg(long)]
    no_ai: bool,

    /// Bind dimensions to the parameter spreadsheet
    #[arg(long)]
    parametric: bool,

    /// Show the commands without creating anything
    #[arg(long)]
    dry_run: bool,

    /// Ask the model for a geometry script instead of commands
    #[arg(long, conflicts_with = "no_ai")]
    script: bool,

    /// Write the result as JSON, or as a FreeCAD macro for .FCMacro/.py
    #[arg(long, value_name = "PATH")]
    export: Option<PathBuf>,

    /// Document JSON to load and save back
    #[arg(long, value_name = "PATH")]
    document: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show current AI settings
    Config,
    /// Switch provider (ollama, openai, anthropic) and apply its presets
    Provider {
        name: String,
        /// API key for hosted providers
        #[arg(long)]
        api_key: Option<String>,
    },
    /// Select the model to use
    Select { name: String },
    /// Set the model server base URL
    SetUrl { url: String },
    /// Set the request timeout in seconds (5-300)
    Timeout { seconds: u64 },
    /// Set the number of attempts per request (1-10)
    Retries { count: u32 },
    /// Set the sampling temperature (0.0-2.0)
    Temperature { value: f64 },
    /// Keep the model loaded between requests, e.g. "1h"; "off" clears it
    KeepAlive { value: String },
    /// Reset all AI settings to defaults
    Reset,
    /// Check that the model answers
    TestConnection,
    /// List models installed on the server
    ListModels,
    /// Run a geometry script file through the guarded executor
    Run {
        script: PathBuf,
        #[arg(long, value_name = "PATH")]
        export: Option<PathBuf>,
    },
    /// Show the variables of a parametric document
    Params { document: PathBuf },
    /// Change a parameter of a document and recompute it
    SetParam {
        document: PathBuf,
        name: String,
        value: f64,
    },
    /// Interactive session
    Repl {
        #[command(flatten)]
        options: PromptOptions,
    },
    /// Enable or disable debug logging (requires explicit consent)
    DebugMode {
        #[arg(long)]
        enable: bool,
        #[arg(long)]
        disable: bool,
    },
    /// Show current log file location and status
    LogStatus,
    /// Clear the log file
    ClearLogs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = AgentConfig::load();

    if let Err(e) = init_logger(config.debug_logging) {
        eprintln!("Warning: Failed to initialize logger: {}", e);
    }
    with_logger(|l| l.log_startup(VERSION));

    let result = match cli.command {
        Some(command) => run_command(command, &mut config).await,
        None if cli.prompt.is_empty() => {
            println!("{}", "🛠️  VibeCAD".bold().cyan());
            println!(
                "Describe a part. Try: {} {}",
                "vibecad".green(),
                "create a box 80x40x10 mm".dimmed()
            );
            Ok(())
        }
        None => run_prompt(&cli.prompt.join(" "), &cli.options, &config).await,
    };

    if let Err(e) = result {
        enhance_error(&e).display();
        std::process::exit(1);
    }
    Ok(())
}

async fn run_command(command: Commands, config: &mut AgentConfig) -> anyhow::Result<()> {
    match command {
        Commands::Config => config.display(),
        Commands::Provider { name, api_key } => {
            let provider: Provider = name.parse()?;
            config.set_provider(provider, api_key)?;
        }
        Commands::Select { name } => {
            config.set_model(&name)?;
            display_success(&format!("Switched to model: {}", name.bold().yellow()));
        }
        Commands::SetUrl { url } => config.set_base_url(&url)?,
        Commands::Timeout { seconds } => config.set_timeout(seconds)?,
        Commands::Retries { count } => config.set_max_retries(count)?,
        Commands::Temperature { value } => config.set_temperature(value)?,
        Commands::KeepAlive { value } => {
            let value = match value.trim() {
                "" | "off" | "none" => None,
                other => Some(other.to_string()),
            };
            config.set_keep_alive(value)?;
        }
        Commands::Reset => config.reset()?,
        Commands::TestConnection => test_connection(config).await,
        Commands::ListModels => list_models(config).await?,
        Commands::Run { script, export } => run_script(&script, export.as_deref())?,
        Commands::Params { document } => show_params(&document)?,
        Commands::SetParam { document, name, value } => set_param(&document, &name, value)?,
        Commands::Repl { options } => repl(&options, config).await?,
        Commands::DebugMode { enable, disable } => debug_mode(enable, disable, config)?,
        Commands::LogStatus => log_status(),
        Commands::ClearLogs => clear_logs()?,
    }
    Ok(())
}

fn spinner(message: &str) -> anyhow::Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈")
            .template("{spinner:.cyan} {msg}")?,
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    Ok(pb)
}

/// Load the working document, or start an empty one named after the file
fn open_workspace(path: Option<&Path>) -> anyhow::Result<Workspace> {
    match path {
        Some(path) if path.exists() => Ok(Workspace::with_document(export::read_from_path(path)?)),
        Some(path) => {
            let name = path.file_stem().and_then(|s| s.to_str()).unwrap_or("Unnamed");
            Ok(Workspace::with_document(Document::new(name)))
        }
        None => Ok(Workspace::with_document(Document::new("Unnamed"))),
    }
}

fn scene_context(doc: &Document, last_command: Option<String>) -> AgentContext {
    AgentContext {
        created_objects: doc
            .objects()
            .iter()
            .filter(|o| !o.is_spreadsheet())
            .map(|o| o.name.clone())
            .collect(),
        last_command,
    }
}

/// Ask the model for a batch, falling back to keyword parsing when the
/// request fails.
async fn request_batch(manager: &AgentManager, prompt: &str, context: AgentContext) -> anyhow::Result<CommandBatch> {
    let pb = spinner("Thinking...")?;
    let pending = manager.process_async(prompt, Some(context))?;
    let outcome = pending.wait().await;
    pb.finish_and_clear();

    Ok(match outcome {
        AgentOutcome::Commands(batch) => batch,
        AgentOutcome::Failed { error, .. } => {
            display_warning(&format!("AI request failed: {}", error));
            display_info("Falling back to keyword parsing of the prompt");
            PromptParser::new().to_batch(prompt)
        }
    })
}

fn print_batch(batch: &CommandBatch) {
    if !batch.explanation.is_empty() {
        println!("{} {}", "📝".cyan(), batch.explanation);
    }
    println!(
        "{}",
        format!(
            "{} command(s), confidence {:.2}{}",
            batch.commands.len(),
            batch.confidence,
            if batch.fallback { ", fallback parser" } else { "" }
        )
        .dimmed()
    );
    for command in &batch.commands {
        let dims: Vec<String> = command
            .dimensions
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        println!("  • {} {} [{}]", command.shape, command.object_name().bold(), dims.join(", "));
    }
}

/// Create the batch's objects, returning how many were made
fn apply_batch(batch: &CommandBatch, doc: &mut Document, mode: CreationMode) -> usize {
    let report = Dispatcher::new(mode).execute_batch(batch, doc);
    for summary in report.summaries() {
        display_success(&format!("Created {}", summary));
    }
    for error in &report.errors {
        display_warning(error);
    }
    report.created.len()
}

fn save_outputs(doc: &Document, options: &PromptOptions) -> anyhow::Result<()> {
    if let Some(path) = &options.document {
        export::write_to_path(doc, path)?;
        display_info(&format!("Document saved to {}", path.display()));
    }
    if let Some(path) = &options.export {
        export::write_to_path(doc, path)?;
        display_success(&format!("Exported to {}", path.display()));
    }
    Ok(())
}

async fn run_prompt(prompt: &str, options: &PromptOptions, config: &AgentConfig) -> anyhow::Result<()> {
    let mut workspace = open_workspace(options.document.as_deref())?;
    let manager = AgentManager::new(config.clone());

    if options.script {
        run_generated_script(&manager, prompt, &mut workspace, options.dry_run).await?;
    } else {
        let doc = workspace.active_or_new();
        let batch = if options.no_ai {
            PromptParser::new().to_batch(prompt)
        } else {
            request_batch(&manager, prompt, scene_context(doc, None)).await?
        };
        process_batch(&batch, doc, options);
    }

    if !options.dry_run {
        if let Some(doc) = workspace.active_document() {
            save_outputs(doc, options)?;
        }
    }
    Ok(())
}

fn process_batch(batch: &CommandBatch, doc: &mut Document, options: &PromptOptions) {
    print_batch(batch);
    if batch.is_empty() {
        display_warning("Nothing recognized in the prompt");
        display_tip("Name a shape and its size, e.g. 'cylinder diameter 25 height 50'");
        return;
    }
    if options.dry_run {
        display_info("Dry run: nothing was created");
        return;
    }

    let mode = if options.parametric {
        CreationMode::Parametric
    } else {
        CreationMode::Direct
    };
    apply_batch(batch, doc, mode);
}

async fn run_generated_script(
    manager: &AgentManager,
    prompt: &str,
    workspace: &mut Workspace,
    dry_run: bool,
) -> anyhow::Result<()> {
    let pb = spinner("Writing script...")?;
    let agent = manager.agent();
    let code = agent.lock().await.generate_code(prompt).await;
    pb.finish_and_clear();
    let code = code?;

    println!("{}", "Generated script:".bold());
    println!("{}", code.dimmed());
    if dry_run {
        display_info("Dry run: script not executed");
        return Ok(());
    }

    execute_script(&code, workspace)
}

fn execute_script(code: &str, workspace: &mut Workspace) -> anyhow::Result<()> {
    let executor = GuardedExecutor::new().with_import_stripping(true);
    let outcome = executor.run(code, workspace);

    for line in workspace.take_console() {
        println!("{}", line);
    }
    outcome?;

    for doc in workspace.documents() {
        display_success(&format!("{}: {}", doc.name, doc.object_names().join(", ")));
    }
    Ok(())
}

fn run_script(path: &Path, export_path: Option<&Path>) -> anyhow::Result<()> {
    let code = std::fs::read_to_string(path)?;
    let mut workspace = Workspace::new();
    execute_script(&code, &mut workspace)?;

    if let Some(export_path) = export_path {
        let doc = workspace
            .active_document()
            .ok_or_else(|| anyhow::anyhow!("The script did not create a document"))?;
        export::write_to_path(doc, export_path)?;
        display_success(&format!("Exported to {}", export_path.display()));
    }
    Ok(())
}

fn show_params(path: &Path) -> anyhow::Result<()> {
    let mut doc = export::read_from_path(path)?;
    if doc.sheet(PARAMS_SHEET).is_none() {
        display_info("This document has no parameter sheet");
        return Ok(());
    }

    let manager = ParametricManager::new(&mut doc)?;
    println!("{}", "📐 Parameters:".bold().cyan());
    for variable in manager.list_variables()? {
        println!(
            "  {} = {} {} {}",
            variable.name.bold(),
            variable.value.green(),
            variable.unit,
            format!("({})", variable.description).dimmed()
        );
    }
    Ok(())
}

fn set_param(path: &Path, name: &str, value: f64) -> anyhow::Result<()> {
    let mut doc = export::read_from_path(path)?;
    {
        let mut manager = ParametricManager::new(&mut doc)?;
        manager.update_variable(name, value)?;
    }
    let updated = doc.recompute()?;
    export::write_to_path(&doc, path)?;
    display_success(&format!("{} = {} ({} object(s) recomputed)", name, value, updated));
    Ok(())
}

async fn repl(options: &PromptOptions, config: &AgentConfig) -> anyhow::Result<()> {
    let mut workspace = open_workspace(options.document.as_deref())?;
    let manager = AgentManager::new(config.clone());
    let mut last_command: Option<String> = None;

    println!("{}", "🛠️  VibeCAD interactive session".bold().cyan());
    display_tip("Type a description, 'objects', 'params', 'export <path>', 'clear' or 'exit'");

    if !options.no_ai && config.provider == Provider::Ollama && config.keep_alive.is_some() {
        let warmed = manager.agent().lock().await.client().ping().await;
        display_status("Model warm-up", if warmed { "ready" } else { "unreachable" }, warmed);
    }

    let stdin = io::stdin();
    loop {
        print!("{} ", "vibecad>".green().bold());
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();

        match input {
            "" => continue,
            "exit" | "quit" => break,
            "clear" => {
                manager.agent().lock().await.clear_history();
                display_success("Conversation history cleared");
                continue;
            }
            "objects" => {
                let doc = workspace.active_or_new();
                for object in doc.objects() {
                    println!("  {} {}", object.name.bold(), object.type_id.dimmed());
                }
                continue;
            }
            "params" => {
                let doc = workspace.active_or_new();
                if doc.sheet(PARAMS_SHEET).is_some() {
                    for variable in ParametricManager::new(doc)?.list_variables()? {
                        println!("  {} = {} {}", variable.name.bold(), variable.value, variable.unit);
                    }
                }
                continue;
            }
            _ => {}
        }

        if let Some(path) = input.strip_prefix("export ") {
            let doc = workspace.active_or_new();
            match export::write_to_path(doc, Path::new(path.trim())) {
                Ok(()) => display_success(&format!("Exported to {}", path.trim())),
                Err(e) => enhance_error(&e).display(),
            }
            continue;
        }

        let result = if options.script {
            run_generated_script(&manager, input, &mut workspace, options.dry_run).await
        } else {
            let doc = workspace.active_or_new();
            let batch = if options.no_ai {
                Ok(PromptParser::new().to_batch(input))
            } else {
                request_batch(&manager, input, scene_context(doc, last_command.clone())).await
            };
            batch.map(|batch| process_batch(&batch, doc, options))
        };

        match result {
            Ok(()) => last_command = Some(input.to_string()),
            Err(e) => enhance_error(&e).display(),
        }
    }

    if !options.dry_run {
        if let Some(doc) = workspace.active_document() {
            save_outputs(doc, options)?;
        }
    }
    Ok(())
}

async fn test_connection(config: &AgentConfig) {
    let pb = match spinner("Testing connection...") {
        Ok(pb) => pb,
        Err(_) => ProgressBar::hidden(),
    };
    let manager = AgentManager::new(config.clone());
    let ok = manager.test_connection().await;
    pb.finish_and_clear();

    display_status(
        &format!("{} ({})", config.provider, config.model),
        if ok { "connection successful" } else { "connection failed" },
        ok,
    );
    if !ok {
        display_tip("Check the server with 'ollama serve' and the URL with 'vibecad config'");
    }
}

async fn list_models(config: &AgentConfig) -> anyhow::Result<()> {
    let manager = AgentManager::new(config.clone());
    let agent = manager.agent();
    let models = agent.lock().await.client().list_models().await?;

    println!("{}", "Available Models:".bold().cyan());
    if models.is_empty() {
        println!("  {}", "No models found.".yellow());
        println!("  {}", format!("Try: ollama pull {}", config.model).dimmed());
    }
    for model in models {
        if model == config.model {
            println!("* {} {}", model.green().bold(), "(active)".dimmed());
        } else {
            println!("  {}", model);
        }
    }
    Ok(())
}

fn confirm(question: &str) -> anyhow::Result<bool> {
    print!("{} ", question.bold());
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("y"))
}

fn debug_mode(enable: bool, disable: bool, config: &mut AgentConfig) -> anyhow::Result<()> {
    if enable == disable {
        eprintln!("{} Specify exactly one of --enable or --disable", "❌".red());
        return Ok(());
    }

    if enable {
        display_warning("Debug mode logs prompts and model replies to the local log file.");
        if !confirm("Do you consent to debug logging? (y/n):")? {
            display_info("Debug mode activation cancelled");
            return Ok(());
        }
    }

    // Saved first: the settings update logs through the logger lock
    config.set_debug_logging(enable)?;

    let logger = get_logger()?;
    let mut guard = logger
        .lock()
        .map_err(|_| anyhow::anyhow!("Failed to access logger"))?;

    if enable {
        guard.enable_debug_mode(true)?;
        display_success("Debug mode enabled");
        display_tip("Use 'vibecad debug-mode --disable' to turn it off");
    } else {
        guard.disable_debug_mode()?;
        display_success("Debug mode disabled");
    }
    Ok(())
}

fn log_status() {
    let Ok(logger) = get_logger() else {
        eprintln!("{} Logger not initialized", "❌".red());
        return;
    };
    let Ok(guard) = logger.lock() else {
        return;
    };

    println!("{}", "📋 VibeCAD Logging Status:".bold().cyan());
    let path = guard.get_current_log_path();
    println!("Log file: {}", path.display().to_string().green());
    println!(
        "Debug mode: {}",
        if guard.is_debug_mode() {
            "enabled 🐛".yellow()
        } else {
            "disabled 🛡️".green()
        }
    );
    match std::fs::metadata(path) {
        Ok(metadata) => println!("Log file size: {} KB", metadata.len() / 1024),
        Err(_) => println!("Log file: not created yet"),
    }
    println!();
    display_info("Prompts and scripts are never logged outside debug mode");
}

fn clear_logs() -> anyhow::Result<()> {
    let logger = get_logger()?;
    let guard = logger
        .lock()
        .map_err(|_| anyhow::anyhow!("Failed to access logger"))?;

    if confirm("Are you sure you want to clear all logs? (y/n):")? {
        guard.clear_logs()?;
        display_success("Log file cleared successfully");
    } else {
        display_info("Log clearing cancelled");
    }
    Ok(())
}
