mod app;
mod builtin;
mod terminal_output;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;

use hearth_config::{apply_all_defaults, config_dir, config_file_path, HearthConfig};
use hearth_plugins::PluginStatus;

use terminal_output::{note_success, note_warn, render_table, styled, DIM, GREEN, RED};

#[derive(Parser)]
#[command(name = "hearth")]
#[command(about = "Hearth: an event-driven plugin host")]
#[command(version)]
struct Cli {
    /// Config file (default: $HEARTH_CONFIG_DIR/config.yaml or ~/.hearth/config.yaml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level or EnvFilter directive; overrides the config file
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the tools declared by the builtin plugins
    Tools {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Invoke one tool and print its result as JSON
    Call {
        /// Tool name
        tool: String,
        /// Arguments as a JSON object
        #[arg(default_value = "{}")]
        args: String,
    },
    /// Show every builtin plugin and how its setup went
    Plugins,
    /// Write a config file with all defaults filled in
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let path = cli
        .config
        .clone()
        .unwrap_or_else(|| config_file_path(&config_dir()));

    // Init must work even when the existing file does not load.
    if let Commands::Init { force } = cli.command {
        return init(&path, force).await;
    }

    let (config, report) = hearth_config::load_and_prepare(&path).await?;
    let level = cli.log_level.as_deref().unwrap_or(config.log_level());
    let _log_guard = hearth_logging::init_logger(level, config.log_dir())?;
    report.log();
    debug!(path = %path.display(), "Configuration ready");

    match cli.command {
        Commands::Tools { json } => {
            let tools = app::list_tools(&config).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&tools)?);
            } else {
                let rows: Vec<Vec<String>> = tools
                    .into_iter()
                    .map(|t| vec![t.name, t.plugin, styled(DIM, &t.description)])
                    .collect();
                print!("{}", render_table(&["Tool", "Plugin", "Description"], &rows));
            }
        }
        Commands::Call { tool, args } => {
            let args: serde_json::Value = serde_json::from_str(&args)
                .with_context(|| format!("Arguments are not valid JSON: {args}"))?;
            let result = app::call_tool(&config, &tool, args).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Plugins => {
            let plugins = app::list_plugins(&config).await?;
            let rows: Vec<Vec<String>> = plugins
                .into_iter()
                .map(|p| {
                    let status = match &p.status {
                        PluginStatus::Failed(reason) => styled(RED, &format!("failed: {reason}")),
                        PluginStatus::Stopped => styled(GREEN, "ok"),
                        other => format!("{other:?}").to_lowercase(),
                    };
                    vec![
                        p.name,
                        status,
                        p.tools.join(", "),
                        p.description.unwrap_or_default(),
                    ]
                })
                .collect();
            print!(
                "{}",
                render_table(&["Plugin", "Status", "Tools", "Description"], &rows)
            );
        }
        Commands::Init { force } => init(&path, force).await?,
    }

    Ok(())
}

async fn init(path: &std::path::Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "{} already exists; pass --force to overwrite it",
            path.display()
        );
    }
    if path.exists() {
        note_warn(&format!("Overwriting {}", path.display()));
    }
    let config = apply_all_defaults(HearthConfig::default());
    hearth_config::write_config(&config, path).await?;
    note_success(&format!("Wrote {}", path.display()));
    Ok(())
}
