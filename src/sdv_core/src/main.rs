use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use env_logger::Env;
use sdv_core::AppControl;
use sdv_toml::Document;

#[derive(Parser)]
#[command(name = "sdv-host")]
#[command(about = "SDV component runtime host", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the runtime from a startup configuration and enter the run
    /// loop until a shutdown is requested.
    Run {
        /// Startup configuration file (TOML). Without it the runtime starts
        /// standalone with defaults.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Base directory for modules, locks and installations. Defaults to
        /// the executable directory.
        #[arg(long)]
        base_dir: Option<PathBuf>,
    },

    /// Load a module and print its class list as JSON.
    Classes {
        /// Path of the module library.
        #[arg(long)]
        module: PathBuf,
    },

    /// Parse a TOML file and write it back: position-preserving by default,
    /// canonicalized when a prefix key is given.
    Fmt {
        file: PathBuf,

        /// Rewrite every key under this prefix.
        #[arg(long)]
        prefix: Option<String>,
    },
}

fn exec_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|p| p.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, base_dir } => {
            let config_text = match &config {
                Some(path) => std::fs::read_to_string(path)
                    .with_context(|| format!("cannot read {}", path.display()))?,
                None => String::new(),
            };
            let app = AppControl::new(base_dir.unwrap_or_else(exec_dir));
            if let Err(err) = app.startup(&config_text, None) {
                bail!("startup failed: {err}");
            }
            app.run_loop()?;
            app.shutdown(false);
            Ok(())
        }
        Commands::Classes { module } => {
            let dir = exec_dir();
            let host = sdv_runtime::ModuleHost::new(&dir, &dir);
            let id = host
                .load(&module)
                .with_context(|| format!("cannot load {}", module.display()))?;
            let classes = host.class_list(id);
            println!("{}", serde_json::to_string_pretty(&classes)?);
            Ok(())
        }
        Commands::Fmt { file, prefix } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("cannot read {}", file.display()))?;
            let doc = Document::parse(&text)
                .with_context(|| format!("cannot parse {}", file.display()))?;
            match prefix {
                Some(prefix) => print!("{}", doc.generate_with_prefix(&prefix)),
                None => print!("{}", doc.generate()),
            }
            Ok(())
        }
    }
}
