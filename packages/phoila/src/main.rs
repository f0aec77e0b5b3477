use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::prelude::*;

use phoila::{
    FileConfig, FileNotebookSource, HttpKernelConnector, HttpNotebookSource, KernelConnector,
    NoKernel, PhoilaDirs, ServerConfig, SessionContext, SessionRegistry, StreamConfig,
    TerminalRenderer, WidgetRegistry, load_config,
};

#[derive(Parser)]
#[command(name = "phoila")]
#[command(about = "Progressively render notebooks from a server's render stream")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Custom config directory (defaults to ~/.phoila)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a notebook from a running server as its cells arrive
    Render(RenderArgs),

    /// Replay a recorded render stream (.ndjson) from disk
    Replay(ReplayArgs),
}

#[derive(Parser)]
struct RenderArgs {
    /// Notebook path relative to the server root
    notebook: String,

    /// Server base URL (overrides config)
    #[arg(long)]
    base_url: Option<String>,

    /// Server token (overrides config)
    #[arg(long)]
    token: Option<String>,

    /// Skip the kernel handoff; widget views render as placeholders
    #[arg(long)]
    no_kernel: bool,

    /// Only print the outputs of this content entry
    #[arg(long)]
    clone: Option<usize>,
}

#[derive(Parser)]
struct ReplayArgs {
    /// Recorded stream file
    file: PathBuf,

    /// Only print the outputs of this content entry
    #[arg(long)]
    clone: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries the rendering
    let default_directive = if cli.debug {
        "phoila=debug,replay_stream=debug,info"
    } else {
        "phoila=info,replay_stream=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();

    let dirs = PhoilaDirs::new(cli.config_dir)?;
    let file_config: FileConfig = load_config(&dirs.config_dir)
        .extract()
        .with_context(|| format!("Failed to load {}", dirs.config_toml_path().display()))?;

    match cli.command {
        Commands::Render(args) => run_render(args, file_config).await,
        Commands::Replay(args) => run_replay(args, file_config).await,
    }
}

async fn run_render(args: RenderArgs, mut file_config: FileConfig) -> Result<()> {
    if let Some(base_url) = args.base_url {
        file_config.server.base_url = base_url;
    }
    if let Some(token) = args.token {
        file_config.server.token = Some(token);
    }

    let server = ServerConfig::from_file(&file_config.server)?;
    let client = server.build_client()?;
    info!(base_url = %server.base_url, notebook = %args.notebook, "rendering");

    let connector: Arc<dyn KernelConnector> = if args.no_kernel {
        Arc::new(NoKernel)
    } else {
        Arc::new(HttpKernelConnector::new(client.clone(), server.clone()))
    };
    let sessions = SessionRegistry::new(SessionContext {
        source: Arc::new(HttpNotebookSource::new(client, server)),
        connector,
        registry: WidgetRegistry::new(),
        stream: StreamConfig::from_file(&file_config.stream),
    });

    present(&sessions, &args.notebook, args.clone).await
}

async fn run_replay(args: ReplayArgs, file_config: FileConfig) -> Result<()> {
    let name = args
        .file
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("Not a file: {}", args.file.display()))?
        .to_string();
    let root = args
        .file
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    info!(file = %args.file.display(), "replaying recorded stream");

    let sessions = SessionRegistry::new(SessionContext {
        source: Arc::new(FileNotebookSource::new(root)),
        connector: Arc::new(NoKernel),
        registry: WidgetRegistry::new(),
        stream: StreamConfig::from_file(&file_config.stream),
    });

    present(&sessions, &name, args.clone).await
}

async fn present(sessions: &SessionRegistry, notebook: &str, clone: Option<usize>) -> Result<()> {
    let session = sessions.open(notebook);
    let mut renderer = TerminalRenderer::new(std::io::stdout());

    let result = match clone {
        None => session.render_into(&mut renderer).await.map_err(anyhow::Error::from),
        Some(index) => {
            let view = session.clone_output(index);
            match view.ready().await {
                Some(outputs) => {
                    let header = format!("{} [{}]", view.title(), view.descriptor().name());
                    renderer.render_outputs(&header, &outputs);
                    Ok(())
                }
                None => match session.populated().await {
                    Err(e) => Err(e.into()),
                    Ok(()) => Err(anyhow::anyhow!(
                        "{notebook} has no content entry {index}"
                    )),
                },
            }
        }
    };

    sessions.dispose_all();
    if let Err(e) = result {
        bail!("Failed to render {notebook}: {e}");
    }
    Ok(())
}
