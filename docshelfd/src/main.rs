use docshelfd::daemon::{DaemonConfig, WorkspaceSync};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CliMode {
    Run,
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut mode = CliMode::Run;
    for arg in args.into_iter().skip(1) {
        match arg.as_str() {
            "--help" | "-h" => mode = CliMode::Help,
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(mode)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match parse_cli_mode(std::env::args())? {
        CliMode::Help => {
            println!("Usage: docshelfd");
            println!("Configuration is read from the environment:");
            println!("  DOCSHELF_API_URL        API base url (required)");
            println!("  DOCSHELF_TOKEN          bearer token (required)");
            println!("  DOCSHELF_WORKSPACE_DIR  local workspace (default ~/Docshelf)");
            println!("  DOCSHELF_DEBOUNCE_MS    remote-change debounce (default 750)");
            println!("  DOCSHELF_ENABLE_WATCHER watch local workspace (default true)");
            return Ok(());
        }
        CliMode::Run => {}
    }

    let config = DaemonConfig::from_env()?;
    let session = WorkspaceSync::start(config).await?;
    tokio::signal::ctrl_c().await?;
    session.stop();
    Ok(())
}
