use clap::Parser;
use pkgindex_server::{Repository, ServerConfig, ServerState};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "pkgindex-server", about = "Package index REST contract server")]
struct Cli {
    /// Port to listen on.
    #[arg(long, default_value_t = 8321)]
    port: u16,

    /// Directory of JSON manifest documents to serve.
    #[arg(long, default_value = "./manifests")]
    manifests: PathBuf,

    /// Identifier reported by the information endpoint.
    #[arg(long, default_value = "pkgindex.reference")]
    source_id: String,

    /// Require this bearer token on search and manifest requests.
    #[arg(long)]
    token: Option<String>,

    /// Packages per search page.
    #[arg(long, default_value_t = 50)]
    page_size: usize,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let repository = match Repository::load_dir(&cli.manifests) {
        Ok(r) => r,
        Err(e) => {
            error!("failed to load manifests: {e}");
            return ExitCode::FAILURE;
        }
    };
    let config = ServerConfig {
        source_identifier: cli.source_id,
        page_size: cli.page_size,
        bearer_token: cli.token,
        ..ServerConfig::default()
    };

    let addr = format!("0.0.0.0:{}", cli.port);
    info!("starting pkgindex-server on {addr}");
    info!(
        "serving {} packages from {}",
        repository.package_count(),
        cli.manifests.display()
    );

    let state = Arc::new(ServerState { repository, config });
    match pkgindex_server::run_server(&state, &addr) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
