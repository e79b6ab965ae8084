//! kgraph — per-user knowledge graph server.

use std::path::PathBuf;
use std::sync::Arc;

use kgraph_server::{build_router, check, worker, AppState};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn resolve_data_dir() -> PathBuf {
    std::env::var("KGRAPH_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let exe_dir = std::env::current_exe()
                .ok()
                .and_then(|p| p.parent().map(|p| p.to_path_buf()));
            if let Some(dir) = exe_dir {
                let parent_data = dir.join("../data");
                if parent_data.exists() {
                    return parent_data;
                }
            }
            PathBuf::from("data")
        })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() > 1 {
        match args[1].as_str() {
            "--check" | "check" => {
                let data_dir = args
                    .get(2)
                    .map(PathBuf::from)
                    .unwrap_or_else(resolve_data_dir);
                let report = check::check(&data_dir);
                check::print_report(&report);
                std::process::exit(if report.is_healthy() { 0 } else { 1 });
            }
            "--help" | "-h" | "help" => {
                println!("kgraph — per-user knowledge graph server");
                println!();
                println!("Usage: kgraph [command]");
                println!();
                println!("Commands:");
                println!("  (none)                   Start the server");
                println!("  check [data-dir]         Check database integrity");
                println!("  help                     Show this help message");
                return Ok(());
            }
            _ => {
                eprintln!("Unknown command: {}. Use 'kgraph help' for usage.", args[1]);
                std::process::exit(1);
            }
        }
    }

    let data_dir = resolve_data_dir();
    info!("Data directory: {}", data_dir.display());

    let config = kgraph_core::KGraphConfig::from_env(&data_dir)?;
    let port = config.port;

    let store = kgraph_store::SqliteGraphStore::open(&config.data_paths.graphdb)
        .map_err(|e| anyhow::anyhow!("Failed to open graph store: {}", e))?;

    let gateways = kgraph_gateway::Gateways::http(&config.gateway)
        .map_err(|e| anyhow::anyhow!("Failed to build gateway clients: {}", e))?;
    info!(
        "Vector services: embed={}, layout={}, recommend={}",
        config.gateway.embedding_url, config.gateway.layout_url, config.gateway.recommend_url
    );

    let state = Arc::new(AppState::new(config, store, gateways));

    worker::start_reconcile_worker(state.clone());

    let app = build_router(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("kgraph server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
