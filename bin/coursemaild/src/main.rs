use std::env;
use std::process::ExitCode;
use std::sync::Arc;

use coursemail_core::{Module, ServiceConfig};
use coursemail_sql::SqliteStore;

use mail::service::{MailConfig, StoredCapabilities};
use mail::MailModule;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();

    // Handle --version / --help early.
    for arg in &args {
        if arg == "--version" || arg == "-V" {
            println!("coursemaild {}", VERSION);
            return ExitCode::SUCCESS;
        }
        if arg == "--help" || arg == "-h" {
            print_usage();
            return ExitCode::SUCCESS;
        }
    }

    tracing_subscriber::fmt::init();

    let config = ServiceConfig::from_args(&args);
    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: ServiceConfig) -> Result<(), Box<dyn std::error::Error>> {
    let sqlite_path = config.resolve_sqlite_path();
    let blob_dir = config.resolve_blob_dir();

    if let Some(parent) = sqlite_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let sql: Arc<dyn coursemail_sql::SQLStore> = Arc::new(SqliteStore::open(&sqlite_path)?);
    let blob: Arc<dyn coursemail_blob::BlobStore> =
        Arc::new(coursemail_blob::FileStore::open(&blob_dir)?);
    let caps = Arc::new(StoredCapabilities::new(Arc::clone(&sql)));

    let module = MailModule::new(sql, blob, caps, MailConfig::default())?;
    tracing::info!(
        sqlite = %sqlite_path.display(),
        blobs = %blob_dir.display(),
        "module {} initialized", module.name()
    );

    let router = module.routes();
    let listener = tokio::net::TcpListener::bind(&config.listen).await?;
    tracing::info!("listening on {}", config.listen);
    axum::serve(listener, router).await?;
    Ok(())
}

fn print_usage() {
    println!("coursemaild {}", VERSION);
    println!();
    println!("USAGE:");
    println!("    coursemaild [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    --data-dir=PATH     Base data directory");
    println!("    --sqlite=PATH       SQLite database path");
    println!("    --blob-dir=PATH     Attachment storage directory");
    println!("    --listen=ADDR       HTTP listen address (default: 0.0.0.0:8080)");
    println!("    --version, -V       Print version");
    println!("    --help, -h          Print this help");
}
