//! Several writers append to one shared document, serialized per document
//! key by whichever backend the configuration selects.
//!
//! ```text
//! cargo run --example document_sync                     # in-process
//! cargo run --example document_sync -- coordinator.toml
//! RUST_LOG=sync_coordinator=debug cargo run --example document_sync
//! ```

use std::sync::Arc;
use std::time::Duration;

use sync_coordinator::{
    AgentInfo, AnyCoordinator, Context, CoordinatorConfig, CoordinatorExt, Key, LockResult,
};
use tokio::sync::Mutex;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const WRITERS: usize = 8;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => CoordinatorConfig::from_toml_str(&std::fs::read_to_string(path)?)?,
        None => CoordinatorConfig::default(),
    };
    let agent = AgentInfo::generate();
    info!(backend = ?config.backend, agent = %agent, "starting document sync demo");

    let coordinator = AnyCoordinator::connect(&config, agent).await?;
    // Stands in for a document stored elsewhere. The mutex is only held for
    // single reads and writes; the read-modify-write is guarded by the
    // coordinator.
    let document = Arc::new(Mutex::new(Vec::<String>::new()));

    let writers: Vec<_> = (0..WRITERS)
        .map(|writer| {
            let coordinator = coordinator.clone();
            let document = document.clone();
            tokio::spawn(async move { write_section(&coordinator, &document, writer).await })
        })
        .collect();

    for writer in writers {
        if let Err(e) = writer.await? {
            warn!(error = %e, "writer failed");
        }
    }

    let lines = document.lock().await.len();
    info!(lines, "document complete");
    coordinator.close().await?;
    Ok(())
}

async fn write_section(
    coordinator: &AnyCoordinator,
    document: &Mutex<Vec<String>>,
    writer: usize,
) -> LockResult<()> {
    let ctx = Context::with_timeout(Duration::from_secs(30));
    coordinator
        .with_lock(&ctx, Key::new("document-1")?, || async {
            let revision = document.lock().await.len();
            tokio::time::sleep(Duration::from_millis(10)).await;
            document
                .lock()
                .await
                .push(format!("revision {revision} by writer {writer}"));
            info!(writer, revision, "section written");
        })
        .await
}
