use std::sync::Arc;

use anyhow::Result;
use rmcp::ServiceExt;
use tracing::info;

use vault_memory::config::Config;
use vault_memory::server::VaultServer;
use vault_memory::store::locks::CancelFlag;
use vault_memory::store::Store;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("vault_memory=info".parse()?)
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_env();
    let args: Vec<String> = std::env::args().collect();
    let has = |flag: &str| args.iter().any(|a| a == flag);

    let server = open_server(&config).await?;

    if has("--migrate") {
        return print(server.do_migrate(false, &interrupt_cancels()).await);
    }
    if has("--repair") {
        return print(server.do_repair(None, &interrupt_cancels()).await);
    }
    if has("--verify") {
        return print(server.do_verify(None).await);
    }
    if has("--embed") {
        return print(server.do_embed(&interrupt_cancels()).await);
    }

    run_mcp_server(server).await
}

/// For one-shot maintenance runs: Ctrl-C stops after the current entity.
fn interrupt_cancels() -> CancelFlag {
    let cancel = CancelFlag::new();
    let flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping after the current entity");
            flag.cancel();
        }
    });
    cancel
}

async fn open_server(config: &Config) -> Result<VaultServer> {
    info!(vault = %config.vault_path.display(), data = %config.data_dir, "opening store");
    let store = Store::init(config).await?;
    Ok(VaultServer::new(Arc::new(store)))
}

async fn run_mcp_server(server: VaultServer) -> Result<()> {
    // bring legacy data over before serving; a failure here must not block startup
    let cancel = CancelFlag::new();
    let migrated = {
        let migration = server.store.migration.run(&cancel);
        tokio::pin!(migration);
        tokio::select! {
            result = &mut migration => result,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received during migration, stopping after the current entity");
                cancel.cancel();
                let _ = migration.await;
                return Ok(());
            }
        }
    };
    if let Err(e) = migrated {
        tracing::warn!("legacy migration did not complete: {}", e);
    }
    for check in [
        server.store.conversation_index.check().await,
        server.store.workspace_index.check().await,
    ] {
        if let Err(e) = check {
            tracing::warn!("{}; run with --repair to rebuild", e);
        }
    }

    let transport = rmcp::transport::io::stdio();
    info!("starting vault-memory MCP server (stdio)");

    let service = server.serve(transport).await
        .map_err(|e| anyhow::anyhow!("MCP server failed: {}", e))?;

    tokio::select! {
        _ = service.waiting() => {}
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
    }
    Ok(())
}

fn print(result: Result<serde_json::Value>) -> Result<()> {
    let value = result?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
