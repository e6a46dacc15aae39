use std::process;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use minik8s::cli::{
    format_event, Cli, Commands, ResourceKind, SchedulerArgs, ServeArgs, WatchArgs,
};
use minik8s::client::{HttpClient, LocalClient, ResourceClient};
use minik8s::config::{load_config, Config};
use minik8s::controller::Scheduler;
use minik8s::resources::{Node, Pod, ReplicaSet, Resource};
use minik8s::server::{create_router, ApiState};
use minik8s::storage::{MemoryBackend, VersionedStore};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load config: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Serve(args) => serve(config, args).await,
        Commands::Scheduler(args) => scheduler(config, args).await,
        Commands::Watch(args) => watch(config, args).await,
    };

    if let Err(e) = result {
        error!("{:#}", e);
        process::exit(1);
    }
}

/// Token cancelled on Ctrl-C
fn shutdown_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested"),
            Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
        }
        trigger.cancel();
    });
    token
}

async fn serve(mut config: Config, args: ServeArgs) -> anyhow::Result<()> {
    if let Some(bind_addr) = args.bind_addr {
        config.server.bind_addr = bind_addr;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    let shutdown = shutdown_on_ctrl_c();
    let backend = Arc::new(MemoryBackend::with_options(
        config.server.initial_revision,
        config.server.history_limit,
    ));
    let state = ApiState::new(VersionedStore::new(backend)).with_shutdown(shutdown.clone());

    let embedded = if args.scheduler {
        let scheduler = Scheduler::new(
            Arc::new(LocalClient::<Pod>::new(state.clone())),
            Arc::new(LocalClient::<Node>::new(state.clone())),
            config.scheduler_options(),
        );
        info!("Running embedded scheduler");
        Some(tokio::spawn(scheduler.run(shutdown.clone())))
    } else {
        None
    };

    let addr = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("API server listening on {}", addr);
    info!("Endpoints:");
    info!("  GET  /health                      - Health check");
    info!("  *    /api/v1/{{pods,nodes,replicasets}} - Resource CRUD");
    info!("  GET  /watch/api/v1/{{plural}}[/{{uid}}] - Watch streams");

    let app = create_router(state);
    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
        .await
        .context("Server error")?;

    shutdown.cancel();
    if let Some(handle) = embedded {
        match handle.await {
            Ok(Err(e)) => warn!("Embedded scheduler ended with error: {}", e),
            Err(e) => warn!("Embedded scheduler task failed: {}", e),
            Ok(Ok(())) => {}
        }
    }
    info!("API server stopped");
    Ok(())
}

fn connect(config: &Config, server: Option<String>) -> anyhow::Result<HttpClient> {
    let url = server.unwrap_or_else(|| config.client.server_url.clone());
    HttpClient::with_timeout(&url, config.client.request_timeout())
        .with_context(|| format!("Failed to create client for {}", url))
}

async fn scheduler(mut config: Config, args: SchedulerArgs) -> anyhow::Result<()> {
    if let Some(workers) = args.workers {
        config.controller.workers = workers;
    }
    let client = connect(&config, args.server)?;
    client
        .health()
        .await
        .with_context(|| format!("API server at {} is not reachable", client.base_url()))?;

    let shutdown = shutdown_on_ctrl_c();
    let scheduler = Scheduler::new(
        Arc::new(client.api::<Pod>()),
        Arc::new(client.api::<Node>()),
        config.scheduler_options(),
    );
    scheduler.run(shutdown).await?;
    Ok(())
}

async fn watch(config: Config, args: WatchArgs) -> anyhow::Result<()> {
    let client = connect(&config, args.server)?;
    let shutdown = shutdown_on_ctrl_c();
    match args.kind {
        ResourceKind::Pods => {
            print_events(client.api::<Pod>(), args.uid, args.from, shutdown).await
        }
        ResourceKind::Nodes => {
            print_events(client.api::<Node>(), args.uid, args.from, shutdown).await
        }
        ResourceKind::Replicasets => {
            print_events(client.api::<ReplicaSet>(), args.uid, args.from, shutdown).await
        }
    }
}

async fn print_events<K: Resource>(
    api: impl ResourceClient<K>,
    uid: Option<String>,
    from: Option<i64>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let mut watcher = match &uid {
        Some(uid) => api.watch(uid, from).await?,
        None => api.watch_all(from).await?,
    };

    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = watcher.next_event() => event,
        };
        let Some(event) = event else {
            break;
        };
        println!("{}", format_event(&event));
    }

    watcher.stop();
    Ok(())
}
