use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;

use chatlink::auth::TokenTableAuth;
use chatlink::config::{Config, GatewayConfig, Mode};
use chatlink::directory::MemoryGroupDirectory;
use chatlink::link::GatewayLinkClient;
use chatlink::session::SnowflakeIdGenerator;
use chatlink::state::{GatewayState, LogicState};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chatlink=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env();
    print_banner(&config);

    match config.mode {
        Mode::Logic => run_logic(config).await,
        Mode::Gateway => run_gateway(config).await,
    }
}

fn print_banner(config: &Config) {
    let version = env!("CARGO_PKG_VERSION");
    let mode = match config.mode {
        Mode::Logic => "logic",
        Mode::Gateway => "gateway",
    };

    eprintln!();
    eprintln!("  \x1b[1;36mchatlink\x1b[0m \x1b[2mv{version}\x1b[0m");
    eprintln!();
    eprintln!("  \x1b[2mmode\x1b[0m         {mode}");
    eprintln!("  \x1b[2mport\x1b[0m         {}", config.port);

    match config.mode {
        Mode::Logic => {
            eprintln!("  \x1b[2mlink buffer\x1b[0m  {}", config.link_buffer);
        }
        Mode::Gateway => {
            if let Some(ref gw) = config.gateway {
                eprintln!("  \x1b[2mprefix\x1b[0m       {}", gw.name_prefix);
                for target in &gw.link_targets {
                    eprintln!("  \x1b[2mlink\x1b[0m         {target}");
                }
                eprintln!("  \x1b[2mtokens\x1b[0m       {}", gw.access_tokens.len());
            }
        }
    }

    eprintln!();
}

async fn run_logic(config: Config) {
    let state = LogicState::new(config.link_buffer);
    let hub = Arc::clone(&state.hub);
    let app = chatlink::routes::logic_router(state);

    let listener = bind(config.port).await;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            tracing::info!("closing {} gateway link(s)", hub.len());
            hub.shutdown();
        })
        .await
        .expect("server error");
}

async fn run_gateway(config: Config) {
    let gw: GatewayConfig = config
        .gateway
        .expect("gateway config is required when running in gateway mode");

    let auth = TokenTableAuth::from_pairs(
        gw.access_tokens
            .iter()
            .map(|(uid, token)| (*uid, token.as_str())),
    );
    if auth.is_empty() {
        tracing::warn!("no access tokens configured, every client will be rejected");
    }

    let directory = MemoryGroupDirectory::new();
    for (uid, gids) in &gw.user_groups {
        for gid in gids {
            directory.join(*uid, *gid);
        }
    }

    let state = GatewayState::new(
        Arc::new(auth),
        Arc::new(directory),
        Arc::new(SnowflakeIdGenerator::new()),
    );

    let client = GatewayLinkClient::new(
        &gw.name_prefix,
        &gw.link_targets,
        Arc::new(state.dispatcher()),
    );
    tracing::info!("gateway link name {}", client.name());
    let workers = client.start();
    let client = Arc::new(client);

    let sessions = Arc::clone(&state.sessions);
    let app = chatlink::routes::gateway_router(state);
    let listener = bind(config.port).await;
    let stopping = Arc::clone(&client);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            stopping.stop();
            for session in sessions.all() {
                session.close();
            }
        })
        .await
        .expect("server error");

    for worker in workers {
        if let Err(e) = worker.await {
            tracing::error!("link worker failed: {e}");
        }
    }
    tracing::info!("gateway links stopped");
}

async fn bind(port: u16) -> TcpListener {
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .expect("failed to bind");

    let actual_port = listener
        .local_addr()
        .expect("failed to get local address")
        .port();
    eprintln!("  \x1b[32m→ listening on 0.0.0.0:{actual_port}\x1b[0m");
    eprintln!();
    listener
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
