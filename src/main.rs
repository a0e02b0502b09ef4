use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;

use tenant_authz::app::{create_app, AppState};
use tenant_authz::config::AppConfig;
use tenant_authz::kube::{KubeClient, KubeConfig, KubeTenantSource, ResourceRef};
use tenant_authz::lifecycle::{Runtime, RuntimeOptions};
use tenant_authz::oidc::TokenVerifier;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_env();
    let config = AppConfig::parse();
    init_tracing(config.production);

    let bootstrap = config.bootstrap()?;
    let cors = config.cors_layer()?;

    let http = reqwest::Client::new();
    let verifier = TokenVerifier::discover(config.oidc(), &http)
        .await
        .context("OIDC discovery failed")?
        .with_leeway(config.oidc_leeway_secs);

    let kube_config = KubeConfig::from_parts(
        config.kube_api_server.clone(),
        config.kube_token_file.clone(),
        config.kube_ca_file.clone(),
    )?;
    let kube = Arc::new(KubeClient::new(kube_config)?);
    tracing::info!(api_server = %kube.base_url(), namespace = %config.namespace, "kubernetes client ready");

    let source = KubeTenantSource::new(kube.clone(), ResourceRef::projects(&config.namespace))
        .with_label_selector(config.tenant_label_selector.clone())
        .with_capacity(config.sync_event_buffer);

    let runtime = Runtime::start(
        Arc::new(verifier),
        Arc::new(source),
        RuntimeOptions {
            bootstrap,
            sync_timeout: config.sync_timeout(),
        },
    )
    .await
    .context("tenant policy sync did not start")?;

    let state = AppState::new(
        runtime.store(),
        runtime.verifier(),
        kube,
        config.namespace.clone(),
        runtime.sync_state(),
    );
    let app = create_app(state, cors)?;

    let listener = TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;
    tracing::info!(listen = %config.listen, "listening");

    let served = axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await;

    runtime.shutdown().await;
    served.context("server error")
}

fn load_env() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    let crate_env = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    let _ = dotenvy::from_path(crate_env);
}

fn init_tracing(production: bool) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::Layer;

    let fmt_layer = if production {
        tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(false)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed()
    };

    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
