//! 主应用程序入口
//!
//! 加载配置，启动广播中心与 Axum Web 服务。

use std::sync::Arc;

use anyhow::Context;
use application::Hub;
use config::AppConfig;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = AppConfig::load().context("failed to load configuration")?;
    let hub = Arc::new(Hub::start(config.hub.clone()));

    let app = router(AppState::new(hub.clone()));
    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;

    info!("聊天室广播服务启动在 http://{}", address);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(hub.clone()))
        .await?;

    hub.stop().await.context("hub stopped with error")?;
    info!("聊天室广播服务已停止");
    Ok(())
}

/// Ctrl+C、SIGTERM 或调度器意外退出时开始停机
async fn shutdown_signal(hub: Arc<Hub>) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig_term) => {
                sig_term.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("接收到 Ctrl+C 信号，开始优雅停机..."),
        _ = terminate => info!("接收到终止信号，开始优雅停机..."),
        _ = hub.closed() => tracing::error!("广播中心已停止，关闭服务"),
    }
}
