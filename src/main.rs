use anyhow::Context;
use clap::Parser;
use logidx::{Config, Coordinator, StatusServer};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// logidx：按时间分区的搜索索引生命周期协调器
#[derive(Debug, Parser)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// 配置文件路径（TOML）
    #[clap(long, short, env = "LOGIDX_CONFIG", default_value = "logidx.toml")]
    config: PathBuf,
    /// 覆盖配置中的实例名
    #[clap(long)]
    instance: Option<String>,
    /// 只做初始化，不启动定时 rollover
    #[clap(long)]
    no_schedule: bool,
    /// 覆盖状态服务端口（0 = 不启动）
    #[clap(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = Config::load(&args.config)
        .with_context(|| format!("loading config from {:?}", args.config))?;
    if let Some(instance) = args.instance {
        config.instance = instance;
    }
    if let Some(port) = args.port {
        config.status_port = port;
    }
    if args.no_schedule {
        config.start_scheduling = false;
    }

    info!(
        "Starting logidx: instance {} with {} models ({:?} backend)",
        config.instance,
        config.models.len(),
        config.engine.backend
    );

    let ctx = config
        .build_context()
        .context("building engine and catalog")?;
    let coordinator = Arc::new(
        Coordinator::init_instance(ctx, &config.instance, &config.models)
            .await
            .context("initializing instance")?,
    );

    if config.start_scheduling {
        let started = coordinator.start_all();
        info!("{} rollover schedules started", started);
    } else {
        info!("Scheduling disabled; indices initialized only");
    }

    // 启动状态服务 (HTTP)
    if config.status_port != 0 {
        let server = StatusServer::new(coordinator.clone());
        let port = config.status_port;
        tokio::spawn(async move {
            if let Err(e) = server.run(port).await {
                tracing::error!("Status server failed: {}", e);
            }
        });
        info!("Status via: http://localhost:{}/status", port);
    }

    tokio::spawn(coordinator.clone().report_loop(config.report_interval_secs));

    // 优雅退出处理
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    coordinator.stop_all().await;

    Ok(())
}
