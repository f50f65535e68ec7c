use anyhow::Context;
use clap::Parser;
use gemini_relay::config::Config;
use gemini_relay::forwarder::ChatForwarder;
use gemini_relay::server;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "gemini-relay")]
#[command(about = "带多密钥回退的 Gemini 聊天中继服务", long_about = None)]
struct Args {
    /// YAML 配置文件路径（不指定时从环境变量读取）
    #[arg(short, long)]
    config: Option<String>,

    /// 监听地址，优先于 --port
    #[arg(short, long, env = "BIND")]
    bind: Option<String>,

    /// 监听端口（绑定 0.0.0.0）
    #[arg(short, long, env = "PORT", default_value_t = 3000)]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // 解析命令行参数
    let args = Args::parse();

    // 加载配置
    let config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("加载配置文件失败: {}", path))?,
        None => Config::from_env().context("从环境变量加载配置失败")?,
    };
    info!(
        credentials = config.api_keys.len(),
        model = %config.upstream.model,
        history_limit = config.chat.history_limit,
        "配置加载完成"
    );

    let forwarder = Arc::new(ChatForwarder::from_config(&config).context("创建上游客户端失败")?);

    // 解析监听地址
    let bind = args
        .bind
        .unwrap_or_else(|| format!("0.0.0.0:{}", args.port));
    let addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("无效的监听地址: {}", bind))?;

    // 启动服务器
    server::start_server(forwarder, addr).await?;

    Ok(())
}
