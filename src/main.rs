use faketrace_core::{api, config::Config, telemetry, GeminiClient, HistoryLedger};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init();

    // ----------------------------------------------------------------
    // 0. 加载配置
    // ----------------------------------------------------------------
    let config = Config::from_env()?;
    info!(
        "⚙️  配置加载完成: Host={}:{}, DB={}, Model={}",
        config.host, config.port, config.db_path, config.gemini_model
    );
    if config.gemini_api_key.is_empty() {
        warn!("未设置 GEMINI_API_KEY / API_KEY，分析请求将会失败");
    }

    // ----------------------------------------------------------------
    // 1. 推理服务客户端 & 历史账本
    // ----------------------------------------------------------------
    info!("🛡️ [FakeTrace] 媒体法证服务启动中...");

    let service = GeminiClient::new(
        config.gemini_base_url.clone(),
        config.gemini_model.clone(),
        config.gemini_api_key.clone(),
    )?;

    // 打不开或快照损坏都不会中断启动
    let ledger = HistoryLedger::open(&config.db_path);
    info!("📚 历史账本就绪: {} 条记录", ledger.len());

    // ----------------------------------------------------------------
    // 2. 状态共享容器
    // ----------------------------------------------------------------
    let shared_state = Arc::new(api::AppState::new(Arc::new(service), ledger));

    // ----------------------------------------------------------------
    // 3. 启动 HTTP 服务
    // ----------------------------------------------------------------
    let app = api::app(shared_state, config.max_upload_bytes);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;

    info!("🚀 API 服务已运行在: http://{}", addr);
    info!("   - PUT    /workbench/{{kind}}/file    : 选择待分析的文件");
    info!("   - POST   /workbench/{{kind}}/analyze : 发起法证分析");
    info!("   - GET    /history                  : 查看历史记录");
    info!("   - DELETE /history?confirm=true     : 清空历史记录");

    axum::serve(listener, app).await?;

    Ok(())
}
