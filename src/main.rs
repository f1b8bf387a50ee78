use billing_import_rust::{
    build_router, create_pool, run_migrations, service::HttpClassifier, AppConfig, AppState, ImportPipeline,
    PgLedger, SharedLedger,
};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tracing::{info, warn};
use tracing_subscriber::fmt::time::ChronoLocal;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志 - 使用本地时间格式
    tracing_subscriber::fmt()
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S".to_string()))
        .with_target(true)
        .with_level(true)
        .init();

    // 加载配置
    let config = AppConfig::from_env();
    info!("Starting server with config: {:?}", config);

    // 创建数据库连接池并执行迁移
    let pool = create_pool(&config.database.url, config.database.max_connections).await?;
    run_migrations(&pool).await?;
    info!("Database pool created, migrations applied");

    let ledger: SharedLedger = Arc::new(PgLedger::new(pool));
    let mut pipeline = ImportPipeline::new(ledger.clone(), config.import.batch_size);
    match &config.classifier.url {
        Some(url) => match HttpClassifier::new(url.clone(), Duration::from_secs(config.classifier.timeout_secs)) {
            Ok(classifier) => {
                info!("Column classifier enabled: {}", url);
                pipeline = pipeline.with_classifier(Arc::new(classifier));
            }
            Err(e) => warn!("Column classifier disabled, using heuristics: {}", e),
        },
        None => info!("No column classifier configured, using heuristics"),
    }

    let app = build_router(AppState::new(ledger, pipeline)).layer(ServiceBuilder::new());

    // 启动服务器
    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Server listening on {}", addr);
    info!("API Endpoints:");
    info!("  POST /api/import/preview   - normalize + diff");
    info!("  POST /api/import/batch     - execute one batch");
    info!("  POST /api/import/run       - execute all batches");
    info!("  POST /api/merge/vendors    - merge vendors");
    info!("  POST /api/merge/services   - merge services");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
