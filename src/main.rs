// region:    --- Imports
use auction_engine::audit::AuditConsumer;
use auction_engine::bidding::BidValidator;
use auction_engine::config::Config;
use auction_engine::database::DatabaseManager;
use auction_engine::gateway::auth::TokenSigner;
use auction_engine::gateway::{create_router, AppState};
use auction_engine::hot_state::RedisManager;
use auction_engine::message_broker::KafkaManager;
use auction_engine::notifier::{NotificationDeliverer, NotificationDispatcher};
use auction_engine::rooms::{spawn_relay, RoomHub, SessionRegistry};
use auction_engine::scheduler::LifecycleScheduler;
use auction_engine::store::Store;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use uuid::Uuid;
// endregion: --- Imports

// region:    --- Main
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // logging 초기화
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .without_time()
        .with_target(false)
        .init();

    let config = Arc::new(Config::from_env());

    // DatabaseManager 생성 및 스키마 준비
    let db_manager = Arc::new(DatabaseManager::new(&config).await?);
    let recreate = std::env::var("RECREATE_DB").map(|v| v == "true").unwrap_or(false);
    if recreate {
        db_manager.initialize_database().await?;
        info!("{:<12} --> 데이터베이스 재생성 완료", "Main");
    } else {
        db_manager.ensure_schema().await?;
        info!("{:<12} --> 데이터베이스 스키마 확인 완료", "Main");
    }

    // Kafka 매니저 생성 및 초기화
    let kafka_manager = Arc::new(KafkaManager::new(&config)?);
    if let Err(e) = kafka_manager.initialize().await {
        error!("{:<12} --> Kafka 초기화 실패: {:?}", "Main", e);
        return Err(e.into());
    }
    kafka_manager.create_topics().await?;
    info!("{:<12} --> Kafka 초기화 성공", "Main");

    // Redis 핫 스테이트
    let redis = RedisManager::new(&config)?;
    info!("{:<12} --> Redis 핫 스테이트 준비", "Main");

    // 컴포넌트 조립 (명시적 구성: 협력자는 생성 시 주입)
    let replica_id = Uuid::new_v4();
    let store = Arc::new(Store::new(Arc::clone(&db_manager)));
    let registry = Arc::new(SessionRegistry::new());
    let hub = Arc::new(RoomHub::new(Arc::clone(&registry), replica_id));
    let producer = kafka_manager.get_producer();
    let validator = Arc::new(BidValidator::new(
        Arc::clone(&store),
        redis.clone(),
        Arc::clone(&producer),
        Arc::clone(&hub),
        &config,
    ));
    let lifecycle = Arc::new(LifecycleScheduler::new(
        Arc::clone(&store),
        Arc::clone(&producer),
        Arc::clone(&hub),
        redis.clone(),
        config.scheduler_tick,
    ));

    // 주기 스윕 + 레플리카 간 중계
    lifecycle.start();
    spawn_relay(Arc::clone(&hub), redis.clone());
    info!(
        "{:<12} --> 스케줄러/중계 시작: replica={}",
        "Main", replica_id
    );

    // 이벤트 파이프라인 소비자들
    let dispatcher = NotificationDispatcher::new(
        Arc::clone(&producer),
        kafka_manager.consumer("notification-dispatcher")?,
    );
    tokio::spawn(async move { dispatcher.start().await });

    let deliverer = NotificationDeliverer::new(
        db_manager.get_pool(),
        Arc::clone(&registry),
        Arc::clone(&hub),
        redis.clone(),
        kafka_manager.consumer("notification-delivery")?,
    );
    tokio::spawn(async move { deliverer.start().await });

    let audit = AuditConsumer::new(db_manager.get_pool(), kafka_manager.consumer("audit-sink")?);
    tokio::spawn(async move { audit.start().await });
    info!("{:<12} --> 이벤트 소비자 시작", "Main");

    // 라우터 설정
    let signer = Arc::new(TokenSigner::new(config.jwt_signing_key.clone()));
    let state = Arc::new(AppState {
        config: Arc::clone(&config),
        store,
        validator,
        hub,
        registry,
        redis,
        signer,
        lifecycle,
    });
    let routes_all = create_router(state);

    // 리스너 생성
    let listener = TcpListener::bind(&config.listen_address).await?;
    info!(
        "{:<12} --> Web Server: Listening on {}",
        "Main",
        listener.local_addr()?
    );

    // 서버 실행
    if let Err(err) = axum::serve(listener, routes_all.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("{:<12} --> Server error: {}", "Main", err);
    }
    Ok(())
}

/// ctrl-c / SIGTERM 대기
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("{:<12} --> Ctrl+C 핸들러 설치 실패: {:?}", "Main", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => error!("{:<12} --> 시그널 핸들러 설치 실패: {:?}", "Main", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("{:<12} --> Ctrl+C 수신", "Main"),
        _ = terminate => info!("{:<12} --> 종료 시그널 수신", "Main"),
    }
}
// endregion: --- Main
