/// Kafka 이벤트 버스: 내구성 at-least-once 스트림 3개 + 데드레터
/// 발행 실패는 입찰 수락을 막지 않는다 (호출자가 로그 후 계속)
// region:    --- Imports
use crate::config::Config;
use crate::error::BrokerError;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::{debug, error, info, warn};

// endregion: --- Imports

// region:    --- Topics
/// bid.audit 스트림
pub const TOPIC_AUDIT: &str = "audit-logs";
/// auction.ended 스트림
pub const TOPIC_AUCTION_EVENTS: &str = "auction-events";
/// notify.user 스트림
pub const TOPIC_NOTIFICATIONS: &str = "notifications";
/// 파싱 불가 메시지 격리
pub const TOPIC_DEAD_LETTER: &str = "dead-letter";
// endregion: --- Topics

// region:    --- Kafka Producer
#[derive(Clone)]
pub struct KafkaProducer {
    producer: Arc<FutureProducer>,
}

/// KafkaProducer 구현
impl KafkaProducer {
    pub fn new(brokers: &str) -> Result<Self, BrokerError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()?;

        Ok(KafkaProducer {
            producer: Arc::new(producer),
        })
    }

    /// 직렬화 후 메시지 전송 (브로커 fsync 까지 best-effort-durable)
    pub async fn publish_json<T: Serialize>(
        &self,
        topic: &str,
        key: &str,
        value: &T,
    ) -> Result<(), BrokerError> {
        let payload = serde_json::to_string(value)?;
        self.send_raw(topic, key, &payload).await
    }

    /// 원문 메시지 전송
    pub async fn send_raw(&self, topic: &str, key: &str, payload: &str) -> Result<(), BrokerError> {
        debug!(
            "{:<12} --> Kafka 메시지 전송: topic={}, key={}",
            "Producer", topic, key
        );
        let record = FutureRecord::to(topic).key(key).payload(payload);

        self.producer
            .send(record, Duration::from_secs(0))
            .await
            .map_err(|(e, _)| BrokerError::Kafka(e))?;

        Ok(())
    }
}

// endregion: --- Kafka Producer

// region:    --- Kafka Consumer
pub struct KafkaConsumer {
    consumer: Arc<StreamConsumer>,
    dead_letter: KafkaProducer,
}

/// KafkaConsumer 구현
impl KafkaConsumer {
    pub fn new(brokers: &str, group_id: &str) -> Result<Self, BrokerError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("group.id", group_id)
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", "6000")
            .set("allow.auto.create.topics", "true")
            .create()?;

        Ok(KafkaConsumer {
            consumer: Arc::new(consumer),
            dead_letter: KafkaProducer::new(brokers)?,
        })
    }

    /// JSON 메시지 소비 루프
    /// 핸들러 오류는 로그 후 계속 (브로커 재전달이 재시도를 담당)
    /// 역직렬화 불가 메시지는 데드레터 토픽으로 격리
    pub async fn consume_json<T, F, Fut>(&self, topic: &str, handler: F) -> Result<(), BrokerError>
    where
        T: DeserializeOwned,
        F: Fn(T) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<(), Box<dyn std::error::Error + Send + Sync>>>
            + Send
            + 'static,
    {
        info!("{:<12} --> Kafka 소비 시작: topic={}", "Consumer", topic);
        self.consumer.subscribe(&[topic])?;

        loop {
            match self.consumer.recv().await {
                Ok(message) => {
                    let Some(payload) = message.payload() else {
                        warn!("{:<12} --> 빈 페이로드 수신: topic={}", "Consumer", topic);
                        continue;
                    };

                    match serde_json::from_slice::<T>(payload) {
                        Ok(parsed) => {
                            if let Err(e) = handler(parsed).await {
                                error!(
                                    "{:<12} --> 이벤트 처리 오류: topic={}, {:?}",
                                    "Consumer", topic, e
                                );
                            }
                        }
                        Err(e) => {
                            // 포이즌 메시지: 데드레터로 보내고 계속
                            error!(
                                "{:<12} --> deserialize 오류, 데드레터로 이동: topic={}, {:?}",
                                "Consumer", topic, e
                            );
                            let raw = String::from_utf8_lossy(payload);
                            if let Err(dl) =
                                self.dead_letter.send_raw(TOPIC_DEAD_LETTER, topic, &raw).await
                            {
                                error!("{:<12} --> 데드레터 전송 실패: {:?}", "Consumer", dl);
                            }
                        }
                    }
                }
                Err(e) => error!("{:<12} --> 메시지 수신 오류: {:?}", "Consumer", e),
            }
        }
    }
}

// endregion: --- Kafka Consumer

// region:    --- Kafka Manager
pub struct KafkaManager {
    producer: Arc<KafkaProducer>,
    brokers: String,
}

/// KafkaManager 구현
impl KafkaManager {
    pub fn new(config: &Config) -> Result<Self, BrokerError> {
        let brokers = config.event_bus_brokers.clone();
        let producer = Arc::new(KafkaProducer::new(&brokers)?);

        Ok(KafkaManager { producer, brokers })
    }

    /// 프로듀서 반환
    pub fn get_producer(&self) -> Arc<KafkaProducer> {
        Arc::clone(&self.producer)
    }

    /// 소비자 그룹 별 컨슈머 생성
    pub fn consumer(&self, group_id: &str) -> Result<KafkaConsumer, BrokerError> {
        KafkaConsumer::new(&self.brokers, group_id)
    }

    /// Kafka 초기화: 초기화 토픽으로 송수신이 왕복되는지 확인
    pub async fn initialize(&self) -> Result<(), BrokerError> {
        info!("{:<12} --> Kafka 초기화 시작", "Manager");

        let probe = KafkaConsumer::new(&self.brokers, "init-probe-group")?;
        probe.consumer.subscribe(&["init-topic"])?;

        self.producer
            .send_raw("init-topic", "init-key", "init-message")
            .await?;

        let mut attempts = 0;
        let max_attempts = 10;
        while attempts < max_attempts {
            match time::timeout(Duration::from_secs(1), probe.consumer.recv()).await {
                Ok(Ok(message)) => {
                    if let Some(payload) = message.payload() {
                        if payload == b"init-message" {
                            info!("{:<12} --> Kafka 초기화 메시지 수신 확인", "Manager");
                            return Ok(());
                        }
                    }
                }
                Ok(Err(e)) => error!(
                    "{:<12} --> Kafka 초기화 메시지 수신 오류: {:?}",
                    "Manager", e
                ),
                Err(_) => {
                    attempts += 1;
                    warn!(
                        "{:<12} --> Kafka 초기화 메시지 수신 대기 중... (시도: {}/{})",
                        "Manager", attempts, max_attempts
                    );
                }
            }
        }

        Err(BrokerError::Init(
            "초기화 메시지 수신 실패".to_string(),
        ))
    }

    /// 스트림 토픽 일괄 생성
    pub async fn create_topics(&self) -> Result<(), BrokerError> {
        for topic in [
            TOPIC_AUDIT,
            TOPIC_AUCTION_EVENTS,
            TOPIC_NOTIFICATIONS,
            TOPIC_DEAD_LETTER,
        ] {
            self.create_topic(topic, 5, 1).await?;
        }
        Ok(())
    }

    /// 토픽 생성
    pub async fn create_topic(
        &self,
        topic_name: &str,
        num_partitions: i32,
        replication_factor: i32,
    ) -> Result<(), BrokerError> {
        info!("{:<12} --> Kafka 토픽 생성: {}", "Manager", topic_name);

        let admin_client: AdminClient<DefaultClientContext> = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .create()?;

        let new_topic = NewTopic::new(
            topic_name,
            num_partitions,
            TopicReplication::Fixed(replication_factor),
        );

        admin_client
            .create_topics(&[new_topic], &AdminOptions::new())
            .await?;

        Ok(())
    }
}

// endregion: --- Kafka Manager
