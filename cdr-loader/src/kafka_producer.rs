use async_trait::async_trait;
use metrics::{counter, gauge};
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use tracing::{debug, error, info};

use cdr_common::record::CanonicalRecord;
use cdr_common::sink::{PublishError, RecordSink};

use crate::config::KafkaConfig;

pub struct KafkaContext {}

impl rdkafka::ClientContext for KafkaContext {
    fn stats(&self, stats: rdkafka::Statistics) {
        gauge!("cdr_kafka_callback_queue_depth").set(stats.replyq as f64);
        gauge!("cdr_kafka_producer_queue_depth").set(stats.msg_cnt as f64);
        gauge!("cdr_kafka_producer_queue_depth_limit").set(stats.msg_max as f64);
        gauge!("cdr_kafka_producer_queue_bytes").set(stats.msg_size as f64);
        gauge!("cdr_kafka_producer_queue_bytes_limit").set(stats.msg_size_max as f64);

        for (topic, stats) in stats.topics {
            gauge!("cdr_kafka_produce_avg_batch_size_bytes", "topic" => topic.clone())
                .set(stats.batchsize.avg as f64);
            gauge!("cdr_kafka_produce_avg_batch_size_records", "topic" => topic)
                .set(stats.batchcnt.avg as f64);
        }

        for (_, stats) in stats.brokers {
            let id_string = format!("{}", stats.nodeid);
            gauge!("cdr_kafka_broker_requests_pending", "broker" => id_string.clone())
                .set(stats.outbuf_cnt as f64);
            counter!("cdr_kafka_broker_tx_errors_total", "broker" => id_string.clone())
                .absolute(stats.txerrs);
            counter!("cdr_kafka_broker_rx_errors_total", "broker" => id_string)
                .absolute(stats.rxerrs);
        }
    }
}

pub async fn create_kafka_producer(
    config: &KafkaConfig,
) -> Result<FutureProducer<KafkaContext>, KafkaError> {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", &config.kafka_hosts)
        .set("statistics.interval.ms", "10000")
        .set("linger.ms", config.kafka_producer_linger_ms.to_string())
        .set(
            "message.timeout.ms",
            config.kafka_message_timeout_ms.to_string(),
        )
        .set(
            "compression.codec",
            config.kafka_compression_codec.to_owned(),
        )
        .set(
            "queue.buffering.max.kbytes",
            (config.kafka_producer_queue_mib * 1024).to_string(),
        );

    if config.kafka_tls {
        client_config
            .set("security.protocol", "ssl")
            .set("enable.ssl.certificate.verification", "false");
    };

    debug!("rdkafka configuration: {:?}", client_config);
    let producer: FutureProducer<KafkaContext> =
        client_config.create_with_context(KafkaContext {})?;

    Ok(producer)
}

/// Produces every record as a JSON message keyed by its source number.
pub struct KafkaSink {
    producer: FutureProducer<KafkaContext>,
    topic: String,
}

impl KafkaSink {
    pub async fn new(config: &KafkaConfig) -> Result<Self, KafkaError> {
        info!("connecting to Kafka brokers at {}", config.kafka_hosts);
        let producer = create_kafka_producer(config).await?;

        Ok(Self {
            producer,
            topic: config.kafka_topic.to_owned(),
        })
    }
}

#[async_trait]
impl RecordSink for KafkaSink {
    async fn publish(&self, records: &[CanonicalRecord]) -> Result<(), PublishError> {
        let payloads = records
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<Vec<String>, _>>()?;

        let mut failures: Vec<String> = Vec::new();
        let mut deliveries = Vec::with_capacity(records.len());

        for (record, payload) in records.iter().zip(payloads.iter()) {
            match self.producer.send_result(FutureRecord {
                topic: self.topic.as_str(),
                payload: Some(payload.as_str()),
                partition: None,
                key: Some(record.key()),
                timestamp: None,
                headers: None,
            }) {
                Ok(delivery) => deliveries.push(delivery),
                Err((e, _)) => failures.push(e.to_string()),
            }
        }

        // Wait for every message, even after a failure, so none is left in flight.
        for delivery in deliveries {
            match delivery.await {
                Ok(Ok(_)) => {}
                Ok(Err((e, _))) => failures.push(e.to_string()),
                Err(_) => failures.push("delivery was cancelled".to_owned()),
            }
        }

        let delivered = records.len() - failures.len();
        counter!("cdr_records_published_total").increment(delivered as u64);

        match failures.first() {
            None => Ok(()),
            Some(first) => {
                counter!("cdr_publish_failures_total").increment(failures.len() as u64);
                error!(
                    "failed to produce {} of {} records to {}: {}",
                    failures.len(),
                    records.len(),
                    self.topic,
                    first
                );
                Err(PublishError::Delivery {
                    failed: failures.len(),
                    total: records.len(),
                    message: first.to_owned(),
                })
            }
        }
    }
}
