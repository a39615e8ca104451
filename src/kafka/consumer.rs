//! Background topic consumer
//!
//! `kafka-console-consumer.sh` runs inside the first broker pod while the
//! scenario keeps producing data. The result comes back over a oneshot
//! channel once the consumer hits its message limit or its timeout.

use crate::cmd::KubeCli;
use crate::error::{Error, Result};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{info, warn};

const CONSUMER_SCRIPT: &str = "/opt/kafka/bin/kafka-console-consumer.sh";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumeRequest {
    pub namespace: String,
    pub cluster: String,
    pub topic: String,
    pub max_messages: usize,
    pub timeout: Duration,
}

impl ConsumeRequest {
    /// Pod the consumer is exec'd in
    pub fn broker_pod(&self) -> String {
        format!("{}-kafka-0", self.cluster)
    }

    /// Full `kubectl exec` argument list
    pub fn exec_args(&self) -> Vec<String> {
        vec![
            "exec".to_string(),
            "-n".to_string(),
            self.namespace.clone(),
            self.broker_pod(),
            "-c".to_string(),
            "kafka".to_string(),
            "--".to_string(),
            CONSUMER_SCRIPT.to_string(),
            "--bootstrap-server".to_string(),
            format!("localhost:{}", super::manifests::PLAIN_PORT),
            "--topic".to_string(),
            self.topic.clone(),
            "--from-beginning".to_string(),
            "--max-messages".to_string(),
            self.max_messages.to_string(),
            "--timeout-ms".to_string(),
            self.timeout.as_millis().to_string(),
        ]
    }
}

/// Non-empty output lines are the consumed records
pub fn parse_records(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// Start consuming on a background task
///
/// The receiver yields the records, or an error if the consumer failed or
/// returned fewer than `max_messages` records before its timeout.
pub fn spawn_consumer(cli: KubeCli, request: ConsumeRequest) -> oneshot::Receiver<Result<Vec<String>>> {
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        info!(
            topic = %request.topic,
            expected = request.max_messages,
            timeout = ?request.timeout,
            "Starting kafka consumer"
        );
        let result = cli
            .cmd()
            .args(request.exec_args())
            .capture()
            .run()
            .await
            .and_then(|output| {
                let records = parse_records(&output);
                if records.len() < request.max_messages {
                    Err(Error::scenario(format!(
                        "consumed {} of {} records from {}",
                        records.len(),
                        request.max_messages,
                        request.topic
                    )))
                } else {
                    Ok(records)
                }
            });

        if tx.send(result).is_err() {
            warn!(topic = %request.topic, "Consumer result dropped, receiver is gone");
        }
    });

    rx
}

/// Await a consumer started with `spawn_consumer`
pub async fn await_records(rx: oneshot::Receiver<Result<Vec<String>>>) -> Result<Vec<String>> {
    rx.await
        .map_err(|_| Error::scenario("kafka consumer task ended without a result"))?
}
