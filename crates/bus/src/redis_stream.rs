use crate::topic::TopicHandle;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use truemid_core::error::truncate_err;
use truemid_core::messages::BusMessage;

/// XREAD block timeout. Readers poll the stream tail and forward entries
/// into the topic's local queues.
const READ_BLOCK_MS: usize = 200;
const READ_BATCH: usize = 1_000;
const RECONNECT_DELAY: Duration = Duration::from_secs(1);
/// Consecutive backend failures tolerated before the bus is declared dead.
const RECONNECT_BUDGET: u32 = 30;

pub(crate) fn spawn_reader<T: BusMessage>(
    client: redis::Client,
    topic: TopicHandle<T>,
    stream_key: &'static str,
    token: CancellationToken,
    fatal_tx: watch::Sender<Option<String>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut failures: u32 = 0;
        'reconnect: while !token.is_cancelled() {
            let mut conn = match client.get_multiplexed_async_connection().await {
                Ok(conn) => conn,
                Err(err) => {
                    failures += 1;
                    if give_up(stream_key, failures, &err.to_string(), &fatal_tx) {
                        return;
                    }
                    tokio::select! {
                        _ = token.cancelled() => return,
                        _ = tokio::time::sleep(RECONNECT_DELAY) => continue 'reconnect,
                    }
                }
            };
            debug!(stream = stream_key, "Stream reader connected");

            // Start at the tail: a subscriber joining at time t sees only
            // entries appended after t.
            let mut cursor = "$".to_string();
            while !token.is_cancelled() {
                let options = StreamReadOptions::default().block(READ_BLOCK_MS).count(READ_BATCH);
                let reply: Result<StreamReadReply, _> = conn
                    .xread_options(&[stream_key], &[cursor.as_str()], &options)
                    .await;
                match reply {
                    Ok(reply) => {
                        failures = 0;
                        for stream in reply.keys {
                            for entry in stream.ids {
                                cursor.clone_from(&entry.id);
                                forward(&topic, stream_key, &entry);
                            }
                        }
                    }
                    Err(err) => {
                        failures += 1;
                        if give_up(stream_key, failures, &err.to_string(), &fatal_tx) {
                            return;
                        }
                        warn!(
                            stream = stream_key,
                            "Stream read failed ({}), reconnecting",
                            truncate_err(&err.to_string())
                        );
                        continue 'reconnect;
                    }
                }
            }
        }
    })
}

fn forward<T: BusMessage>(topic: &TopicHandle<T>, stream_key: &str, entry: &redis::streams::StreamId) {
    let Some(redis::Value::Data(raw)) = entry.map.get("json") else {
        warn!(stream = stream_key, entry = %entry.id, "Stream entry without json field");
        return;
    };
    match serde_json::from_slice::<T>(raw) {
        Ok(message) => topic.publish_local(message),
        Err(err) => warn!(
            stream = stream_key,
            entry = %entry.id,
            "Undecodable stream entry: {err}"
        ),
    }
}

fn give_up(
    stream_key: &str,
    failures: u32,
    err: &str,
    fatal_tx: &watch::Sender<Option<String>>,
) -> bool {
    if failures < RECONNECT_BUDGET {
        return false;
    }
    let msg = format!("stream reader for {stream_key} exhausted reconnect budget: {err}");
    error!("{msg}");
    let _ = fatal_tx.send(Some(msg));
    true
}
