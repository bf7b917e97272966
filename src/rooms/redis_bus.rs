//! Cross-instance fan-out over Redis pub/sub.
//!
//! Every instance publishes room frames to one shared channel and runs a
//! relay that subscribes to it and delivers each message to the instance's
//! own [`RoomRegistry`]. A frame published by any instance therefore reaches
//! the room's members wherever they are connected, including the publishing
//! instance itself.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Frame, RegistryError, RoomBus, RoomRegistry};

const INITIAL_BACKOFF: Duration = Duration::from_millis(250);
const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Wire format on the shared channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct BusMessage {
    room: String,
    payload: String,
}

#[derive(Clone)]
pub struct RedisRoomBus {
    client: redis::Client,
    connection: ConnectionManager,
    channel: String,
}

impl std::fmt::Debug for RedisRoomBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisRoomBus")
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

impl RedisRoomBus {
    pub async fn connect(redis_url: &str, channel: impl Into<String>) -> Result<Self, RegistryError> {
        let client = redis::Client::open(redis_url)?;
        let connection = ConnectionManager::new(client.clone()).await?;

        Ok(Self {
            client,
            connection,
            channel: channel.into(),
        })
    }

    /// Subscribe to the shared channel and deliver incoming frames to
    /// `registry` until `shutdown` fires. Lost subscriptions are re-established
    /// with capped exponential backoff, which starts over once a
    /// subscription succeeds.
    pub fn spawn_relay(
        &self,
        registry: Arc<RoomRegistry>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let client = self.client.clone();
        let channel = self.channel.clone();

        tokio::spawn(async move {
            let mut backoff = Backoff::default();
            loop {
                let outcome = tokio::select! {
                    () = shutdown.cancelled() => break,
                    result = relay(&client, &channel, &registry, &mut backoff) => result,
                };

                let delay = backoff.next_delay();
                match outcome {
                    Ok(()) => warn!(channel = %channel, ?delay, "Room relay subscription ended"),
                    Err(e) => warn!(channel = %channel, error = %e, ?delay, "Room relay failed"),
                }

                tokio::select! {
                    () = shutdown.cancelled() => break,
                    () = tokio::time::sleep(delay) => {}
                }
            }
            info!(channel = %channel, "Room relay stopped");
        })
    }
}

#[async_trait]
impl RoomBus for RedisRoomBus {
    async fn publish(&self, room: &str, frame: Frame) -> Result<usize, RegistryError> {
        let message = BusMessage {
            room: room.to_string(),
            payload: frame.to_string(),
        };
        let encoded = serde_json::to_string(&message)?;

        let mut conn = self.connection.clone();
        let subscribers: usize = conn.publish(&self.channel, encoded).await?;

        debug!(room, channel = %self.channel, subscribers, "Published room frame to Redis");
        Ok(subscribers)
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}

/// Delay between relay reconnect attempts. Doubles per consecutive failure
/// up to [`MAX_BACKOFF`].
#[derive(Debug)]
struct Backoff {
    current: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            current: INITIAL_BACKOFF,
        }
    }
}

impl Backoff {
    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(MAX_BACKOFF);
        delay
    }

    fn reset(&mut self) {
        self.current = INITIAL_BACKOFF;
    }
}

async fn relay(
    client: &redis::Client,
    channel: &str,
    registry: &RoomRegistry,
    backoff: &mut Backoff,
) -> Result<(), RegistryError> {
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.subscribe(channel).await?;
    backoff.reset();
    info!(name: "rooms.relay.subscribed", channel, "Subscribed to room channel");

    let mut stream = pubsub.on_message();
    while let Some(msg) = stream.next().await {
        let payload: String = match msg.get_payload() {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "Failed to read room message payload");
                continue;
            }
        };

        match serde_json::from_str::<BusMessage>(&payload) {
            Ok(message) => {
                registry
                    .publish(&message.room, Frame::from(message.payload))
                    .await;
            }
            Err(e) => warn!(error = %e, "Dropping malformed room message"),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bus_message_keeps_payload_verbatim() {
        let payload = r#"{"type":"claims_update","claims":[],"total_count":0}"#;
        let message = BusMessage {
            room: "claims_42".to_string(),
            payload: payload.to_string(),
        };
        let decoded: BusMessage =
            serde_json::from_str(&serde_json::to_string(&message).unwrap()).unwrap();
        assert_eq!(decoded.payload, payload);
        assert_eq!(decoded.room, "claims_42");
    }

    #[test]
    fn backoff_doubles_to_the_cap_and_resets_after_subscribing() {
        let mut backoff = Backoff::default();
        let delays: Vec<Duration> = (0..8).map(|_| backoff.next_delay()).collect();
        assert_eq!(delays[0], INITIAL_BACKOFF);
        assert_eq!(delays[1], Duration::from_millis(500));
        assert_eq!(delays[5], Duration::from_secs(8));
        assert_eq!(delays[6], MAX_BACKOFF);
        assert_eq!(delays[7], MAX_BACKOFF);

        // A later drop after a good subscription retries quickly again.
        backoff.reset();
        assert_eq!(backoff.next_delay(), INITIAL_BACKOFF);
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
    }

    // Runs only against a live Redis (REDIS_URL).
    #[tokio::test]
    async fn relays_publishes_to_local_members() {
        let Ok(url) = std::env::var("REDIS_URL") else {
            eprintln!("Skipping test: REDIS_URL not set");
            return;
        };

        let channel = format!("claims:rooms:test:{}", uuid::Uuid::new_v4());
        let bus = RedisRoomBus::connect(&url, channel).await.unwrap();
        let registry = Arc::new(RoomRegistry::default());
        let shutdown = CancellationToken::new();
        let relay = bus.spawn_relay(Arc::clone(&registry), shutdown.clone());

        let (tx, mut rx) = tokio::sync::mpsc::channel(4);
        registry
            .join("claims_42", uuid::Uuid::new_v4(), &tx)
            .await
            .unwrap();

        // Subscription is asynchronous; publish until the relay has picked it up.
        let received = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                bus.publish("claims_42", Frame::from("hello")).await.unwrap();
                if let Ok(Some(frame)) =
                    tokio::time::timeout(Duration::from_millis(200), rx.recv()).await
                {
                    break frame;
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(&*received, "hello");
        shutdown.cancel();
        relay.await.unwrap();
    }
}
