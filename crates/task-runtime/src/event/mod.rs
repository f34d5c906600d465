//! The cross-process half of the event bus: a `PgEventSource` that listens on
//! the ledger store's `dashboard_events` channel and turns raw notification
//! payloads into [`Event`]s the in-process bus can fan out.

use async_trait::async_trait;
use sqlx::postgres::PgNotification;
use task_core::EventNotification;

pub const CHANNEL: &str = "dashboard_events";

#[derive(Clone, Debug)]
pub enum Event {
    /// A row was appended to `events` and its notification decoded cleanly.
    Notification(EventNotification),
    /// A notification was received but could not be parsed, or the listener's
    /// buffer overflowed and a gap is possible. Subscribers should treat this
    /// as "resync from a fresh snapshot".
    Lagged,
}

#[async_trait]
pub trait EventSource: Send {
    async fn next(&mut self) -> anyhow::Result<Event>;
}

pub struct PgEventSource {
    listener: sqlx::postgres::PgListener,
}

impl PgEventSource {
    pub async fn new(pool: &sqlx::PgPool) -> sqlx::Result<Self> {
        let mut listener = sqlx::postgres::PgListener::connect_with(pool).await?;
        listener.listen(CHANNEL).await?;
        Ok(Self { listener })
    }
}

#[async_trait]
impl EventSource for PgEventSource {
    async fn next(&mut self) -> anyhow::Result<Event> {
        fn parse(notification: &PgNotification) -> Event {
            match serde_json::from_str(notification.payload()) {
                Ok(payload) => Event::Notification(payload),
                Err(e) => {
                    tracing::warn!("received an invalid `{CHANNEL}` notification: {e}");
                    Event::Lagged
                }
            }
        }

        loop {
            break match self.listener.try_recv().await {
                Ok(Some(notification)) => Ok(parse(&notification)),
                Ok(None) => Ok(Event::Lagged),
                Err(e) => Err(e.into()),
            };
        }
    }
}
