use std::{sync::Arc, time::Duration};

use tokio::{sync::mpsc, task::JoinHandle, time::sleep};
use tracing::{info, warn};

use crate::event::{Event, source::EventSource};

#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Reads the event source on its own task and forwards events over a channel.
///
/// Every successful connection is announced with a `connection-established`
/// event, so consumers can resynchronise whatever was missed while the
/// source was unreachable. The pump stops once the receiver is dropped.
pub struct EventPump;

impl EventPump {
    pub fn spawn(
        source: Arc<dyn EventSource>,
        config: ReconnectConfig,
        capacity: usize,
    ) -> (mpsc::Receiver<Event>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity);
        let handle = tokio::spawn(run(source, tx, config));
        (rx, handle)
    }
}

async fn run(source: Arc<dyn EventSource>, tx: mpsc::Sender<Event>, config: ReconnectConfig) {
    let mut delay = config.initial_delay;

    while !tx.is_closed() {
        let mut stream = match source.connect().await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(
                    "failed to connect to event source: {}, retrying in {:?}",
                    e, delay
                );
                sleep(delay).await;
                delay = (delay * 2).min(config.max_delay);
                continue;
            }
        };

        info!("connected to event source");
        delay = config.initial_delay;

        if tx.send(Event::connection_established()).await.is_err() {
            break;
        }

        loop {
            match stream.next().await {
                Ok(Some(event)) => {
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
                Ok(None) => {
                    warn!("event stream closed by remote");
                    break;
                }
                Err(e) => {
                    warn!("event stream failed: {}", e);
                    break;
                }
            }
        }

        sleep(delay).await;
    }

    info!("event pump stopped");
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use anyhow::{Result, bail};
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use super::*;
    use crate::event::{EventKind, source::EventStream};

    struct VecStream(VecDeque<Event>);

    #[async_trait]
    impl EventStream for VecStream {
        async fn next(&mut self) -> Result<Option<Event>> {
            Ok(self.0.pop_front())
        }
    }

    /// Each connect attempt pops one scripted outcome; `None` fails the attempt.
    struct ScriptedSource(Mutex<VecDeque<Option<Vec<Event>>>>);

    #[async_trait]
    impl EventSource for ScriptedSource {
        async fn connect(&self) -> Result<Box<dyn EventStream>> {
            let next = self.0.lock().await.pop_front();
            match next {
                Some(Some(events)) => Ok(Box::new(VecStream(events.into()))),
                Some(None) => bail!("connection refused"),
                None => std::future::pending().await,
            }
        }
    }

    #[tokio::test]
    async fn test_reconnect_announces_each_connection() {
        let source = ScriptedSource(Mutex::new(VecDeque::from(vec![
            Some(vec![Event::on("work", "domain-start")]),
            None,
            Some(vec![Event::on("work", "domain-shutdown")]),
        ])));

        let config = ReconnectConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        };

        let (mut rx, handle) = EventPump::spawn(Arc::new(source), config, 16);

        let mut kinds = vec![];
        for _ in 0..4 {
            let event = rx.recv().await.expect("pump stopped early");
            kinds.push(event.kind);
        }

        assert_eq!(
            kinds,
            vec![
                EventKind::ConnectionEstablished,
                EventKind::Start,
                EventKind::ConnectionEstablished,
                EventKind::Shutdown,
            ]
        );

        handle.abort();
    }
}
