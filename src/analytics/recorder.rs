//! Off-path click recording
//!
//! Redirect handlers hand a [`Visit`] to the recorder and return immediately.
//! An actor task owns the receiving end of a bounded channel, enriches each
//! visit with geolocation under a deadline, and appends one ledger row.
//!
//! Nothing here can fail a redirect: a full queue drops the visit with a
//! warning, a failed lookup records empty geo fields, and a failed append is
//! logged and discarded.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::analytics::geo::GeoLocator;
use crate::analytics::models::{ClickEvent, GeoRecord, Visit};
use crate::config::AnalyticsConfig;
use crate::storage::{with_timeout, Storage, StorageError};

/// Tuning for the recorder actor
#[derive(Debug, Clone, Copy)]
pub struct RecorderSettings {
    pub queue_size: usize,
    pub max_in_flight: usize,
    pub geo_timeout: Duration,
    pub store_timeout: Duration,
}

impl RecorderSettings {
    pub fn from_config(config: &AnalyticsConfig, store_timeout: Duration) -> Self {
        Self {
            queue_size: config.click_queue_size.max(1),
            max_in_flight: config.click_max_in_flight.max(1),
            geo_timeout: config.geoip_timeout(),
            store_timeout,
        }
    }
}

enum RecorderMessage {
    Record(Visit),
    /// Finish queued and in-flight work, then acknowledge
    Shutdown(oneshot::Sender<()>),
}

struct RecorderActor {
    receiver: mpsc::Receiver<RecorderMessage>,
    storage: Arc<dyn Storage>,
    geo: Arc<dyn GeoLocator>,
    settings: RecorderSettings,
    in_flight: JoinSet<()>,
}

impl RecorderActor {
    async fn run(mut self) {
        loop {
            tokio::select! {
                msg = self.receiver.recv() => match msg {
                    Some(RecorderMessage::Record(visit)) => self.dispatch(visit).await,
                    Some(RecorderMessage::Shutdown(ack)) => {
                        info!("Click recorder received shutdown signal, draining...");
                        self.drain().await;
                        let _ = ack.send(());
                        break;
                    }
                    None => {
                        warn!("Click recorder channel closed unexpectedly, draining...");
                        self.drain().await;
                        break;
                    }
                },
                Some(joined) = self.in_flight.join_next(), if !self.in_flight.is_empty() => {
                    if let Err(e) = joined {
                        warn!("Click recording task failed: {}", e);
                    }
                }
            }
        }
    }

    async fn dispatch(&mut self, visit: Visit) {
        while self.in_flight.len() >= self.settings.max_in_flight {
            if let Some(Err(e)) = self.in_flight.join_next().await {
                warn!("Click recording task failed: {}", e);
            }
        }

        let storage = Arc::clone(&self.storage);
        let geo = Arc::clone(&self.geo);
        let settings = self.settings;
        self.in_flight.spawn(async move {
            record_visit(storage.as_ref(), geo.as_ref(), &settings, visit).await;
        });
    }

    async fn drain(&mut self) {
        self.receiver.close();
        while let Ok(msg) = self.receiver.try_recv() {
            if let RecorderMessage::Record(visit) = msg {
                self.dispatch(visit).await;
            }
        }

        while let Some(joined) = self.in_flight.join_next().await {
            if let Err(e) = joined {
                warn!("Click recording task failed: {}", e);
            }
        }
    }
}

/// Handle to the recorder actor. Cheap to clone.
#[derive(Clone)]
pub struct ClickRecorder {
    sender: mpsc::Sender<RecorderMessage>,
}

impl ClickRecorder {
    /// Spawn the actor on the current runtime
    pub fn spawn(
        storage: Arc<dyn Storage>,
        geo: Arc<dyn GeoLocator>,
        settings: RecorderSettings,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(settings.queue_size.max(1));

        let actor = RecorderActor {
            receiver,
            storage,
            geo,
            settings,
            in_flight: JoinSet::new(),
        };

        tokio::spawn(async move {
            actor.run().await;
        });

        Self { sender }
    }

    /// Queue a visit without waiting. Drops the visit if the queue is full.
    pub fn record(&self, visit: Visit) {
        if let Err(e) = self.sender.try_send(RecorderMessage::Record(visit)) {
            match e {
                mpsc::error::TrySendError::Full(_) => {
                    warn!("Click queue full, dropping visit")
                }
                mpsc::error::TrySendError::Closed(_) => {
                    warn!("Click recorder is shut down, dropping visit")
                }
            }
        }
    }

    /// Wait until every queued and in-flight visit has been written
    pub async fn shutdown(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self
            .sender
            .send(RecorderMessage::Shutdown(ack_tx))
            .await
            .is_err()
        {
            return;
        }
        let _ = ack_rx.await;
        info!("Click recorder drained");
    }
}

/// Enrich one visit and append it to the ledger.
///
/// Lookup problems of any kind, including the deadline passing, leave the geo
/// fields empty. Append failures are logged and swallowed.
pub async fn record_visit(
    storage: &dyn Storage,
    geo: &dyn GeoLocator,
    settings: &RecorderSettings,
    visit: Visit,
) {
    let geo_record = match tokio::time::timeout(settings.geo_timeout, geo.locate(visit.client_ip))
        .await
    {
        Ok(Ok(record)) => record,
        Ok(Err(e)) => {
            debug!(short_code = %visit.code, provider = geo.name(), "Geolocation lookup failed: {}", e);
            GeoRecord::default()
        }
        Err(_) => {
            debug!(short_code = %visit.code, provider = geo.name(), "Geolocation lookup timed out");
            GeoRecord::default()
        }
    };

    let event = ClickEvent::from_visit(visit, geo_record);

    let result = with_timeout(settings.store_timeout, async {
        storage.append_click(&event).await.map_err(StorageError::from)
    })
    .await;

    if let Err(e) = result {
        warn!(short_code = %event.code, error = %e, "Failed to append click");
    }
}
