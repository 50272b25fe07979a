//! Event Poller.
//!
//! One task per active hospital scans the feed for unprocessed records and
//! publishes a [`DetectionEvent`] for each. Publishing comes first and the
//! record is marked processed afterwards with a conditional update:
//!
//! - a failed publish leaves the record unprocessed for the next tick;
//! - a crash between publish and mark yields a duplicate event, which the
//!   triage consumer absorbs through its occurrence-exists guard.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_config::pipeline::PollerSettings;
use metrics::counter;
use serde::Serialize;
use stream_worker::{StreamError, StreamProducer};
use tokio::sync::watch;
use tokio::task::{self, AbortHandle, JoinError, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::TriageResult;
use crate::models::Hospital;
use crate::repository::{EligibleRecordRepository, HospitalDirectory};
use crate::streams::DetectionEvent;

/// Where detection events go; the stream producer in production.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DetectionPublisher: Send + Sync {
    /// Returns the stream entry id
    async fn publish(&self, event: &DetectionEvent) -> Result<String, StreamError>;
}

#[async_trait]
impl DetectionPublisher for StreamProducer {
    async fn publish(&self, event: &DetectionEvent) -> Result<String, StreamError> {
        self.send(event).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct PollerStatus {
    pub running: bool,
    pub last_processed_at: Option<DateTime<Utc>>,
    pub total_published: u64,
    pub errors: u64,
    pub started_at: Option<DateTime<Utc>>,
    /// Records marked processed since midnight UTC
    pub detected_today: u64,
}

#[derive(Default)]
struct PollerState {
    running: AtomicBool,
    total_published: AtomicU64,
    errors: AtomicU64,
    /// Unix micros, 0 when unset
    last_processed_at: AtomicI64,
    started_at: AtomicI64,
}

fn stamp(cell: &AtomicI64, at: DateTime<Utc>) {
    cell.store(at.timestamp_micros(), Ordering::Relaxed);
}

fn read_stamp(cell: &AtomicI64) -> Option<DateTime<Utc>> {
    match cell.load(Ordering::Relaxed) {
        0 => None,
        micros => DateTime::from_timestamp_micros(micros),
    }
}

/// Per-hospital polling tasks owned by [`Poller::run`]
#[derive(Default)]
struct PollingTasks {
    tasks: JoinSet<()>,
    by_task: HashMap<task::Id, Hospital>,
    by_hospital: HashMap<Uuid, AbortHandle>,
}

#[derive(Clone)]
pub struct Poller {
    records: Arc<dyn EligibleRecordRepository>,
    hospitals: Arc<dyn HospitalDirectory>,
    publisher: Arc<dyn DetectionPublisher>,
    settings: PollerSettings,
    state: Arc<PollerState>,
}

impl Poller {
    pub fn new(
        records: Arc<dyn EligibleRecordRepository>,
        hospitals: Arc<dyn HospitalDirectory>,
        publisher: Arc<dyn DetectionPublisher>,
        settings: PollerSettings,
    ) -> Self {
        Self {
            records,
            hospitals,
            publisher,
            settings,
            state: Arc::new(PollerState::default()),
        }
    }

    pub async fn status(&self) -> TriageResult<PollerStatus> {
        let midnight = Utc::now()
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|t| t.and_utc())
            .unwrap_or_else(Utc::now);
        let detected_today = self.records.processed_since(midnight).await?;

        Ok(PollerStatus {
            running: self.state.running.load(Ordering::Relaxed),
            last_processed_at: read_stamp(&self.state.last_processed_at),
            total_published: self.state.total_published.load(Ordering::Relaxed),
            errors: self.state.errors.load(Ordering::Relaxed),
            started_at: read_stamp(&self.state.started_at),
            detected_today,
        })
    }

    /// Supervise one polling task per active hospital until shutdown.
    ///
    /// The hospital list is reloaded every `hospital_refresh`: new hospitals
    /// get a task and deactivated ones have theirs aborted. A task that
    /// panics is restarted. On shutdown every task finishes the record it is
    /// on and the supervisor joins them all.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        self.state.running.store(true, Ordering::Relaxed);
        stamp(&self.state.started_at, Utc::now());
        info!(
            interval_ms = self.settings.interval.as_millis() as u64,
            refresh_ms = self.settings.hospital_refresh.as_millis() as u64,
            "Poller started"
        );

        let mut polling = PollingTasks::default();
        let mut refresh = tokio::time::interval(self.settings.hospital_refresh);
        refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !*shutdown.borrow() {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = refresh.tick() => self.reconcile(&mut polling, &shutdown).await,
                Some(joined) = polling.tasks.join_next_with_id(), if !polling.tasks.is_empty() => {
                    self.on_task_end(&mut polling, joined, &shutdown);
                }
            }
        }

        while polling.tasks.join_next().await.is_some() {}
        self.state.running.store(false, Ordering::Relaxed);
        info!("Poller stopped");
    }

    /// Align the running tasks with the active hospital list. A failed
    /// reload keeps the current tasks.
    async fn reconcile(&self, polling: &mut PollingTasks, shutdown: &watch::Receiver<bool>) {
        let hospitals = match self.hospitals.list_active().await {
            Ok(hospitals) => hospitals,
            Err(e) => {
                warn!(error = %e, "Failed to reload hospitals, keeping current tasks");
                self.record_error();
                return;
            }
        };

        let active: HashSet<Uuid> = hospitals.iter().map(|h| h.id).collect();
        polling.by_hospital.retain(|hospital_id, handle| {
            let keep = active.contains(hospital_id);
            if !keep {
                info!(hospital_id = %hospital_id, "Hospital deactivated, stopping its polling task");
                handle.abort();
            }
            keep
        });

        for hospital in hospitals {
            if !polling.by_hospital.contains_key(&hospital.id) {
                info!(hospital_id = %hospital.id, hospital = %hospital.name, "Polling hospital");
                self.spawn_poll(polling, hospital, shutdown);
            }
        }
    }

    fn on_task_end(
        &self,
        polling: &mut PollingTasks,
        joined: Result<(task::Id, ()), JoinError>,
        shutdown: &watch::Receiver<bool>,
    ) {
        let (id, crash) = match joined {
            Ok((id, ())) => (id, None),
            Err(e) => (e.id(), Some(e)),
        };
        let Some(hospital) = polling.by_task.remove(&id) else {
            return;
        };
        // Aborted on deactivation: the hospital entry is already gone
        let current = polling
            .by_hospital
            .get(&hospital.id)
            .is_some_and(|handle| handle.id() == id);
        if !current {
            return;
        }
        polling.by_hospital.remove(&hospital.id);

        match crash {
            Some(e) if !*shutdown.borrow() && !e.is_cancelled() => {
                error!(hospital_id = %hospital.id, error = %e, "Polling task crashed, restarting");
                self.record_error();
                self.spawn_poll(polling, hospital, shutdown);
            }
            // Ended on its own; the next reload starts it again if still active
            _ => {}
        }
    }

    fn spawn_poll(
        &self,
        polling: &mut PollingTasks,
        hospital: Hospital,
        shutdown: &watch::Receiver<bool>,
    ) {
        let handle = polling
            .tasks
            .spawn(self.clone().poll_loop(hospital.clone(), shutdown.clone()));
        polling.by_task.insert(handle.id(), hospital.clone());
        polling.by_hospital.insert(hospital.id, handle);
    }

    async fn poll_loop(self, hospital: Hospital, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.settings.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(hospital_id = %hospital.id, "Polling task started");

        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                _ = interval.tick() => {}
            }

            match tokio::time::timeout(self.settings.tick_timeout, self.poll_hospital(&hospital, &shutdown)).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    warn!(hospital_id = %hospital.id, error = %e, "Polling tick failed");
                    self.record_error();
                }
                Err(_) => {
                    warn!(
                        hospital_id = %hospital.id,
                        timeout_ms = self.settings.tick_timeout.as_millis() as u64,
                        "Polling tick timed out"
                    );
                    self.record_error();
                }
            }
        }
        debug!(hospital_id = %hospital.id, "Polling task stopped");
    }

    /// One tick for one hospital; returns how many events were published.
    pub async fn poll_hospital(
        &self,
        hospital: &Hospital,
        shutdown: &watch::Receiver<bool>,
    ) -> TriageResult<usize> {
        let lookback = chrono::Duration::from_std(self.settings.lookback)
            .unwrap_or_else(|_| chrono::Duration::hours(24));
        let since = Utc::now() - lookback;
        let records = self.records.unprocessed_for_hospital(hospital.id, since).await?;

        let mut published = 0;
        for record in records {
            if *shutdown.borrow() {
                break;
            }
            // Another poller may have taken it since the scan
            if !self.records.is_unprocessed(record.id).await? {
                continue;
            }

            let now = Utc::now();
            let event = DetectionEvent::for_record(&record, now);
            let stream_id = self.publisher.publish(&event).await?;

            self.state.total_published.fetch_add(1, Ordering::Relaxed);
            counter!("poller_records_published_total").increment(1);
            published += 1;

            if self.records.mark_processed(record.id, now).await? {
                stamp(&self.state.last_processed_at, now);
            } else {
                debug!(record_id = %record.id, "Record already marked by a concurrent poll");
            }

            info!(
                hospital_id = %hospital.id,
                tenant_id = %record.tenant_id,
                record_id = %record.id,
                stream_id = %stream_id,
                sector = record.sector.as_deref().unwrap_or("-"),
                "Death record detected"
            );
        }
        Ok(published)
    }

    fn record_error(&self) {
        self.state.errors.fetch_add(1, Ordering::Relaxed);
        counter!("poller_errors_total").increment(1);
    }
}
