use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use tokio::{
    sync::Mutex,
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    db::now_ms,
    events::{EngineEvent, EventDispatcher, HeartbeatEvent},
};

use super::state::{format_elapsed, PersistedNotification};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

/// Ticks quietly logged between two "alive" lines outside debug mode.
const QUIET_TICKS: u64 = 60;

/// Owns the background task that emits heartbeat events while the service is
/// active.
#[derive(Default)]
pub(crate) struct HeartbeatTicker {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl HeartbeatTicker {
    /// False once the loop has exited, including when it noticed on its own
    /// that the service went inactive.
    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Restarts the loop if it is already running.
    pub async fn start(
        &mut self,
        record: Arc<Mutex<PersistedNotification>>,
        events: EventDispatcher,
        tick_interval: Duration,
        debug: bool,
    ) -> Result<()> {
        self.stop().await?;

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(heartbeat_loop(
            record,
            events,
            tick_interval,
            debug,
            cancel_token.clone(),
        ));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("heartbeat loop task failed to join")
                .map(|_| ())
        } else {
            Ok(())
        }
    }
}

async fn heartbeat_loop(
    record: Arc<Mutex<PersistedNotification>>,
    events: EventDispatcher,
    tick_interval: Duration,
    debug: bool,
    cancel_token: CancellationToken,
) {
    let mut interval = time::interval(tick_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut tick: u64 = 0;

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => break,
            _ = interval.tick() => {}
        }

        let (started_at, timer_view_id) = {
            let guard = record.lock().await;
            if !guard.active {
                break;
            }
            (guard.started_at_ms, guard.state.timer_view_id.clone())
        };

        tick += 1;
        let elapsed_ms = started_at
            .map(|started_at| u64::try_from(now_ms().saturating_sub(started_at)).unwrap_or(0))
            .unwrap_or(0);
        let clock = format_elapsed(elapsed_ms);

        if debug || tick % QUIET_TICKS == 1 {
            log_info!("Alive #{tick} • {clock}");
        }

        events.dispatch(&EngineEvent::Heartbeat(HeartbeatEvent {
            tick,
            elapsed_ms,
            clock,
            timer_view_id,
        }));
    }

    log_debug!("Heartbeat loop exited after {tick} ticks");
}
