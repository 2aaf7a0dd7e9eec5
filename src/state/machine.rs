use std::{collections::BTreeMap, sync::Arc};

use tokio::sync::Mutex;

use crate::{
    db::{keys, Database},
    error::{Result, StoreError},
    events::{EngineEvent, EventDispatcher, StateTransitionEvent},
    notification::NotificationController,
};

use super::models::{default_configs, AppState, StateConfig, TransitionTable};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

/// What a [`StateMachine::transition_to`] call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateChange {
    /// Already in the requested state.
    Unchanged(AppState),
    Applied { from: AppState, to: AppState },
    /// Rejected by the transition table; nothing changed.
    Denied {
        from: AppState,
        to: AppState,
        reason: String,
    },
}

impl StateChange {
    pub fn succeeded(&self) -> bool {
        !matches!(self, StateChange::Denied { .. })
    }
}

struct MachineState {
    current: AppState,
    table: TransitionTable,
    configs: BTreeMap<AppState, StateConfig>,
}

/// Owns the `state/` key-space and drives the notification from the
/// app-state lifecycle.
///
/// Lock order is machine, then notification record, then metrics. The
/// machine lock is held while the notification is updated so transitions
/// are applied one at a time.
#[derive(Clone)]
pub struct StateMachine {
    db: Database,
    notification: NotificationController,
    events: EventDispatcher,
    inner: Arc<Mutex<MachineState>>,
}

impl StateMachine {
    pub async fn load(
        db: Database,
        notification: NotificationController,
        events: EventDispatcher,
    ) -> std::result::Result<Self, StoreError> {
        let current = match db.get_record::<AppState>(keys::APP_STATE).await {
            Ok(found) => found.unwrap_or(AppState::Offline),
            Err(StoreError::Corrupt { key, reason }) => {
                log_warn!("Discarding unreadable {key}: {reason}");
                AppState::Offline
            }
            Err(err) => return Err(err),
        };

        let mut configs = default_configs();
        for (name, config) in db
            .list_records::<StateConfig>(keys::STATE_CONFIGS)
            .await?
        {
            configs.insert(AppState::parse(&name), config);
        }

        log_debug!("App state loaded: {}", current.as_str());

        Ok(Self {
            db,
            notification,
            events,
            inner: Arc::new(Mutex::new(MachineState {
                current,
                table: TransitionTable::default(),
                configs,
            })),
        })
    }

    pub async fn current_state(&self) -> AppState {
        self.inner.lock().await.current
    }

    pub async fn can_transition_to(&self, target: AppState) -> bool {
        let inner = self.inner.lock().await;
        inner.table.is_allowed(inner.current, target)
    }

    pub async fn available_transitions(&self) -> Vec<AppState> {
        let inner = self.inner.lock().await;
        inner.table.allowed_from(inner.current)
    }

    pub async fn state_config(&self, state: AppState) -> Option<StateConfig> {
        self.inner.lock().await.configs.get(&state).cloned()
    }

    /// Replaces the notification content used for `state`.
    pub async fn configure_state(&self, state: AppState, config: StateConfig) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.db
            .put_record(&keys::state_config(state.as_str()), &config)
            .await?;
        inner.configs.insert(state, config);
        log_info!("State configured: {}", state.as_str());
        Ok(())
    }

    /// Swaps the rules for later transitions. Not persisted.
    pub async fn set_transition_table(&self, table: TransitionTable) {
        self.inner.lock().await.table = table;
    }

    /// Moves to `target` when the table allows it and shows that state's
    /// notification content, or `data` when given.
    pub async fn transition_to(
        &self,
        target: AppState,
        data: Option<StateConfig>,
    ) -> Result<StateChange> {
        let mut inner = self.inner.lock().await;
        let from = inner.current;

        if from == target {
            log_debug!("Already in state {}", target.as_str());
            return Ok(StateChange::Unchanged(target));
        }

        if !inner.table.is_allowed(from, target) {
            drop(inner);
            let reason = format!(
                "transition not allowed: {} -> {}",
                from.as_str(),
                target.as_str()
            );
            log_warn!("State change denied: {reason}");
            self.report(from, target, false, Some(reason.clone()));
            return Ok(StateChange::Denied {
                from,
                to: target,
                reason,
            });
        }

        let config = data.or_else(|| inner.configs.get(&target).cloned());
        self.enter(&mut inner, target, config).await?;
        drop(inner);

        self.report(from, target, true, None);
        Ok(StateChange::Applied { from, to: target })
    }

    /// Moves to `target` without consulting the table.
    pub async fn force_transition(&self, target: AppState) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let from = inner.current;
        let config = inner.configs.get(&target).cloned();
        self.enter(&mut inner, target, config).await?;
        drop(inner);

        log_warn!("Forced state change: {} -> {}", from.as_str(), target.as_str());
        self.report(from, target, true, None);
        Ok(())
    }

    /// Forces the machine back to `offline`, stopping the service.
    pub async fn reset(&self) -> Result<()> {
        self.force_transition(AppState::Offline).await
    }

    /// Persists `target`, then applies its notification content. A failed
    /// apply puts the previous state back.
    async fn enter(
        &self,
        inner: &mut MachineState,
        target: AppState,
        config: Option<StateConfig>,
    ) -> Result<()> {
        let from = inner.current;
        self.db.put_record(keys::APP_STATE, &target).await?;

        if let Err(err) = self.apply(target, config.as_ref()).await {
            log_error!(
                "Could not apply state {}: {err}; staying in {}",
                target.as_str(),
                from.as_str()
            );
            if let Err(rollback) = self.db.put_record(keys::APP_STATE, &from).await {
                log_error!("Could not restore state {}: {rollback}", from.as_str());
            }
            return Err(err);
        }

        inner.current = target;
        log_info!("State transition: {} -> {}", from.as_str(), target.as_str());
        Ok(())
    }

    async fn apply(&self, target: AppState, config: Option<&StateConfig>) -> Result<()> {
        if target == AppState::Offline {
            return self.notification.stop().await;
        }

        let Some(config) = config else {
            log_warn!("No notification content for state {}", target.as_str());
            return Ok(());
        };

        if self.notification.is_active().await {
            self.notification.update(config.to_update()).await?;
        } else {
            self.notification.start(config.to_state(target)).await?;
        }
        Ok(())
    }

    fn report(&self, from: AppState, to: AppState, accepted: bool, reason: Option<String>) {
        self.events
            .dispatch(&EngineEvent::StateTransition(StateTransitionEvent {
                from,
                to,
                accepted,
                reason,
            }));
    }
}
