//! Request/response surface for the platform bridge.
//!
//! Each operation takes its options struct and returns a small response
//! object. [`dispatch_json`] drives the same operations from one JSON string
//! so an FFI layer needs a single entry point.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{
    error::EngineError,
    geofence::GeofenceRegion,
    metrics::MetricsSnapshot,
    notification::{NotificationButton, NotificationState, NotificationUpdate},
    state::{AppState, StateChange, StateConfig},
    tasks::TaskResult,
    theme::ThemeConfig,
    Engine,
};

const ENABLE_LOGS: bool = true;

use crate::log_warn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandError {
    pub code: String,
    pub message: String,
}

impl From<EngineError> for CommandError {
    fn from(err: EngineError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

impl CommandError {
    fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            code: "INVALID_REQUEST".into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartOptions {
    pub notification_title: String,
    pub notification_subtitle: Option<String>,
    /// Defaults to on.
    pub enable_location: Option<bool>,
    pub sounds_enabled: Option<bool>,
    pub custom_layout: Option<String>,
    pub title_view_id: Option<String>,
    pub subtitle_view_id: Option<String>,
    pub timer_view_id: Option<String>,
    pub view_data: Option<BTreeMap<String, String>>,
    pub buttons: Option<Vec<NotificationButton>>,
}

impl From<StartOptions> for NotificationState {
    fn from(options: StartOptions) -> Self {
        Self {
            title: options.notification_title,
            subtitle: options.notification_subtitle,
            custom_layout: options.custom_layout,
            title_view_id: options.title_view_id,
            subtitle_view_id: options.subtitle_view_id,
            timer_view_id: options.timer_view_id,
            view_data: options.view_data.unwrap_or_default(),
            buttons: options.buttons.unwrap_or_default(),
            sounds_enabled: options.sounds_enabled.unwrap_or(false),
            location_enabled: options.enable_location.unwrap_or(true),
        }
    }
}

/// Every [`StartOptions`] field, all optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateOptions {
    pub notification_title: Option<String>,
    pub notification_subtitle: Option<String>,
    pub enable_location: Option<bool>,
    pub sounds_enabled: Option<bool>,
    pub custom_layout: Option<String>,
    pub title_view_id: Option<String>,
    pub subtitle_view_id: Option<String>,
    pub timer_view_id: Option<String>,
    pub view_data: Option<BTreeMap<String, String>>,
    pub buttons: Option<Vec<NotificationButton>>,
}

impl From<UpdateOptions> for NotificationUpdate {
    fn from(options: UpdateOptions) -> Self {
        Self {
            title: options.notification_title,
            subtitle: options.notification_subtitle,
            custom_layout: options.custom_layout,
            title_view_id: options.title_view_id,
            subtitle_view_id: options.subtitle_view_id,
            timer_view_id: options.timer_view_id,
            view_data: options.view_data,
            buttons: options.buttons,
            sounds_enabled: options.sounds_enabled,
            location_enabled: options.enable_location,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterTaskOptions {
    pub task_id: String,
    pub task_class: String,
    pub interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskIdOptions {
    pub task_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeofenceOptions {
    pub id: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Meters
    pub radius: f64,
    pub on_enter: Option<String>,
    pub on_exit: Option<String>,
    #[serde(default)]
    pub extras: BTreeMap<String, String>,
}

impl From<GeofenceOptions> for GeofenceRegion {
    fn from(options: GeofenceOptions) -> Self {
        Self {
            id: options.id,
            latitude: options.latitude,
            longitude: options.longitude,
            radius_meters: options.radius,
            on_enter_action: options.on_enter,
            on_exit_action: options.on_exit,
            extras: options.extras,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeofenceIdOptions {
    pub geofence_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThemeOptions {
    pub theme_name: String,
    /// Only read by `createTheme`.
    #[serde(default)]
    pub theme: Option<ThemeConfig>,
}

/// State names are parsed leniently; unknown names mean `custom`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionOptions {
    pub state: String,
    /// Shown instead of the state's configured content.
    #[serde(default)]
    pub config: Option<StateConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateOptions {
    pub state: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigureStateOptions {
    pub state: String,
    pub config: StateConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StartedResponse {
    pub started: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoppedResponse {
    pub stopped: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UpdatedResponse {
    pub updated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegisteredResponse {
    pub registered: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UnregisteredResponse {
    pub unregistered: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskResultResponse {
    pub result: Option<TaskResult>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AddedResponse {
    pub added: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RemovedResponse {
    pub removed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsResponse {
    pub metrics: MetricsSnapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResetResponse {
    pub reset: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThemeResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub theme_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionResponse {
    pub success: bool,
    pub from: AppState,
    pub to: AppState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentStateResponse {
    pub state: AppState,
    pub available_transitions: Vec<AppState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CanTransitionResponse {
    pub allowed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AvailableTransitionsResponse {
    pub transitions: Vec<AppState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConfiguredResponse {
    pub configured: bool,
}

pub async fn start(engine: &Engine, options: StartOptions) -> Result<StartedResponse, CommandError> {
    engine.notification().start(options.into()).await?;
    Ok(StartedResponse { started: true })
}

pub async fn stop(engine: &Engine) -> Result<StoppedResponse, CommandError> {
    engine.notification().stop().await?;
    Ok(StoppedResponse { stopped: true })
}

pub async fn update(engine: &Engine, options: UpdateOptions) -> Result<UpdatedResponse, CommandError> {
    engine.notification().update(options.into()).await?;
    Ok(UpdatedResponse { updated: true })
}

pub async fn register_task(
    engine: &Engine,
    options: RegisterTaskOptions,
) -> Result<RegisteredResponse, CommandError> {
    engine
        .tasks()
        .register_task(&options.task_id, &options.task_class, options.interval_ms)
        .await?;
    Ok(RegisteredResponse { registered: true })
}

pub async fn unregister_task(
    engine: &Engine,
    options: TaskIdOptions,
) -> Result<UnregisteredResponse, CommandError> {
    engine.tasks().unregister_task(&options.task_id).await?;
    Ok(UnregisteredResponse { unregistered: true })
}

pub async fn get_task_result(
    engine: &Engine,
    options: TaskIdOptions,
) -> Result<TaskResultResponse, CommandError> {
    Ok(TaskResultResponse {
        result: engine.tasks().get_task_result(&options.task_id).await,
    })
}

pub async fn add_geofence(
    engine: &Engine,
    options: GeofenceOptions,
) -> Result<AddedResponse, CommandError> {
    engine.geofences().add_geofence(options.into()).await?;
    Ok(AddedResponse { added: true })
}

pub async fn remove_geofence(
    engine: &Engine,
    options: GeofenceIdOptions,
) -> Result<RemovedResponse, CommandError> {
    engine.geofences().remove_geofence(&options.geofence_id).await?;
    Ok(RemovedResponse { removed: true })
}

pub async fn remove_all_geofences(engine: &Engine) -> Result<RemovedResponse, CommandError> {
    engine.geofences().remove_all_geofences().await?;
    Ok(RemovedResponse { removed: true })
}

pub async fn get_metrics(engine: &Engine) -> Result<MetricsResponse, CommandError> {
    Ok(MetricsResponse {
        metrics: engine.metrics().get_metrics().await,
    })
}

pub async fn reset_metrics(engine: &Engine) -> Result<ResetResponse, CommandError> {
    engine
        .metrics()
        .reset_metrics()
        .await
        .map_err(EngineError::from)?;
    Ok(ResetResponse { reset: true })
}

pub async fn set_theme(engine: &Engine, options: ThemeOptions) -> Result<ThemeResponse, CommandError> {
    let success = engine.themes().set_theme(&options.theme_name).await?;
    Ok(ThemeResponse {
        success,
        theme_name: success.then_some(options.theme_name),
    })
}

pub async fn create_theme(
    engine: &Engine,
    options: ThemeOptions,
) -> Result<ThemeResponse, CommandError> {
    let config = options
        .theme
        .ok_or_else(|| CommandError::from(EngineError::MissingField("theme")))?;
    engine
        .themes()
        .create_theme(&options.theme_name, config)
        .await?;
    Ok(ThemeResponse {
        success: true,
        theme_name: None,
    })
}

pub async fn get_current_theme(engine: &Engine) -> Result<ThemeConfig, CommandError> {
    Ok(engine.themes().get_current_theme().await)
}

pub async fn remove_theme(
    engine: &Engine,
    options: ThemeOptions,
) -> Result<ThemeResponse, CommandError> {
    let success = engine.themes().remove_theme(&options.theme_name).await?;
    Ok(ThemeResponse {
        success,
        theme_name: None,
    })
}

pub async fn transition_to(
    engine: &Engine,
    options: TransitionOptions,
) -> Result<TransitionResponse, CommandError> {
    let target = AppState::parse(&options.state);
    let response = match engine.app_state().transition_to(target, options.config).await? {
        StateChange::Unchanged(state) => TransitionResponse {
            success: true,
            from: state,
            to: state,
            reason: None,
        },
        StateChange::Applied { from, to } => TransitionResponse {
            success: true,
            from,
            to,
            reason: None,
        },
        StateChange::Denied { from, to, reason } => TransitionResponse {
            success: false,
            from,
            to,
            reason: Some(reason),
        },
    };
    Ok(response)
}

pub async fn get_current_state(engine: &Engine) -> Result<CurrentStateResponse, CommandError> {
    let machine = engine.app_state();
    Ok(CurrentStateResponse {
        state: machine.current_state().await,
        available_transitions: machine.available_transitions().await,
    })
}

pub async fn can_transition_to(
    engine: &Engine,
    options: StateOptions,
) -> Result<CanTransitionResponse, CommandError> {
    Ok(CanTransitionResponse {
        allowed: engine
            .app_state()
            .can_transition_to(AppState::parse(&options.state))
            .await,
    })
}

pub async fn get_available_transitions(
    engine: &Engine,
) -> Result<AvailableTransitionsResponse, CommandError> {
    Ok(AvailableTransitionsResponse {
        transitions: engine.app_state().available_transitions().await,
    })
}

pub async fn configure_state(
    engine: &Engine,
    options: ConfigureStateOptions,
) -> Result<ConfiguredResponse, CommandError> {
    engine
        .app_state()
        .configure_state(AppState::parse(&options.state), options.config)
        .await?;
    Ok(ConfiguredResponse { configured: true })
}

pub async fn reset_state(engine: &Engine) -> Result<ResetResponse, CommandError> {
    engine.app_state().reset().await?;
    Ok(ResetResponse { reset: true })
}

/// One bridge call: `{"method": "...", "options": {...}}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "method", content = "options", rename_all = "camelCase")]
pub enum Command {
    Start(StartOptions),
    Stop,
    Update(UpdateOptions),
    RegisterTask(RegisterTaskOptions),
    UnregisterTask(TaskIdOptions),
    GetTaskResult(TaskIdOptions),
    AddGeofence(GeofenceOptions),
    RemoveGeofence(GeofenceIdOptions),
    RemoveAllGeofences,
    GetMetrics,
    ResetMetrics,
    SetTheme(ThemeOptions),
    CreateTheme(ThemeOptions),
    GetCurrentTheme,
    RemoveTheme(ThemeOptions),
    TransitionTo(TransitionOptions),
    GetCurrentState,
    CanTransitionTo(StateOptions),
    GetAvailableTransitions,
    ConfigureState(ConfigureStateOptions),
    ResetState,
}

fn to_value<T: Serialize>(response: T) -> Result<Value, CommandError> {
    serde_json::to_value(response)
        .map_err(|err| CommandError::invalid_request(format!("unserializable response: {err}")))
}

pub async fn dispatch(engine: &Engine, command: Command) -> Result<Value, CommandError> {
    match command {
        Command::Start(options) => to_value(start(engine, options).await?),
        Command::Stop => to_value(stop(engine).await?),
        Command::Update(options) => to_value(update(engine, options).await?),
        Command::RegisterTask(options) => to_value(register_task(engine, options).await?),
        Command::UnregisterTask(options) => to_value(unregister_task(engine, options).await?),
        Command::GetTaskResult(options) => to_value(get_task_result(engine, options).await?),
        Command::AddGeofence(options) => to_value(add_geofence(engine, options).await?),
        Command::RemoveGeofence(options) => to_value(remove_geofence(engine, options).await?),
        Command::RemoveAllGeofences => to_value(remove_all_geofences(engine).await?),
        Command::GetMetrics => to_value(get_metrics(engine).await?),
        Command::ResetMetrics => to_value(reset_metrics(engine).await?),
        Command::SetTheme(options) => to_value(set_theme(engine, options).await?),
        Command::CreateTheme(options) => to_value(create_theme(engine, options).await?),
        Command::GetCurrentTheme => to_value(get_current_theme(engine).await?),
        Command::RemoveTheme(options) => to_value(remove_theme(engine, options).await?),
        Command::TransitionTo(options) => to_value(transition_to(engine, options).await?),
        Command::GetCurrentState => to_value(get_current_state(engine).await?),
        Command::CanTransitionTo(options) => to_value(can_transition_to(engine, options).await?),
        Command::GetAvailableTransitions => to_value(get_available_transitions(engine).await?),
        Command::ConfigureState(options) => to_value(configure_state(engine, options).await?),
        Command::ResetState => to_value(reset_state(engine).await?),
    }
}

/// Parses `request`, runs it and answers `{"ok": true, "data": ...}` or
/// `{"ok": false, "error": {"code": ..., "message": ...}}`.
pub async fn dispatch_json(engine: &Engine, request: &str) -> String {
    let outcome = match serde_json::from_str::<Command>(request) {
        Ok(command) => dispatch(engine, command).await,
        Err(err) => Err(CommandError::invalid_request(err.to_string())),
    };

    let response = match outcome {
        Ok(data) => json!({ "ok": true, "data": data }),
        Err(error) => {
            log_warn!("Command failed [{}]: {}", error.code, error.message);
            json!({ "ok": false, "error": error })
        }
    };
    response.to_string()
}
