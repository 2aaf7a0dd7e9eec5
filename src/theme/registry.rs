use std::{collections::BTreeMap, sync::Arc};

use tokio::sync::Mutex;

use crate::{
    db::{keys, Database, StoreOp},
    error::{EngineError, Result, StoreError},
};

use super::models::{
    built_in_theme, default_theme, is_built_in, ThemeConfig, BUILT_IN_THEMES, DEFAULT_THEME,
};

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

struct ThemeState {
    custom: BTreeMap<String, ThemeConfig>,
    current: String,
}

impl ThemeState {
    fn resolve(&self, name: &str) -> Option<ThemeConfig> {
        built_in_theme(name).or_else(|| self.custom.get(name).cloned())
    }

    fn exists(&self, name: &str) -> bool {
        is_built_in(name) || self.custom.contains_key(name)
    }
}

/// Owns the `themes/` key-space: custom themes plus the current theme name.
#[derive(Clone)]
pub struct ThemeRegistry {
    db: Database,
    state: Arc<Mutex<ThemeState>>,
}

impl ThemeRegistry {
    pub async fn load(db: Database) -> std::result::Result<Self, StoreError> {
        let custom = db
            .list_records::<ThemeConfig>(keys::CUSTOM_THEMES)
            .await?
            .into_iter()
            .collect::<BTreeMap<_, _>>();

        let stored_current = match db.get_record::<String>(keys::CURRENT_THEME).await {
            Ok(found) => found,
            Err(StoreError::Corrupt { key, reason }) => {
                log_warn!("Ignoring unreadable {key}: {reason}");
                None
            }
            Err(err) => return Err(err),
        };

        let mut state = ThemeState {
            custom,
            current: DEFAULT_THEME.to_string(),
        };
        if let Some(name) = stored_current {
            if state.exists(&name) {
                state.current = name;
            } else {
                log_warn!("Stored theme {name} no longer exists; using {DEFAULT_THEME}");
            }
        }

        log_info!("Current theme loaded: {}", state.current);
        Ok(Self {
            db,
            state: Arc::new(Mutex::new(state)),
        })
    }

    /// Returns false, without failing, when `name` is unknown.
    pub async fn set_theme(&self, name: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        if !state.exists(name) {
            log_warn!("Theme not found: {name}");
            return Ok(false);
        }

        self.db
            .put_record(keys::CURRENT_THEME, &name.to_string())
            .await?;
        state.current = name.to_string();

        log_info!("Theme changed to: {name}");
        Ok(true)
    }

    /// Stores `config` under `name`, replacing any custom theme with that
    /// name. Built-in names are reserved.
    pub async fn create_theme(&self, name: &str, config: ThemeConfig) -> Result<ThemeConfig> {
        if name.trim().is_empty() {
            return Err(EngineError::MissingField("name"));
        }
        if is_built_in(name) {
            return Err(EngineError::ReservedName(name.to_string()));
        }

        let theme = ThemeConfig {
            name: name.to_string(),
            ..config
        };
        theme.validate()?;

        let mut state = self.state.lock().await;
        self.db
            .put_record(&keys::custom_theme(name), &theme)
            .await?;
        state.custom.insert(name.to_string(), theme.clone());

        log_info!("Custom theme created: {name}");
        Ok(theme)
    }

    /// Returns false for built-in or unknown names. Removing the current
    /// theme reverts the current name to `default` in the same commit.
    pub async fn remove_theme(&self, name: &str) -> Result<bool> {
        if is_built_in(name) {
            log_warn!("Cannot remove built-in theme: {name}");
            return Ok(false);
        }

        let mut state = self.state.lock().await;
        if !state.custom.contains_key(name) {
            return Ok(false);
        }

        let was_current = state.current == name;
        let mut ops = vec![StoreOp::delete(keys::custom_theme(name))];
        if was_current {
            ops.push(StoreOp::put_record(
                keys::CURRENT_THEME,
                &DEFAULT_THEME.to_string(),
            )?);
        }
        self.db.commit(ops).await?;

        state.custom.remove(name);
        if was_current {
            state.current = DEFAULT_THEME.to_string();
        }

        log_info!("Theme removed: {name}");
        Ok(true)
    }

    /// Never fails; an unresolvable current name yields `default`.
    pub async fn get_current_theme(&self) -> ThemeConfig {
        let state = self.state.lock().await;
        state
            .resolve(&state.current)
            .unwrap_or_else(default_theme)
    }

    pub async fn current_theme_name(&self) -> String {
        self.state.lock().await.current.clone()
    }

    pub async fn get_theme(&self, name: &str) -> Option<ThemeConfig> {
        self.state.lock().await.resolve(name)
    }

    /// Built-ins in their fixed order, then custom themes by name.
    pub async fn list_themes(&self) -> Vec<ThemeConfig> {
        let state = self.state.lock().await;
        BUILT_IN_THEMES
            .iter()
            .filter_map(|name| built_in_theme(name))
            .chain(state.custom.values().cloned())
            .collect()
    }
}
