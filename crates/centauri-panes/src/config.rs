//! User configuration file (`~/.centauri.config.json`).

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::session::ExitPolicy;

pub const CONFIG_FILE_NAME: &str = ".centauri.config.json";

const DEFAULT_KEYMAPS: [(&str, &str); 9] = [
    ("edit:copy", "ctrl+shift+c"),
    ("edit:paste", "ctrl+shift+v"),
    ("edit:select_all", "ctrl+shift+a"),
    ("edit:interrupt", "ctrl+c"),
    ("window:new_tab", "ctrl+shift+t"),
    ("window:next_tab", "ctrl+shift+ArrowRight"),
    ("window:prev_tab", "ctrl+shift+ArrowLeft"),
    ("window:split_right", "ctrl+shift+d"),
    ("window:split_down", "ctrl+shift+e"),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ShellConfig {
    /// Shell to launch. Empty means the platform default.
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub bell: bool,
    /// Exit codes treated as a clean exit after we asked the session to end.
    pub kill_exit_codes: Vec<u32>,
}

impl ShellConfig {
    pub fn exit_policy(&self) -> ExitPolicy {
        ExitPolicy::new(self.kill_exit_codes.clone())
    }
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            program: String::new(),
            args: Vec::new(),
            env: BTreeMap::new(),
            bell: true,
            kill_exit_codes: default_kill_exit_codes(),
        }
    }
}

fn default_kill_exit_codes() -> Vec<u32> {
    ExitPolicy::default().kill_exit_codes().to_vec()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserConfig {
    #[serde(default)]
    pub shell: ShellConfig,
    /// Command name to key combo, e.g. `window:split_right` -> `ctrl+shift+d`.
    #[serde(default)]
    pub keymaps: BTreeMap<String, String>,
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            shell: ShellConfig::default(),
            keymaps: default_keymaps(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyCommandMap {
    pub command_name: String,
    pub key_combo: String,
}

impl UserConfig {
    /// Keymaps as a list, sorted by command name.
    pub fn keymap_list(&self) -> Vec<KeyCommandMap> {
        self.keymaps
            .iter()
            .map(|(command_name, key_combo)| KeyCommandMap {
                command_name: command_name.clone(),
                key_combo: key_combo.clone(),
            })
            .collect()
    }

    /// Command bound to `combo`. User bindings win; the built-in bindings
    /// cover anything the user left out.
    pub fn command_for_key(&self, combo: &str) -> Option<String> {
        let wanted = KeyCombo::parse(combo);
        let find = |keymaps: &BTreeMap<String, String>| {
            keymaps
                .iter()
                .find(|(_, bound)| KeyCombo::parse(bound) == wanted)
                .map(|(command, _)| command.clone())
        };
        find(&self.keymaps).or_else(|| find(&default_keymaps()))
    }
}

/// Bytes sent to the shell for commands that stand in for a control key.
pub fn control_sequence(command_name: &str) -> Option<&'static [u8]> {
    match command_name {
        "edit:interrupt" => Some(b"\x03".as_slice()),
        "edit:select_all" => Some(b"\x01".as_slice()),
        _ => None,
    }
}

#[derive(Debug, PartialEq, Eq)]
struct KeyCombo {
    ctrl: bool,
    alt: bool,
    shift: bool,
    meta: bool,
    key: String,
}

impl KeyCombo {
    /// `ctrl+shift+d`: modifiers in any order, the last token is the key.
    fn parse(combo: &str) -> Self {
        let mut tokens: Vec<&str> = combo.split('+').map(str::trim).collect();
        let key = tokens.pop().unwrap_or_default().to_lowercase();
        let has = |name: &str| tokens.iter().any(|token| token.eq_ignore_ascii_case(name));
        Self {
            ctrl: has("ctrl"),
            alt: has("alt"),
            shift: has("shift"),
            meta: has("meta"),
            key,
        }
    }
}

fn default_keymaps() -> BTreeMap<String, String> {
    DEFAULT_KEYMAPS
        .iter()
        .map(|(command, combo)| (command.to_string(), combo.to_string()))
        .collect()
}

/// `~/.centauri.config.json`, or a relative path when there is no home directory.
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(CONFIG_FILE_NAME))
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME))
}

/// Load the configuration at `path`. A missing file yields the defaults,
/// which are written out first when `save_default` is set.
pub fn load_user_config(path: &Path, save_default: bool) -> Result<UserConfig, ConfigError> {
    if !path.exists() {
        log::info!(
            "Configuration file not found at {}, using defaults",
            path.display()
        );
        let config = UserConfig::default();
        if save_default {
            save_user_config(path, &config)?;
        }
        return Ok(config);
    }

    let json = fs::read_to_string(path).map_err(|e| ConfigError::Read(e.to_string()))?;
    let config = serde_json::from_str(&json).map_err(|e| ConfigError::Parse(e.to_string()))?;
    log::debug!("Loaded configuration from {}", path.display());
    Ok(config)
}

pub fn save_user_config(path: &Path, config: &UserConfig) -> Result<(), ConfigError> {
    let json =
        serde_json::to_string_pretty(config).map_err(|e| ConfigError::Write(e.to_string()))?;
    fs::write(path, json).map_err(|e| ConfigError::Write(e.to_string()))
}
