use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::models::{FightHistory, Side};
use crate::tracker::TrackedItem;

const HISTORY_FILE: &str = "fight_history.json";
const OVERRIDES_FILE: &str = "overrides.json";
const ITEMS_FILE: &str = "tracked_items.json";

fn read_or_default<T: serde::de::DeserializeOwned + Default>(path: &Path) -> T {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) => {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %err, "state file unreadable, starting fresh");
            }
            return T::default();
        }
    };
    match serde_json::from_str(&text) {
        Ok(value) => value,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "state file corrupt, starting fresh");
            T::default()
        }
    }
}

fn write_json<T: serde::Serialize>(path: &PathBuf, value: &T) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
    }
    let text = serde_json::to_string(value).map_err(|e| e.to_string())?;
    std::fs::write(path, text).map_err(|e| e.to_string())
}

pub fn load_history(dir: &Path) -> FightHistory {
    read_or_default(&dir.join(HISTORY_FILE))
}

pub fn save_history(dir: &Path, history: &FightHistory) -> Result<(), String> {
    write_json(&dir.join(HISTORY_FILE), history)
}

pub fn load_overrides(dir: &Path) -> HashMap<String, Side> {
    read_or_default(&dir.join(OVERRIDES_FILE))
}

pub fn save_overrides(dir: &Path, overrides: &HashMap<String, Side>) -> Result<(), String> {
    write_json(&dir.join(OVERRIDES_FILE), overrides)
}

pub fn load_items(dir: &Path) -> Vec<TrackedItem> {
    read_or_default(&dir.join(ITEMS_FILE))
}

pub fn save_items(dir: &Path, items: &[TrackedItem]) -> Result<(), String> {
    write_json(&dir.join(ITEMS_FILE), &items)
}
