use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// One item being collected toward a target quantity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedItem {
    pub id: u64,
    pub name: String,
    pub current: u64,
    pub target: u64,
    #[serde(default)]
    pub profession: Option<String>,
}

/// Emitted once per matched pickup; `goal_reached` fires only on the
/// transition across the target, never again while the item stays full.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PickupEvent {
    pub item: String,
    pub qty: u64,
    pub goal_reached: bool,
}

fn pickup_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // "picked up 92x Item Name" with the localized verb variants,
    // tolerating trailing dots and spaces.
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)(?:picked up|ramassé|obtenu|recogido|obtenido|apanhou|obteve) (\d+)x\s+([^.]+)",
        )
        .unwrap()
    })
}

/// Extract quantity and raw item name from a pickup line. Non-breaking
/// spaces in item names are normalized away.
pub fn match_pickup(line: &str) -> Option<(u64, String)> {
    let caps = pickup_regex().captures(line)?;
    let qty: u64 = caps[1].parse().ok()?;
    let name = caps[2].replace('\u{A0}', " ").trim().to_string();
    if name.is_empty() {
        return None;
    }
    Some((qty, name))
}

/// Tracked items plus a dirty flag the session uses to batch persistence.
#[derive(Debug, Default)]
pub struct TrackerState {
    pub items: Vec<TrackedItem>,
    pub dirty: bool,
    next_id: u64,
}

impl TrackerState {
    /// Apply one pickup line against every tracked item. Matching is
    /// exact, case-insensitive, whitespace-trimmed equality.
    pub fn apply_line(&mut self, line: &str) -> Vec<PickupEvent> {
        let Some((qty, raw_name)) = match_pickup(line) else {
            return Vec::new();
        };
        let needle = raw_name.to_lowercase();

        let mut events = Vec::new();
        for item in &mut self.items {
            if item.name.trim().to_lowercase() != needle {
                continue;
            }
            let was_complete = item.current >= item.target;
            item.current += qty;
            self.dirty = true;
            events.push(PickupEvent {
                item: item.name.clone(),
                qty,
                goal_reached: !was_complete && item.current >= item.target,
            });
        }
        events
    }

    pub fn add_item(&mut self, name: &str, target: u64, profession: Option<String>) -> TrackedItem {
        let id = self
            .next_id
            .max(self.items.iter().map(|i| i.id + 1).max().unwrap_or(0));
        self.next_id = id + 1;
        let item = TrackedItem {
            id,
            name: name.trim().to_string(),
            current: 0,
            target,
            profession,
        };
        self.items.push(item.clone());
        self.dirty = true;
        item
    }

    pub fn remove_item(&mut self, id: u64) -> bool {
        let before = self.items.len();
        self.items.retain(|item| item.id != id);
        let removed = self.items.len() != before;
        if removed {
            self.dirty = true;
        }
        removed
    }

    pub fn set_progress(&mut self, id: u64, current: u64, target: u64) -> bool {
        match self.items.iter_mut().find(|item| item.id == id) {
            Some(item) => {
                item.current = current;
                item.target = target;
                self.dirty = true;
                true
            }
            None => false,
        }
    }
}
