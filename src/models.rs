use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

/// Sentinel caster used before any cast has been seen.
pub const UNKNOWN_CASTER: &str = "Unknown";
/// Sentinel spell used before any cast has been seen.
pub const UNKNOWN_SPELL: &str = "Unknown Spell";
/// Sentinel spell after a turn boundary: procs and poisons tick without a cast.
pub const PASSIVE_SPELL: &str = "Passive / Indirect";
/// Synthetic entity that owns hardcoded dungeon mechanics.
pub const MECHANIC_ENTITY: &str = "Dungeon Mechanic";
/// Spell label for re-attributed boss self-heals with no better name.
pub const MECHANIC_SPELL: &str = "Mechanic / Passive";

/// Maximum number of fight snapshots retained in history.
pub const MAX_FIGHT_HISTORY: usize = 5;

/// Damage element attached to a combat event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Element {
    Fire,
    Water,
    Earth,
    Air,
    Stasis,
    Light,
    Neutral,
}

impl Element {
    pub fn as_str(self) -> &'static str {
        match self {
            Element::Fire => "Fire",
            Element::Water => "Water",
            Element::Earth => "Earth",
            Element::Air => "Air",
            Element::Stasis => "Stasis",
            Element::Light => "Light",
            Element::Neutral => "Neutral",
        }
    }

    /// Normalize a parenthetical annotation to an element, across the four
    /// log languages. Anything else is not an element.
    pub fn normalize(raw: &str) -> Option<Element> {
        let low = raw.trim().to_lowercase();
        match low.as_str() {
            "fire" | "feu" | "fuego" | "fogo" => Some(Element::Fire),
            "water" | "eau" | "agua" | "água" => Some(Element::Water),
            "earth" | "terre" | "tierra" | "terra" => Some(Element::Earth),
            "air" | "aire" | "ar" => Some(Element::Air),
            "stasis" | "stase" | "estasis" | "estase" => Some(Element::Stasis),
            "light" | "lumière" | "luz" => Some(Element::Light),
            "neutral" | "neutre" | "neutro" => Some(Element::Neutral),
            _ => None,
        }
    }
}

/// Accumulated amount for one (spell, element) pair of one entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpellEntry {
    pub val: u64,
    pub element: Element,
    pub real_name: String,
}

/// One attributed entity in one aggregate table. Created lazily on the
/// first event, never removed except by summon merge or full reset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombatEntity {
    pub name: String,
    pub total: u64,
    /// Keyed by `"<spell>|<element>"` so snapshots serialize as plain maps.
    pub spells: HashMap<String, SpellEntry>,
}

impl CombatEntity {
    fn new(name: &str) -> Self {
        CombatEntity {
            name: name.to_string(),
            total: 0,
            spells: HashMap::new(),
        }
    }
}

fn spell_key(spell: &str, element: Element) -> String {
    format!("{}|{}", spell, element.as_str())
}

/// One of the three aggregate tables (damage, healing, armor).
pub type AggregateTable = HashMap<String, CombatEntity>;

fn add_to_table(table: &mut AggregateTable, caster: &str, spell: &str, element: Element, amount: u64) {
    let entity = table
        .entry(caster.to_string())
        .or_insert_with(|| CombatEntity::new(caster));
    entity.total += amount;
    let entry = entity
        .spells
        .entry(spell_key(spell, element))
        .or_insert_with(|| SpellEntry {
            val: 0,
            element,
            real_name: spell.to_string(),
        });
    entry.val += amount;
}

fn merge_summon_in_table(table: &mut AggregateTable, summon: &str, master: &str) {
    let Some(summon_entity) = table.remove(summon) else {
        return;
    };
    let master_entity = table
        .entry(master.to_string())
        .or_insert_with(|| CombatEntity::new(master));
    master_entity.total += summon_entity.total;

    // Re-key the summon's spells under the master, tagged with the summon
    // name so the origin stays visible in the breakdown.
    for entry in summon_entity.spells.into_values() {
        let merged_name = format!("{} ({})", entry.real_name, summon);
        let merged = master_entity
            .spells
            .entry(spell_key(&merged_name, entry.element))
            .or_insert_with(|| SpellEntry {
                val: 0,
                element: entry.element,
                real_name: merged_name,
            });
        merged.val += entry.val;
    }
}

/// Which table an action routes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeterKind {
    Damage,
    Healing,
    Armor,
}

/// The three live aggregate tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregateStore {
    pub damage: AggregateTable,
    pub healing: AggregateTable,
    pub armor: AggregateTable,
}

impl AggregateStore {
    pub fn add(&mut self, kind: MeterKind, caster: &str, spell: &str, element: Element, amount: u64) {
        let table = match kind {
            MeterKind::Damage => &mut self.damage,
            MeterKind::Healing => &mut self.healing,
            MeterKind::Armor => &mut self.armor,
        };
        add_to_table(table, caster, spell, element, amount);
    }

    /// Fold an already-accumulated summon into its master across all three
    /// tables. Called once when a binding is declared; later events merge
    /// at ingest instead.
    pub fn merge_summon(&mut self, summon: &str, master: &str) {
        for table in [&mut self.damage, &mut self.healing, &mut self.armor] {
            merge_summon_in_table(table, summon, master);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.damage.is_empty() && self.healing.is_empty() && self.armor.is_empty()
    }

    pub fn clear(&mut self) {
        self.damage.clear();
        self.healing.clear();
        self.armor.clear();
    }
}

/// Line-by-line parser state. The caster/spell pair reflects the most
/// recent cast; a turn boundary resets only the spell (the caster is kept
/// so late passive procs still land on the last active caster).
#[derive(Debug, Clone)]
pub struct ParserState {
    pub current_caster: String,
    pub current_spell: String,
    pub awaiting_new_fight: bool,
}

impl Default for ParserState {
    fn default() -> Self {
        ParserState {
            current_caster: UNKNOWN_CASTER.to_string(),
            current_spell: UNKNOWN_SPELL.to_string(),
            awaiting_new_fight: false,
        }
    }
}

impl ParserState {
    pub fn reset(&mut self) {
        self.current_caster = UNKNOWN_CASTER.to_string();
        self.current_spell = UNKNOWN_SPELL.to_string();
        self.awaiting_new_fight = false;
    }

    pub fn has_caster(&self) -> bool {
        self.current_caster != UNKNOWN_CASTER
    }
}

/// Manual ally/enemy assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Ally,
    Enemy,
}

/// Everything the ally/enemy classifier and the attribution engine know
/// about the entities seen so far. Mutated in place by the engine and by
/// API commands; deep-copied into fight snapshots.
#[derive(Debug, Clone, Default)]
pub struct ClassificationContext {
    player_classes: HashMap<String, String>,
    /// Names in first-detection order; the explicit contract behind
    /// "first player found with a given class".
    detection_order: Vec<String>,
    pub manual_overrides: HashMap<String, Side>,
    pub summon_bindings: HashMap<String, String>,
    /// Names whose cached rendering artifacts should be rebuilt; drained
    /// by the rendering collaborator.
    pub icon_invalidations: Vec<String>,
}

impl ClassificationContext {
    pub fn class_of(&self, name: &str) -> Option<&str> {
        self.player_classes.get(name).map(String::as_str)
    }

    pub fn classes(&self) -> &HashMap<String, String> {
        &self.player_classes
    }

    /// Record a detected class, invalidating the icon cache on change.
    pub fn set_class(&mut self, name: &str, class_id: &str) {
        match self.player_classes.get(name) {
            Some(existing) if existing == class_id => {}
            _ => {
                if !self.player_classes.contains_key(name) {
                    self.detection_order.push(name.to_string());
                }
                self.player_classes.insert(name.to_string(), class_id.to_string());
                self.icon_invalidations.push(name.to_string());
            }
        }
    }

    /// First player detected with the given class, in detection order.
    pub fn first_player_of_class(&self, class_id: &str) -> Option<&str> {
        self.detection_order
            .iter()
            .find(|name| self.player_classes.get(*name).is_some_and(|c| c == class_id))
            .map(String::as_str)
    }

    /// Declare a summon→master binding. Bindings must stay acyclic; a
    /// request that would make `summon` its own transitive master is
    /// rejected and nothing is recorded.
    pub fn bind_summon(&mut self, summon: &str, master: &str) -> Result<(), String> {
        if summon == master {
            return Err(format!("cannot bind {} to itself", summon));
        }
        let mut cursor = master;
        while let Some(next) = self.summon_bindings.get(cursor) {
            if next == summon {
                return Err(format!(
                    "binding {} -> {} would create a cycle",
                    summon, master
                ));
            }
            cursor = next;
        }
        self.summon_bindings
            .insert(summon.to_string(), master.to_string());
        Ok(())
    }

    pub fn master_of(&self, name: &str) -> Option<&str> {
        self.summon_bindings.get(name).map(String::as_str)
    }

    pub fn reset_live(&mut self) {
        self.player_classes.clear();
        self.detection_order.clear();
        self.summon_bindings.clear();
        self.icon_invalidations.clear();
    }
}

/// Frozen copy of one finished fight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FightSnapshot {
    pub damage: AggregateTable,
    pub healing: AggregateTable,
    pub armor: AggregateTable,
    pub classes: HashMap<String, String>,
    pub overrides: HashMap<String, Side>,
    pub timestamp: String,
}

/// Bounded fight history, newest first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FightHistory {
    fights: VecDeque<FightSnapshot>,
}

impl FightHistory {
    pub fn push(&mut self, snapshot: FightSnapshot) {
        self.fights.push_front(snapshot);
        self.fights.truncate(MAX_FIGHT_HISTORY);
    }

    pub fn len(&self) -> usize {
        self.fights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fights.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&FightSnapshot> {
        self.fights.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FightSnapshot> {
        self.fights.iter()
    }

    pub fn clear(&mut self) {
        self.fights.clear();
    }
}

/// Per-spell row in a rendered breakdown, sorted by value.
#[derive(Debug, Clone, Serialize)]
pub struct SpellSummary {
    pub name: String,
    pub element: Element,
    pub total: u64,
}

/// One meter row as served to the rendering collaborator.
#[derive(Debug, Clone, Serialize)]
pub struct EntitySummary {
    pub name: String,
    pub total: u64,
    pub class: Option<String>,
    pub icon: Option<String>,
    pub spells: Vec<SpellSummary>,
}

/// Ally/enemy split of one aggregate table, descending by total.
#[derive(Debug, Clone, Serialize)]
pub struct MeterSummary {
    pub allies: Vec<EntitySummary>,
    pub enemies: Vec<EntitySummary>,
    pub allies_total: u64,
    pub enemies_total: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(tag: &str) -> FightSnapshot {
        FightSnapshot {
            damage: HashMap::new(),
            healing: HashMap::new(),
            armor: HashMap::new(),
            classes: HashMap::new(),
            overrides: HashMap::new(),
            timestamp: tag.to_string(),
        }
    }

    #[test]
    fn totals_accumulate_with_breakdown() {
        let mut store = AggregateStore::default();
        store.add(MeterKind::Damage, "Bob", "Iop Sword", Element::Fire, 100);
        store.add(MeterKind::Damage, "Bob", "Iop Sword", Element::Fire, 50);
        store.add(MeterKind::Damage, "Bob", "Jabs", Element::Earth, 25);

        let bob = &store.damage["Bob"];
        assert_eq!(bob.total, 175);
        let breakdown_sum: u64 = bob.spells.values().map(|s| s.val).sum();
        assert_eq!(breakdown_sum, bob.total);
        assert_eq!(bob.spells["Iop Sword|Fire"].val, 150);
    }

    #[test]
    fn summon_merge_moves_totals_and_tags_spells() {
        let mut store = AggregateStore::default();
        store.add(MeterKind::Damage, "Osamodas", "Whip", Element::Air, 40);
        store.add(MeterKind::Damage, "Tofu", "Peck", Element::Air, 30);
        store.add(MeterKind::Damage, "Tofu", "Peck", Element::Air, 20);
        store.add(MeterKind::Healing, "Tofu", "Chirp", Element::Neutral, 10);

        store.merge_summon("Tofu", "Osamodas");

        assert!(!store.damage.contains_key("Tofu"));
        assert!(!store.healing.contains_key("Tofu"));
        let master = &store.damage["Osamodas"];
        assert_eq!(master.total, 90);
        assert_eq!(master.spells["Peck (Tofu)|Air"].val, 50);
        assert_eq!(master.spells["Peck (Tofu)|Air"].real_name, "Peck (Tofu)");
        assert_eq!(store.healing["Osamodas"].spells["Chirp (Tofu)|Neutral"].val, 10);
    }

    #[test]
    fn history_keeps_five_newest_first() {
        let mut history = FightHistory::default();
        for i in 0..8 {
            history.push(snapshot(&format!("fight-{}", i)));
        }
        assert_eq!(history.len(), MAX_FIGHT_HISTORY);
        assert_eq!(history.get(0).unwrap().timestamp, "fight-7");
        assert_eq!(history.get(4).unwrap().timestamp, "fight-3");
    }

    #[test]
    fn binding_cycles_are_rejected() {
        let mut ctx = ClassificationContext::default();
        ctx.bind_summon("Tofu", "Osamodas").unwrap();
        ctx.bind_summon("Osamodas", "Gobgob").unwrap();
        assert!(ctx.bind_summon("Gobgob", "Tofu").is_err());
        assert!(ctx.bind_summon("Tofu", "Tofu").is_err());
        // The rejected bindings left the map untouched.
        assert_eq!(ctx.master_of("Gobgob"), None);
    }

    #[test]
    fn first_player_of_class_follows_detection_order() {
        let mut ctx = ClassificationContext::default();
        ctx.set_class("Alice", "iop");
        ctx.set_class("Bob", "iop");
        ctx.set_class("Carol", "eniripsa");
        assert_eq!(ctx.first_player_of_class("iop"), Some("Alice"));
        assert_eq!(ctx.first_player_of_class("eniripsa"), Some("Carol"));
        assert_eq!(ctx.first_player_of_class("sadida"), None);
    }

    #[test]
    fn class_change_invalidates_icon_once_per_change() {
        let mut ctx = ClassificationContext::default();
        ctx.set_class("Alice", "iop");
        ctx.set_class("Alice", "iop");
        ctx.set_class("Alice", "sram");
        assert_eq!(ctx.icon_invalidations, vec!["Alice", "Alice"]);
    }

    #[test]
    fn element_normalization_spans_languages() {
        assert_eq!(Element::normalize("Feu"), Some(Element::Fire));
        assert_eq!(Element::normalize("água"), Some(Element::Water));
        assert_eq!(Element::normalize("estase"), Some(Element::Stasis));
        assert_eq!(Element::normalize(" Air "), Some(Element::Air));
        assert_eq!(Element::normalize("Critical"), None);
    }
}
