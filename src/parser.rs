use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Local, Utc};
use regex::Regex;
use tracing::{debug, warn};

use crate::chat::{self, ChatFeed};
use crate::models::*;
use crate::persist;
use crate::reference::ReferenceIndex;
use crate::tracker::{PickupEvent, TrackerState};
use crate::translate::{self, TranslationJob, TranslationSettings};

/// Bracketed fight-log tags, one per supported language (lowercased).
const COMBAT_TAGS: [&str; 4] = [
    "[fight log]",
    "[information (combat)]",
    "[información (combate)]",
    "[registro de lutas]",
];

/// Fight-end system lines: the tag and the localized end phrase must both
/// be present (lowercased).
const FIGHT_END_PATTERNS: [(&str, &str); 4] = [
    ("[fight log]", "fight is over"),
    ("[information (combat)]", "le combat est terminé"),
    ("[información (combate)]", "el combate ha terminado"),
    ("[registro de lutas]", "a luta terminou"),
];

/// "Carried over to the next turn" markers.
const TURN_CARRYOVER_MARKERS: [&str; 4] = [
    "carried over",
    "tour suivant",
    "siguiente turno",
    "próximo turno",
];

/// Localized pickup verbs recognized by the item tracker.
const PICKUP_KEYWORDS: [&str; 7] = [
    "picked up",
    "ramassé",
    "obtenu",
    "recogido",
    "obtenido",
    "apanhou",
    "obteve",
];

/// Flavor tags that show up as parentheticals but are never spells.
const NOISE_WORDS: [&str; 20] = [
    "Block!",
    "Critical",
    "Critical Hit",
    "Critical Hit Expert",
    "Slow Influence",
    "Backstab",
    "Sidestab",
    "Berserk",
    "Influence",
    "Dodge",
    "Lock",
    "Increased Damage",
    "Wrath",
    "Countered",
    "Double",
    "The Art of Taming",
    "Neutrality",
    "Raw Power",
    "Exalted",
    "Calm",
];

/// Decorative summons that must never own subsequent damage procs.
const NON_COMBATANTS: [&str; 10] = [
    "Gobgob",
    "Beacon",
    "Balise",
    "Standard-Bearing Puppet",
    "Microbot",
    "Cybot",
    "Dial",
    "Cadran",
    "Coney",
    "Lapino",
];

/// Spell-name fragments that mark reflect/thorn damage, attributed to the
/// entity that triggered them rather than the active caster.
const REFLECT_MARKERS: [&str; 4] = ["Burning Armor", "Armadura Ardiente", "Reflect", "Thorns"];

/// Boss-name fragments treated as enemies even when a class sneaks in.
const BOSS_NAME_MARKERS: [&str; 2] = ["Punchy", "Papas"];

/// Dungeon mechanics forced onto the synthetic mechanic entity:
/// (needle matched against the resolved spell, canonical spell label).
const MECHANIC_OVERRIDES: [(&str, &str); 1] =
    [("Everlasting Myotoxin", "Everlasting Myotoxin")];

fn cast_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^(.*?) (?:casts|lance(?: le sort)?|lanza(?: el hechizo)?|lança(?: o feitiço)?) (.*?)(?:\.|\s\(|$)",
        )
        .unwrap()
    })
}

fn action_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(.*?): ([+-])?([\d,.\s]+) (HP|PdV|PV|Armor|Armadura|Armure)(.*)$").unwrap()
    })
}

fn paren_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\(([^)]+)\)").unwrap())
}

fn is_armor_unit(unit: &str) -> bool {
    unit.eq_ignore_ascii_case("armor")
        || unit.eq_ignore_ascii_case("armadura")
        || unit.eq_ignore_ascii_case("armure")
}

/// `HH:MM:SS` prefix check for chat lines.
fn has_clock_prefix(line: &str) -> bool {
    let bytes = line.as_bytes();
    bytes.len() >= 8
        && bytes[0].is_ascii_digit()
        && bytes[1].is_ascii_digit()
        && bytes[2] == b':'
        && bytes[3].is_ascii_digit()
        && bytes[4].is_ascii_digit()
        && bytes[5] == b':'
        && bytes[6].is_ascii_digit()
        && bytes[7].is_ascii_digit()
}

fn is_fight_end_line(lower: &str) -> bool {
    FIGHT_END_PATTERNS
        .iter()
        .any(|(tag, msg)| lower.contains(tag) && lower.contains(msg))
}

/// What one raw line turned out to be.
#[derive(Debug, PartialEq, Eq)]
pub enum LineKind {
    /// Combat line with the content after the bracket tag.
    Combat(String),
    ItemPickup,
    Chat,
    Noise,
}

/// Classifier output: the line kind plus the fight-boundary signal, which
/// is raised before normal classification (and before dedup, so a repeated
/// end line still closes the fight).
#[derive(Debug)]
pub struct Classified {
    pub kind: LineKind,
    pub fight_ended: bool,
}

/// Stateful line classifier with a bounded FIFO-evicted dedup set.
/// Duplicate lines are reported as noise even when they would otherwise be
/// combat or chat; this caps memory and suppresses log replays at the cost
/// of dropping genuinely repeated identical events.
pub struct LineClassifier {
    seen: HashSet<String>,
    order: VecDeque<String>,
    cap: usize,
}

impl LineClassifier {
    pub fn new(cap: usize) -> Self {
        LineClassifier {
            seen: HashSet::new(),
            order: VecDeque::new(),
            cap: cap.max(1),
        }
    }

    pub fn classify(&mut self, line: &str) -> Classified {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Classified {
                kind: LineKind::Noise,
                fight_ended: false,
            };
        }

        let lower = trimmed.to_lowercase();
        let fight_ended = is_fight_end_line(&lower);

        if self.seen.contains(trimmed) {
            return Classified {
                kind: LineKind::Noise,
                fight_ended,
            };
        }
        self.seen.insert(trimmed.to_string());
        self.order.push_back(trimmed.to_string());
        if self.order.len() > self.cap {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }

        let kind = if PICKUP_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
            LineKind::ItemPickup
        } else if COMBAT_TAGS.iter().any(|tag| lower.contains(tag)) {
            match trimmed.splitn(2, "] ").nth(1) {
                Some(content) => LineKind::Combat(content.trim().to_string()),
                None => LineKind::Noise,
            }
        } else if has_clock_prefix(trimmed) {
            LineKind::Chat
        } else {
            LineKind::Noise
        };

        Classified { kind, fight_ended }
    }
}

/// Side classification, strict priority order: manual override, known
/// monster, enemy family / boss name, detected class, known ally summon,
/// then enemy by default (unknowns bias toward clean ally totals).
pub fn is_ally(name: &str, ctx: &ClassificationContext, reference: &ReferenceIndex) -> bool {
    if let Some(side) = ctx.manual_overrides.get(name) {
        return *side == Side::Ally;
    }
    if reference.is_monster(name) {
        return false;
    }
    if reference.matches_enemy_family(name)
        || BOSS_NAME_MARKERS.iter().any(|m| name.contains(m))
    {
        return false;
    }
    if ctx.class_of(name).is_some() {
        return true;
    }
    if reference.is_ally_summon(name) {
        return true;
    }
    false
}

/// The live parsing session: classifier, parser state, classification
/// context, aggregates, history, chat feed and tracker, all mutated line
/// by line in file order.
pub struct Session {
    reference: Arc<ReferenceIndex>,
    pub state: ParserState,
    pub ctx: ClassificationContext,
    pub store: AggregateStore,
    pub history: FightHistory,
    classifier: LineClassifier,
    pub chat: ChatFeed,
    pub tracker: TrackerState,
    pub translation: TranslationSettings,
    pub pending_translations: VecDeque<TranslationJob>,
    /// Pickup notifications awaiting the rendering collaborator's drain.
    pub pickup_events: VecDeque<PickupEvent>,
    pub last_combat_activity: DateTime<Utc>,
    has_unsaved_changes: bool,
    data_dir: Option<PathBuf>,
}

/// Pickup notifications kept while the collaborator is not draining.
const MAX_PICKUP_EVENTS: usize = 50;

impl Session {
    pub fn new(reference: Arc<ReferenceIndex>, dedup_cap: usize, data_dir: Option<PathBuf>) -> Self {
        let mut session = Session {
            reference,
            state: ParserState::default(),
            ctx: ClassificationContext::default(),
            store: AggregateStore::default(),
            history: FightHistory::default(),
            classifier: LineClassifier::new(dedup_cap),
            chat: ChatFeed::default(),
            tracker: TrackerState::default(),
            translation: TranslationSettings::default(),
            pending_translations: VecDeque::new(),
            pickup_events: VecDeque::new(),
            last_combat_activity: Utc::now(),
            has_unsaved_changes: false,
            data_dir: data_dir.clone(),
        };
        if let Some(dir) = data_dir {
            session.history = persist::load_history(&dir);
            session.ctx.manual_overrides = persist::load_overrides(&dir);
            session.tracker.items = persist::load_items(&dir);
        }
        session
    }

    /// Feed a freshly-read chunk of the log through the pipeline, one line
    /// at a time in file order.
    pub fn process_chunk(&mut self, text: &str) {
        for line in text.lines() {
            self.process_line(line);
        }
        self.flush_tracker();
    }

    pub fn process_line(&mut self, line: &str) {
        let classified = self.classifier.classify(line);

        if classified.fight_ended {
            self.save_history_if_dirty();
            self.state.awaiting_new_fight = true;
        }

        match classified.kind {
            LineKind::Combat(content) => self.handle_combat(&content, classified.fight_ended),
            LineKind::ItemPickup => {
                for event in self.tracker.apply_line(line) {
                    debug!(item = %event.item, qty = event.qty, goal = event.goal_reached, "pickup");
                    self.pickup_events.push_back(event);
                    while self.pickup_events.len() > MAX_PICKUP_EVENTS {
                        self.pickup_events.pop_front();
                    }
                }
            }
            LineKind::Chat => self.handle_chat(line),
            LineKind::Noise => {}
        }
    }

    fn handle_chat(&mut self, line: &str) {
        let Some(parsed) = chat::parse_chat_line(line) else {
            return;
        };
        let skip_auto =
            translate::channel_language_disabled(&parsed.channel, &self.translation);
        let text = parsed.message.clone();
        let id = self.chat.push(parsed);
        if self.translation.enabled && !skip_auto {
            self.pending_translations.push_back(TranslationJob {
                message_id: id,
                text,
                manual: false,
            });
        }
    }

    /// The attribution engine. First match wins per line; everything that
    /// does not match falls closed and the line is dropped.
    fn handle_combat(&mut self, content: &str, was_fight_end: bool) {
        // A fight just ended and something else is happening: that
        // something is the first action of the next encounter.
        if self.state.awaiting_new_fight && !was_fight_end {
            self.perform_reset(false);
        }

        if TURN_CARRYOVER_MARKERS.iter().any(|m| content.contains(m)) {
            self.state.current_spell = PASSIVE_SPELL.to_string();
            return;
        }

        if let Some(caps) = cast_regex().captures(content) {
            let caster = caps[1].trim().to_string();
            let spell = caps[2].trim().to_string();
            if NON_COMBATANTS.iter().any(|nc| caster.contains(nc)) {
                // Spell-name tracking only: the decorative summon never
                // becomes the active caster, so later procs still land on
                // the previous real caster.
                debug!(%caster, %spell, "non-combatant cast ignored");
                return;
            }
            self.state.current_caster = caster;
            self.state.current_spell = spell;
            self.detect_class();
            return;
        }

        let Some(caps) = action_regex().captures(content) else {
            return;
        };
        let target = caps[1].trim().to_string();
        let sign = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        let Some(amount) = parse_amount(&caps[3]) else {
            return;
        };
        let is_armor = is_armor_unit(&caps[4]);
        let suffix = caps[5].trim();

        let annotations: Vec<String> = paren_regex()
            .captures_iter(suffix)
            .map(|c| c[1].to_string())
            .collect();

        // First element left-to-right; first spell override right-to-left.
        // The two scan directions are deliberately different.
        let element = annotations.iter().find_map(|a| Element::normalize(a));
        let spell_override = resolve_spell_override(&annotations, &self.reference);

        // Attribution chain.
        let mut caster = self.state.current_caster.clone();
        if !self.state.has_caster() {
            caster = target.clone();
        }

        let mut spell = spell_override
            .clone()
            .unwrap_or_else(|| self.state.current_spell.clone());

        if REFLECT_MARKERS.iter().any(|m| spell.contains(m)) {
            // Reflected damage belongs to whoever triggered it.
            caster = target.clone();
        }

        let is_heal = !is_armor && sign == "+";
        if is_heal
            && is_ally(&caster, &self.ctx, &self.reference)
            && !is_ally(&target, &self.ctx, &self.reference)
        {
            // An ally "healing" an enemy is almost always a boss self-heal
            // mis-attributed by proximity.
            caster = target.clone();
            if spell_override.is_none() {
                spell = MECHANIC_SPELL.to_string();
            }
        }

        for (needle, forced) in MECHANIC_OVERRIDES {
            if spell.contains(needle) {
                caster = MECHANIC_ENTITY.to_string();
                spell = forced.to_string();
            }
        }

        if spell != UNKNOWN_SPELL && spell != PASSIVE_SPELL && caster != MECHANIC_ENTITY {
            if let Some(signature_class) = self.reference.class_for_spell(&spell) {
                if self.ctx.class_of(&caster) != Some(signature_class) {
                    if let Some(owner) = self.ctx.first_player_of_class(signature_class) {
                        caster = owner.to_string();
                    }
                }
            }
        }

        if let Some(master) = self.ctx.master_of(&caster) {
            spell = format!("{} ({})", spell, caster);
            caster = master.to_string();
        }

        if is_armor {
            // Armor gains and losses both land in the armor table.
            self.store
                .add(MeterKind::Armor, &caster, &spell, Element::Neutral, amount);
        } else if sign == "+" {
            self.store.add(
                MeterKind::Healing,
                &caster,
                &spell,
                element.unwrap_or(Element::Neutral),
                amount,
            );
        } else {
            self.store.add(
                MeterKind::Damage,
                &caster,
                &spell,
                element.unwrap_or(Element::Neutral),
                amount,
            );
        }

        self.has_unsaved_changes = true;
        self.last_combat_activity = Utc::now();
    }

    /// Map the freshly-cast spell to a class for the current caster.
    /// Known monsters are never classified as players.
    fn detect_class(&mut self) {
        if self.reference.is_monster(&self.state.current_caster) {
            return;
        }
        if let Some(class_id) = self.reference.class_for_spell(&self.state.current_spell) {
            let caster = self.state.current_caster.clone();
            let class_id = class_id.to_string();
            self.ctx.set_class(&caster, &class_id);
        }
    }

    pub fn is_ally(&self, name: &str) -> bool {
        is_ally(name, &self.ctx, &self.reference)
    }

    /// Snapshot the live tables into history if anything changed since the
    /// last save. A failed persist clears in-memory history: stability
    /// over data.
    pub fn save_history_if_dirty(&mut self) {
        if !self.has_unsaved_changes || self.store.is_empty() {
            return;
        }
        let snapshot = FightSnapshot {
            damage: self.store.damage.clone(),
            healing: self.store.healing.clone(),
            armor: self.store.armor.clone(),
            classes: self.ctx.classes().clone(),
            overrides: self.ctx.manual_overrides.clone(),
            timestamp: Local::now().format("%H:%M:%S").to_string(),
        };
        self.history.push(snapshot);
        self.has_unsaved_changes = false;

        if let Some(dir) = &self.data_dir {
            if let Err(err) = persist::save_history(dir, &self.history) {
                warn!(error = %err, "history save failed, clearing in-memory history");
                self.history.clear();
            }
        }
    }

    /// Clear the live meter. `hard` also forgets detected classes and
    /// summon bindings (manual overrides survive; they are persisted user
    /// intent). Saves first so nothing silently disappears.
    pub fn perform_reset(&mut self, hard: bool) {
        self.save_history_if_dirty();
        self.store.clear();
        self.state.reset();
        self.has_unsaved_changes = false;
        if hard {
            self.ctx.reset_live();
        }
    }

    /// Declare a summon→master binding and fold any accumulated totals
    /// into the master immediately.
    pub fn bind_summon(&mut self, summon: &str, master: &str) -> Result<(), String> {
        self.ctx.bind_summon(summon, master)?;
        self.store.merge_summon(summon, master);
        self.has_unsaved_changes = true;
        Ok(())
    }

    pub fn set_override(&mut self, name: &str, side: Option<Side>) {
        match side {
            Some(side) => {
                self.ctx.manual_overrides.insert(name.to_string(), side);
            }
            None => {
                self.ctx.manual_overrides.remove(name);
            }
        }
        if let Some(dir) = &self.data_dir {
            if let Err(err) = persist::save_overrides(dir, &self.ctx.manual_overrides) {
                warn!(error = %err, "override save failed");
            }
        }
    }

    pub fn queue_manual_translation(&mut self, message_id: u64) -> bool {
        let Some(text) = self.chat.message_text(message_id) else {
            return false;
        };
        self.pending_translations.push_back(TranslationJob {
            message_id,
            text,
            manual: true,
        });
        true
    }

    /// Ally/enemy split of one aggregate table for the rendering
    /// collaborator, rows and breakdowns sorted by descending value.
    pub fn meter_summary(&self, kind: MeterKind) -> MeterSummary {
        let table = match kind {
            MeterKind::Damage => &self.store.damage,
            MeterKind::Healing => &self.store.healing,
            MeterKind::Armor => &self.store.armor,
        };

        let mut allies = Vec::new();
        let mut enemies = Vec::new();
        for entity in table.values() {
            let mut spells: Vec<SpellSummary> = entity
                .spells
                .values()
                .map(|entry| SpellSummary {
                    name: entry.real_name.clone(),
                    element: entry.element,
                    total: entry.val,
                })
                .collect();
            spells.sort_by(|a, b| b.total.cmp(&a.total).then_with(|| a.name.cmp(&b.name)));

            let summary = EntitySummary {
                name: entity.name.clone(),
                total: entity.total,
                class: self.ctx.class_of(&entity.name).map(str::to_string),
                icon: self.reference.monster_icon(&entity.name).map(str::to_string),
                spells,
            };
            if self.is_ally(&entity.name) {
                allies.push(summary);
            } else {
                enemies.push(summary);
            }
        }
        allies.sort_by(|a, b| b.total.cmp(&a.total).then_with(|| a.name.cmp(&b.name)));
        enemies.sort_by(|a, b| b.total.cmp(&a.total).then_with(|| a.name.cmp(&b.name)));

        MeterSummary {
            allies_total: allies.iter().map(|e| e.total).sum(),
            enemies_total: enemies.iter().map(|e| e.total).sum(),
            allies,
            enemies,
        }
    }

    /// True when auto-reset should fire: data exists and the log has been
    /// combat-silent for longer than the configured delay.
    pub fn auto_reset_due(&self, delay: chrono::Duration) -> bool {
        !self.store.is_empty() && Utc::now() - self.last_combat_activity >= delay
    }

    pub fn flush_tracker(&mut self) {
        if !self.tracker.dirty {
            return;
        }
        if let Some(dir) = &self.data_dir {
            if let Err(err) = persist::save_items(dir, &self.tracker.items) {
                warn!(error = %err, "tracker save failed");
            }
        }
        self.tracker.dirty = false;
    }
}

/// Normalize grouping separators away and parse. Zero, negative and
/// garbage amounts yield `None` and the event is dropped.
fn parse_amount(raw: &str) -> Option<u64> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    match digits.parse::<u64>() {
        Ok(n) if n > 0 => Some(n),
        _ => None,
    }
}

/// Scan annotations right-to-left for a spell override. Elements and noise
/// tags never qualify; item/consumable-looking annotations win over
/// known-spell matches, except when they carry the word "lost" (a noisy
/// log phrase, not a source).
fn resolve_spell_override(annotations: &[String], reference: &ReferenceIndex) -> Option<String> {
    let mut first_item: Option<String> = None;
    let mut first_known: Option<String> = None;

    for annotation in annotations.iter().rev() {
        if Element::normalize(annotation).is_some() {
            continue;
        }
        if NOISE_WORDS.contains(&annotation.as_str()) {
            continue;
        }
        let looks_like_item = ["Potion", "Flask", "Flasque", "Consumable"]
            .iter()
            .any(|kw| annotation.contains(kw));
        if looks_like_item {
            if !annotation.to_lowercase().contains("lost") && first_item.is_none() {
                first_item = Some(annotation.clone());
            }
            continue;
        }
        if first_known.is_none() {
            if let Some(spell) = reference.find_known_spell(annotation) {
                first_known = Some(spell.to_string());
            }
        }
    }

    first_item.or(first_known)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::test_index;

    fn session() -> Session {
        Session::new(Arc::new(test_index()), 200, None)
    }

    fn combat(session: &mut Session, content: &str) {
        session.handle_combat(content, false);
    }

    // -- line classifier --

    #[test]
    fn classification_order_and_kinds() {
        let mut classifier = LineClassifier::new(10);
        let combat = classifier.classify("12:00:01,123 - [Fight Log] Bob casts Iop Sword.");
        assert_eq!(
            combat.kind,
            LineKind::Combat("Bob casts Iop Sword.".to_string())
        );
        assert!(!combat.fight_ended);

        let pickup = classifier.classify("You have picked up 3x Iron Ore .");
        assert_eq!(pickup.kind, LineKind::ItemPickup);

        let chat = classifier.classify("16:49:04,123 - [Guild] Ana : olá");
        assert_eq!(chat.kind, LineKind::Chat);

        let noise = classifier.classify("something unstructured");
        assert_eq!(noise.kind, LineKind::Noise);
    }

    #[test]
    fn duplicate_lines_become_noise() {
        let mut classifier = LineClassifier::new(10);
        let line = "12:00:01,123 - [Fight Log] Goblin: -120 HP";
        assert!(matches!(classifier.classify(line).kind, LineKind::Combat(_)));
        assert_eq!(classifier.classify(line).kind, LineKind::Noise);
    }

    #[test]
    fn dedup_cache_evicts_fifo() {
        let mut classifier = LineClassifier::new(2);
        classifier.classify("line a");
        classifier.classify("line b");
        classifier.classify("line c"); // evicts "line a"
        // "line a" is classifiable again after eviction.
        assert_eq!(classifier.classify("line a").kind, LineKind::Noise); // noise by content, not dedup
        assert!(classifier.seen.contains("line a"));
    }

    #[test]
    fn fight_end_detected_in_all_languages() {
        let mut classifier = LineClassifier::new(10);
        for line in [
            "x - [Fight Log] The fight is over!",
            "x - [Information (combat)] Le combat est terminé.",
            "x - [Información (combate)] El combate ha terminado.",
            "x - [Registro de Lutas] A luta terminou.",
        ] {
            assert!(classifier.classify(line).fight_ended, "{line}");
        }
    }

    #[test]
    fn repeated_fight_end_still_signals_boundary() {
        let mut classifier = LineClassifier::new(10);
        let line = "x - [Fight Log] The fight is over!";
        assert!(classifier.classify(line).fight_ended);
        let again = classifier.classify(line);
        assert!(again.fight_ended);
        assert_eq!(again.kind, LineKind::Noise);
    }

    // -- cast detection --

    #[test]
    fn cast_detection_all_languages() {
        for content in [
            "Bob casts Iop Sword.",
            "Bob lance Iop Sword.",
            "Bob lance le sort Iop Sword.",
            "Bob lanza el hechizo Iop Sword.",
            "Bob lança o feitiço Iop Sword.",
        ] {
            let mut s = session();
            combat(&mut s, content);
            assert_eq!(s.state.current_caster, "Bob", "{content}");
            assert_eq!(s.state.current_spell, "Iop Sword", "{content}");
        }
    }

    #[test]
    fn cast_sets_class_and_invalidates_icon() {
        let mut s = session();
        combat(&mut s, "Bob casts Iop Sword.");
        assert_eq!(s.ctx.class_of("Bob"), Some("iop"));
        assert_eq!(s.ctx.icon_invalidations, vec!["Bob"]);
    }

    #[test]
    fn monsters_never_get_a_class() {
        let mut s = session();
        combat(&mut s, "Gobball casts Iop Sword.");
        assert_eq!(s.state.current_caster, "Gobball");
        assert_eq!(s.ctx.class_of("Gobball"), None);
    }

    #[test]
    fn non_combatant_cast_keeps_previous_caster() {
        let mut s = session();
        combat(&mut s, "Bob casts Iop Sword.");
        combat(&mut s, "Beacon casts Flare.");
        assert_eq!(s.state.current_caster, "Bob");
        assert_eq!(s.state.current_spell, "Iop Sword");
        combat(&mut s, "Goblin: -80 HP");
        assert_eq!(s.store.damage["Bob"].total, 80);
    }

    // -- action extraction and attribution --

    #[test]
    fn cast_then_damage_attributes_to_caster() {
        let mut s = session();
        combat(&mut s, "Bob casts Iop Sword.");
        combat(&mut s, "Goblin: -120 HP");
        let bob = &s.store.damage["Bob"];
        assert_eq!(bob.total, 120);
        assert_eq!(bob.spells["Iop Sword|Neutral"].val, 120);
    }

    #[test]
    fn self_proc_falls_back_to_target_without_caster() {
        let mut s = session();
        combat(&mut s, "Goblin: -120 HP");
        assert_eq!(s.store.damage["Goblin"].total, 120);
        assert_eq!(
            s.store.damage["Goblin"].spells[&format!("{}|Neutral", UNKNOWN_SPELL)].val,
            120
        );
    }

    #[test]
    fn heal_routes_to_healing_table_with_neutral_element() {
        let mut s = session();
        combat(&mut s, "Bob casts Word of Reconstitution.");
        combat(&mut s, "Bob: +300 HP");
        let bob = &s.store.healing["Bob"];
        assert_eq!(bob.total, 300);
        assert_eq!(bob.spells["Word of Reconstitution|Neutral"].val, 300);
        assert!(s.store.damage.is_empty());
    }

    #[test]
    fn armor_changes_route_to_armor_table_regardless_of_sign() {
        let mut s = session();
        combat(&mut s, "Bob casts Iop Sword.");
        combat(&mut s, "Goblin: -50 Armor");
        combat(&mut s, "Goblin: +30 Armor");
        assert_eq!(s.store.armor["Bob"].total, 80);
        assert!(s.store.damage.is_empty());
        assert!(s.store.healing.is_empty());
    }

    #[test]
    fn grouped_numbers_and_localized_units_parse() {
        let mut s = session();
        combat(&mut s, "Bob casts Iop Sword.");
        combat(&mut s, "Goblin: -1,234 PdV");
        combat(&mut s, "Goblin: -2.345 PV");
        assert_eq!(s.store.damage["Bob"].total, 3579);
    }

    #[test]
    fn zero_and_garbage_amounts_are_dropped() {
        assert_eq!(parse_amount("0"), None);
        assert_eq!(parse_amount(" , ."), None);
        assert_eq!(parse_amount("1 234"), Some(1234));
    }

    #[test]
    fn element_scans_left_to_right_spell_scans_right_to_left() {
        let mut s = session();
        combat(&mut s, "Bob casts Iop Sword.");
        combat(&mut s, "Goblin: -100 HP (Water) (Fire) (Jabs) (Iop Sword)");
        let bob = &s.store.damage["Bob"];
        // Leftmost element wins; rightmost qualifying spell wins.
        assert_eq!(bob.spells["Iop Sword|Water"].val, 100);
    }

    #[test]
    fn noise_annotations_never_override() {
        let mut s = session();
        combat(&mut s, "Bob casts Iop Sword.");
        combat(&mut s, "Goblin: -100 HP (Critical Hit) (Dodge)");
        assert_eq!(s.store.damage["Bob"].spells["Iop Sword|Neutral"].val, 100);
    }

    #[test]
    fn item_annotations_take_precedence_over_known_spells() {
        let mut s = session();
        combat(&mut s, "Bob casts Iop Sword.");
        combat(&mut s, "Bob: +90 HP (Jabs) (Health Potion)");
        assert_eq!(s.store.healing["Bob"].spells["Health Potion|Neutral"].val, 90);
    }

    #[test]
    fn lost_item_annotations_are_excluded() {
        let mut s = session();
        combat(&mut s, "Bob casts Iop Sword.");
        combat(&mut s, "Bob: +90 HP (Health Potion lost)");
        // The item annotation is discarded, the active spell stands.
        assert_eq!(s.store.healing["Bob"].spells["Iop Sword|Neutral"].val, 90);
    }

    #[test]
    fn reflect_attributes_to_the_triggering_target() {
        let mut s = session();
        combat(&mut s, "Bob casts Iop Sword.");
        combat(&mut s, "Alice: -50 HP (Fire) (Burning Armor)");
        let alice = &s.store.damage["Alice"];
        assert_eq!(alice.total, 50);
        assert_eq!(alice.spells["Burning Armor|Fire"].val, 50);
        assert!(!s.store.damage.contains_key("Bob"));
    }

    #[test]
    fn heal_safeguard_reattributes_boss_self_heal() {
        let mut s = session();
        combat(&mut s, "Bob casts Iop Sword.");
        combat(&mut s, "Gobball: +500 HP");
        let gobball = &s.store.healing["Gobball"];
        assert_eq!(gobball.total, 500);
        assert_eq!(gobball.spells[&format!("{}|Neutral", MECHANIC_SPELL)].val, 500);
        assert!(!s.store.healing.contains_key("Bob"));
    }

    #[test]
    fn dungeon_mechanic_forces_synthetic_entity() {
        let mut s = session();
        combat(&mut s, "Bob casts Iop Sword.");
        combat(&mut s, "Alice: -200 HP (Everlasting Myotoxin)");
        assert_eq!(s.store.damage[MECHANIC_ENTITY].total, 200);
        // Signature rerouting must not move it off the mechanic entity.
        assert!(!s.store.damage.contains_key("Bob"));
        assert!(!s.store.damage.contains_key("Alice"));
    }

    #[test]
    fn signature_rerouting_redirects_to_class_owner() {
        let mut s = session();
        combat(&mut s, "Alice casts Iop Sword."); // Alice detected as iop
        combat(&mut s, "Gobball casts Gob Slam."); // monster becomes caster
        combat(&mut s, "Bob: -60 HP (Jabs)"); // Jabs is an iop signature
        assert_eq!(s.store.damage["Alice"].spells["Jabs|Neutral"].val, 60);
        assert!(!s.store.damage.contains_key("Gobball"));
    }

    #[test]
    fn signature_rerouting_keeps_caster_when_no_owner_known() {
        let mut s = session();
        combat(&mut s, "Gobball casts Gob Slam.");
        combat(&mut s, "Bob: -60 HP (Word of Reconstitution)");
        // No eniripsa detected: attribution stays with the caster.
        assert_eq!(s.store.damage["Gobball"].total, 60);
    }

    #[test]
    fn turn_carryover_resets_spell_but_keeps_caster() {
        let mut s = session();
        combat(&mut s, "Bob casts Iop Sword.");
        combat(&mut s, "Damage carried over to the next turn");
        assert_eq!(s.state.current_caster, "Bob");
        assert_eq!(s.state.current_spell, PASSIVE_SPELL);
        combat(&mut s, "Goblin: -40 HP");
        assert_eq!(
            s.store.damage["Bob"].spells[&format!("{}|Neutral", PASSIVE_SPELL)].val,
            40
        );
    }

    #[test]
    fn summon_binding_merges_at_ingest() {
        let mut s = session();
        combat(&mut s, "Tofu casts Peck.");
        combat(&mut s, "Goblin: -30 HP");
        s.bind_summon("Tofu", "Osa").unwrap();
        assert_eq!(s.store.damage["Osa"].spells["Peck (Tofu)|Neutral"].val, 30);
        combat(&mut s, "Goblin: -20 HP");
        let osa = &s.store.damage["Osa"];
        assert_eq!(osa.total, 50);
        assert_eq!(osa.spells["Peck (Tofu)|Neutral"].val, 50);
        assert!(!s.store.damage.contains_key("Tofu"));
    }

    #[test]
    fn attribution_totals_are_monotone_sums() {
        let mut s = session();
        combat(&mut s, "Bob casts Iop Sword.");
        let amounts = [10u64, 25, 120, 7, 98];
        for amount in amounts {
            combat(&mut s, &format!("Goblin: -{} HP (Fire)", amount));
        }
        let bob = &s.store.damage["Bob"];
        assert_eq!(bob.total, amounts.iter().sum::<u64>());
        assert_eq!(bob.spells.values().map(|e| e.val).sum::<u64>(), bob.total);
    }

    // -- ally/enemy classifier --

    #[test]
    fn ally_priority_order() {
        let mut s = session();
        combat(&mut s, "Bob casts Iop Sword.");

        // Detected class → ally; monsters and family matches → enemy;
        // summon list → ally; unknown → enemy.
        assert!(s.is_ally("Bob"));
        assert!(!s.is_ally("Gobball"));
        assert!(!s.is_ally("Royal Whirligig"));
        assert!(s.is_ally("Lumino"));
        assert!(!s.is_ally("Strangerdanger"));

        // Manual override beats everything, both directions.
        s.set_override("Gobball", Some(Side::Ally));
        s.set_override("Bob", Some(Side::Enemy));
        assert!(s.is_ally("Gobball"));
        assert!(!s.is_ally("Bob"));
        s.set_override("Bob", None);
        assert!(s.is_ally("Bob"));
    }

    #[test]
    fn classifier_is_pure_given_fixed_context() {
        let mut s = session();
        combat(&mut s, "Bob casts Iop Sword.");
        for name in ["Bob", "Gobball", "Lumino", "Nobody"] {
            assert_eq!(s.is_ally(name), s.is_ally(name));
        }
    }

    #[test]
    fn boss_name_markers_outrank_detected_class() {
        let mut s = session();
        combat(&mut s, "Punchy Packleader casts Iop Sword.");
        assert_eq!(s.ctx.class_of("Punchy Packleader"), Some("iop"));
        assert!(!s.is_ally("Punchy Packleader"));
    }

    // -- fight boundaries, history, reset --

    #[test]
    fn fight_end_snapshots_and_next_action_resets() {
        let mut s = session();
        s.process_line("x - [Fight Log] Bob casts Iop Sword.");
        s.process_line("x - [Fight Log] Goblin: -120 HP");
        s.process_line("x - [Fight Log] The fight is over!");
        assert_eq!(s.history.len(), 1);
        assert!(s.state.awaiting_new_fight);
        // Aggregates survive until the next combat activity.
        assert_eq!(s.store.damage["Bob"].total, 120);

        s.process_line("x - [Fight Log] Alice casts Jabs.");
        assert!(!s.state.awaiting_new_fight);
        assert!(s.store.damage.is_empty());
        s.process_line("x - [Fight Log] Goblin: -55 HP");
        assert_eq!(s.store.damage["Alice"].total, 55);
    }

    #[test]
    fn history_is_bounded_to_five_fights() {
        let mut s = session();
        for i in 0..7 {
            s.process_line(&format!("x{} - [Fight Log] Bob casts Iop Sword.", i));
            s.process_line(&format!("x{} - [Fight Log] Goblin: -{} HP", i, 100 + i));
            s.process_line(&format!("x{} - [Fight Log] The fight is over!", i));
        }
        assert_eq!(s.history.len(), 5);
        // Newest first: the last fight dealt 106.
        assert_eq!(s.history.get(0).unwrap().damage["Bob"].total, 106);
    }

    #[test]
    fn fight_end_without_data_snapshots_nothing() {
        let mut s = session();
        s.process_line("x - [Fight Log] The fight is over!");
        assert!(s.history.is_empty());
    }

    #[test]
    fn soft_reset_keeps_classes_hard_reset_clears_them() {
        let mut s = session();
        combat(&mut s, "Bob casts Iop Sword.");
        combat(&mut s, "Goblin: -10 HP");
        s.perform_reset(false);
        assert!(s.store.is_empty());
        assert_eq!(s.ctx.class_of("Bob"), Some("iop"));
        assert_eq!(s.state.current_caster, UNKNOWN_CASTER);

        s.perform_reset(true);
        assert_eq!(s.ctx.class_of("Bob"), None);
    }

    #[test]
    fn meter_summary_splits_and_sorts() {
        let mut s = session();
        combat(&mut s, "Bob casts Iop Sword.");
        combat(&mut s, "Gobball: -100 HP");
        combat(&mut s, "Gobball: -40 HP (Jabs)");
        combat(&mut s, "Alice casts Word of Reconstitution.");
        combat(&mut s, "Gobball: -500 HP"); // attributed to Alice (current caster)

        let summary = s.meter_summary(MeterKind::Damage);
        assert_eq!(summary.allies_total, 640);
        assert_eq!(summary.enemies_total, 0);
        // Descending by total: Alice (500) before Bob (140).
        assert_eq!(summary.allies[0].name, "Alice");
        assert_eq!(summary.allies[1].name, "Bob");
        assert_eq!(summary.allies[1].class.as_deref(), Some("iop"));
        // Bob's breakdown sorted by value: Iop Sword 100, then Jabs 40.
        assert_eq!(summary.allies[1].spells[0].name, "Iop Sword");
        assert_eq!(summary.allies[1].spells[1].name, "Jabs");
    }

    #[test]
    fn monster_entities_carry_their_icon() {
        let mut s = session();
        combat(&mut s, "Gobball casts Gob Slam.");
        combat(&mut s, "Bob: -60 HP");
        let summary = s.meter_summary(MeterKind::Damage);
        assert_eq!(summary.enemies[0].name, "Gobball");
        assert_eq!(summary.enemies[0].icon.as_deref(), Some("gobball"));
    }

    #[test]
    fn pickups_flow_through_the_pipeline() {
        let mut s = session();
        s.tracker.add_item("Iron Ore", 10, None);
        s.process_line("You have picked up 12x Iron Ore .");
        assert_eq!(s.tracker.items[0].current, 12);
        assert_eq!(s.pickup_events.len(), 1);
        assert!(s.pickup_events[0].goal_reached);
    }

    #[test]
    fn malformed_combat_lines_fall_closed() {
        let mut s = session();
        combat(&mut s, "gibberish without structure");
        combat(&mut s, "Goblin: -NaN HP");
        combat(&mut s, "Goblin: HP");
        assert!(s.store.is_empty());
    }
}
