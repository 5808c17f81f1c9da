use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::Deserialize;
use tracing::{info, warn};

/// Reference data that did not load is not an error for the pipeline:
/// dependent features (class detection, spell classification, monster
/// checks) simply no-op on empty tables. The error type only surfaces
/// malformed files, which the caller downgrades to a warning.
#[derive(Debug, thiserror::Error)]
pub enum ReferenceError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

/// Spell dictionary file shape: class id → language code → spell names.
type ClassSpellsFile = HashMap<String, HashMap<String, Vec<String>>>;

/// One monster record with its localized names.
#[derive(Debug, Deserialize)]
pub struct MonsterRecord {
    #[serde(rename = "imgId")]
    pub img_id: String,
    #[serde(rename = "nameEN", default)]
    pub name_en: Option<String>,
    #[serde(rename = "nameFR", default)]
    pub name_fr: Option<String>,
    #[serde(rename = "nameES", default)]
    pub name_es: Option<String>,
    #[serde(rename = "namePT", default)]
    pub name_pt: Option<String>,
}

/// Read-once lookup structures built from the static reference tables.
/// Never mutated after startup.
#[derive(Debug, Default)]
pub struct ReferenceIndex {
    spell_to_class: HashMap<String, String>,
    known_spells: HashSet<String>,
    /// Known spells in load order: the documented contract for substring
    /// matching ("first known spell in load order wins").
    spell_order: Vec<String>,
    /// Lowercased monster name (any language) → icon id.
    monster_lookup: HashMap<String, String>,
    enemy_families: Vec<String>,
    ally_summons: Vec<String>,
}

impl ReferenceIndex {
    /// Build the index from already-deserialized tables and merge the
    /// manual injections (spells the dictionaries are known to miss).
    pub fn build(
        class_spells: ClassSpellsFile,
        monsters: Vec<MonsterRecord>,
        enemy_families: Vec<String>,
        ally_summons: Vec<String>,
    ) -> Self {
        let mut index = ReferenceIndex {
            enemy_families,
            ally_summons,
            ..Default::default()
        };

        let mut classes: Vec<&String> = class_spells.keys().collect();
        classes.sort();
        for class_id in classes {
            for spells in class_spells[class_id].values() {
                for spell in spells {
                    index.insert_spell(spell, class_id);
                }
            }
        }

        // Dictionary gaps observed in live logs: summon toxins and states
        // that arrive as annotations rather than cast lines.
        for spell in [
            "Harmless Toxin",
            "Toxine inoffensive",
            "Toxina inofensiva",
            "Tetatoxin",
            "Tétatoxine",
            "Venomous",
            "Venimeux",
            "Liquid Ghoul",
            "Sadida Nettled",
            "Nettled",
        ] {
            index.insert_spell(spell, "sadida");
        }
        index.insert_spell("Blackjack", "ecaflip");

        // Class-less spells: reflect passives and dungeon mechanics must
        // resolve as overrides, but belong to no player class.
        for spell in ["Burning Armor", "Armadura Ardiente", "Everlasting Myotoxin"] {
            index.insert_known(spell);
        }

        for monster in monsters {
            for name in [
                monster.name_en.as_deref(),
                monster.name_fr.as_deref(),
                monster.name_es.as_deref(),
                monster.name_pt.as_deref(),
            ]
            .into_iter()
            .flatten()
            {
                index
                    .monster_lookup
                    .insert(name.to_lowercase(), monster.img_id.clone());
            }
        }

        info!(
            spells = index.known_spells.len(),
            monsters = index.monster_lookup.len(),
            enemy_families = index.enemy_families.len(),
            "reference index built"
        );
        index
    }

    /// Load every table found under `dir`. Missing files degrade to empty
    /// tables; malformed files are logged and skipped the same way.
    pub fn load_dir(dir: &Path) -> Self {
        let class_spells: ClassSpellsFile = load_table(&dir.join("class_spells.json"));
        let monsters: Vec<MonsterRecord> = load_table(&dir.join("monsters.json"));
        let enemy_families: Vec<String> = load_table(&dir.join("enemy_families.json"));
        let ally_summons: Vec<String> = load_table(&dir.join("ally_summons.json"));
        Self::build(class_spells, monsters, enemy_families, ally_summons)
    }

    fn insert_spell(&mut self, spell: &str, class_id: &str) {
        self.spell_to_class
            .insert(spell.to_string(), class_id.to_string());
        self.insert_known(spell);
    }

    fn insert_known(&mut self, spell: &str) {
        if self.known_spells.insert(spell.to_string()) {
            self.spell_order.push(spell.to_string());
        }
    }

    pub fn class_for_spell(&self, spell: &str) -> Option<&str> {
        self.spell_to_class.get(spell).map(String::as_str)
    }

    pub fn is_known_spell(&self, spell: &str) -> bool {
        self.known_spells.contains(spell)
    }

    /// Resolve an annotation to a known spell: exact match first, then
    /// substring containment in load order. Returns the canonical spell
    /// name, not the annotation.
    pub fn find_known_spell<'a>(&'a self, annotation: &'a str) -> Option<&'a str> {
        if self.is_known_spell(annotation) {
            return Some(annotation);
        }
        self.spell_order
            .iter()
            .find(|spell| annotation.contains(spell.as_str()))
            .map(String::as_str)
    }

    pub fn is_monster(&self, name: &str) -> bool {
        self.monster_lookup.contains_key(&name.to_lowercase().trim().to_string())
    }

    pub fn monster_icon(&self, name: &str) -> Option<&str> {
        self.monster_lookup
            .get(&name.to_lowercase().trim().to_string())
            .map(String::as_str)
    }

    pub fn matches_enemy_family(&self, name: &str) -> bool {
        let low = name.to_lowercase();
        self.enemy_families
            .iter()
            .any(|family| low.contains(&family.to_lowercase()))
    }

    pub fn is_ally_summon(&self, name: &str) -> bool {
        self.ally_summons.iter().any(|summon| summon == name)
    }
}

fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ReferenceError> {
    let text = std::fs::read_to_string(path).map_err(|source| ReferenceError::Io {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| ReferenceError::Parse {
        path: path.display().to_string(),
        source,
    })
}

/// Downgrade load errors to warnings: a missing or broken table means the
/// dependent feature no-ops, never that startup fails.
fn load_table<T: serde::de::DeserializeOwned + Default>(path: &Path) -> T {
    match load_json(path) {
        Ok(value) => value,
        Err(ReferenceError::Io { source, path })
            if source.kind() == std::io::ErrorKind::NotFound =>
        {
            warn!(%path, "reference table missing, feature degrades to no-op");
            T::default()
        }
        Err(err) => {
            warn!(error = %err, "reference table unusable, feature degrades to no-op");
            T::default()
        }
    }
}

/// Small hand-built index shared by the engine tests.
#[cfg(test)]
pub(crate) fn test_index() -> ReferenceIndex {
    let mut class_spells: HashMap<String, HashMap<String, Vec<String>>> = HashMap::new();
    class_spells.insert(
        "iop".to_string(),
        HashMap::from([(
            "en".to_string(),
            vec!["Iop Sword".to_string(), "Jabs".to_string()],
        )]),
    );
    class_spells.insert(
        "eniripsa".to_string(),
        HashMap::from([(
            "en".to_string(),
            vec!["Word of Reconstitution".to_string()],
        )]),
    );
    let monsters = vec![MonsterRecord {
        img_id: "gobball".to_string(),
        name_en: Some("Gobball".to_string()),
        name_fr: Some("Bouftou".to_string()),
        name_es: Some("Jalató".to_string()),
        name_pt: None,
    }];
    ReferenceIndex::build(
        class_spells,
        monsters,
        vec!["Gobball".to_string(), "Whirligig".to_string()],
        vec!["Lumino".to_string()],
    )
}
