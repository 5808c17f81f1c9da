use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::chat::language_scores;
use crate::parser::Session;

/// Default endpoint with the Google single-phrase API shape. Pluggable so
/// tests and self-hosted translators can point elsewhere.
pub const DEFAULT_ENDPOINT: &str = "https://translate.googleapis.com/translate_a/single";

/// Auto-translation never touches texts shorter than this (ambiguous short
/// words produce junk); manual requests are exempt.
const MIN_AUTO_LEN: usize = 3;
/// Nothing longer than this is sent at all.
const MAX_TEXT_LEN: usize = 500;

/// Per-language display toggles. `enabled` is the master switch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslationSettings {
    pub enabled: bool,
    pub pt: bool,
    pub fr: bool,
    pub es: bool,
    pub others: bool,
}

impl Default for TranslationSettings {
    fn default() -> Self {
        TranslationSettings {
            enabled: true,
            pt: true,
            fr: true,
            es: false,
            others: false,
        }
    }
}

/// One queued request, bound to a chat message id.
#[derive(Debug, Clone)]
pub struct TranslationJob {
    pub message_id: u64,
    pub text: String,
    pub manual: bool,
}

/// True when the channel label names a language the user disabled, e.g.
/// `[Recruitment (ES)]` with Spanish off: the message is stored and shown
/// but auto-translation is skipped (manual translation stays available).
pub fn channel_language_disabled(channel: &str, settings: &TranslationSettings) -> bool {
    if !settings.enabled {
        return false;
    }
    let lower = channel.to_lowercase();
    (lower.contains("(es)") && !settings.es)
        || (lower.contains("(fr)") && !settings.fr)
        || (lower.contains("(pt)") && !settings.pt)
}

/// Decide whether a finished translation is shown. Manual requests always
/// show. PT and ES results cross-check the original text's language
/// features when the opposite language is disabled: the detector often
/// labels shared phrases as the one the user speaks natively.
pub fn should_display(
    detected_lang: &str,
    original: &str,
    settings: &TranslationSettings,
    manual: bool,
) -> bool {
    if manual {
        return true;
    }
    let lang = detected_lang.to_lowercase();
    if lang == "pt" || lang.starts_with("pt-") {
        if !settings.pt {
            return false;
        }
        if !settings.es {
            let scores = language_scores(original);
            if scores.es > scores.pt || scores.pt == 0 {
                return false;
            }
        }
        true
    } else if lang == "es" || lang.starts_with("es-") {
        if !settings.es {
            return false;
        }
        if !settings.pt {
            let scores = language_scores(original);
            if scores.pt > scores.es || scores.es == 0 {
                return false;
            }
        }
        true
    } else if lang == "fr" || lang.starts_with("fr-") {
        settings.fr
    } else if lang == "en" || lang.starts_with("en-") {
        false
    } else {
        settings.others
    }
}

/// Call the translation endpoint: auto-detect source, English target.
/// Returns `(translated_text, detected_language)`; any failure is a silent
/// `None` (the message simply stays untranslated).
pub async fn fetch_translation(
    client: &reqwest::Client,
    endpoint: &str,
    text: &str,
) -> Option<(String, String)> {
    let response = client
        .get(endpoint)
        .query(&[
            ("client", "gtx"),
            ("sl", "auto"),
            ("tl", "en"),
            ("dt", "t"),
            ("q", text),
        ])
        .send()
        .await
        .ok()?;
    let data: serde_json::Value = response.json().await.ok()?;

    let translated: String = data
        .get(0)?
        .as_array()?
        .iter()
        .filter_map(|chunk| chunk.get(0)?.as_str())
        .collect();
    let lang = data.get(2)?.as_str()?.to_string();
    if translated.is_empty() {
        return None;
    }
    Some((translated, lang))
}

/// Drain the session's translation queue, strictly one request in flight.
/// Issuance order is preserved; results attach to messages by id so reply
/// ordering does not matter. Disabling translation clears the queue; a
/// request already in flight completes but its result is discarded.
pub async fn run_worker(session: Arc<Mutex<Session>>, endpoint: String) {
    let client = reqwest::Client::new();
    loop {
        let job = {
            let mut locked = session.lock().await;
            let drop_queue = matches!(
                locked.pending_translations.front(),
                Some(front) if !locked.translation.enabled && !front.manual
            );
            if drop_queue {
                locked.pending_translations.clear();
                None
            } else {
                locked.pending_translations.pop_front()
            }
        };

        let Some(job) = job else {
            tokio::time::sleep(Duration::from_millis(250)).await;
            continue;
        };

        if (!job.manual && job.text.chars().count() < MIN_AUTO_LEN)
            || job.text.len() >= MAX_TEXT_LEN
        {
            continue;
        }

        if let Some((translated, lang)) = fetch_translation(&client, &endpoint, &job.text).await {
            let mut locked = session.lock().await;
            let settings = locked.translation;
            if !settings.enabled && !job.manual {
                // Disabled while the request was in flight.
                continue;
            }
            if should_display(&lang, &job.text, &settings, job.manual) {
                if !locked.chat.set_translation(job.message_id, translated) {
                    debug!(id = job.message_id, "translated message already evicted");
                }
            }
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(enabled: bool, pt: bool, fr: bool, es: bool, others: bool) -> TranslationSettings {
        TranslationSettings {
            enabled,
            pt,
            fr,
            es,
            others,
        }
    }

    #[test]
    fn disabled_language_channels_skip_auto_translation() {
        let cfg = settings(true, true, true, false, false);
        assert!(channel_language_disabled("Recruitment (ES)", &cfg));
        assert!(!channel_language_disabled("Recruitment (PT)", &cfg));
        assert!(!channel_language_disabled("Guild", &cfg));
        // Master switch off: the queue never fills, so no flag either.
        let off = settings(false, true, true, false, false);
        assert!(!channel_language_disabled("Recruitment (ES)", &off));
    }

    #[test]
    fn english_results_never_display() {
        let cfg = settings(true, true, true, true, true);
        assert!(!should_display("en", "hello", &cfg, false));
        assert!(!should_display("en-US", "hello", &cfg, false));
    }

    #[test]
    fn manual_requests_always_display() {
        let cfg = settings(true, false, false, false, false);
        assert!(should_display("en", "hello", &cfg, true));
        assert!(should_display("es", "hola", &cfg, true));
    }

    #[test]
    fn french_is_gated_by_its_toggle() {
        assert!(should_display("fr", "bonjour à tous", &settings(true, true, true, false, false), false));
        assert!(!should_display("fr", "bonjour à tous", &settings(true, true, false, false, false), false));
    }

    #[test]
    fn pt_detection_is_cross_checked_when_es_is_off() {
        let cfg = settings(true, true, true, false, false);
        // Strongly Portuguese: shows.
        assert!(should_display("pt", "não sei o que você quer", &cfg, false));
        // Ambiguous phrase with no PT features: hidden.
        assert!(!should_display("pt", "nunca se sabe", &cfg, false));
        // With ES enabled the cross-check is skipped.
        let both = settings(true, true, true, true, false);
        assert!(should_display("pt", "nunca se sabe", &both, false));
    }

    #[test]
    fn es_detection_mirrors_the_cross_check() {
        let cfg = settings(true, false, true, true, false);
        assert!(should_display("es", "el niño está muy bien", &cfg, false));
        assert!(!should_display("es", "nunca sabe", &cfg, false));
    }

    #[test]
    fn others_catch_remaining_languages() {
        assert!(should_display("de", "guten tag", &settings(true, true, true, false, true), false));
        assert!(!should_display("de", "guten tag", &settings(true, true, true, false, false), false));
    }
}
