use std::collections::VecDeque;

use serde::Serialize;

/// Most recent chat messages kept in the feed.
pub const MAX_CHAT_HISTORY: usize = 200;

/// Chat channel category, resolved from the localized channel label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatCategory {
    Vicinity,
    Private,
    Group,
    Guild,
    Trade,
    Community,
    Recruitment,
    Politics,
    Pvp,
    Other,
}

/// Ordered substring rules: first match wins. Each row lists the localized
/// fragments that identify one category.
const CATEGORY_RULES: &[(ChatCategory, &[&str])] = &[
    (
        ChatCategory::Vicinity,
        &["vicinity", "proximit", "local", "vizinhança"],
    ),
    (ChatCategory::Private, &["private", "whisper", "priv"]),
    (ChatCategory::Group, &["group", "groupe", "grupo"]),
    (ChatCategory::Guild, &["guild", "guilde", "gremio"]),
    (ChatCategory::Trade, &["trade", "commerce", "comercio"]),
    (
        ChatCategory::Community,
        &["community", "communaut", "comunidad", "comunidade"],
    ),
    (
        ChatCategory::Recruitment,
        &["recruitment", "recrutement", "reclutamiento", "recrutamento"],
    ),
    (ChatCategory::Politics, &["politic"]),
    (ChatCategory::Pvp, &["pvp", "jcj", "camp"]),
];

pub fn resolve_category(channel: &str) -> ChatCategory {
    let lower = channel.to_lowercase();
    for (category, fragments) in CATEGORY_RULES {
        if fragments.iter().any(|f| lower.contains(f)) {
            return *category;
        }
    }
    ChatCategory::Other
}

/// A chat line split into its parts, before feed insertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedChatLine {
    pub time: String,
    pub channel: String,
    pub author: String,
    pub message: String,
}

/// Split `HH:MM:SS,mmm - [Channel] Author : Message`. Channel and author
/// both degrade: bracketless lines with an author become Vicinity chatter,
/// authorless lines keep the whole remainder as the message.
pub fn parse_chat_line(line: &str) -> Option<ParsedChatLine> {
    let (timestamp, rest) = line.split_once(" - ")?;
    let time = timestamp.split(',').next().unwrap_or(timestamp).to_string();

    let mut channel = "General".to_string();
    let mut author = String::new();
    let mut message = rest.to_string();

    if let Some(after_bracket) = rest.strip_prefix('[') {
        if let Some((chan, content)) = after_bracket.split_once("] ") {
            channel = chan.to_string();
            match content.split_once(" : ") {
                Some((a, m)) => {
                    author = a.to_string();
                    message = m.to_string();
                }
                None => message = content.to_string(),
            }
            return Some(ParsedChatLine {
                time,
                channel,
                author,
                message,
            });
        }
    }

    if let Some((a, m)) = rest.split_once(" : ") {
        author = a.to_string();
        message = m.to_string();
        channel = "Vicinity".to_string();
    }
    Some(ParsedChatLine {
        time,
        channel,
        author,
        message,
    })
}

/// One message as stored and served; translations are attached later by
/// message id, never by queue position.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub id: u64,
    pub time: String,
    pub channel: String,
    pub category: ChatCategory,
    pub author: String,
    pub message: String,
    pub translation: Option<String>,
}

/// Bounded chat feed, oldest messages evicted first.
#[derive(Debug, Default)]
pub struct ChatFeed {
    messages: VecDeque<ChatMessage>,
    next_id: u64,
}

impl ChatFeed {
    pub fn push(&mut self, parsed: ParsedChatLine) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.messages.push_back(ChatMessage {
            id,
            time: parsed.time,
            category: resolve_category(&parsed.channel),
            channel: parsed.channel,
            author: parsed.author,
            message: parsed.message,
            translation: None,
        });
        while self.messages.len() > MAX_CHAT_HISTORY {
            self.messages.pop_front();
        }
        id
    }

    pub fn message_text(&self, id: u64) -> Option<String> {
        self.messages
            .iter()
            .find(|m| m.id == id)
            .map(|m| m.message.clone())
    }

    /// Attach a translation; false if the message already fell off the feed.
    pub fn set_translation(&mut self, id: u64, translation: String) -> bool {
        match self.messages.iter_mut().find(|m| m.id == id) {
            Some(message) => {
                message.translation = Some(translation);
                true
            }
            None => false,
        }
    }

    pub fn messages(&self) -> impl Iterator<Item = &ChatMessage> {
        self.messages.iter()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

/// Closed word lists for the ES/PT tie-breaker. Not a language model: just
/// enough signal to keep "detected PT but is really ES" translations quiet.
const ES_UNIQUE: &[&str] = &[
    "y", "el", "la", "los", "las", "en", "un", "una", "es", "del", "al", "lo", "le", "su", "sus",
    "pero", "con", "sin", "muy", "mi", "mis", "ti", "si", "bien", "bueno", "yo", "tu", "él",
    "ella", "nosotros", "ellos", "ellas", "usted",
];

const PT_UNIQUE: &[&str] = &[
    "e", "o", "os", "as", "em", "um", "uma", "é", "do", "ao", "da", "na", "no", "dos", "das",
    "nas", "nos", "seu", "sua", "com", "sem", "muito", "minha", "teu", "tua", "ele", "ela",
    "nós", "eles", "elas", "você", "bom", "boa", "não", "são",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LanguageScores {
    pub es: u32,
    pub pt: u32,
}

/// Score free text for Spanish vs Portuguese features: closed-class word
/// hits plus heavily-weighted diacritics unique to each language.
pub fn language_scores(text: &str) -> LanguageScores {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() || ('\u{C0}'..='\u{FF}').contains(&c) {
                c
            } else {
                ' '
            }
        })
        .collect();

    let mut scores = LanguageScores { es: 0, pt: 0 };
    for word in cleaned.split_whitespace() {
        if ES_UNIQUE.contains(&word) {
            scores.es += 1;
        }
        if PT_UNIQUE.contains(&word) {
            scores.pt += 1;
        }
        if word.contains('ñ') {
            scores.es += 5;
        }
        if word.contains('ç') || word.contains('ã') || word.contains('õ') {
            scores.pt += 5;
        }
    }
    scores
}
