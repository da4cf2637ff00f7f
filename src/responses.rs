use std::path::Path;

use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::error::BotResult;

/// Booking-link lead-ins that get the link appended on the next line.
const BOOKING_LEAD_INS: &[&str] = &[
    "acá te dejo el link:",
    "Acá te dejo el link:",
    "Acá tenés el link:",
    "acá tenés el link:",
    "Ahi te la paso",
    "A continuación te dejo el link:",
];

const BOOKING_PLACEHOLDERS: &[&str] = &["(link de agenda)", "(link de la agenda)"];

const MAPS_PLACEHOLDERS: &[&str] = &[
    "(link de Google Maps)",
    "(https://maps.app.goo.gl/uaJPmJrxUJr5wZE87)",
];

#[derive(Debug, Clone, PartialEq, Eq)]
struct Slot {
    intent: String,
    key: String,
    text: String,
}

/// Canned answers keyed by intent, then by slot, in file order.
#[derive(Debug, Clone, Default)]
pub struct CannedResponses {
    slots: Vec<Slot>,
}

impl CannedResponses {
    /// Loads the table; a missing or malformed file yields an empty table.
    pub fn load(path: &Path) -> Self {
        match Self::read(path) {
            Ok(responses) => {
                info!(
                    path = %path.display(),
                    slots = responses.slots.len(),
                    "canned responses loaded"
                );
                responses
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "canned responses unavailable");
                Self::default()
            }
        }
    }

    fn read(path: &Path) -> BotResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Entries that are not `{intent: {key: text}}` are skipped.
    pub fn from_json_str(raw: &str) -> BotResult<Self> {
        let table: Map<String, Value> = serde_json::from_str(raw)?;
        let mut slots = Vec::new();
        for (intent, entries) in table {
            let Some(entries) = entries.as_object() else {
                warn!(%intent, "canned intent is not an object, skipped");
                continue;
            };
            for (key, text) in entries {
                match text.as_str() {
                    Some(text) => slots.push(Slot {
                        intent: intent.clone(),
                        key: key.clone(),
                        text: text.to_string(),
                    }),
                    None => warn!(%intent, %key, "canned answer is not text, skipped"),
                }
            }
        }
        Ok(CannedResponses { slots })
    }

    pub fn get(&self, intent: &str, key: &str) -> Option<&str> {
        self.slots
            .iter()
            .find(|slot| slot.intent == intent && slot.key == key)
            .map(|slot| slot.text.as_str())
    }

    /// Every `intent.key` pair, in file order.
    pub fn keys(&self) -> Vec<String> {
        self.slots
            .iter()
            .map(|slot| format!("{}.{}", slot.intent, slot.key))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

pub fn replace_links(text: &str, booking_link: &str, maps_link: &str) -> String {
    let mut out = text.to_string();
    if !booking_link.is_empty() {
        for placeholder in BOOKING_PLACEHOLDERS {
            out = out.replace(placeholder, booking_link);
        }
        for lead_in in BOOKING_LEAD_INS {
            out = out.replace(lead_in, &format!("{lead_in}\n{booking_link}"));
        }
    }
    if !maps_link.is_empty() {
        for placeholder in MAPS_PLACEHOLDERS {
            out = out.replace(placeholder, maps_link);
        }
    }
    out
}
