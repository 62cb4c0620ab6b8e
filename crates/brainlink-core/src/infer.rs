// ── Type inference ──
//
// Decides, from the `_vid_obj` metadata of the first update for a key,
// which observable kind (if any) the key becomes. Rules are pure
// functions tried in order; the first verdict other than `Unmatched`
// wins.

use brainlink_api::wire::{PLACEHOLDER_TEXT, TYPE_CHOICE, TYPE_TEMPERATURE};
use brainlink_api::{Entry, ValueMeta};

use crate::observable::{EntityKind, MeasurementClass};

/// Outcome of running one rule (or the whole rule list).
#[derive(Debug, Clone, PartialEq)]
pub enum Inference {
    Matched(EntityKind),
    /// The rule recognised the metadata but the value is unusable.
    Rejected(&'static str),
    Unmatched,
}

type Rule = fn(&Entry, &ValueMeta) -> Inference;

const RULES: &[Rule] = &[temperature, humidity, choice];

/// Run every rule against an entry's metadata.
pub fn infer(entry: &Entry, meta: &ValueMeta) -> Inference {
    RULES
        .iter()
        .map(|rule| rule(entry, meta))
        .find(|verdict| *verdict != Inference::Unmatched)
        .unwrap_or(Inference::Unmatched)
}

fn temperature(entry: &Entry, meta: &ValueMeta) -> Inference {
    if meta.unit.as_deref() != Some("°C") || meta.type_code != Some(TYPE_TEMPERATURE) {
        return Inference::Unmatched;
    }
    if entry.value.is_number() {
        Inference::Matched(EntityKind::Measurement(MeasurementClass::Temperature))
    } else {
        Inference::Rejected("temperature value is not numeric")
    }
}

fn humidity(_entry: &Entry, meta: &ValueMeta) -> Inference {
    if meta.unit.as_deref() == Some("%") {
        Inference::Matched(EntityKind::Measurement(MeasurementClass::Humidity))
    } else {
        Inference::Unmatched
    }
}

fn choice(entry: &Entry, meta: &ValueMeta) -> Inference {
    if meta.type_code != Some(TYPE_CHOICE) {
        return Inference::Unmatched;
    }
    let options = option_labels(meta);
    if entry.is_editable() {
        return Inference::Matched(EntityKind::Selectable { options });
    }
    match options.len() {
        2 => Inference::Matched(EntityKind::Binary),
        n if n > 2 => Inference::Matched(EntityKind::Enumerated { options }),
        _ => Inference::Unmatched,
    }
}

/// Display labels of a choice set, in controller order.
pub fn option_labels(meta: &ValueMeta) -> Vec<String> {
    meta.elements
        .iter()
        .enumerate()
        .map(|(i, element)| element.label(i))
        .collect()
}

/// Entity name: screen title, value name and metadata text, each
/// trimmed, empty parts and the `???` placeholder dropped.
pub fn display_name(screen_title: Option<&str>, entry: &Entry) -> String {
    let text = entry
        .meta
        .as_ref()
        .and_then(|m| m.text.as_deref())
        .filter(|t| t.trim() != PLACEHOLDER_TEXT);

    [screen_title, entry.name.as_deref(), text]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" / ")
}
