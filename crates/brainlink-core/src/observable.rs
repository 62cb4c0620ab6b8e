// ── Observable runtime ──
//
// One closed enum per materialized key. Holds the last known value and
// folds raw JSON updates into it. Rendering to the host happens in the
// dispatcher; this module never talks to the outside world.

use std::fmt;

use serde_json::Value;
use strum::Display;
use tracing::warn;

// ── Kinds ────────────────────────────────────────────────────────────

/// Physical quantity of a numeric measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum MeasurementClass {
    Temperature,
    Humidity,
}

impl MeasurementClass {
    pub fn unit(self) -> &'static str {
        match self {
            Self::Temperature => "°C",
            Self::Humidity => "%",
        }
    }
}

/// What a key was inferred to be on first sight.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityKind {
    Measurement(MeasurementClass),
    Binary,
    /// Read-only choice set.
    Enumerated { options: Vec<String> },
    /// Choice set the user may change from the host.
    Selectable { options: Vec<String> },
}

impl EntityKind {
    pub fn options(&self) -> &[String] {
        match self {
            Self::Enumerated { options } | Self::Selectable { options } => options,
            Self::Measurement(_) | Self::Binary => &[],
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Measurement(class) => write!(f, "{class}"),
            Self::Binary => f.write_str("binary"),
            Self::Enumerated { .. } => f.write_str("enum"),
            Self::Selectable { .. } => f.write_str("select"),
        }
    }
}

// ── State ────────────────────────────────────────────────────────────

/// Host-facing snapshot of an observable.
#[derive(Debug, Clone, PartialEq)]
pub enum ObservableState {
    Measurement(Option<f64>),
    Binary(bool),
    Option(Option<String>),
}

impl fmt::Display for ObservableState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Measurement(Some(v)) => write!(f, "{v}"),
            Self::Binary(true) => f.write_str("on"),
            Self::Binary(false) => f.write_str("off"),
            Self::Option(Some(option)) => f.write_str(option),
            Self::Measurement(None) | Self::Option(None) => f.write_str("unknown"),
        }
    }
}

// ── Runtime ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Observable {
    Measurement {
        class: MeasurementClass,
        value: Option<f64>,
    },
    Binary {
        on: bool,
    },
    Enumerated(Choice),
    Selectable {
        choice: Choice,
        /// Screen that must be shown before the value can be edited.
        screen: u32,
    },
}

/// Current option of a choice set.
#[derive(Debug, Clone, PartialEq)]
pub struct Choice {
    options: Vec<String>,
    current: Option<String>,
}

/// What the controller must be told after a local option change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditPlan {
    pub screen: u32,
    pub index: u64,
}

impl Observable {
    /// Build the runtime for `kind` from the first value seen.
    pub fn new(kind: &EntityKind, raw: &Value, screen: u32) -> Self {
        match kind {
            EntityKind::Measurement(class) => Self::Measurement {
                class: *class,
                value: raw.as_f64(),
            },
            EntityKind::Binary => Self::Binary { on: is_one(raw) },
            EntityKind::Enumerated { options } => Self::Enumerated(Choice::initial(options.clone(), raw)),
            EntityKind::Selectable { options } => Self::Selectable {
                choice: Choice::initial(options.clone(), raw),
                screen,
            },
        }
    }

    /// Fold a raw update into the held state. Returns `false` when the
    /// value was unusable and the state is unchanged.
    pub fn apply_update(&mut self, raw: &Value) -> bool {
        match self {
            Self::Measurement { class, value } => match raw.as_f64() {
                Some(v) => {
                    *value = Some(v);
                    true
                }
                None => {
                    warn!(class = %class, value = %raw, "non-numeric measurement ignored");
                    false
                }
            },
            Self::Binary { on } => {
                *on = is_one(raw);
                true
            }
            Self::Enumerated(choice) | Self::Selectable { choice, .. } => choice.apply(raw),
        }
    }

    pub fn state(&self) -> ObservableState {
        match self {
            Self::Measurement { value, .. } => ObservableState::Measurement(*value),
            Self::Binary { on } => ObservableState::Binary(*on),
            Self::Enumerated(choice) | Self::Selectable { choice, .. } => {
                ObservableState::Option(choice.current.clone())
            }
        }
    }

    pub fn is_selectable(&self) -> bool {
        matches!(self, Self::Selectable { .. })
    }

    /// Switch a selectable to `option` locally and return what must be
    /// sent to the controller. `None` for unknown options or read-only
    /// observables.
    pub fn request_option_change(&mut self, option: &str) -> Option<EditPlan> {
        let Self::Selectable { choice, screen } = self else {
            warn!(option, "option change requested on a read-only entity");
            return None;
        };
        let Some(index) = choice.options.iter().position(|o| o == option) else {
            warn!(option, options = ?choice.options, "option not offered by the controller");
            return None;
        };
        choice.current = Some(option.to_owned());
        Some(EditPlan {
            screen: *screen,
            index: u64::try_from(index).unwrap_or(u64::MAX),
        })
    }
}

impl Choice {
    fn initial(options: Vec<String>, raw: &Value) -> Self {
        let current = index_of(raw, options.len())
            .and_then(|i| options.get(i))
            .or_else(|| options.first())
            .cloned();
        Self { options, current }
    }

    fn apply(&mut self, raw: &Value) -> bool {
        match index_of(raw, self.options.len()).and_then(|i| self.options.get(i)) {
            Some(option) => {
                self.current = Some(option.clone());
                true
            }
            None => {
                warn!(value = %raw, options = self.options.len(), "choice index out of range");
                false
            }
        }
    }

    pub fn options(&self) -> &[String] {
        &self.options
    }

    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }
}

fn index_of(raw: &Value, len: usize) -> Option<usize> {
    raw.as_u64()
        .and_then(|i| usize::try_from(i).ok())
        .filter(|&i| i < len)
}

fn is_one(raw: &Value) -> bool {
    match raw {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|v| (v - 1.0).abs() < f64::EPSILON),
        _ => false,
    }
}
