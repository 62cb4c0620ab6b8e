//! Console host: prints entity lifecycle events to stdout.

use std::collections::HashMap;
use std::io::{self, IsTerminal, Write};
use std::sync::{Mutex, PoisonError};

use owo_colors::OwoColorize;

use brainlink_core::{EntityHost, EntitySpec, HostError, HostHandle, ObservableState};

use crate::cli::ColorMode;

/// Determine whether color output should be enabled.
pub fn should_color(mode: ColorMode) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none(),
    }
}

/// Prints one line per materialization, state change and removal.
#[derive(Debug)]
pub struct ConsoleHost {
    color: bool,
    /// Display names of live entities, plus their last printed state.
    live: Mutex<HashMap<HostHandle, (String, Option<ObservableState>)>>,
}

impl ConsoleHost {
    pub fn new(color: bool) -> Self {
        Self {
            color,
            live: Mutex::new(HashMap::new()),
        }
    }

    fn line(&self, marker: &str, name: &str, rest: &str) {
        let out = if self.color {
            format!("{} {} {rest}", marker.cyan(), name.bold())
        } else {
            format!("{marker} {name} {rest}")
        };
        let mut stdout = io::stdout().lock();
        // A closed pipe is not worth killing the session over.
        let _ = writeln!(stdout, "{}", out.trim_end());
    }
}

impl EntityHost for ConsoleHost {
    fn materialize(&self, spec: &EntitySpec) -> Result<HostHandle, HostError> {
        let handle = HostHandle(spec.unique_id());
        {
            let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
            if live.contains_key(&handle) {
                return Err(HostError::Duplicate { key: spec.key });
            }
            live.insert(handle.clone(), (spec.name.clone(), Some(spec.state.clone())));
        }
        let kind = if self.color {
            spec.kind.dimmed().to_string()
        } else {
            spec.kind.to_string()
        };
        self.line("+", &spec.name, &format!("[{} {kind}] {}", spec.key, spec.state));
        Ok(handle)
    }

    fn assign_area_and_tags(&self, handle: &HostHandle, area: Option<&str>) -> Result<(), HostError> {
        tracing::debug!(entity = %handle, area = area.unwrap_or("-"), "area assigned");
        Ok(())
    }

    fn remove_all(&self, handles: Vec<HostHandle>) {
        let removed: Vec<String> = {
            let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
            handles
                .iter()
                .filter_map(|h| live.remove(h).map(|(name, _)| name))
                .collect()
        };
        for name in removed {
            self.line("-", &name, "");
        }
    }

    fn render(&self, handle: &HostHandle, state: &ObservableState) {
        let name = {
            let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
            let Some((name, last)) = live.get_mut(handle) else {
                return;
            };
            if last.as_ref() == Some(state) {
                return;
            }
            *last = Some(state.clone());
            name.clone()
        };
        let value = if self.color {
            state.green().to_string()
        } else {
            state.to_string()
        };
        self.line("~", &name, &format!("= {value}"));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use brainlink_core::{EntityKind, Key};

    use super::*;

    fn spec() -> EntitySpec {
        EntitySpec {
            key: Key::new(15, 7, None),
            kind: EntityKind::Binary,
            name: "Heating circuit / Pump".into(),
            state: ObservableState::Binary(true),
        }
    }

    #[test]
    fn refuses_live_duplicates_until_removed() {
        let host = ConsoleHost::new(false);
        let handle = host.materialize(&spec()).unwrap();
        assert_eq!(handle, HostHandle("brain_15_7".into()));
        assert!(matches!(host.materialize(&spec()), Err(HostError::Duplicate { .. })));

        host.remove_all(vec![handle]);
        assert!(host.materialize(&spec()).is_ok());
    }

    #[test]
    fn render_tracks_last_state() {
        let host = ConsoleHost::new(false);
        let handle = host.materialize(&spec()).unwrap();
        host.render(&handle, &ObservableState::Binary(false));
        let live = host.live.lock().unwrap();
        assert_eq!(live[&handle].1, Some(ObservableState::Binary(false)));
    }
}
