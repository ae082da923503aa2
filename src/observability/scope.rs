//! Begin/outcome logging around one unit of work
//!
//! A scope logs `{EVENT}_BEGIN` at TRACE when it starts, then exactly one of
//! `{EVENT}_COMPLETE` (with `elapsed_us`), `{EVENT}_FAILED` (with `reason`)
//! or, if dropped unresolved, `{EVENT}_INCOMPLETE`.

use std::time::Instant;

use super::events::Event;
use super::logger::Logger;

pub struct ObservationScope {
    event: Event,
    fields: Vec<(&'static str, String)>,
    started: Instant,
    resolved: bool,
}

impl ObservationScope {
    /// Start a scope; `fields` are repeated on every line it logs
    pub fn begin(event: Event, fields: &[(&'static str, &str)]) -> Self {
        let scope = Self {
            event,
            fields: fields.iter().map(|(k, v)| (*k, v.to_string())).collect(),
            started: Instant::now(),
            resolved: false,
        };
        Logger::trace(&scope.name("BEGIN"), &scope.field_refs());
        scope
    }

    pub fn complete(mut self) {
        self.resolved = true;
        let elapsed = self.started.elapsed().as_micros().to_string();
        let mut fields = self.field_refs();
        fields.push(("elapsed_us", elapsed.as_str()));
        Logger::log(self.event.severity(), &self.name("COMPLETE"), &fields);
    }

    pub fn fail(mut self, reason: &str) {
        self.resolved = true;
        let mut fields = self.field_refs();
        fields.push(("reason", reason));
        Logger::warn(&self.name("FAILED"), &fields);
    }

    fn name(&self, outcome: &str) -> String {
        format!("{}_{}", self.event.as_str(), outcome)
    }

    fn field_refs(&self) -> Vec<(&str, &str)> {
        self.fields.iter().map(|(k, v)| (*k, v.as_str())).collect()
    }
}

impl Drop for ObservationScope {
    fn drop(&mut self) {
        if !self.resolved {
            Logger::warn(&self.name("INCOMPLETE"), &self.field_refs());
        }
    }
}
