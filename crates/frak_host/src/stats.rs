//! Wall-clock timing of the render phases.
//!
//! The renderer marks the end of each phase as it goes; the report lists the
//! duration of every phase in milliseconds, right-aligned so the columns
//! line up.

use std::time::{Duration, Instant};

/// Records consecutive phase durations.
pub struct PhaseTimer {
    last: Instant,
    phases: Vec<(&'static str, Duration)>,
}

impl PhaseTimer {
    /// Starts timing the first phase now.
    pub fn start() -> Self {
        Self {
            last: Instant::now(),
            phases: Vec::new(),
        }
    }

    /// Ends the current phase under `name` and starts the next one.
    ///
    /// # Arguments
    ///
    /// * `name` - Label printed for the phase that just finished
    pub fn mark(&mut self, name: &'static str) {
        let now = Instant::now();
        self.phases.push((name, now - self.last));
        self.last = now;
    }

    pub fn phases(&self) -> &[(&'static str, Duration)] {
        &self.phases
    }

    /// Formats the report; one line per phase, durations in whole
    /// milliseconds.
    pub fn report(&self) -> String {
        let millis: Vec<String> = self
            .phases
            .iter()
            .map(|(_, d)| d.as_millis().to_string())
            .collect();
        let width = millis.iter().map(String::len).max().unwrap_or(1);

        let mut out = String::from("Timing:\n");
        for ((name, _), ms) in self.phases.iter().zip(&millis) {
            out.push_str(&format!("  {name}: {ms:>width$} ms\n"));
        }
        out
    }

    pub fn print_report(&self) {
        print!("{}", self.report());
    }
}
