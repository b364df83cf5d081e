// src/transcript.rs
//
// =============================================================================
// PREPFLOW: PROTOCOL TRANSCRIPT (v 0.1 )
// =============================================================================
//
// A bounded buffer of the operator-facing comments a run produced
// ("--> Adding FX", stage banners, resets). Each comment also goes to the
// `log` facade, so it shows up on the console as it happens.

use chrono::Local;
use std::collections::VecDeque;

pub const DEFAULT_CAPACITY: usize = 2000;

#[derive(Debug, Clone)]
pub struct Transcript {
    lines: VecDeque<String>,
    capacity: usize,
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl Transcript {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
            capacity: capacity.max(1),
        }
    }

    /// Logs and stores a comment, dropping the oldest if full.
    pub fn comment(&mut self, text: impl AsRef<str>) {
        let text = text.as_ref();
        log::info!("{}", text);

        if self.lines.len() >= self.capacity {
            self.lines.pop_front();
        }
        let timestamp = Local::now().format("%H:%M:%S");
        self.lines.push_back(format!("[{}] {}", timestamp, text));
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}
