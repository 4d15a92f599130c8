use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

use crate::config::HumanizeConfig;

/// One key event in a typing plan. Delays are data; whoever executes the
/// plan sleeps, the planner never does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keystroke {
    pub key: KeyInput,
    pub delay_ms: u64,
    pub is_correction: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyInput {
    Char(char),
    Backspace,
}

/// Computes humanized pacing from an injected random source, so identical
/// seeds produce identical plans.
pub struct Humanizer {
    rng: StdRng,
    config: HumanizeConfig,
}

impl Humanizer {
    pub fn new(config: HumanizeConfig) -> Self {
        Self {
            rng: StdRng::from_os_rng(),
            config,
        }
    }

    pub fn seeded(config: HumanizeConfig, seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            config,
        }
    }

    /// Expand `text` into per-character keystrokes. With probability
    /// `typo_probability` per character, a wrong neighboring key plus a
    /// backspace precede the intended character, both flagged as corrections.
    pub fn typing_plan(&mut self, text: &str) -> Vec<Keystroke> {
        let typo_probability = self.config.typo_probability.clamp(0.0, 1.0);
        let mut plan = Vec::with_capacity(text.chars().count());

        for ch in text.chars() {
            if typo_probability > 0.0 && self.rng.random_bool(typo_probability) {
                let wrong = self.neighbor_of(ch);
                let wrong_delay = self.key_delay(wrong);
                plan.push(Keystroke {
                    key: KeyInput::Char(wrong),
                    delay_ms: wrong_delay,
                    is_correction: true,
                });
                let pause = self
                    .rng
                    .random_range(self.config.min_key_delay_ms..=self.config.max_key_delay_ms);
                plan.push(Keystroke {
                    key: KeyInput::Backspace,
                    delay_ms: pause,
                    is_correction: true,
                });
            }
            let delay_ms = self.key_delay(ch);
            plan.push(Keystroke {
                key: KeyInput::Char(ch),
                delay_ms,
                is_correction: false,
            });
        }

        plan
    }

    /// Randomized pause between consecutive actions.
    pub fn inter_action_delay(&mut self) -> Duration {
        let ms = self
            .rng
            .random_range(self.config.min_action_delay_ms..=self.config.max_action_delay_ms);
        Duration::from_millis(ms)
    }

    fn key_delay(&mut self, ch: char) -> u64 {
        let base = self
            .rng
            .random_range(self.config.min_key_delay_ms..=self.config.max_key_delay_ms);
        if ch.is_whitespace() || ch.is_ascii_punctuation() {
            base + self.rng.random_range(0..=self.config.pause_extra_ms)
        } else {
            base
        }
    }

    /// A plausible mistyped key: an adjacent key on a QWERTY row for
    /// letters, any lowercase letter otherwise.
    fn neighbor_of(&mut self, ch: char) -> char {
        const ROWS: [&str; 3] = ["qwertyuiop", "asdfghjkl", "zxcvbnm"];
        let lower = ch.to_ascii_lowercase();
        for row in ROWS {
            if let Some(idx) = row.find(lower) {
                let chars: Vec<char> = row.chars().collect();
                let candidates: Vec<char> = match idx {
                    0 => vec![chars[1]],
                    i if i == chars.len() - 1 => vec![chars[i - 1]],
                    i => vec![chars[i - 1], chars[i + 1]],
                };
                let pick = candidates[self.rng.random_range(0..candidates.len())];
                return if ch.is_ascii_uppercase() {
                    pick.to_ascii_uppercase()
                } else {
                    pick
                };
            }
        }
        char::from(b'a' + self.rng.random_range(0..26u8))
    }
}
