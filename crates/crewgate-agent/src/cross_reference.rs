//! Cross-reference injection for multi-bot replies.
//!
//! With some probability, a bot's response gets prefixed with a themed line
//! pointing at another participating bot, so a fan-out reads like a room of
//! colleagues instead of N isolated completions.

use rand::Rng;

use crate::multi_bot::BotResponse;

/// Chance that any given response gets a cross-reference.
const INJECTION_PROBABILITY: f64 = 0.4;

/// Reference line templates per theme; `{to_bot}` is substituted.
fn theme_templates(theme: &str) -> &'static [&'static str] {
    let theme = theme.to_lowercase();
    if theme.contains("pirate") {
        &[
            "Arr, {to_bot} be right about this. ",
            "As {to_bot} would say... ",
            "{to_bot} speaks true, me hearties. ",
        ]
    } else if theme.contains("rock") || theme.contains("band") {
        &[
            "{to_bot} is totally on the same wavelength. ",
            "Like {to_bot} always says, ",
            "{to_bot} really gets the vibe here. ",
        ]
    } else if theme.contains("space") {
        &[
            "Commander {to_bot} confirms this. ",
            "As noted in the briefing by {to_bot}, ",
            "{to_bot}'s analysis is correct. ",
        ]
    } else if theme.contains("executive") || theme.contains("corp") {
        &[
            "I agree with {to_bot}'s assessment. ",
            "Building on {to_bot}'s point... ",
            "{to_bot} raises an important consideration. ",
        ]
    } else if theme.contains("swat") {
        &[
            "{to_bot} has eyes on this. ",
            "Per {to_bot}'s intel... ",
            "{to_bot} confirms the target. ",
        ]
    } else {
        &[
            "{to_bot} makes a good point. ",
            "As {to_bot} mentioned... ",
            "I agree with {to_bot}. ",
        ]
    }
}

/// Prefixes responses with themed references to other bots.
pub struct CrossReferenceInjector {
    theme: String,
}

impl CrossReferenceInjector {
    pub fn new(theme: impl Into<String>) -> Self {
        Self {
            theme: theme.into(),
        }
    }

    /// Roll per response; a hit prefixes a reference to a random other bot.
    /// Returns how many references were added.
    pub fn inject(&self, responses: &mut [BotResponse]) -> usize {
        self.inject_with_rng(responses, &mut rand::thread_rng())
    }

    /// Injection with a caller-supplied RNG so tests are deterministic.
    pub fn inject_with_rng<R: Rng>(&self, responses: &mut [BotResponse], rng: &mut R) -> usize {
        if responses.len() < 2 {
            return 0;
        }

        let names: Vec<String> = responses.iter().map(|r| r.bot_name.clone()).collect();
        let templates = theme_templates(&self.theme);
        let mut added = 0;

        for response in responses.iter_mut() {
            if rng.gen::<f64>() > INJECTION_PROBABILITY {
                continue;
            }
            // Skip bots whose call failed; referencing into an error reads
            // wrong.
            if response.is_error {
                continue;
            }
            let others: Vec<&String> =
                names.iter().filter(|n| **n != response.bot_name).collect();
            if others.is_empty() {
                continue;
            }
            let target = others[rng.gen_range(0..others.len())];
            let template = templates[rng.gen_range(0..templates.len())];
            let reference = template.replace("{to_bot}", target);
            response.content = format!("{reference}{}", response.content);
            added += 1;
        }
        added
    }
}
