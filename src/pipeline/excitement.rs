//! Excitement scoring for chat messages
//!
//! Scoring (0.0-1.0):
//! - Excitement emote present: 0.3, +0.1 per additional emote (max +0.2)
//! - Excitement phrase present: 0.4, +0.1 per additional phrase (max +0.2)

use super::config::DetectionConfig;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExcitementReport {
    pub emotes_found: Vec<String>,
    pub phrases_found: Vec<String>,
    pub score: f64,
}

#[derive(Debug, Clone)]
pub struct ExcitementScorer {
    /// (canonical name, uppercase form)
    emotes: Vec<(String, String)>,
    phrases: Vec<String>,
}

impl ExcitementScorer {
    pub fn new(config: &DetectionConfig) -> Self {
        Self {
            emotes: config
                .excitement_emotes
                .iter()
                .map(|e| (e.clone(), e.to_uppercase()))
                .collect(),
            phrases: config.excitement_phrases.iter().map(|p| p.to_uppercase()).collect(),
        }
    }

    pub fn check_message(&self, content: &str) -> ExcitementReport {
        if content.is_empty() {
            return ExcitementReport::default();
        }

        let upper = content.to_uppercase();

        let emotes_found: Vec<String> = self
            .emotes
            .iter()
            .filter(|(_, emote_upper)| upper.contains(emote_upper.as_str()))
            .map(|(name, _)| name.clone())
            .collect();

        let phrases_found: Vec<String> = self
            .phrases
            .iter()
            .filter(|phrase| upper.contains(phrase.as_str()))
            .cloned()
            .collect();

        let score = Self::score(emotes_found.len(), phrases_found.len());

        ExcitementReport {
            emotes_found,
            phrases_found,
            score,
        }
    }

    /// Emote tokens in free text, matched as whole words (case-insensitive).
    ///
    /// Returns canonical names, one entry per occurrence.
    pub fn emote_tokens(&self, content: &str) -> Vec<String> {
        content
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|token| !token.is_empty())
            .filter_map(|token| {
                let token_upper = token.to_uppercase();
                self.emotes
                    .iter()
                    .find(|(_, emote_upper)| *emote_upper == token_upper)
                    .map(|(name, _)| name.clone())
            })
            .collect()
    }

    fn score(emote_count: usize, phrase_count: usize) -> f64 {
        let mut score = 0.0;

        if emote_count > 0 {
            score += 0.3 + (emote_count - 1).min(2) as f64 * 0.1;
        }

        if phrase_count > 0 {
            score += 0.4 + (phrase_count - 1).min(2) as f64 * 0.1;
        }

        f64::min(score, 1.0)
    }
}
