use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Sentiment labels a comment can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Negative => "negative",
            Sentiment::Neutral => "neutral",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Sentiment::Positive => "Позитив",
            Sentiment::Negative => "Негатив",
            Sentiment::Neutral => "Нейтрально",
        }
    }

    pub fn css_class(&self) -> &'static str {
        match self {
            Sentiment::Positive => "sentiment-positive",
            Sentiment::Negative => "sentiment-negative",
            Sentiment::Neutral => "sentiment-neutral",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Sentiment::Positive => "🟢",
            Sentiment::Negative => "🔴",
            Sentiment::Neutral => "⚪",
        }
    }

    pub fn all() -> &'static [Sentiment] {
        &[Sentiment::Positive, Sentiment::Negative, Sentiment::Neutral]
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sentiment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "positive" => Ok(Sentiment::Positive),
            "negative" => Ok(Sentiment::Negative),
            "neutral" => Ok(Sentiment::Neutral),
            other => Err(format!("unknown sentiment: {other}")),
        }
    }
}

/// A sentiment decision: label and confidence always travel together.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub sentiment: Sentiment,
    /// Confidence in [0, 1]
    pub score: f64,
}

impl Classification {
    pub fn new(sentiment: Sentiment, score: f64) -> Self {
        Self { sentiment, score }
    }

    pub fn score_in_range(&self) -> bool {
        (0.0..=1.0).contains(&self.score)
    }
}
