use async_trait::async_trait;

use super::{ClassifyError, SentimentClassifier};
use crate::model::{Classification, Sentiment};

const POSITIVE: &[&str] = &[
    "отлично",
    "прекрасно",
    "хорошо",
    "замечательно",
    "супер",
    "класс",
    "люблю",
    "нравится",
    "спасибо",
    "благодарю",
    "восхитительно",
    "великолепно",
    "потрясающе",
];

const NEGATIVE: &[&str] = &[
    "плохо",
    "ужасно",
    "отвратительно",
    "ненавижу",
    "не нравится",
    "гадость",
    "кошмар",
    "ужас",
    "мерзость",
    "плохой",
    "негативный",
    "проблема",
    "ошибка",
];

/// Offline fallback: counts Russian sentiment keywords. Used when no
/// YandexGPT credentials are configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordClassifier;

impl KeywordClassifier {
    pub fn score(text: &str) -> Classification {
        let lower = text.to_lowercase();
        let count = |words: &[&str]| words.iter().filter(|w| lower.contains(*w)).count();
        let positive = count(POSITIVE);
        let negative = count(NEGATIVE);

        let strength = |n: usize| (0.5 + n as f64 * 0.1).min(0.9);
        if positive > negative {
            Classification::new(Sentiment::Positive, strength(positive))
        } else if negative > positive {
            Classification::new(Sentiment::Negative, strength(negative))
        } else {
            Classification::new(Sentiment::Neutral, 0.5)
        }
    }
}

#[async_trait]
impl SentimentClassifier for KeywordClassifier {
    fn name(&self) -> &'static str {
        "keywords"
    }

    async fn classify(&self, text: &str) -> Result<Option<Classification>, ClassifyError> {
        Ok(Some(Self::score(text)))
    }
}
