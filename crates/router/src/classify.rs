//! Keyword intent classification. Lowercased substring matching against
//! fixed keyword sets, with opt-out taking precedence over conversion and
//! conversion over question.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    /// Stop messaging this recipient, permanently.
    OptOut,
    /// The recipient wants the offer; hand off to a human.
    ConversionIntent,
    /// A question needing a human answer.
    Question,
    /// Nothing recognized; logged and dropped.
    None,
}

/// The keyword vocabulary, one list per intent. Defaults are Brazilian
/// Portuguese, matching the built-in templates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordSets {
    pub opt_out: Vec<String>,
    pub conversion: Vec<String>,
    pub question: Vec<String>,
}

impl Default for KeywordSets {
    fn default() -> Self {
        fn owned(words: &[&str]) -> Vec<String> {
            words.iter().map(|w| w.to_string()).collect()
        }
        Self {
            opt_out: owned(&["não", "nao", "parar", "pare", "sair", "desinteressado"]),
            conversion: owned(&[
                "quero",
                "interessado",
                "interessada",
                "matricula",
                "matrícula",
                "plano",
                "preço",
                "preco",
                "valor",
            ]),
            question: owned(&["como", "quando", "onde", "horário", "horario", "funciona"]),
        }
    }
}

pub struct KeywordClassifier {
    keywords: KeywordSets,
}

impl KeywordClassifier {
    pub fn new(keywords: KeywordSets) -> Self {
        Self { keywords }
    }

    pub fn classify(&self, text: &str) -> Intent {
        let text = text.to_lowercase();
        let matches = |words: &[String]| words.iter().any(|w| text.contains(w.as_str()));

        if matches(&self.keywords.opt_out) {
            Intent::OptOut
        } else if matches(&self.keywords.conversion) {
            Intent::ConversionIntent
        } else if matches(&self.keywords.question) {
            Intent::Question
        } else {
            Intent::None
        }
    }
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::new(KeywordSets::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversion_keywords() {
        let classifier = KeywordClassifier::default();
        assert_eq!(
            classifier.classify("Quero saber do plano!"),
            Intent::ConversionIntent
        );
        assert_eq!(
            classifier.classify("qual o VALOR da mensalidade"),
            Intent::ConversionIntent
        );
    }

    #[test]
    fn test_question_keywords() {
        let classifier = KeywordClassifier::default();
        assert_eq!(classifier.classify("Como funciona?"), Intent::Question);
        assert_eq!(
            classifier.classify("quando abre aos sábados"),
            Intent::Question
        );
    }

    #[test]
    fn test_opt_out_takes_precedence() {
        let classifier = KeywordClassifier::default();
        assert_eq!(classifier.classify("PARAR"), Intent::OptOut);
        // Opt-out wins even when a conversion word is present.
        assert_eq!(
            classifier.classify("não quero mais receber"),
            Intent::OptOut
        );
    }

    #[test]
    fn test_unrecognized_text() {
        let classifier = KeywordClassifier::default();
        assert_eq!(classifier.classify("obrigado"), Intent::None);
        assert_eq!(classifier.classify(""), Intent::None);
    }
}
