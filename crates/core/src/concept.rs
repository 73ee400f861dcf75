use crate::lexical::fold;
use crate::traits::CompletionModel;
use crate::{CountError, Degradation};
use std::sync::Arc;
use tracing::{debug, warn};

const FEW_SHOT: &str = "Extrae el concepto jurídico de la pregunta: máximo 6 palabras, en minúsculas, \
sin cuantificadores (cuántos, porcentaje, promedio).\n\n\
P: ¿Cuántos casos de robo hay?\nC: robo\n\n\
P: Promedio de indemnizaciones en homicidio culposo\nC: homicidio culposo\n\n\
P: % de demandas por divorcio en 2023\nC: divorcio\n\n\
P: How many robbery cases are there?\nC: robo\n\n";

const CONCEPT_MAX_TOKENS: u32 = 12;

/// Quantifier and function words that never name a concept (matched accent-folded).
const STOP_WORDS: &[&str] = &[
    // es
    "cuantos", "cuantas", "cuanto", "cuanta", "numero", "tasa", "estadistica", "estadisticas",
    "porcentaje", "promedio", "media", "total", "casos", "caso", "sentencias", "sentencia",
    "expedientes", "expediente", "hay", "de", "del", "la", "las", "el", "los", "en", "por",
    "con", "que", "se", "y", "o", "a", "al", "un", "una", "unos", "unas", "base", "existen",
    "mencionan", "menciona", "sobre", "para", "es", "son",
    // en
    "how", "many", "much", "number", "of", "percentage", "percent", "average", "rate", "cases",
    "case", "are", "is", "there", "the", "a", "an", "in", "on", "about", "what", "which",
    "documents", "document", "mention", "mentions", "with", "and", "or", "do", "does",
];

/// Outcome of concept extraction: the phrase plus how it was obtained.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub concept: String,
    pub degradation: Option<Degradation>,
}

pub struct ConceptExtractor {
    model: Arc<dyn CompletionModel>,
    max_words: usize,
}

impl ConceptExtractor {
    pub fn new(model: Arc<dyn CompletionModel>, max_words: usize) -> Self {
        Self {
            model,
            max_words: max_words.max(1),
        }
    }

    /// Model-backed extraction at temperature 0, heuristic when the model fails or answers blank.
    pub async fn extract(&self, question: &str) -> Result<Extraction, CountError> {
        let prompt = format!("{FEW_SHOT}P: {}\nC:", question.trim());
        let reason = match self.model.complete(&prompt, 0.0, CONCEPT_MAX_TOKENS).await {
            Ok(raw) => {
                let concept = clean_model_concept(&raw, self.max_words);
                if !concept.is_empty() {
                    debug!(%concept, "concept extracted");
                    return Ok(Extraction {
                        concept,
                        degradation: None,
                    });
                }
                "model returned an empty concept".to_string()
            }
            Err(error) => error.to_string(),
        };

        warn!(%reason, "concept model unavailable, using heuristic");
        let concept = heuristic_concept(question, self.max_words);
        if concept.is_empty() {
            return Err(CountError::NoConcept {
                question: question.to_string(),
            });
        }
        Ok(Extraction {
            concept,
            degradation: Some(Degradation::ConceptHeuristic { reason }),
        })
    }
}

fn clean_model_concept(raw: &str, max_words: usize) -> String {
    let line = raw
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default();
    let line = line.strip_prefix("C:").unwrap_or(line);
    let trimmed = line.trim_matches(|c: char| {
        c.is_whitespace() || matches!(c, '"' | '\'' | '«' | '»' | '.' | ',' | ';' | ':' | '¿' | '?' | '¡' | '!')
    });

    trimmed
        .to_lowercase()
        .split_whitespace()
        .take(max_words)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Longest run of consecutive non-stop words in the question; earliest run wins ties.
pub fn heuristic_concept(question: &str, max_words: usize) -> String {
    let lowered = question.to_lowercase();
    let tokens = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .collect::<Vec<_>>();

    let mut best: &[&str] = &[];
    let mut start = 0;
    for end in 0..=tokens.len() {
        let is_boundary = end == tokens.len() || STOP_WORDS.contains(&fold(tokens[end]).as_str());
        if is_boundary {
            if end - start > best.len() {
                best = &tokens[start..end];
            }
            start = end + 1;
        }
    }

    best.iter()
        .take(max_words.max(1))
        .copied()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ProviderError;
    use async_trait::async_trait;

    struct FixedModel(Result<String, String>);

    #[async_trait]
    impl CompletionModel for FixedModel {
        async fn complete(&self, prompt: &str, temperature: f32, _max_tokens: u32) -> Result<String, ProviderError> {
            assert_eq!(temperature, 0.0);
            assert!(prompt.ends_with("C:"));
            self.0.clone().map_err(ProviderError::Request)
        }
    }

    fn extractor(answer: Result<&str, &str>) -> ConceptExtractor {
        let answer = answer.map(str::to_string).map_err(str::to_string);
        ConceptExtractor::new(Arc::new(FixedModel(answer)), 6)
    }

    #[tokio::test]
    async fn uses_first_line_of_model_answer() {
        let extraction = extractor(Ok("  «Robo».\nP: otra cosa"))
            .extract("how many robbery cases?")
            .await
            .expect("concept");
        assert_eq!(extraction.concept, "robo");
        assert!(extraction.degradation.is_none());
    }

    #[tokio::test]
    async fn model_answer_is_capped_to_six_words() {
        let extraction = extractor(Ok("uno dos tres cuatro cinco seis siete"))
            .extract("pregunta")
            .await
            .expect("concept");
        assert_eq!(extraction.concept, "uno dos tres cuatro cinco seis");
    }

    #[tokio::test]
    async fn provider_error_falls_back_to_heuristic() {
        let extraction = extractor(Err("timeout"))
            .extract("¿Cuántos casos de homicidio culposo hay?")
            .await
            .expect("concept");
        assert_eq!(extraction.concept, "homicidio culposo");
        assert!(matches!(
            extraction.degradation,
            Some(Degradation::ConceptHeuristic { .. })
        ));
    }

    #[tokio::test]
    async fn blank_answer_falls_back_to_heuristic() {
        let extraction = extractor(Ok("   \n"))
            .extract("how many robbery cases?")
            .await
            .expect("concept");
        assert_eq!(extraction.concept, "robbery");
    }

    #[tokio::test]
    async fn nothing_left_after_stop_words_is_no_concept() {
        let result = extractor(Err("down")).extract("¿Cuántos casos hay?").await;
        assert!(matches!(result, Err(CountError::NoConcept { .. })));
    }

    #[test]
    fn heuristic_prefers_longest_run() {
        assert_eq!(
            heuristic_concept("porcentaje de demandas por daño moral grave en 2023", 6),
            "daño moral grave"
        );
        assert_eq!(heuristic_concept("% de divorcio", 6), "divorcio");
        assert_eq!(heuristic_concept("", 6), "");
    }
}
