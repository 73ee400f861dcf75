use crate::traits::CompletionModel;
use crate::{ConceptQuery, Degradation};
use moka::sync::Cache;
use std::sync::Arc;
use tracing::{debug, warn};

const SYNONYM_MAX_TOKENS: u32 = 40;

/// Expands a canonical concept into related terms, memoized per concept.
pub struct SynonymExpander {
    model: Arc<dyn CompletionModel>,
    max_synonyms: usize,
    cache: Cache<String, Arc<Vec<String>>>,
}

impl SynonymExpander {
    pub fn new(model: Arc<dyn CompletionModel>, max_synonyms: usize, cache_capacity: u64) -> Self {
        Self {
            model,
            max_synonyms,
            cache: Cache::builder().max_capacity(cache_capacity).build(),
        }
    }

    /// On provider failure the query holds only the concept and nothing is cached.
    pub async fn expand(&self, concept: &str) -> (ConceptQuery, Option<Degradation>) {
        if let Some(cached) = self.cache.get(concept) {
            debug!(%concept, "synonym cache hit");
            return (ConceptQuery::new(concept, cached.iter().cloned()), None);
        }

        let prompt = format!(
            "Da hasta {} sinónimos o delitos afines de «{concept}» \
             (minúsculas, separados por coma, sin explicación)",
            self.max_synonyms
        );
        match self.model.complete(&prompt, 0.0, SYNONYM_MAX_TOKENS).await {
            Ok(raw) => {
                let synonyms = parse_synonyms(&raw, concept, self.max_synonyms);
                debug!(%concept, ?synonyms, "synonyms expanded");
                self.cache
                    .insert(concept.to_string(), Arc::new(synonyms.clone()));
                (ConceptQuery::new(concept, synonyms), None)
            }
            Err(error) => {
                warn!(%concept, %error, "synonym expansion failed, counting the concept alone");
                (
                    ConceptQuery::new(concept, Vec::new()),
                    Some(Degradation::SynonymFallback {
                        reason: error.to_string(),
                    }),
                )
            }
        }
    }

    pub fn cached_entries(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.entry_count()
    }
}

fn parse_synonyms(raw: &str, concept: &str, max_synonyms: usize) -> Vec<String> {
    let mut synonyms: Vec<String> = Vec::new();
    for candidate in raw.split([',', '\n', ';']) {
        let term = candidate
            .trim_matches(|c: char| c.is_whitespace() || matches!(c, '.' | '-' | '*' | '"' | '«' | '»'))
            .to_lowercase();
        if term.is_empty() || term == concept || synonyms.contains(&term) {
            continue;
        }
        if synonyms.len() == max_synonyms {
            break;
        }
        synonyms.push(term);
    }
    synonyms
}
