use crate::adjudicator::AdjudicatorChain;
use crate::concept::ConceptExtractor;
use crate::embeddings::Embedder;
use crate::retriever::{HybridRetriever, TermRetrieval};
use crate::synonyms::SynonymExpander;
use crate::traits::{CompletionModel, Reranker, VectorIndex};
use crate::{CountError, CountOptions, CountReport, Degradation, DocumentIdentity, GreyCandidate};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Answers "how many documents are about X" for one corpus.
///
/// Built once at start-up; the embedder, index and models are shared read-only
/// across concurrent counts.
pub struct ConceptCounter {
    extractor: ConceptExtractor,
    expander: SynonymExpander,
    retriever: HybridRetriever,
    adjudicator: AdjudicatorChain,
    options: Arc<CountOptions>,
}

impl ConceptCounter {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        model: Arc<dyn CompletionModel>,
        reranker: Option<Arc<dyn Reranker>>,
        options: CountOptions,
    ) -> Result<Self, CountError> {
        options.validate()?;
        let adjudicator = AdjudicatorChain::from_options(reranker, model.clone(), &options);
        Ok(Self::from_parts(embedder, index, model, adjudicator, options))
    }

    /// Same as [`ConceptCounter::new`] with a caller-assembled adjudication chain.
    pub fn with_adjudicator(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        model: Arc<dyn CompletionModel>,
        adjudicator: AdjudicatorChain,
        options: CountOptions,
    ) -> Result<Self, CountError> {
        options.validate()?;
        Ok(Self::from_parts(embedder, index, model, adjudicator, options))
    }

    fn from_parts(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        model: Arc<dyn CompletionModel>,
        adjudicator: AdjudicatorChain,
        options: CountOptions,
    ) -> Self {
        let options = Arc::new(options);
        Self {
            extractor: ConceptExtractor::new(model.clone(), options.max_concept_words),
            expander: SynonymExpander::new(model, options.max_synonyms, options.synonym_cache_capacity),
            retriever: HybridRetriever::new(embedder, index, options.clone()),
            adjudicator,
            options,
        }
    }

    pub fn options(&self) -> &CountOptions {
        &self.options
    }

    /// Number of distinct documents about the concept named in `question`.
    pub async fn count_concept(&self, question: &str) -> Result<usize, CountError> {
        Ok(self.count_report(question).await?.count)
    }

    /// Runs [`ConceptCounter::count_concept`] to completion on a private runtime.
    /// Returns [`CountError::InsideRuntime`] when called from an async context.
    pub fn count_concept_blocking(&self, question: &str) -> Result<usize, CountError> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(CountError::InsideRuntime);
        }
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        runtime.block_on(self.count_concept(question))
    }

    pub async fn count_report(&self, question: &str) -> Result<CountReport, CountError> {
        if question.trim().is_empty() {
            return Err(CountError::EmptyQuestion);
        }

        let extraction = self.extractor.extract(question).await?;
        let mut report = self.count_for_concept(question, &extraction.concept).await;
        if let Some(degradation) = extraction.degradation {
            report.degradations.insert(0, degradation);
        }

        info!(
            concept = %report.concept,
            count = report.count,
            degraded = report.is_degraded(),
            "concept counted"
        );
        Ok(report)
    }

    /// Counts documents for an already canonical concept.
    pub async fn count_for_concept(&self, question: &str, concept: &str) -> CountReport {
        let (query, synonym_degradation) = self.expander.expand(concept).await;
        let mut degradations: Vec<Degradation> = synonym_degradation.into_iter().collect();

        let retrievals = self.retrieve_all(&query.terms, &mut degradations).await;

        let retrieved_hits: usize = retrievals.iter().map(|outcome| outcome.retrieved).sum();
        let mut identities: HashSet<DocumentIdentity> = HashSet::new();
        let mut grey: Vec<GreyCandidate> = Vec::new();
        for outcome in retrievals {
            identities.extend(outcome.confirmed);
            grey.extend(outcome.grey);
        }
        let confident = identities.len();

        // A document with one confident chunk needs no adjudication.
        grey.retain(|candidate| !identities.contains(&candidate.identity));
        let grey_pending = grey.len();
        debug!(%concept, confident, grey = grey_pending, "adjudicating grey hits");

        let (accepted, adjudication_degradations) = self.adjudicator.resolve(concept, grey).await;
        degradations.extend(adjudication_degradations);
        let before = identities.len();
        identities.extend(accepted);
        let adjudicated = identities.len() - before;

        CountReport {
            question: question.to_string(),
            concept: concept.to_string(),
            terms: query.terms,
            retrieved_hits,
            confident,
            grey: grey_pending,
            adjudicated,
            count: identities.len(),
            degradations,
        }
    }

    /// One task per term; a failed or panicked task contributes an empty retrieval.
    async fn retrieve_all(
        &self,
        terms: &[String],
        degradations: &mut Vec<Degradation>,
    ) -> Vec<TermRetrieval> {
        let handles = terms
            .iter()
            .map(|term| {
                let retriever = self.retriever.clone();
                let owned = term.clone();
                let top_k = self.options.top_k;
                let handle = tokio::spawn(async move { retriever.retrieve(&owned, top_k).await });
                (term.clone(), handle)
            })
            .collect::<Vec<_>>();

        let mut outcomes = Vec::with_capacity(handles.len());
        for (term, handle) in handles {
            let reason = match handle.await {
                Ok(Ok(outcome)) => {
                    outcomes.push(outcome);
                    continue;
                }
                Ok(Err(error)) => error.to_string(),
                Err(join_error) => join_error.to_string(),
            };
            warn!(%term, %reason, "term retrieval failed, contributing nothing");
            degradations.push(Degradation::TermRetrieval {
                term: term.clone(),
                reason,
            });
            outcomes.push(TermRetrieval::empty(term));
        }
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adjudicator::{Adjudicator, LlmBatchAdjudicator};
    use crate::{Chunk, Metadata, ProviderError, RetrievalHit};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Embeds a term as a one-hot vector keyed by term name.
    struct TermEmbedder {
        terms: Vec<&'static str>,
    }

    #[async_trait]
    impl Embedder for TermEmbedder {
        fn dimensions(&self) -> usize {
            self.terms.len()
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
            let position = self
                .terms
                .iter()
                .position(|term| *term == text)
                .ok_or_else(|| ProviderError::Request(format!("unknown term {text}")))?;
            let mut vector = vec![0.0; self.terms.len()];
            vector[position] = 1.0;
            Ok(vector)
        }
    }

    /// Returns canned hits per query vector position.
    #[derive(Default)]
    struct ScriptedIndex {
        by_position: HashMap<usize, Vec<RetrievalHit>>,
        failing: Vec<usize>,
    }

    #[async_trait]
    impl VectorIndex for ScriptedIndex {
        async fn search(&self, query_vector: &[f32], k: usize) -> Result<Vec<RetrievalHit>, ProviderError> {
            let position = query_vector
                .iter()
                .position(|value| *value == 1.0)
                .unwrap_or_default();
            if self.failing.contains(&position) {
                return Err(ProviderError::NotReady("index shard".into()));
            }
            Ok(self
                .by_position
                .get(&position)
                .map(|hits| hits.iter().take(k).cloned().collect())
                .unwrap_or_default())
        }
    }

    /// Routes prompts to canned answers by prompt prefix.
    struct RoutedModel {
        concept: Result<&'static str, ()>,
        synonyms: Result<&'static str, ()>,
        verdicts: Mutex<Vec<Result<&'static str, ()>>>,
    }

    #[async_trait]
    impl CompletionModel for RoutedModel {
        async fn complete(&self, prompt: &str, temperature: f32, _max_tokens: u32) -> Result<String, ProviderError> {
            assert_eq!(temperature, 0.0);
            let answer = if prompt.starts_with("Extrae") {
                self.concept
            } else if prompt.starts_with("Da hasta") {
                self.synonyms
            } else {
                self.verdicts.lock().expect("lock").pop().unwrap_or(Err(()))
            };
            answer
                .map(str::to_string)
                .map_err(|_| ProviderError::NotReady("llm".into()))
        }
    }

    fn hit(text: &str, nuc: Option<&str>, distance: f32) -> RetrievalHit {
        let metadata: Metadata = match nuc {
            Some(nuc) => serde_json::from_value(json!({ "NUC": nuc })).expect("metadata"),
            None => Metadata::new(),
        };
        RetrievalHit {
            chunk: Chunk::new(text, metadata),
            distance,
        }
    }

    fn counter(index: ScriptedIndex, model: RoutedModel) -> ConceptCounter {
        ConceptCounter::new(
            Arc::new(TermEmbedder {
                terms: vec!["robo", "hurto"],
            }),
            Arc::new(index),
            Arc::new(model),
            None,
            CountOptions::default(),
        )
        .expect("counter")
    }

    fn robbery_corpus() -> ScriptedIndex {
        let mut by_position = HashMap::new();
        by_position.insert(
            0,
            vec![
                hit("condenado por robo con violencia", Some("N-1"), 0.3),
                hit("el robo se cometió de noche", Some("N-2"), 0.8),
                hit("segundo fragmento: robo agravado", Some("N-2"), 0.9),
                hit("tentativa de robos en local", Some("N-3"), 1.1),
                hit("escalamiento y hurto de vivienda", Some("N-4"), 0.2),
                hit("robo sin expediente", None, 0.1),
            ],
        );
        ScriptedIndex {
            by_position,
            failing: Vec::new(),
        }
    }

    #[tokio::test]
    async fn robbery_scenario_counts_three_documents() {
        let model = RoutedModel {
            concept: Ok("robo"),
            synonyms: Err(()),
            verdicts: Mutex::new(vec![Ok("S")]),
        };
        let report = counter(robbery_corpus(), model)
            .count_report("how many robbery cases?")
            .await
            .expect("report");

        assert_eq!(report.concept, "robo");
        assert_eq!(report.confident, 2);
        assert_eq!(report.grey, 1);
        assert_eq!(report.adjudicated, 1);
        assert_eq!(report.count, 3);
        assert!(report.retrieved_hits >= report.count);
    }

    #[tokio::test]
    async fn counting_is_idempotent() {
        let counter = counter(
            robbery_corpus(),
            RoutedModel {
                concept: Ok("robo"),
                synonyms: Ok("hurto"),
                verdicts: Mutex::new(vec![Ok("S"), Ok("S")]),
            },
        );
        let first = counter.count_concept("¿Cuántos casos de robo hay?").await.expect("count");
        let second = counter.count_concept("¿Cuántos casos de robo hay?").await.expect("count");
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn adjudication_failure_counts_confident_hits_only() {
        let model = RoutedModel {
            concept: Ok("robo"),
            synonyms: Err(()),
            verdicts: Mutex::new(vec![Err(())]),
        };
        let report = counter(robbery_corpus(), model)
            .count_report("how many robbery cases?")
            .await
            .expect("report");
        assert_eq!(report.count, report.confident);
        assert_eq!(report.count, 2);
        assert!(report.is_degraded());
    }

    #[tokio::test]
    async fn document_found_by_two_terms_counts_once() {
        let mut by_position = HashMap::new();
        by_position.insert(0, vec![hit("robo en la vivienda con hurto", Some("N-9"), 0.2)]);
        by_position.insert(1, vec![hit("robo en la vivienda con hurto", Some("n-9 "), 1.1)]);
        let model = RoutedModel {
            concept: Ok("robo"),
            synonyms: Ok("hurto"),
            verdicts: Mutex::new(vec![Ok("N")]),
        };
        let report = counter(
            ScriptedIndex {
                by_position,
                failing: Vec::new(),
            },
            model,
        )
        .count_report("how many robbery cases?")
        .await
        .expect("report");

        assert_eq!(report.terms, vec!["robo".to_string(), "hurto".to_string()]);
        assert_eq!(report.count, 1);
        assert_eq!(report.grey, 0);
    }

    #[tokio::test]
    async fn failed_term_degrades_to_empty_contribution() {
        let mut index = robbery_corpus();
        index.failing.push(1);
        let model = RoutedModel {
            concept: Ok("robo"),
            synonyms: Ok("hurto"),
            verdicts: Mutex::new(vec![Ok("S")]),
        };
        let report = counter(index, model)
            .count_report("how many robbery cases?")
            .await
            .expect("report");
        assert_eq!(report.count, 3);
        assert!(report
            .degradations
            .iter()
            .any(|degradation| matches!(degradation, Degradation::TermRetrieval { term, .. } if term == "hurto")));
    }

    #[tokio::test]
    async fn missing_concept_is_an_error_not_zero() {
        let model = RoutedModel {
            concept: Err(()),
            synonyms: Err(()),
            verdicts: Mutex::new(Vec::new()),
        };
        let result = counter(robbery_corpus(), model)
            .count_concept("¿Cuántos casos hay?")
            .await;
        assert!(matches!(result, Err(CountError::NoConcept { .. })));
    }

    #[tokio::test]
    async fn empty_corpus_result_is_zero() {
        let model = RoutedModel {
            concept: Ok("robo"),
            synonyms: Err(()),
            verdicts: Mutex::new(Vec::new()),
        };
        let count = counter(ScriptedIndex::default(), model)
            .count_concept("how many robbery cases?")
            .await
            .expect("count");
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn empty_question_is_rejected() {
        let model = RoutedModel {
            concept: Ok("robo"),
            synonyms: Err(()),
            verdicts: Mutex::new(Vec::new()),
        };
        let result = counter(robbery_corpus(), model).count_concept("   ").await;
        assert!(matches!(result, Err(CountError::EmptyQuestion)));
    }

    #[tokio::test]
    async fn custom_chain_is_used() {
        struct AcceptAll;

        #[async_trait]
        impl Adjudicator for AcceptAll {
            fn name(&self) -> &'static str {
                "accept-all"
            }

            async fn adjudicate(&self, _concept: &str, pending: Vec<GreyCandidate>) -> crate::adjudicator::Adjudication {
                crate::adjudicator::Adjudication {
                    accepted: pending.into_iter().map(|candidate| candidate.identity).collect(),
                    ..Default::default()
                }
            }
        }

        let model: Arc<dyn CompletionModel> = Arc::new(RoutedModel {
            concept: Ok("robo"),
            synonyms: Err(()),
            verdicts: Mutex::new(Vec::new()),
        });
        let chain = AdjudicatorChain::new(vec![
            Box::new(AcceptAll),
            Box::new(LlmBatchAdjudicator::new(model.clone(), 20, 240)),
        ]);
        let counter = ConceptCounter::with_adjudicator(
            Arc::new(TermEmbedder {
                terms: vec!["robo", "hurto"],
            }),
            Arc::new(robbery_corpus()),
            model,
            chain,
            CountOptions::default(),
        )
        .expect("counter");
        assert_eq!(counter.count_concept("robo").await.expect("count"), 3);
    }

    #[test]
    fn blocking_entry_point_runs_outside_runtime() {
        let model = RoutedModel {
            concept: Ok("robo"),
            synonyms: Err(()),
            verdicts: Mutex::new(vec![Ok("S")]),
        };
        let count = counter(robbery_corpus(), model)
            .count_concept_blocking("how many robbery cases?")
            .expect("count");
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn blocking_entry_point_refuses_nested_runtime() {
        let model = RoutedModel {
            concept: Ok("robo"),
            synonyms: Err(()),
            verdicts: Mutex::new(Vec::new()),
        };
        let result = counter(robbery_corpus(), model).count_concept_blocking("¿Cuántos casos de robo hay?");
        assert!(matches!(result, Err(CountError::InsideRuntime)));
    }

    #[test]
    fn invalid_options_are_rejected() {
        let model = RoutedModel {
            concept: Ok("robo"),
            synonyms: Err(()),
            verdicts: Mutex::new(Vec::new()),
        };
        let result = ConceptCounter::new(
            Arc::new(TermEmbedder { terms: vec!["robo"] }),
            Arc::new(ScriptedIndex::default()),
            Arc::new(model),
            None,
            CountOptions {
                top_k: 0,
                ..CountOptions::default()
            },
        );
        assert!(matches!(result, Err(CountError::InvalidOptions(_))));
    }
}
