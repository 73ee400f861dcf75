//! Grey-zone adjudication.
//!
//! Each [`Adjudicator`] resolves what it can and hands back the rest as
//! `unresolved`; [`AdjudicatorChain`] feeds those to the next stage and rejects
//! whatever is still unresolved at the end.

use crate::traits::{CompletionModel, Reranker};
use crate::{CountOptions, Degradation, DocumentIdentity, GreyCandidate};
use async_trait::async_trait;
use regex::Regex;
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct Adjudication {
    pub accepted: HashSet<DocumentIdentity>,
    pub unresolved: Vec<GreyCandidate>,
    pub degradations: Vec<Degradation>,
}

#[async_trait]
pub trait Adjudicator: Send + Sync {
    fn name(&self) -> &'static str;

    async fn adjudicate(&self, concept: &str, pending: Vec<GreyCandidate>) -> Adjudication;
}

/// Accepts grey hits whose cross-encoder score clears a fixed cutoff.
pub struct CrossEncoderAdjudicator {
    reranker: Arc<dyn Reranker>,
    cutoff: f32,
    prefix_chars: usize,
    escalate_rejections: bool,
}

impl CrossEncoderAdjudicator {
    pub fn new(reranker: Arc<dyn Reranker>, cutoff: f32, prefix_chars: usize) -> Self {
        Self {
            reranker,
            cutoff,
            prefix_chars,
            escalate_rejections: false,
        }
    }

    /// Below-cutoff items go to the next stage instead of being rejected.
    pub fn escalate_rejections(mut self, escalate: bool) -> Self {
        self.escalate_rejections = escalate;
        self
    }
}

#[async_trait]
impl Adjudicator for CrossEncoderAdjudicator {
    fn name(&self) -> &'static str {
        "cross-encoder"
    }

    async fn adjudicate(&self, concept: &str, pending: Vec<GreyCandidate>) -> Adjudication {
        let pairs = pending
            .iter()
            .map(|candidate| {
                (
                    concept.to_string(),
                    candidate.hit.chunk.text_prefix(self.prefix_chars),
                )
            })
            .collect::<Vec<_>>();

        let reason = match self.reranker.rerank(&pairs).await {
            Ok(scores) if scores.len() == pending.len() => {
                let mut adjudication = Adjudication::default();
                for (candidate, score) in pending.into_iter().zip(scores) {
                    if score > self.cutoff {
                        adjudication.accepted.insert(candidate.identity);
                    } else if self.escalate_rejections {
                        adjudication.unresolved.push(candidate);
                    }
                }
                debug!(
                    accepted = adjudication.accepted.len(),
                    escalated = adjudication.unresolved.len(),
                    "cross-encoder adjudicated grey hits"
                );
                return adjudication;
            }
            Ok(scores) => format!("{} scores for {} pairs", scores.len(), pending.len()),
            Err(error) => error.to_string(),
        };

        warn!(%reason, pending = pending.len(), "cross-encoder unavailable, deferring grey hits");
        Adjudication {
            accepted: HashSet::new(),
            unresolved: pending,
            degradations: vec![Degradation::Adjudication {
                stage: self.name().to_string(),
                reason,
            }],
        }
    }
}

/// Asks the language model for one yes/no verdict per numbered snippet.
pub struct LlmBatchAdjudicator {
    model: Arc<dyn CompletionModel>,
    batch_size: usize,
    snippet_chars: usize,
}

impl LlmBatchAdjudicator {
    pub fn new(model: Arc<dyn CompletionModel>, batch_size: usize, snippet_chars: usize) -> Self {
        Self {
            model,
            batch_size: batch_size.max(1),
            snippet_chars,
        }
    }

    fn prompt(&self, concept: &str, batch: &[GreyCandidate]) -> String {
        let bullets = batch
            .iter()
            .enumerate()
            .map(|(position, candidate)| {
                let snippet = candidate
                    .hit
                    .chunk
                    .text_prefix(self.snippet_chars)
                    .replace(['\n', '\r'], " ");
                format!("{}) {snippet}", position + 1)
            })
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "Concepto: «{concept}». Indica S/N si cada fragmento se relaciona con el concepto.\n\
             Responde solo S o N por fragmento, en el mismo orden, separados por coma.\n{bullets}"
        )
    }
}

#[async_trait]
impl Adjudicator for LlmBatchAdjudicator {
    fn name(&self) -> &'static str {
        "llm-batch"
    }

    async fn adjudicate(&self, concept: &str, pending: Vec<GreyCandidate>) -> Adjudication {
        let mut adjudication = Adjudication::default();

        for batch in pending.chunks(self.batch_size) {
            let prompt = self.prompt(concept, batch);
            let max_tokens = (batch.len() * 3 + 4) as u32;
            match self.model.complete(&prompt, 0.0, max_tokens).await {
                Ok(answer) => {
                    let verdicts = parse_verdicts(&answer, batch.len());
                    let answered = verdicts.iter().filter(|verdict| verdict.is_some()).count();
                    if answered < batch.len() {
                        warn!(
                            answered,
                            expected = batch.len(),
                            "short adjudication answer, unanswered items rejected"
                        );
                    }
                    for (candidate, verdict) in batch.iter().zip(verdicts) {
                        if verdict == Some(true) {
                            adjudication.accepted.insert(candidate.identity.clone());
                        }
                    }
                }
                Err(error) => {
                    warn!(%error, batch = batch.len(), "llm adjudication failed for batch");
                    adjudication.unresolved.extend(batch.iter().cloned());
                    adjudication.degradations.push(Degradation::Adjudication {
                        stage: self.name().to_string(),
                        reason: error.to_string(),
                    });
                }
            }
        }

        debug!(accepted = adjudication.accepted.len(), "llm adjudicated grey hits");
        adjudication
    }
}

fn verdict_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\b(s[ií]|yes|no|s|n)\b").unwrap_or_else(|error| {
            unreachable!("verdict pattern is a valid literal regex: {error}")
        })
    })
}

/// Positional verdicts; `None` for items the answer never reached.
pub fn parse_verdicts(answer: &str, expected: usize) -> Vec<Option<bool>> {
    let mut verdicts = verdict_pattern()
        .find_iter(answer)
        .take(expected)
        .map(|token| {
            let token = token.as_str().to_lowercase();
            Some(token != "no" && token != "n")
        })
        .collect::<Vec<_>>();
    verdicts.resize(expected, None);
    verdicts
}

/// Runs adjudicators in order; each only sees what earlier stages left unresolved.
pub struct AdjudicatorChain {
    stages: Vec<Box<dyn Adjudicator>>,
}

impl AdjudicatorChain {
    pub fn new(stages: Vec<Box<dyn Adjudicator>>) -> Self {
        Self { stages }
    }

    /// Cross-encoder first when a reranker is available, then the LLM batch pass.
    pub fn from_options(
        reranker: Option<Arc<dyn Reranker>>,
        model: Arc<dyn CompletionModel>,
        options: &CountOptions,
    ) -> Self {
        let mut stages: Vec<Box<dyn Adjudicator>> = Vec::new();
        if let Some(reranker) = reranker {
            stages.push(Box::new(
                CrossEncoderAdjudicator::new(reranker, options.rerank_cutoff, options.rerank_prefix_chars)
                    .escalate_rejections(options.escalate_rerank_rejections),
            ));
        }
        stages.push(Box::new(LlmBatchAdjudicator::new(
            model,
            options.verify_batch_size,
            options.verify_snippet_chars,
        )));
        Self::new(stages)
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    pub async fn resolve(
        &self,
        concept: &str,
        pending: Vec<GreyCandidate>,
    ) -> (HashSet<DocumentIdentity>, Vec<Degradation>) {
        let mut accepted = HashSet::new();
        let mut degradations = Vec::new();
        let mut pending = pending;

        for stage in &self.stages {
            if pending.is_empty() {
                break;
            }
            let outcome = stage.adjudicate(concept, pending).await;
            accepted.extend(outcome.accepted);
            degradations.extend(outcome.degradations);
            pending = outcome.unresolved;
        }

        if !pending.is_empty() {
            debug!(rejected = pending.len(), "grey hits left unresolved are rejected");
        }
        (accepted, degradations)
    }
}
