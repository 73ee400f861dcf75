use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use concept_count_core::{
    explain_report, format_count_answer, CharacterNgramEmbedder, ChatCompletionsClient,
    CompletionModel, ConceptCounter, CountError, CountOptions, Embedder, FlatIndex, HttpEmbedder,
    HttpReranker, QdrantStore, Reranker, VectorIndex,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "concept-count", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// JSON-lines index snapshot ({text, metadata, embedding} per line)
    #[arg(long, env = "CONCEPT_COUNT_INDEX", conflicts_with = "qdrant_url")]
    index_path: Option<PathBuf>,

    /// Qdrant base URL, used instead of a local snapshot
    #[arg(long, env = "QDRANT_URL")]
    qdrant_url: Option<String>,

    /// Qdrant collection
    #[arg(long, default_value = "sentencias")]
    qdrant_collection: String,

    /// Payload field holding chunk text in Qdrant
    #[arg(long, default_value = "text")]
    qdrant_text_field: String,

    /// Query embedding backend
    #[arg(long, value_enum, default_value_t = EmbedderKind::Http)]
    embedder: EmbedderKind,

    /// OpenAI-compatible base URL for embeddings
    #[arg(long, env = "EMBED_BASE_URL", default_value = "https://api.together.xyz/v1")]
    embed_url: String,

    /// Embedding model id
    #[arg(
        long,
        env = "EMBED_MODEL_ID",
        default_value = "dariolopez/roberta-base-bne-finetuned-msmarco-qa-es-mnrl-mn"
    )]
    embed_model: String,

    /// Embedding dimensions
    #[arg(long, default_value = "768")]
    embed_dimensions: usize,

    /// OpenAI-compatible base URL for chat completions
    #[arg(long, env = "LLM_BASE_URL", default_value = "https://api.together.xyz/v1")]
    llm_url: String,

    /// Chat model id
    #[arg(
        long,
        env = "LLM_MODEL_ID",
        default_value = "meta-llama/Llama-4-Maverick-17B-128E-Instruct-FP8"
    )]
    llm_model: String,

    /// API key sent as bearer token to the embedding, chat and rerank endpoints
    #[arg(long, env = "TOGETHER_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Base URL of a /rerank endpoint; grey hits go straight to the LLM without it
    #[arg(long, env = "RERANK_BASE_URL")]
    rerank_url: Option<String>,

    /// Cross-encoder model id
    #[arg(long, default_value = "cross-encoder/ms-marco-MiniLM-L-6-v2")]
    rerank_model: String,

    #[command(flatten)]
    tuning: Tuning,
}

#[derive(Clone, Copy, ValueEnum)]
enum EmbedderKind {
    /// Remote embedding endpoint
    Http,
    /// Local hashed trigram embedder (offline demos)
    Ngram,
}

#[derive(Args)]
struct Tuning {
    /// Nearest chunks retrieved per term
    #[arg(long, default_value = "800")]
    top_k: usize,

    /// Squared-L2 distance at or below which a hit is confident
    #[arg(long, default_value = "1.0")]
    low_threshold: f32,

    /// Width of the grey band above the threshold
    #[arg(long, default_value = "0.15")]
    grey_margin: f32,

    /// Cross-encoder score a grey hit must exceed
    #[arg(long, default_value = "0.8")]
    rerank_cutoff: f32,

    /// Send below-cutoff reranker items to the LLM instead of rejecting them
    #[arg(long, default_value_t = false)]
    escalate_rerank_rejections: bool,

    /// Grey hits per LLM verification prompt
    #[arg(long, default_value = "20")]
    verify_batch_size: usize,

    /// Identity metadata fields in priority order (repeatable; replaces the defaults)
    #[arg(long = "identity-field")]
    identity_fields: Vec<String>,

    /// Only count chunks whose metadata field equals the value, e.g. Materia=Penal
    #[arg(long = "filter", value_parser = parse_filter)]
    filters: Vec<(String, String)>,
}

#[derive(Subcommand)]
enum Command {
    /// Count documents about the concept in one question.
    Count {
        /// Natural-language question, e.g. "¿Cuántos casos de robo hay?"
        #[arg(long)]
        question: String,
        /// Print the per-stage breakdown.
        #[arg(long, default_value_t = false)]
        explain: bool,
    },
    /// Read questions from stdin, one per line, until EOF.
    Repl {
        /// Print the per-stage breakdown.
        #[arg(long, default_value_t = false)]
        explain: bool,
    },
}

fn parse_filter(raw: &str) -> Result<(String, String), String> {
    let (field, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected field=value, got '{raw}'"))?;
    if field.trim().is_empty() {
        return Err(format!("empty field name in '{raw}'"));
    }
    Ok((field.trim().to_string(), value.trim().to_string()))
}

impl Tuning {
    fn to_options(&self) -> CountOptions {
        let defaults = CountOptions::default();
        CountOptions {
            top_k: self.top_k,
            low_threshold: self.low_threshold,
            grey_margin: self.grey_margin,
            rerank_cutoff: self.rerank_cutoff,
            escalate_rerank_rejections: self.escalate_rerank_rejections,
            verify_batch_size: self.verify_batch_size,
            identity_fields: if self.identity_fields.is_empty() {
                defaults.identity_fields.clone()
            } else {
                self.identity_fields.clone()
            },
            metadata_filter: self.filters.iter().cloned().collect::<BTreeMap<_, _>>(),
            ..defaults
        }
    }
}

async fn build_counter(cli: &Cli) -> anyhow::Result<ConceptCounter> {
    let embedder: Arc<dyn Embedder> = match cli.embedder {
        EmbedderKind::Http => Arc::new(HttpEmbedder::new(
            &cli.embed_url,
            cli.api_key.clone(),
            &cli.embed_model,
            cli.embed_dimensions,
        )?),
        EmbedderKind::Ngram => Arc::new(CharacterNgramEmbedder {
            dimensions: cli.embed_dimensions,
        }),
    };

    let index: Arc<dyn VectorIndex> = match (&cli.index_path, &cli.qdrant_url) {
        (Some(path), _) => {
            let index = FlatIndex::load_jsonl(path).await?;
            info!(path = %path.display(), chunks = index.len(), dimensions = index.dimensions(), "flat index loaded");
            if index.dimensions() != embedder.dimensions() {
                anyhow::bail!(
                    "index dimension {} does not match embedder dimension {}",
                    index.dimensions(),
                    embedder.dimensions()
                );
            }
            Arc::new(index)
        }
        (None, Some(url)) => Arc::new(
            QdrantStore::new(url, &cli.qdrant_collection, embedder.dimensions())?
                .with_text_field(&cli.qdrant_text_field),
        ),
        (None, None) => anyhow::bail!("either --index-path or --qdrant-url is required"),
    };

    let model: Arc<dyn CompletionModel> = Arc::new(ChatCompletionsClient::new(
        &cli.llm_url,
        cli.api_key.clone(),
        &cli.llm_model,
    )?);

    let reranker: Option<Arc<dyn Reranker>> = match &cli.rerank_url {
        Some(url) => {
            let reranker = HttpReranker::new(url, cli.api_key.clone(), &cli.rerank_model)?;
            Some(Arc::new(reranker))
        }
        None => {
            warn!("no reranker configured, grey hits are verified by the language model only");
            None
        }
    };

    Ok(ConceptCounter::new(
        embedder,
        index,
        model,
        reranker,
        cli.tuning.to_options(),
    )?)
}

async fn answer(counter: &ConceptCounter, question: &str, explain: bool) -> anyhow::Result<()> {
    match counter.count_report(question).await {
        Ok(report) => {
            println!("{}", format_count_answer(report.count, &report.concept));
            if report.is_degraded() && !explain {
                println!("(partial result: {} stage(s) degraded, use --explain)", report.degradations.len());
            }
            if explain {
                println!("{}", explain_report(&report));
            }
            Ok(())
        }
        Err(error @ (CountError::NoConcept { .. } | CountError::EmptyQuestion)) => {
            println!("No pude determinar el concepto a contar: {error}");
            Ok(())
        }
        Err(error) => Err(error.into()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "concept-count boot"
    );

    let counter = build_counter(&cli).await?;

    match cli.command {
        Command::Count { question, explain } => answer(&counter, &question, explain).await?,
        Command::Repl { explain } => {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Some(line) = lines.next_line().await? {
                let question = line.trim();
                if question.is_empty() {
                    continue;
                }
                answer(&counter, question, explain).await?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_requires_field_and_value_separator() {
        assert_eq!(
            parse_filter("Materia = Penal"),
            Ok(("Materia".to_string(), "Penal".to_string()))
        );
        assert!(parse_filter("Materia").is_err());
        assert!(parse_filter("=Penal").is_err());
    }

    #[test]
    fn cli_flags_map_onto_count_options() {
        let cli = Cli::try_parse_from([
            "concept-count",
            "--index-path",
            "corpus.jsonl",
            "--top-k",
            "50",
            "--identity-field",
            "NUC",
            "--filter",
            "Materia=Penal",
            "count",
            "--question",
            "¿Cuántos casos de robo hay?",
        ])
        .expect("parse");
        let options = cli.tuning.to_options();
        assert_eq!(options.top_k, 50);
        assert_eq!(options.identity_fields, vec!["NUC".to_string()]);
        assert_eq!(options.metadata_filter.get("Materia").map(String::as_str), Some("Penal"));
        assert_eq!(options.verify_batch_size, 20);
        options.validate().expect("valid options");
    }
}
