use std::path::PathBuf;

use clap::Args;
use tracing::info;

use crate::commands::{LogArgs, ModelArgs, env_value, first_some, heading, parse_env};
use crate::config::ProfileConfig;
use crate::genai::embeddings::{DEFAULT_EMBEDDING_MODEL, GeminiEmbeddings};
use crate::retrieval::rag::{
    ChromaIndex, DEFAULT_CHROMA_URL, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE, DEFAULT_COLLECTION,
    DEFAULT_DATA_DIR, DEFAULT_TOP_K, RagQueryEngine, SourceNode, load_documents,
};

pub const DEMO_QUESTION: &str = "I worked remotely for 4 days last week. Is this allowed by the \
company policy, and what is the specific cost per mile for travel?";

#[derive(Debug, Args, Clone, Default)]
pub struct RagOptions {
    /// Directory of policy documents to index
    #[arg(long = "data-dir")]
    pub data_dir: Option<PathBuf>,
    /// Chroma server URL
    #[arg(long = "chroma-url")]
    pub chroma_url: Option<String>,
    /// Chroma collection name
    #[arg(long)]
    pub collection: Option<String>,
    /// Chunks retrieved per question
    #[arg(long = "top-k")]
    pub top_k: Option<usize>,
    /// Embedding model
    #[arg(long = "embedding-model")]
    pub embedding_model: Option<String>,
}

/// RAG settings after CLI > env > profile > defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct RagSettings {
    pub data_dir: PathBuf,
    pub chroma_url: String,
    pub collection: String,
    pub top_k: usize,
    pub embedding_model: String,
}

impl RagOptions {
    pub fn resolve(&self, profile: &ProfileConfig) -> Result<RagSettings, String> {
        let data_dir = self
            .data_dir
            .clone()
            .or_else(|| env_value("GEMLAB_DATA_DIR").map(PathBuf::from))
            .or_else(|| profile.data_dir.clone().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
        let chroma_url = self
            .chroma_url
            .clone()
            .or_else(|| env_value("GEMLAB_CHROMA_URL"))
            .or_else(|| profile.chroma_url.clone())
            .unwrap_or_else(|| DEFAULT_CHROMA_URL.to_string());
        let collection = self
            .collection
            .clone()
            .or_else(|| env_value("GEMLAB_COLLECTION"))
            .or_else(|| profile.collection.clone())
            .unwrap_or_else(|| DEFAULT_COLLECTION.to_string());
        let top_k = first_some(self.top_k, parse_env("GEMLAB_TOP_K")?, profile.top_k)
            .unwrap_or(DEFAULT_TOP_K);
        if top_k == 0 {
            return Err("--top-k must be at least 1.".to_string());
        }
        let embedding_model = self
            .embedding_model
            .clone()
            .or_else(|| env_value("GEMLAB_EMBEDDING_MODEL"))
            .or_else(|| profile.embedding_model.clone())
            .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string());

        Ok(RagSettings {
            data_dir,
            chroma_url,
            collection,
            top_k,
            embedding_model,
        })
    }
}

#[derive(Debug, Args, Clone)]
pub struct RagArgs {
    /// Question answered from the indexed documents
    pub question: Option<String>,
    #[command(flatten)]
    pub rag: RagOptions,
    /// Query the existing collection without re-indexing
    #[arg(long = "skip-index")]
    pub skip_index: bool,
    #[command(flatten)]
    pub model: ModelArgs,
    #[command(flatten)]
    pub log: LogArgs,
}

pub fn format_source_node(node: &SourceNode) -> String {
    format!(
        "File: {}, Score: {:.2}\nContext Snippet: {}...",
        node.file_name,
        node.score,
        node.snippet(100)
    )
}

pub async fn run(args: RagArgs) -> Result<(), String> {
    args.log.init();

    let settings = args.model.resolve()?;
    let rag = args.rag.resolve(&settings.profile)?;
    let client = settings.client()?;
    let embedder = GeminiEmbeddings::new(client.clone(), rag.embedding_model.clone());

    let index = ChromaIndex::connect(&rag.chroma_url, &rag.collection)
        .await
        .map_err(|err| format!("Vector store error: {err}"))?;

    if !args.skip_index {
        let documents = load_documents(&rag.data_dir).map_err(|err| err.to_string())?;
        println!(
            "Loaded {} document(s) from {}.",
            documents.len(),
            rag.data_dir.display()
        );
        let chunks = index
            .index_documents(&embedder, &documents, DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_OVERLAP)
            .await
            .map_err(|err| err.to_string())?;
        info!(chunks, collection = %rag.collection, "collection indexed");
        println!("Indexed {chunks} chunk(s) into collection '{}'.", index.name());
    }

    let question = args.question.unwrap_or_else(|| DEMO_QUESTION.to_string());
    println!("\nUser Query: {question}");

    let engine = RagQueryEngine::new(client, settings.model.clone(), embedder, index, rag.top_k);
    let response = engine.query(&question).await.map_err(|err| err.to_string())?;

    println!("\n{}", heading("--- GEMINI RAG RESPONSE ---"));
    println!("{}", response.response);
    println!("\n{}", heading("--- SOURCE NODES ---"));
    for node in &response.source_nodes {
        println!("{}\n", format_source_node(node));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_node_line_rounds_score_to_two_places() {
        let node = SourceNode {
            file_name: "policy.txt".to_string(),
            text: "Remote work is allowed up to 3 days per week.".to_string(),
            score: 0.81234,
        };
        assert_eq!(
            format_source_node(&node),
            "File: policy.txt, Score: 0.81\nContext Snippet: Remote work is allowed up to 3 days per week...."
        );
    }

    #[test]
    fn profile_values_fill_unset_options() {
        let profile = ProfileConfig {
            collection: Some("handbook".to_string()),
            top_k: Some(4),
            ..ProfileConfig::default()
        };
        let options = RagOptions {
            top_k: Some(1),
            ..RagOptions::default()
        };
        let settings = options.resolve(&profile).expect("settings resolve");
        assert_eq!(settings.collection, "handbook");
        assert_eq!(settings.top_k, 1);
        assert_eq!(settings.chroma_url, DEFAULT_CHROMA_URL);
    }
}
