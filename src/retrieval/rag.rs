//! Retrieval-augmented generation over a Chroma collection.
//!
//! Documents are read from a directory, split into paragraph-packed chunks,
//! embedded with Gemini and upserted into Chroma under deterministic ids
//! (`{file_name}#{chunk}`) tagged with their file name. Re-indexing a file
//! first deletes its previous chunks, so the collection never keeps text the
//! file no longer contains.

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chromadb::client::{ChromaAuthMethod, ChromaClient, ChromaClientOptions};
use chromadb::collection::{ChromaCollection, CollectionEntries, QueryOptions};
use serde_json::{Map, Value, json};
use tracing::{debug, info};

use crate::genai::embeddings::GeminiEmbeddings;
use crate::genai::types::GenerateRequest;
use crate::genai::GeminiClient;
use crate::retrieval::{ContextProvider, RetrievalError};

pub const DEFAULT_CHROMA_URL: &str = "http://localhost:8000";
pub const DEFAULT_COLLECTION: &str = "company_policy";
pub const DEFAULT_DATA_DIR: &str = "./data";
pub const DEFAULT_CHUNK_SIZE: usize = 1024;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;
pub const DEFAULT_TOP_K: usize = 2;

const TEXT_EXTENSIONS: [&str; 7] = ["txt", "md", "markdown", "csv", "json", "html", "rst"];

/// A loaded source document.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub file_name: String,
    pub text: String,
}

/// A retrieved chunk with its similarity score.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceNode {
    pub file_name: String,
    pub text: String,
    pub score: f32,
}

impl SourceNode {
    /// First `max_chars` characters of the chunk, whitespace-trimmed.
    pub fn snippet(&self, max_chars: usize) -> String {
        self.text.trim().chars().take(max_chars).collect()
    }
}

#[derive(Debug, Clone)]
pub struct RagResponse {
    pub response: String,
    pub source_nodes: Vec<SourceNode>,
}

/// Reads every text file of `dir`, ordered by file name.
pub fn load_documents(dir: &Path) -> Result<Vec<Document>, RetrievalError> {
    let io_err = |source| RetrievalError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(io_err)?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| path.is_file() && has_text_extension(path))
        .collect();
    paths.sort();

    let mut documents = Vec::with_capacity(paths.len());
    for path in paths {
        let text = fs::read_to_string(&path).map_err(|source| RetrievalError::Io {
            path: path.clone(),
            source,
        })?;
        if text.trim().is_empty() {
            continue;
        }
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        documents.push(Document { file_name, text });
    }

    if documents.is_empty() {
        return Err(RetrievalError::NoDocuments(dir.to_path_buf()));
    }
    Ok(documents)
}

fn has_text_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| TEXT_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Splits `text` into chunks of at most `chunk_size` characters.
///
/// Paragraphs are packed whole where possible; oversized paragraphs are split
/// on whitespace. Each new chunk starts with up to `overlap` trailing
/// characters of the previous one when they fit.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let chunk_size = chunk_size.max(1);
    let normalized = text.replace("\r\n", "\n");

    let mut pieces = Vec::new();
    for paragraph in normalized.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        if char_len(paragraph) > chunk_size {
            pieces.extend(split_words(paragraph, chunk_size));
        } else {
            pieces.push(paragraph.to_string());
        }
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    for piece in pieces {
        if current.is_empty() {
            current = piece;
            continue;
        }
        if char_len(&current) + 2 + char_len(&piece) <= chunk_size {
            current.push_str("\n\n");
            current.push_str(&piece);
            continue;
        }

        let tail = overlap_tail(&current, overlap);
        chunks.push(std::mem::take(&mut current));
        current = if !tail.is_empty() && char_len(&tail) + 1 + char_len(&piece) <= chunk_size {
            format!("{tail} {piece}")
        } else {
            piece
        };
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn split_words(paragraph: &str, chunk_size: usize) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    for word in paragraph.split_whitespace() {
        if !current.is_empty() && char_len(&current) + 1 + char_len(word) > chunk_size {
            parts.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

fn overlap_tail(text: &str, overlap: usize) -> String {
    if overlap == 0 {
        return String::new();
    }
    let Some((start, _)) = text.char_indices().rev().nth(overlap - 1) else {
        return String::new();
    };
    let tail = &text[start..];
    match tail.find(char::is_whitespace) {
        Some(pos) => tail[pos..].trim().to_string(),
        None => String::new(),
    }
}

pub fn chunk_id(file_name: &str, index: usize) -> String {
    format!("{file_name}#{index}")
}

/// File name encoded in a chunk id.
pub fn chunk_file_name(id: &str) -> &str {
    id.rsplit_once('#').map(|(file, _)| file).unwrap_or(id)
}

/// Converts a Chroma distance into a similarity score in (0, 1].
/// Metadata stored with every chunk of `file_name`.
fn chunk_metadata(file_name: &str) -> Map<String, Value> {
    let mut metadata = Map::new();
    metadata.insert("file_name".to_string(), Value::String(file_name.to_string()));
    metadata
}

/// Chroma `where` filter selecting every chunk of `file_name`.
fn file_filter(file_name: &str) -> Value {
    json!({ "file_name": file_name })
}

pub fn distance_to_score(distance: f32) -> f32 {
    1.0 / (1.0 + distance.max(0.0))
}

/// Handle on one Chroma collection.
pub struct ChromaIndex {
    collection: ChromaCollection,
    name: String,
}

fn vector_err(err: impl std::fmt::Display) -> RetrievalError {
    RetrievalError::VectorStore(err.to_string())
}

impl ChromaIndex {
    /// Connects to the Chroma server at `url` and opens (or creates) `collection`.
    pub async fn connect(url: &str, collection: &str) -> Result<Self, RetrievalError> {
        let client = ChromaClient::new(ChromaClientOptions {
            url: Some(url.to_string()),
            auth: ChromaAuthMethod::None,
            database: "default_database".to_string(),
        })
        .await
        .map_err(vector_err)?;
        let handle = client
            .get_or_create_collection(collection, None)
            .await
            .map_err(vector_err)?;
        info!(url, collection, "chroma collection ready");
        Ok(Self {
            collection: handle,
            name: collection.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Chunks, embeds and upserts `documents`; returns the number of chunks written.
    pub async fn index_documents(
        &self,
        embedder: &GeminiEmbeddings,
        documents: &[Document],
        chunk_size: usize,
        overlap: usize,
    ) -> Result<usize, RetrievalError> {
        let mut written = 0;
        for document in documents {
            // Drop every chunk of a previous run so a shorter file leaves nothing stale.
            self.collection
                .delete(None, Some(file_filter(&document.file_name)), None)
                .await
                .map_err(vector_err)?;
            let chunks = chunk_text(&document.text, chunk_size, overlap);
            if chunks.is_empty() {
                continue;
            }
            let mut embeddings = Vec::with_capacity(chunks.len());
            for chunk in &chunks {
                embeddings.push(embedder.embed_document(chunk).await?);
            }
            let ids: Vec<String> = (0..chunks.len())
                .map(|index| chunk_id(&document.file_name, index))
                .collect();

            let entries = CollectionEntries {
                ids: ids.iter().map(String::as_str).collect(),
                metadatas: Some(vec![chunk_metadata(&document.file_name); chunks.len()]),
                documents: Some(chunks.iter().map(String::as_str).collect()),
                embeddings: Some(embeddings),
            };
            self.collection
                .upsert(entries, None)
                .await
                .map_err(vector_err)?;
            debug!(file = %document.file_name, chunks = chunks.len(), "indexed document");
            written += chunks.len();
        }
        info!(collection = %self.name, chunks = written, "index updated");
        Ok(written)
    }

    /// Nearest chunks to `embedding`, best first.
    pub async fn query(
        &self,
        embedding: Vec<f32>,
        top_k: usize,
    ) -> Result<Vec<SourceNode>, RetrievalError> {
        let options = QueryOptions {
            query_texts: None,
            query_embeddings: Some(vec![embedding]),
            where_metadata: None,
            where_document: None,
            n_results: Some(top_k.max(1)),
            include: Some(vec!["documents", "distances"]),
        };
        let result = self
            .collection
            .query(options, None)
            .await
            .map_err(vector_err)?;

        let ids = result.ids.into_iter().next().unwrap_or_default();
        let documents = result
            .documents
            .and_then(|docs| docs.into_iter().next())
            .unwrap_or_default();
        let distances = result
            .distances
            .and_then(|dists| dists.into_iter().next())
            .unwrap_or_default();

        let nodes = ids
            .iter()
            .zip(documents)
            .enumerate()
            .map(|(rank, (id, text))| SourceNode {
                file_name: chunk_file_name(id).to_string(),
                text,
                score: distances.get(rank).copied().map(distance_to_score).unwrap_or(0.0),
            })
            .collect();
        Ok(nodes)
    }
}

/// Context-QA prompt sent to the model after retrieval.
pub fn synthesis_prompt(question: &str, nodes: &[SourceNode]) -> String {
    let context = nodes
        .iter()
        .map(|node| format!("file_name: {}\n\n{}", node.file_name, node.text.trim()))
        .collect::<Vec<_>>()
        .join("\n\n");
    format!(
        "Context information is below.\n---------------------\n{context}\n---------------------\n\
         Given the context information and not prior knowledge, answer the query.\n\
         Query: {question}\nAnswer: "
    )
}

/// Embeds a question, retrieves the nearest chunks and synthesizes an answer.
pub struct RagQueryEngine {
    client: GeminiClient,
    model: String,
    embedder: GeminiEmbeddings,
    index: ChromaIndex,
    top_k: usize,
}

impl RagQueryEngine {
    pub fn new(
        client: GeminiClient,
        model: impl Into<String>,
        embedder: GeminiEmbeddings,
        index: ChromaIndex,
        top_k: usize,
    ) -> Self {
        Self {
            client,
            model: model.into(),
            embedder,
            index,
            top_k,
        }
    }

    pub async fn query(&self, question: &str) -> Result<RagResponse, RetrievalError> {
        let embedding = self.embedder.embed_query(question).await?;
        let source_nodes = self.index.query(embedding, self.top_k).await?;
        debug!(hits = source_nodes.len(), "retrieved policy chunks");

        if source_nodes.is_empty() {
            return Ok(RagResponse {
                response: "Empty Response".to_string(),
                source_nodes,
            });
        }

        let request = GenerateRequest::prompt(synthesis_prompt(question, &source_nodes));
        let response = self.client.generate(&self.model, &request).await?;
        Ok(RagResponse {
            response: response.text().trim().to_string(),
            source_nodes,
        })
    }
}

#[async_trait]
impl ContextProvider for RagQueryEngine {
    async fn retrieve(&self, question: &str) -> Result<String, RetrievalError> {
        Ok(self.query(question).await?.response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    #[test]
    fn chunk_metadata_matches_the_delete_filter() {
        let metadata = chunk_metadata("travel_policy.md");
        let filter = file_filter("travel_policy.md");
        assert_eq!(Value::Object(metadata), filter);
        assert_eq!(filter, json!({"file_name": "travel_policy.md"}));
        assert_ne!(file_filter("expenses.md"), filter);
    }

    fn temp_dir(label: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("gemlab-rag-{label}-{nanos}"));
        fs::create_dir_all(&dir).expect("temp dir should be creatable");
        dir
    }

    #[test]
    fn short_text_is_one_chunk() {
        let chunks = chunk_text("Remote work: 3 days.\n\nMileage: $0.65/mile.", 1024, 200);
        assert_eq!(chunks, vec!["Remote work: 3 days.\n\nMileage: $0.65/mile.".to_string()]);
    }

    #[test]
    fn chunks_respect_size_limit() {
        let paragraph = "policy ".repeat(100);
        let text = format!("{paragraph}\n\n{paragraph}\n\n{paragraph}");
        let chunks = chunk_text(&text, 120, 20);
        assert!(chunks.len() > 3);
        assert!(chunks.iter().all(|chunk| chunk.chars().count() <= 120));
    }

    #[test]
    fn overlap_repeats_previous_tail() {
        let text = "alpha beta gamma delta\n\nepsilon zeta eta theta";
        let chunks = chunk_text(text, 30, 11);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], "alpha beta gamma delta");
        assert!(chunks[1].starts_with("delta epsilon"));
    }

    #[test]
    fn no_overlap_when_disabled() {
        let chunks = chunk_text("aaaa bbbb\n\ncccc dddd", 10, 0);
        assert_eq!(chunks, vec!["aaaa bbbb".to_string(), "cccc dddd".to_string()]);
    }

    #[test]
    fn chunk_ids_round_trip_file_names() {
        let id = chunk_id("policy#v2.txt", 3);
        assert_eq!(id, "policy#v2.txt#3");
        assert_eq!(chunk_file_name(&id), "policy#v2.txt");
    }

    #[test]
    fn scores_decrease_with_distance() {
        assert_eq!(distance_to_score(0.0), 1.0);
        assert!(distance_to_score(0.5) > distance_to_score(1.5));
    }

    #[test]
    fn loader_reads_sorted_text_files_only() {
        let dir = temp_dir("loader");
        fs::write(dir.join("b.txt"), "second").expect("write b");
        fs::write(dir.join("a.md"), "first").expect("write a");
        fs::write(dir.join("image.png"), [0u8, 1, 2]).expect("write png");
        fs::write(dir.join("empty.txt"), "  \n").expect("write empty");

        let documents = load_documents(&dir).expect("documents load");
        let names: Vec<_> = documents.iter().map(|doc| doc.file_name.as_str()).collect();
        assert_eq!(names, vec!["a.md", "b.txt"]);
    }

    #[test]
    fn loader_rejects_directory_without_documents() {
        let dir = temp_dir("empty");
        assert!(matches!(
            load_documents(&dir),
            Err(RetrievalError::NoDocuments(_))
        ));
    }

    #[test]
    fn synthesis_prompt_lists_sources() {
        let nodes = vec![SourceNode {
            file_name: "policy.txt".to_string(),
            text: "Mileage is reimbursed at $0.65 per mile.".to_string(),
            score: 0.8,
        }];
        let prompt = synthesis_prompt("What is the mileage rate?", &nodes);
        assert!(prompt.contains("file_name: policy.txt"));
        assert!(prompt.contains("Query: What is the mileage rate?"));
        assert!(prompt.ends_with("Answer: "));
    }
}
