use crate::index::{DistanceMetric, IndexKind};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Which embedder backs the tool index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedderKind {
    /// Model-free feature hashing. Deterministic, no files required.
    Hashing,
    /// Sentence-embedding model exported to ONNX.
    Onnx,
}

impl EmbedderKind {
    pub fn from_env() -> Self {
        match env::var("TOOLSIFT_EMBEDDER")
            .unwrap_or_default()
            .to_lowercase()
            .as_str()
        {
            "onnx" | "bi-encoder" | "model" => Self::Onnx,
            _ => Self::Hashing,
        }
    }
}

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    pub fn from_env() -> Self {
        match env::var("LOG_FORMAT").unwrap_or_default().to_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Text,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub shutdown_timeout_secs: u64,
    pub log_format: LogFormat,
    pub embedder: EmbedderKind,
    /// Embedding dimension `D`. Fixed for the lifetime of a persisted index.
    pub embedding_dim: usize,
    /// Path to bi-encoder ONNX model.
    pub bi_encoder_model_path: PathBuf,
    /// Path to bi-encoder tokenizer.
    pub bi_encoder_tokenizer_path: PathBuf,
    pub max_sequence_length: usize,
    /// Optional override for session pool size. If None, uses available cores.
    pub pool_size: Option<usize>,
    /// Optional override for search semaphore permits. If None, uses available cores.
    pub permits: Option<usize>,
    /// How long a request may wait for a permit before it is shed with 503.
    pub permit_timeout: Duration,
    /// Snapshot file for the tool index. None keeps the index in memory only.
    pub index_path: Option<PathBuf>,
    pub index_kind: IndexKind,
    pub metric: DistanceMetric,
    pub nlist: usize,
    pub nprobe: usize,
    /// Default number of tools returned per query.
    pub top_k: usize,
    /// Default relevance bar; results with a lower similarity score are dropped.
    pub score_threshold: f32,
    /// Number of nearest-neighbour candidates fetched before thresholding.
    pub retrieval_candidates: usize,
    pub seed_default_tools: bool,
    /// Optional JSON catalog file describing the live tools of each provider.
    pub catalog_path: Option<PathBuf>,
    pub catalog_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            shutdown_timeout_secs: 30,
            log_format: LogFormat::Text,
            embedder: EmbedderKind::Hashing,
            embedding_dim: 384,
            bi_encoder_model_path: PathBuf::from("./bi-encoder-model/model.onnx"),
            bi_encoder_tokenizer_path: PathBuf::from("./bi-encoder-model/tokenizer.json"),
            max_sequence_length: 256,
            pool_size: None,
            permits: None,
            permit_timeout: Duration::from_secs(10),
            index_path: None,
            index_kind: IndexKind::Ivf,
            metric: DistanceMetric::L2,
            nlist: 128,
            nprobe: 10,
            top_k: 3,
            score_threshold: 0.4,
            retrieval_candidates: 20,
            seed_default_tools: true,
            catalog_path: None,
            catalog_timeout: Duration::from_millis(5000),
        }
    }
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// Unparseable numeric values are an error rather than a silent fallback.
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        Ok(Self {
            host: env::var("HOST").unwrap_or(defaults.host),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()?,
            shutdown_timeout_secs: env::var("SHUTDOWN_TIMEOUT")
                .unwrap_or_else(|_| "30".to_string())
                .parse()?,
            log_format: LogFormat::from_env(),
            embedder: EmbedderKind::from_env(),
            embedding_dim: env::var("EMBEDDING_DIM")
                .unwrap_or_else(|_| "384".to_string())
                .parse()?,
            bi_encoder_model_path: env::var("BI_ENCODER_MODEL_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.bi_encoder_model_path),
            bi_encoder_tokenizer_path: env::var("BI_ENCODER_TOKENIZER_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.bi_encoder_tokenizer_path),
            max_sequence_length: env::var("MAX_SEQ_LENGTH")
                .unwrap_or_else(|_| "256".to_string())
                .parse()?,
            pool_size: parse_optional("POOL_SIZE", env::var("POOL_SIZE").ok())?,
            permits: parse_optional("PERMITS", env::var("PERMITS").ok())?,
            permit_timeout: Duration::from_millis(
                env::var("PERMIT_TIMEOUT_MS")
                    .unwrap_or_else(|_| "10000".to_string())
                    .parse()?,
            ),
            index_path: env::var("INDEX_PATH").ok().map(PathBuf::from),
            index_kind: env::var("INDEX_KIND")
                .unwrap_or_else(|_| "ivf".to_string())
                .parse()?,
            metric: env::var("INDEX_METRIC")
                .unwrap_or_else(|_| "l2".to_string())
                .parse()?,
            nlist: env::var("INDEX_NLIST")
                .unwrap_or_else(|_| "128".to_string())
                .parse()?,
            nprobe: env::var("INDEX_NPROBE")
                .unwrap_or_else(|_| "10".to_string())
                .parse()?,
            top_k: env::var("TOP_K")
                .unwrap_or_else(|_| "3".to_string())
                .parse()?,
            score_threshold: env::var("SCORE_THRESHOLD")
                .unwrap_or_else(|_| "0.4".to_string())
                .parse()?,
            retrieval_candidates: env::var("RETRIEVAL_CANDIDATES")
                .unwrap_or_else(|_| "20".to_string())
                .parse()?,
            seed_default_tools: env::var("SEED_DEFAULT_TOOLS")
                .map(|v| !matches!(v.to_lowercase().as_str(), "0" | "false" | "no" | "off"))
                .unwrap_or(true),
            catalog_path: env::var("CATALOG_PATH").ok().map(PathBuf::from),
            catalog_timeout: Duration::from_millis(
                env::var("CATALOG_TIMEOUT_MS")
                    .unwrap_or_else(|_| "5000".to_string())
                    .parse()?,
            ),
        })
    }

    /// Worker count used for pool size and permits when not overridden.
    pub fn available_cores() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    }
}

/// Parse an optional override. Unset means `None`; a value that does not
/// parse is an error rather than a silent fallback.
fn parse_optional<T>(name: &str, value: Option<String>) -> anyhow::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid {} '{}': {}", name, raw, e))
        })
        .transpose()
}
