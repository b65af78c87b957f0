use std::{
    env,
    net::SocketAddr,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    time::Duration,
};

use thiserror::Error;

use crate::context::{ContextSettings, LabelAdapter};
use crate::language_detection::GateSettings;
use crate::lexicon::LexiconSettings;
use crate::review::SentimentLabel;

#[cfg(test)]
use once_cell::sync::Lazy;
#[cfg(test)]
pub(crate) static ENV_MUTEX: Lazy<std::sync::Mutex<()>> = Lazy::new(|| std::sync::Mutex::new(()));

#[cfg(test)]
const ENV_KEYS: &[&str] = &[
    "REVIEW_WORKER_HTTP_BIND",
    "REVIEW_TARGET_LANGUAGE",
    "REVIEW_SLANG_ALLOWLIST",
    "REVIEW_LANG_MIN_CHARS",
    "REVIEW_LANG_MIN_RELATIVE_DISTANCE",
    "REVIEW_LEXICON_OVERRIDES_PATH",
    "REVIEW_SCORE_THRESHOLD",
    "REVIEW_NEGATION_WINDOW",
    "REVIEW_CONTEXT_LABEL_MAP",
    "REVIEW_CONTEXT_WORKERS",
    "REVIEW_CONTEXT_TIMEOUT_MS",
    "REVIEW_CONTEXT_MAX_INPUT_TOKENS",
    "REVIEW_CONTEXT_MODEL_DIR",
    "REVIEW_ENGINE_VERSION",
    "REVIEW_DB_DSN",
    "REVIEW_DB_MAX_CONNECTIONS",
    "REVIEW_DB_ACQUIRE_TIMEOUT_MS",
    "OTEL_EXPORTER_OTLP_ENDPOINT",
    "OTEL_SAMPLING_RATIO",
];

/// テスト用に設定系の環境変数をすべて消す。呼び出し側で`ENV_MUTEX`を保持すること。
#[cfg(test)]
pub(crate) fn reset_env() {
    for key in ENV_KEYS {
        // SAFETY: tests run sequentially and clean up deterministic keys.
        unsafe {
            env::remove_var(key);
        }
    }
}

const DEFAULT_SLANG_ALLOWLIST: &str = "gg,gj,ggwp,wp,ez,goty";

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    http_bind: SocketAddr,
    target_language: String,
    slang_allowlist: Vec<String>,
    lexicon_overrides_path: Option<PathBuf>,
    context_label_map: Option<Vec<(String, SentimentLabel)>>,
    score_threshold: f64,
    negation_window: usize,
    lang_min_chars: usize,
    lang_min_relative_distance: f64,
    context_workers: NonZeroUsize,
    context_timeout: Duration,
    context_max_input_tokens: NonZeroUsize,
    context_model_dir: Option<PathBuf>,
    engine_version: String,
    db_dsn: Option<String>,
    db_max_connections: u32,
    db_acquire_timeout: Duration,
    otel_exporter_endpoint: Option<String>,
    otel_sampling_ratio: f64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable: {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {source}")]
    Invalid {
        name: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl Config {
    /// 環境変数からワーカーの設定値を読み込み、検証する。
    ///
    /// DSNやモデルディレクトリは任意。未設定ならインメモリストア・
    /// 文脈モデル無効で起動する。
    ///
    /// # Errors
    /// 数値／アドレス／ラベル表のパースに失敗した場合は [`ConfigError`] を返す。
    pub fn from_env() -> Result<Self, ConfigError> {
        let http_bind = parse_socket_addr("REVIEW_WORKER_HTTP_BIND", "0.0.0.0:9010")?;

        // Language gate
        let target_language = non_blank("REVIEW_TARGET_LANGUAGE", "en")?.to_lowercase();
        let slang_allowlist = parse_csv("REVIEW_SLANG_ALLOWLIST", DEFAULT_SLANG_ALLOWLIST);
        let lang_min_chars = parse_usize("REVIEW_LANG_MIN_CHARS", 3)?;
        let lang_min_relative_distance = parse_f64("REVIEW_LANG_MIN_RELATIVE_DISTANCE", 0.0)?;
        if !(0.0..=0.99).contains(&lang_min_relative_distance) {
            return Err(ConfigError::Invalid {
                name: "REVIEW_LANG_MIN_RELATIVE_DISTANCE",
                source: anyhow::anyhow!("value must be between 0.0 and 0.99"),
            });
        }

        // Lexicon scorer
        let lexicon_overrides_path = optional_path("REVIEW_LEXICON_OVERRIDES_PATH");
        let score_threshold = parse_f64("REVIEW_SCORE_THRESHOLD", 0.05)?;
        if !score_threshold.is_finite() || score_threshold < 0.0 {
            return Err(ConfigError::Invalid {
                name: "REVIEW_SCORE_THRESHOLD",
                source: anyhow::anyhow!("threshold must be a non-negative number"),
            });
        }
        let negation_window = parse_usize("REVIEW_NEGATION_WINDOW", 3)?;

        // Context scorer
        let context_label_map = match env::var("REVIEW_CONTEXT_LABEL_MAP") {
            Ok(raw) if !raw.trim().is_empty() => Some(parse_label_map(&raw).map_err(|source| {
                ConfigError::Invalid {
                    name: "REVIEW_CONTEXT_LABEL_MAP",
                    source,
                }
            })?),
            _ => None,
        };
        let context_workers =
            parse_non_zero_usize("REVIEW_CONTEXT_WORKERS", num_cpus::get().max(1))?;
        let context_timeout = parse_duration_ms("REVIEW_CONTEXT_TIMEOUT_MS", 10_000)?;
        let context_max_input_tokens = parse_non_zero_usize("REVIEW_CONTEXT_MAX_INPUT_TOKENS", 512)?;
        let context_model_dir = optional_path("REVIEW_CONTEXT_MODEL_DIR");

        let engine_version = non_blank("REVIEW_ENGINE_VERSION", "hybrid_v2")?;

        // Storage
        let db_dsn = env::var("REVIEW_DB_DSN")
            .ok()
            .filter(|dsn| !dsn.trim().is_empty());
        let db_max_connections = parse_u32("REVIEW_DB_MAX_CONNECTIONS", 5)?;
        let db_acquire_timeout = parse_duration_ms("REVIEW_DB_ACQUIRE_TIMEOUT_MS", 5_000)?;

        // OpenTelemetry settings
        let otel_exporter_endpoint = env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
            .ok()
            .filter(|endpoint| !endpoint.trim().is_empty());
        let otel_sampling_ratio = parse_f64("OTEL_SAMPLING_RATIO", 1.0)?;
        if !(0.0..=1.0).contains(&otel_sampling_ratio) {
            return Err(ConfigError::Invalid {
                name: "OTEL_SAMPLING_RATIO",
                source: anyhow::anyhow!("value must be between 0.0 and 1.0"),
            });
        }

        Ok(Self {
            http_bind,
            target_language,
            slang_allowlist,
            lexicon_overrides_path,
            context_label_map,
            score_threshold,
            negation_window,
            lang_min_chars,
            lang_min_relative_distance,
            context_workers,
            context_timeout,
            context_max_input_tokens,
            context_model_dir,
            engine_version,
            db_dsn,
            db_max_connections,
            db_acquire_timeout,
            otel_exporter_endpoint,
            otel_sampling_ratio,
        })
    }

    #[must_use]
    pub fn http_bind(&self) -> SocketAddr {
        self.http_bind
    }

    #[must_use]
    pub fn target_language(&self) -> &str {
        &self.target_language
    }

    #[must_use]
    pub fn slang_allowlist(&self) -> &[String] {
        &self.slang_allowlist
    }

    #[must_use]
    pub fn lexicon_overrides_path(&self) -> Option<&Path> {
        self.lexicon_overrides_path.as_deref()
    }

    #[must_use]
    pub fn lang_min_relative_distance(&self) -> f64 {
        self.lang_min_relative_distance
    }

    #[must_use]
    pub fn context_model_dir(&self) -> Option<&Path> {
        self.context_model_dir.as_deref()
    }

    #[must_use]
    pub fn engine_version(&self) -> &str {
        &self.engine_version
    }

    #[must_use]
    pub fn db_dsn(&self) -> Option<&str> {
        self.db_dsn.as_deref()
    }

    #[must_use]
    pub fn db_max_connections(&self) -> u32 {
        self.db_max_connections
    }

    #[must_use]
    pub fn db_acquire_timeout(&self) -> Duration {
        self.db_acquire_timeout
    }

    #[must_use]
    pub fn otel_exporter_endpoint(&self) -> Option<&str> {
        self.otel_exporter_endpoint.as_deref()
    }

    #[must_use]
    pub fn otel_sampling_ratio(&self) -> f64 {
        self.otel_sampling_ratio
    }

    #[must_use]
    pub fn gate_settings(&self) -> GateSettings {
        GateSettings {
            target_language: self.target_language.clone(),
            slang_allowlist: self.slang_allowlist.clone(),
            min_chars: self.lang_min_chars,
        }
    }

    #[must_use]
    pub fn lexicon_settings(&self) -> LexiconSettings {
        LexiconSettings {
            threshold: self.score_threshold,
            negation_window: self.negation_window,
        }
    }

    #[must_use]
    pub fn context_settings(&self) -> ContextSettings {
        ContextSettings {
            workers: self.context_workers.get(),
            timeout: self.context_timeout,
            max_input_tokens: self.context_max_input_tokens.get(),
        }
    }

    /// ラベル表が未設定ならモデル既定の表を使う。
    #[must_use]
    pub fn label_adapter(&self) -> LabelAdapter {
        match &self.context_label_map {
            Some(pairs) => LabelAdapter::from_pairs(pairs.iter().map(|(k, v)| (k.as_str(), *v))),
            None => LabelAdapter::default(),
        }
    }
}

/// `LABEL_0=negative,LABEL_1=neutral,LABEL_2=positive` 形式のラベル表を読む。
fn parse_label_map(raw: &str) -> anyhow::Result<Vec<(String, SentimentLabel)>> {
    let mut pairs = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (native, label) = entry
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("entry {entry:?} must look like NATIVE=label"))?;
        let native = native.trim();
        if native.is_empty() {
            anyhow::bail!("entry {entry:?} has an empty native label");
        }
        let label = SentimentLabel::parse(label)
            .ok_or_else(|| anyhow::anyhow!("unknown sentiment label {:?}", label.trim()))?;
        pairs.push((native.to_string(), label));
    }
    if pairs.is_empty() {
        anyhow::bail!("label map must contain at least one entry");
    }
    Ok(pairs)
}

fn non_blank(name: &'static str, default: &str) -> Result<String, ConfigError> {
    match env::var(name) {
        Ok(value) if value.trim().is_empty() => Err(ConfigError::Missing(name)),
        Ok(value) => Ok(value.trim().to_string()),
        Err(_) => Ok(default.to_string()),
    }
}

fn optional_path(name: &'static str) -> Option<PathBuf> {
    env::var(name)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
        .map(PathBuf::from)
}

fn parse_socket_addr(name: &'static str, default: &str) -> Result<SocketAddr, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());

    raw.parse().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_non_zero_usize(name: &'static str, default: usize) -> Result<NonZeroUsize, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    let parsed = raw.parse::<usize>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })?;
    NonZeroUsize::new(parsed).ok_or_else(|| ConfigError::Invalid {
        name,
        source: anyhow::anyhow!("must be greater than zero"),
    })
}

fn parse_duration_ms(name: &'static str, default_ms: u64) -> Result<Duration, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default_ms.to_string());
    let ms = raw.parse::<u64>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })?;
    if ms == 0 {
        return Err(ConfigError::Invalid {
            name,
            source: anyhow::anyhow!("must be greater than zero"),
        });
    }
    Ok(Duration::from_millis(ms))
}

fn parse_usize(name: &'static str, default: usize) -> Result<usize, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse::<usize>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_u32(name: &'static str, default: u32) -> Result<u32, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse::<u32>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_f64(name: &'static str, default: f64) -> Result<f64, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse::<f64>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_csv(name: &'static str, default: &str) -> Vec<String> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
