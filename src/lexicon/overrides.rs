use serde::Deserialize;
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

const DEFAULT_OVERRIDES_YAML: &str = include_str!("../../config/lexicon_overrides.yaml");

/// ドメイン固有のスラング上書きテーブル（語 → 重み）。
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct LexiconOverrides {
    #[serde(default)]
    pub terms: BTreeMap<String, f64>,
}

impl LexiconOverrides {
    /// 同梱のゲームスラング表。
    ///
    /// # Errors
    /// 同梱YAMLが壊れている場合のみ失敗する。
    pub fn bundled() -> Result<Self, LexiconOverrideError> {
        Self::parse(DEFAULT_OVERRIDES_YAML, Path::new("<bundled>"))
    }

    /// パス指定があればファイルから、なければ同梱表を読み込む。
    ///
    /// # Errors
    /// 読み込み・パース・検証に失敗した場合は [`LexiconOverrideError`] を返す。
    pub fn load(path: Option<&Path>) -> Result<Self, LexiconOverrideError> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => Self::bundled(),
        }
    }

    pub(crate) fn load_from_path(path: &Path) -> Result<Self, LexiconOverrideError> {
        let contents = fs::read_to_string(path).map_err(|source| LexiconOverrideError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents, path)
    }

    fn parse(contents: &str, path: &Path) -> Result<Self, LexiconOverrideError> {
        let parsed: Self =
            serde_yaml::from_str(contents).map_err(|source| LexiconOverrideError::Deserialize {
                path: path.to_path_buf(),
                source,
            })?;
        parsed.validate()?;
        Ok(parsed)
    }

    fn validate(&self) -> Result<(), LexiconOverrideError> {
        for (term, weight) in &self.terms {
            if term.trim().is_empty() || term.chars().any(char::is_whitespace) {
                return Err(LexiconOverrideError::InvalidTerm(term.clone()));
            }
            if !weight.is_finite() {
                return Err(LexiconOverrideError::InvalidWeight { term: term.clone() });
            }
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LexiconOverrideError {
    #[error("failed to read lexicon overrides at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse lexicon overrides at {path}: {source}")]
    Deserialize {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("override term must be a single token: {0:?}")]
    InvalidTerm(String),
    #[error("override weight for {term:?} must be finite")]
    InvalidWeight { term: String },
}
