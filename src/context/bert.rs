use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rust_bert::pipelines::common::{ModelResource, ModelType};
use rust_bert::pipelines::sequence_classification::{
    SequenceClassificationConfig, SequenceClassificationModel,
};
use rust_bert::resources::LocalResource;
use tokio::sync::Mutex;
use tracing::info;

use super::{ContextModel, NativeClass};

/// rust-bertのRoBERTa系列分類モデル（例: twitter-roberta-base-sentiment）。
///
/// モデルディレクトリには`rust_model.ot`, `config.json`, `vocab.json`,
/// `merges.txt`を置く。推論はCPU上のブロッキングスレッドで実行する。
#[derive(Clone)]
pub struct RustBertSentimentModel {
    model: Arc<Mutex<SequenceClassificationModel>>,
    name: String,
}

impl std::fmt::Debug for RustBertSentimentModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RustBertSentimentModel")
            .field("name", &self.name)
            .field("model", &"<SequenceClassificationModel>")
            .finish()
    }
}

impl RustBertSentimentModel {
    /// ローカルのリソースディレクトリからモデルを読み込む。
    ///
    /// # Errors
    /// 必須ファイルが無い、またはモデルの初期化に失敗した場合はエラー。
    pub fn from_dir(dir: &Path) -> Result<Self> {
        for file in ["rust_model.ot", "config.json", "vocab.json", "merges.txt"] {
            let path = dir.join(file);
            anyhow::ensure!(path.is_file(), "missing model resource: {}", path.display());
        }

        let dir: PathBuf = dir.to_path_buf();
        let name = dir
            .file_name()
            .map_or_else(|| "roberta".to_string(), |n| n.to_string_lossy().into_owned());

        // 読み込みは重くブロッキングなので別スレッドで行う
        let model = std::thread::spawn(move || {
            let config = SequenceClassificationConfig::new(
                ModelType::Roberta,
                ModelResource::Torch(Box::new(LocalResource::from(dir.join("rust_model.ot")))),
                LocalResource::from(dir.join("config.json")),
                LocalResource::from(dir.join("vocab.json")),
                Some(LocalResource::from(dir.join("merges.txt"))),
                false,
                None::<bool>,
                None::<bool>,
            );
            SequenceClassificationModel::new(&config)
        })
        .join()
        .map_err(|_| anyhow::anyhow!("failed to join context model loading thread"))?
        .context("failed to initialize sequence classification model")?;

        info!(model = %name, "context model loaded");

        Ok(Self {
            model: Arc::new(Mutex::new(model)),
            name,
        })
    }
}

#[async_trait]
impl ContextModel for RustBertSentimentModel {
    fn name(&self) -> &str {
        &self.name
    }

    /// argmaxクラスとそのsoftmax確率のみを返す。
    ///
    /// 呼び出し側が待機を打ち切っても推論は最後まで走る。同時実行数は
    /// [`super::ContextScorer`]が保持する許可で制限される。
    async fn classify(&self, text: &str) -> Result<Vec<NativeClass>> {
        let model = Arc::clone(&self.model);
        let text = text.to_string();

        let labels = tokio::task::spawn_blocking(move || {
            let model = model.blocking_lock();
            model.predict([text.as_str()])
        })
        .await
        .context("failed to join context model task")?;

        Ok(labels
            .into_iter()
            .map(|label| NativeClass::new(label.text, label.score))
            .collect())
    }
}
