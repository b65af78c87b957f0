use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    api,
    config::Config,
    context::{ContextModel, ContextScorer, RustBertSentimentModel, UnavailableContextModel},
    engine::{BatchRunner, EngineContext},
    language_detection::LanguageGate,
    lexicon::{Lexicon, LexiconOverrides, LexiconScorer},
    observability::Telemetry,
    store::{MemoryReviewStore, PgReviewStore, ReviewStore},
};

#[derive(Clone)]
pub(crate) struct AppState {
    registry: Arc<ComponentRegistry>,
}

pub struct ComponentRegistry {
    config: Arc<Config>,
    telemetry: Telemetry,
    runner: BatchRunner,
    store: Arc<dyn ReviewStore>,
    shutdown: CancellationToken,
}

impl AppState {
    pub(crate) fn new(registry: ComponentRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    pub(crate) fn telemetry(&self) -> &Telemetry {
        &self.registry.telemetry
    }

    pub(crate) fn runner(&self) -> &BatchRunner {
        &self.registry.runner
    }

    pub(crate) fn store(&self) -> Arc<dyn ReviewStore> {
        Arc::clone(&self.registry.store)
    }

    pub(crate) fn shutdown_token(&self) -> &CancellationToken {
        &self.registry.shutdown
    }
}

impl ComponentRegistry {
    /// 構成情報と依存をまとめて初期化し、アプリケーションの共有レジストリを構築する。
    ///
    /// # Errors
    /// 辞書・言語ゲート・文脈モデル・DBプールの初期化が失敗した場合はエラーを返す。
    pub async fn build(config: Config, telemetry: Telemetry) -> Result<Self> {
        let config = Arc::new(config);

        let overrides = LexiconOverrides::load(config.lexicon_overrides_path())
            .context("failed to load lexicon overrides")?;
        let lexicon = Lexicon::with_bundled_base(&overrides).context("failed to build lexicon")?;
        info!(
            terms = lexicon.len(),
            overrides = overrides.terms.len(),
            "lexicon loaded"
        );
        let lexicon_scorer = LexiconScorer::new(Arc::new(lexicon), config.lexicon_settings());

        let gate = LanguageGate::with_lingua(
            &config.gate_settings(),
            config.lang_min_relative_distance(),
        )
        .context("failed to build language gate")?;

        let model: Arc<dyn ContextModel> = match config.context_model_dir() {
            Some(dir) => Arc::new(
                RustBertSentimentModel::from_dir(dir)
                    .with_context(|| format!("failed to load context model from {}", dir.display()))?,
            ),
            None => {
                warn!("REVIEW_CONTEXT_MODEL_DIR is not set; every accepted review will be indeterminate");
                Arc::new(UnavailableContextModel)
            }
        };
        let context_scorer =
            ContextScorer::new(model, config.label_adapter(), config.context_settings())
                .with_latency_histogram(telemetry.metrics().context_latency.clone());

        let engine = Arc::new(
            EngineContext::new(
                Arc::new(gate),
                Arc::new(lexicon_scorer),
                Arc::new(context_scorer),
                config.engine_version(),
            )
            .context("failed to assemble engine context")?,
        );

        let store: Arc<dyn ReviewStore> = match config.db_dsn() {
            Some(dsn) => {
                let pool = PgPoolOptions::new()
                    .max_connections(config.db_max_connections())
                    .acquire_timeout(config.db_acquire_timeout())
                    .test_before_acquire(true)
                    .connect_lazy(dsn)
                    .context("failed to configure review db connection pool")?;
                let store = PgReviewStore::new(pool);
                store.ensure_schema().await?;
                Arc::new(store)
            }
            None => {
                warn!("REVIEW_DB_DSN is not set; scored reviews are kept in memory only");
                Arc::new(MemoryReviewStore::new())
            }
        };

        let runner =
            BatchRunner::new(engine, Arc::clone(&store)).with_metrics(telemetry.metrics_arc());

        Ok(Self {
            config,
            telemetry,
            runner,
            store,
            shutdown: CancellationToken::new(),
        })
    }

    #[must_use]
    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    #[must_use]
    pub fn runner(&self) -> &BatchRunner {
        &self.runner
    }

    /// シャットダウン時にキャンセルされるトークン。実行中のバッチはこの子トークンで動く。
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

pub fn build_router(registry: ComponentRegistry) -> Router {
    let state = AppState::new(registry);
    api::router(state)
}
