//! Collaborators and settings shared by every workflow node.
//!
//! [`Services`] is cheap to clone: collaborators sit behind `Arc`, settings
//! are plain values. A session gets its own copy with the run mode applied,
//! so toggles never live in process-wide state.

use llm::{build_client, RemoteLlmConfig, StructuredLlm};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::cache::AnswerCache;
use crate::config::{FinragConfig, Limits, RunMode, WorkflowSettings};
use crate::error::{FinragError, Result};
use crate::kpi::KpiCatalog;
use crate::reports::{
    DirectoryReportCatalog, InMemoryReportCatalog, ReportCatalog, ReportDownloader,
    UnconfiguredDownloader,
};
use crate::retrieval::{HttpRetriever, MultiRetriever, Retriever};
use crate::websearch::{FallbackWebSearch, WebSearch};

#[derive(Clone)]
pub struct Services {
    pub llm: Arc<dyn StructuredLlm>,
    pub retriever: Arc<dyn Retriever>,
    pub web: Arc<dyn WebSearch>,
    pub reports: Arc<dyn ReportCatalog>,
    pub downloader: Arc<dyn ReportDownloader>,
    /// Where downloaded filings are stored
    pub data_dir: PathBuf,
    pub kpis: Arc<KpiCatalog>,
    pub cache: Arc<AnswerCache>,
    pub settings: WorkflowSettings,
    pub limits: Limits,
    /// Documents per retrieval
    pub top_k: usize,
    /// Budget of one retriever call
    pub retriever_timeout: Duration,
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("llm", &self.llm.model_name())
            .field("web", &self.web.name())
            .field("data_dir", &self.data_dir)
            .field("settings", &self.settings)
            .field("limits", &self.limits)
            .field("top_k", &self.top_k)
            .finish_non_exhaustive()
    }
}

impl Services {
    /// Defaults: no web providers, an empty report catalog, no downloader,
    /// the built-in KPI catalog and a disabled cache.
    pub fn new(llm: Arc<dyn StructuredLlm>, retriever: Arc<dyn Retriever>) -> Result<Self> {
        Ok(Self {
            llm,
            retriever,
            web: Arc::new(FallbackWebSearch::default()),
            reports: Arc::new(InMemoryReportCatalog::default()),
            downloader: Arc::new(UnconfiguredDownloader),
            data_dir: PathBuf::from("data"),
            kpis: Arc::new(KpiCatalog::builtin()?),
            cache: Arc::new(AnswerCache::disabled()),
            settings: WorkflowSettings::default(),
            limits: Limits::default(),
            top_k: 5,
            retriever_timeout: Duration::from_secs(30),
        })
    }

    /// Production wiring from configuration
    pub async fn from_config(config: &FinragConfig) -> Result<Self> {
        let llm = llm_from_config(config)?;

        let timeout = config.retriever.timeout();
        let mut retrievers: Vec<Arc<dyn Retriever>> = Vec::new();
        for address in config.retriever.addresses() {
            retrievers.push(Arc::new(HttpRetriever::new(address.base_url(), timeout)?));
        }
        let retriever: Arc<dyn Retriever> = if retrievers.len() == 1 {
            retrievers.remove(0)
        } else {
            Arc::new(MultiRetriever::new(retrievers))
        };

        let web = FallbackWebSearch::from_config(&config.web_search)?;
        info!(providers = ?web.provider_names(), "web search configured");

        let kpis = KpiCatalog::load_or_builtin(config.storage.kpi_catalog.as_deref()).await?;

        Ok(Self::new(llm, retriever)?
            .with_web(Arc::new(web))
            .with_reports(Arc::new(DirectoryReportCatalog::new(&config.storage.data_dir)))
            .with_data_dir(config.storage.data_dir.clone())
            .with_kpis(kpis)
            .with_cache(AnswerCache::new(&config.cache))
            .with_settings(config.workflow.clone())
            .with_limits(config.limits.clone())
            .with_retrieval(config.retriever.top_k, timeout))
    }

    pub fn with_web(mut self, web: Arc<dyn WebSearch>) -> Self {
        self.web = web;
        self
    }

    pub fn with_reports(mut self, reports: Arc<dyn ReportCatalog>) -> Self {
        self.reports = reports;
        self
    }

    pub fn with_downloader(mut self, downloader: Arc<dyn ReportDownloader>) -> Self {
        self.downloader = downloader;
        self
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn with_kpis(mut self, kpis: KpiCatalog) -> Self {
        self.kpis = Arc::new(kpis);
        self
    }

    pub fn with_cache(mut self, cache: AnswerCache) -> Self {
        self.cache = Arc::new(cache);
        self
    }

    pub fn with_settings(mut self, settings: WorkflowSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_retrieval(mut self, top_k: usize, timeout: Duration) -> Self {
        self.top_k = top_k;
        self.retriever_timeout = timeout;
        self
    }

    /// Copy with `mode` applied to settings and limits
    pub fn for_mode(&self, mode: RunMode) -> Self {
        let (settings, limits) = mode.apply(&self.settings, &self.limits);
        Self {
            settings,
            limits,
            ..self.clone()
        }
    }
}

fn llm_from_config(config: &FinragConfig) -> Result<Arc<dyn StructuredLlm>> {
    let settings = &config.llm;
    let base_url = settings
        .base_url
        .clone()
        .unwrap_or_else(|| settings.provider.default_base_url().to_string());
    let api_key = match settings.api_key.as_ref().filter(|k| !k.is_empty() && !k.starts_with("${")) {
        Some(key) => key.clone(),
        None => std::env::var(&settings.api_key_env).map_err(|_| {
            FinragError::Config(format!(
                "no LLM API key: set llm.api_key or the {} environment variable",
                settings.api_key_env
            ))
        })?,
    };
    let remote = RemoteLlmConfig::new(api_key, base_url, settings.model.clone())
        .with_timeout(Duration::from_secs(settings.timeout_secs))
        .with_max_retries(settings.max_retries)
        .with_max_tokens(settings.max_tokens)
        .with_temperature(settings.temperature);
    Ok(build_client(settings.provider, remote)?)
}
