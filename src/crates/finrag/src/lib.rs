//! # FinRAG - question answering over corporate filings
//!
//! A query goes through a safety check, a merge with the conversation so far
//! and a path decision. Financial questions may be clarified with the user,
//! checked against the local filing catalog, then answered by one of three
//! graphs built on [`finrag_graph`]:
//!
//! - **simple**: one run of the RAG sub-graph (retrieve, grade, rewrite,
//!   generate, check, with web fallback)
//! - **complex**: the repeater, up to three passes of decompose, run the
//!   question groups, combine and check sufficiency
//! - **persona**: several analyst viewpoints ask and answer their own
//!   questions, a supervisor fills gaps
//!
//! In research mode a KPI analysis can run next to the answer path.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use finrag::{ChatLog, ConfigLoader, RunMode, Services, SessionDriver, SessionRequest, SessionStep};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = ConfigLoader::new()?.load().await?;
//! let services = Services::from_config(&config).await?;
//! let driver = SessionDriver::new(services, ChatLog::new(config.chat_log_dir()?));
//!
//! let request = SessionRequest::new("What was Apple's revenue in 2022?").with_mode(RunMode::fast());
//! let mut session = driver.start(request).await?;
//! let result = loop {
//!     match session.step().await? {
//!         SessionStep::Interrupt(_) => session.respond("ignore").await?,
//!         SessionStep::Final(result) => break result,
//!     }
//! };
//! println!("{}", result.answer);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod chat_log;
pub mod config;
pub mod document;
pub mod kpi;
pub mod logging;
pub mod reports;
pub mod retrieval;
pub mod services;
pub mod session;
pub mod trace_sink;
pub mod websearch;
pub mod workflow;

mod error;

pub use cache::{AnswerCache, CachedAnswer};
pub use chat_log::{ChatLog, ChatRecord};
pub use config::{ConfigLoader, FinragConfig, RunMode};
pub use document::{Document, DocumentMetadata};
pub use reports::{ReportCatalog, ReportDownloader, ReportKey};
pub use retrieval::{InMemoryRetriever, MetadataFilter, Retriever};
pub use services::Services;
pub use session::{ExitCode, InterruptPrompt, Session, SessionDriver, SessionRequest, SessionResult, SessionStep};
pub use trace_sink::HttpTraceSink;
pub use websearch::WebSearch;

pub use error::{FinragError, Result};
