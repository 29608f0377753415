//! FinRAG CLI
//!
//! Main entry point for the finrag command-line tool.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use finrag::config::{Depth, Speed};
use finrag::kpi::KpiCatalog;
use finrag::{
    ChatLog, ConfigLoader, FinragConfig, HttpTraceSink, RunMode, Services, SessionDriver, SessionRequest,
    SessionStep,
};

#[derive(Parser)]
#[command(name = "finrag")]
#[command(about = "FinRAG - question answering over corporate filings", long_about = None)]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Config file used instead of ~/.finrag and ./.finrag
    #[arg(short, long, global = true, env = "FINRAG_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a question, answering follow-up prompts on stdin
    Ask {
        query: String,
        /// Skip clarification and answer checks, single repeater pass
        #[arg(long)]
        fast: bool,
        /// Enable persona paths and KPI analysis
        #[arg(long)]
        research: bool,
        /// Description of an attached image
        #[arg(long)]
        image_description: Option<String>,
        /// Continue an earlier session
        #[arg(long)]
        session: Option<String>,
    },

    /// Configuration commands
    #[command(subcommand)]
    Config(ConfigCommands),

    /// List KPI topics, or the KPIs of one topic
    Kpis { topic: Option<String> },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration
    Show,
}

async fn load_config(path: Option<&PathBuf>) -> anyhow::Result<FinragConfig> {
    let config = match path {
        Some(path) => ConfigLoader::load_from_path(path).await?,
        None => ConfigLoader::new()?.load().await?,
    };
    Ok(config)
}

fn mask(secret: &mut Option<String>) {
    if secret.as_ref().is_some_and(|s| !s.is_empty()) {
        *secret = Some("********".to_string());
    }
}

fn show_config(mut config: FinragConfig) -> anyhow::Result<()> {
    mask(&mut config.llm.api_key);
    for provider in &mut config.web_search.providers {
        mask(&mut provider.api_key);
    }
    println!("{}", toml::to_string_pretty(&config).context("rendering configuration")?);
    Ok(())
}

fn show_kpis(catalog: &KpiCatalog, topic: Option<&str>) -> anyhow::Result<()> {
    match topic {
        None => {
            for topic in &catalog.topics {
                println!("{:<20} {}", topic.name, topic.description);
            }
        }
        Some(name) => {
            let topic = catalog
                .topic(name)
                .with_context(|| format!("unknown KPI topic '{name}', try one of: {}", catalog.topic_names().join(", ")))?;
            println!("{} - {}", topic.name, topic.description);
            for kpi in &topic.kpis {
                println!("  {:<24} {} [{}]", kpi.name, kpi.formula, kpi.unit);
            }
        }
    }
    Ok(())
}

async fn ask(config: FinragConfig, request: SessionRequest) -> anyhow::Result<i32> {
    let services = Services::from_config(&config).await?;
    let mut driver = SessionDriver::new(services, ChatLog::new(config.chat_log_dir()?));
    if let Some(sink) = HttpTraceSink::from_config(&config.observability)? {
        driver = driver.with_trace_sink(Arc::new(sink));
    }

    let mut session = driver.start(request).await?;
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    let result = loop {
        match session.step().await? {
            SessionStep::Interrupt(prompt) => {
                stdout.write_all(format!("{}\n> ", prompt.prompt).as_bytes()).await?;
                stdout.flush().await?;
                match stdin.next_line().await? {
                    Some(line) => session.respond(line.trim()).await?,
                    None => break session.cancel().await,
                }
            }
            SessionStep::Final(result) => break result,
        }
    };

    if !result.answer.is_empty() {
        println!("{}", result.answer);
    }
    if !result.citations.is_empty() {
        println!("\nSources:");
        for citation in &result.citations {
            println!("  - {citation}");
        }
    }
    if !result.follow_ups.is_empty() {
        println!("\nYou might also ask:");
        for question in &result.follow_ups {
            println!("  - {question}");
        }
    }
    println!("\nSession: {}", session.id());
    Ok(result.exit_code.code())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref()).await?;
    finrag::logging::init(&config.logging)?;

    match cli.command {
        Commands::Ask {
            query,
            fast,
            research,
            image_description,
            session,
        } => {
            let speed = if fast { Speed::Fast } else { Speed::Slow };
            let depth = if research { Depth::Research } else { Depth::Normal };
            let mut request = SessionRequest::new(query).with_mode(RunMode::new(speed, depth));
            if let Some(description) = image_description {
                request = request.with_image(description);
            }
            if let Some(session) = session {
                request = request.in_session(session);
            }
            let code = ask(config, request).await?;
            std::process::exit(code);
        }
        Commands::Config(ConfigCommands::Show) => show_config(config),
        Commands::Kpis { topic } => {
            let catalog = KpiCatalog::load_or_builtin(config.storage.kpi_catalog.as_deref()).await?;
            show_kpis(&catalog, topic.as_deref())
        }
    }
}
