use anyhow::{Context, Result};
use async_trait::async_trait;
use ragdesk::cli::{Cli, Commands, ConfigAction};
use ragdesk::config::{Config, ConfigValidator};
use ragdesk::embedding;
use ragdesk::generation::{ChatCompletionsGateway, GenerationGateway};
use ragdesk::index::VectorIndex;
use ragdesk::pipeline::RagPipeline;
use ragdesk::types::{DocumentId, OwnerId};
use ragdesk::RagError;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    init_logging(cli.verbose);

    match cli.command {
        Commands::Ingest {
            file,
            owner,
            document,
        } => {
            cmd_ingest(cli.config, &file, &owner, &document).await?;
        }
        Commands::Ask {
            question,
            owner,
            json,
        } => {
            cmd_ask(cli.config, &question, &owner, json).await?;
        }
        Commands::Delete { owner, document } => {
            cmd_delete(cli.config, &owner, &document).await?;
        }
        Commands::Clear { owner } => {
            cmd_clear(cli.config, &owner).await?;
        }
        Commands::Count { owner } => {
            cmd_count(cli.config, &owner).await?;
        }
        Commands::Config { action } => {
            cmd_config(cli.config, action)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_level = if verbose { "ragdesk=debug" } else { "ragdesk=info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    fmt().with_env_filter(filter).with_target(false).init();
}

/// Stands in for the generation gateway when generation is disabled; `ask`
/// then prints retrieved passages instead of an answer
struct GenerationDisabled;

#[async_trait]
impl GenerationGateway for GenerationDisabled {
    async fn generate(&self, _prompt: &str) -> ragdesk::Result<String> {
        Err(RagError::Generation {
            provider: "disabled".to_string(),
            message: "generation is disabled in configuration".to_string(),
        })
    }

    fn name(&self) -> &str {
        "disabled"
    }
}

fn build_pipeline(config: &Config, with_generation: bool) -> Result<RagPipeline> {
    let embedder =
        embedding::from_config(&config.embedding).context("Failed to initialize embedding")?;

    let generator: Arc<dyn GenerationGateway> = if with_generation && config.generation.enabled {
        Arc::new(
            ChatCompletionsGateway::from_config(&config.generation)
                .context("Failed to initialize generation")?,
        )
    } else {
        Arc::new(GenerationDisabled)
    };

    Ok(RagPipeline::from_config(config, embedder, generator)?)
}

async fn cmd_ingest(
    config_path: Option<PathBuf>,
    file: &Path,
    owner: &OwnerId,
    document: &DocumentId,
) -> Result<()> {
    let config = load_config(config_path)?;
    let pipeline = build_pipeline(&config, false)?;

    let report = pipeline
        .try_ingest(owner, file, document)
        .await
        .with_context(|| format!("Failed to ingest {}", file.display()))?;

    println!(
        "✓ Ingested {} ({}) as document {}",
        report.source, report.format, report.document_id
    );
    println!("  Chunks stored: {}", report.chunk_count);
    Ok(())
}

async fn cmd_ask(
    config_path: Option<PathBuf>,
    question: &str,
    owner: &OwnerId,
    json: bool,
) -> Result<()> {
    let config = load_config(config_path)?;
    let pipeline = build_pipeline(&config, true)?;

    if !config.generation.enabled {
        let retrieval = pipeline
            .search(owner, question)
            .await
            .context("Failed to search documents")?;

        if json {
            let json = serde_json::to_string_pretty(retrieval.chunks())
                .context("Failed to serialize results")?;
            println!("{}", json);
            return Ok(());
        }

        if retrieval.is_empty() {
            println!("{}", ragdesk::synthesis::NO_MATCHES_ANSWER);
            return Ok(());
        }
        println!("Generation is disabled; most relevant passages:\n");
        for (rank, hit) in retrieval.chunks().iter().enumerate() {
            println!(
                "{}. [{:.3}] {} (document {})",
                rank + 1,
                hit.score,
                hit.chunk.source,
                hit.chunk.document_id
            );
            println!("   {}\n", hit.chunk.text.replace('\n', "\n   "));
        }
        return Ok(());
    }

    let response = pipeline.query(owner, question).await;

    if json {
        let json =
            serde_json::to_string_pretty(&response).context("Failed to serialize response")?;
        println!("{}", json);
        return Ok(());
    }

    println!("{}", response.answer);
    if !response.citations.is_empty() {
        println!("\nSources:");
        for citation in &response.citations {
            println!("  - {}", citation.title);
        }
    }
    Ok(())
}

async fn cmd_delete(
    config_path: Option<PathBuf>,
    owner: &OwnerId,
    document: &DocumentId,
) -> Result<()> {
    let config = load_config(config_path)?;
    let index = VectorIndex::new(config.collections_dir());

    let removed = index
        .delete_by_document(owner, document)
        .await
        .with_context(|| format!("Failed to delete document {}", document))?;

    println!("✓ Removed {} chunks of document {}", removed, document);
    Ok(())
}

async fn cmd_clear(config_path: Option<PathBuf>, owner: &OwnerId) -> Result<()> {
    let config = load_config(config_path)?;
    let index = VectorIndex::new(config.collections_dir());

    index
        .clear(owner)
        .await
        .with_context(|| format!("Failed to clear collection for owner {}", owner))?;

    println!("✓ Collection {} cleared", owner.collection_name());
    Ok(())
}

async fn cmd_count(config_path: Option<PathBuf>, owner: &OwnerId) -> Result<()> {
    let config = load_config(config_path)?;
    let index = VectorIndex::new(config.collections_dir());

    let count = index
        .count(owner)
        .await
        .with_context(|| format!("Failed to count chunks for owner {}", owner))?;

    println!("{}", count);
    Ok(())
}

fn cmd_config(config_path: Option<PathBuf>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show { section } => {
            let config = load_config(config_path)?;
            let value = serde_json::to_value(&config).context("Failed to serialize config")?;

            let shown = match section {
                Some(section) => value
                    .get(&section)
                    .cloned()
                    .with_context(|| format!("Unknown config section: {}", section))?,
                None => value,
            };

            let json =
                serde_json::to_string_pretty(&shown).context("Failed to serialize config")?;
            println!("{}", json);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)
                .with_context(|| format!("Invalid configuration at {}", path.display()))?;
            ConfigValidator::validate(&config)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            let mut config = Config::default();
            config.storage.data_dir = Config::default_data_dir()?;
            config.save(&path)?;

            println!("✓ Configuration initialized at: {}", path.display());
            println!("  Data directory: {}", config.storage.data_dir.display());
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::warn!(
            "Config file not found, using defaults. Run 'ragdesk config init' to create one."
        );
        let mut config = Config::default();
        config.apply_env_overrides();
        ConfigValidator::validate(&config)?;
        return Ok(config);
    }

    Config::load(&path).with_context(|| format!("Failed to load config from {}", path.display()))
}
