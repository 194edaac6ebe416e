//! Dossier command line.
//!
//! Commands:
//! - dossier order [--nodes 2.5.1,2.5.4]
//! - dossier classify <files...> [--ledger <dir>]
//! - dossier generate [--evidence <json>] [--documents <files...> --ledger <dir>]
//!   [--guidance <dir>] [--output <dir>]

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use dossier::config::{self, ConfigError, PipelineConfig};
use dossier::pipeline::classify::{Classifier, ClassifyError, SourceDocument};
use dossier::pipeline::dependency::{plan_batches, resolve};
use dossier::pipeline::generation::{
    assemble_master_document, ArtifactStore, FsArtifactStore, GenerationError,
    JsonEvidenceStore, LedgerEvidenceStore, MergedEvidenceStore, Orchestrator,
    DOCUMENT_EXCERPT_CHARS, MASTER_DOCUMENT_NAME,
};
use dossier::pipeline::ledger::{ClassificationLedger, FsLedgerBackend, LedgerError};
use dossier::pipeline::oracle::{OllamaOracle, OracleError};
use dossier::pipeline::retry::RetryEngine;
use dossier::taxonomy::catalog::{
    clinical_overview_dependencies, clinical_overview_evidence_routes, ctd_taxonomy,
    CLINICAL_OVERVIEW,
};
use dossier::taxonomy::{Taxonomy, TaxonomyError};

/// Dossier - classify source documents into the CTD and draft its sections
#[derive(Parser, Debug)]
#[command(name = "dossier")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Custom taxonomy JSON file (defaults to the built-in CTD catalog)
    #[arg(long, global = true)]
    taxonomy: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the dependency-resolved generation order
    Order {
        /// Nodes to order (defaults to the Clinical Overview subtree)
        #[arg(long, value_delimiter = ',')]
        nodes: Vec<String>,
    },

    /// Classify text documents and record the result in the ledger
    Classify {
        /// Plain-text source documents
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Ledger directory (defaults to ~/Dossier/ledger)
        #[arg(long)]
        ledger: Option<PathBuf>,
    },

    /// Generate sections in dependency order and assemble main.tex
    Generate {
        /// Combined evidence JSON file
        #[arg(long, required_unless_present = "documents")]
        evidence: Option<PathBuf>,

        /// Classified source documents to cite, looked up in the ledger
        #[arg(long, num_args = 1..)]
        documents: Vec<PathBuf>,

        /// Ledger directory (defaults to ~/Dossier/ledger)
        #[arg(long)]
        ledger: Option<PathBuf>,

        /// Guidance directory (defaults to ~/Dossier/guidance)
        #[arg(long)]
        guidance: Option<PathBuf>,

        /// Output directory (defaults to ~/Dossier/output)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Nodes to generate (defaults to the Clinical Overview subtree)
        #[arg(long, value_delimiter = ',')]
        nodes: Vec<String>,

        /// Persist first drafts without asking for revisions
        #[arg(long)]
        no_refinement: bool,

        /// Title of the master document
        #[arg(long, default_value = "Clinical Overview")]
        title: String,
    },
}

#[derive(Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Taxonomy(#[from] TaxonomyError),

    #[error(transparent)]
    Oracle(#[from] OracleError),

    #[error(transparent)]
    Classify(#[from] ClassifyError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("Summary serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Unknown taxonomy node: {0}")]
    UnknownNode(String),

    #[error("{0} item(s) failed")]
    Failed(usize),

    #[error("Cancelled")]
    Cancelled,
}

#[tokio::main]
async fn main() -> ExitCode {
    dossier::init_tracing();
    let cli = Cli::parse();

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing in-flight work");
            on_interrupt.cancel();
        }
    });

    match run(cli, &cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, cancel: &CancellationToken) -> Result<(), CliError> {
    let config = PipelineConfig::from_env()?;
    let taxonomy = Arc::new(load_taxonomy(cli.taxonomy.as_deref())?);

    match cli.command {
        Command::Order { nodes } => order(&taxonomy, &config, nodes),
        Command::Classify { files, ledger } => {
            classify(taxonomy, &config, &files, ledger, cancel).await
        }
        Command::Generate {
            evidence,
            documents,
            ledger,
            guidance,
            output,
            nodes,
            no_refinement,
            title,
        } => {
            let mut config = config;
            if no_refinement {
                config.generation.enable_refinement = false;
            }
            let sources = EvidenceSources {
                evidence,
                documents,
                ledger: ledger.unwrap_or_else(config::ledger_dir),
            };
            let guidance = guidance.unwrap_or_else(config::guidance_dir);
            let output = output.unwrap_or_else(config::output_dir);
            generate(taxonomy, &config, sources, guidance, output, nodes, &title, cancel).await
        }
    }
}

fn load_taxonomy(path: Option<&Path>) -> Result<Taxonomy, CliError> {
    match path {
        Some(path) => Ok(Taxonomy::from_file(path)?),
        None => Ok(ctd_taxonomy()?),
    }
}

/// Requested nodes, or the whole Clinical Overview subtree. Unknown ids are rejected.
fn target_nodes(taxonomy: &Taxonomy, nodes: Vec<String>) -> Result<Vec<String>, CliError> {
    if nodes.is_empty() {
        return Ok(taxonomy
            .subtree(CLINICAL_OVERVIEW)
            .into_iter()
            .map(String::from)
            .collect());
    }
    if let Some(unknown) = nodes.iter().find(|n| !taxonomy.contains(n)) {
        return Err(CliError::UnknownNode(unknown.clone()));
    }
    Ok(nodes)
}

fn order(taxonomy: &Taxonomy, config: &PipelineConfig, nodes: Vec<String>) -> Result<(), CliError> {
    let nodes = target_nodes(taxonomy, nodes)?;
    let graph = clinical_overview_dependencies();
    let resolution = resolve(&nodes, &graph);

    for (position, node) in resolution.order.iter().enumerate() {
        println!(
            "{:>3}. {:<10} {}",
            position + 1,
            node,
            taxonomy.title_of(node).unwrap_or("")
        );
    }
    if resolution.has_cycle() {
        println!("cycle, ordered by input: {}", resolution.cyclic.join(", "));
    }

    let batches = plan_batches(&resolution.order, &graph, config.generation.batch_size);
    println!("\n{} batch(es) of up to {}:", batches.len(), config.generation.batch_size);
    for batch in batches {
        println!("  [{}]", batch.join(", "));
    }
    Ok(())
}

/// Plain-text documents keyed by their path, as the ledger stores them.
async fn read_documents(files: &[PathBuf]) -> Result<Vec<SourceDocument>, CliError> {
    let mut docs = Vec::with_capacity(files.len());
    for path in files {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| CliError::Read {
                path: path.clone(),
                source,
            })?;
        let name = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
        docs.push(SourceDocument::new(path.display().to_string(), name, text));
    }
    Ok(docs)
}

async fn classify(
    taxonomy: Arc<Taxonomy>,
    config: &PipelineConfig,
    files: &[PathBuf],
    ledger_dir: Option<PathBuf>,
    cancel: &CancellationToken,
) -> Result<(), CliError> {
    let docs = read_documents(files).await?;

    let oracle = connect_oracle(config).await?;
    let classifier = Classifier::new(
        taxonomy.clone(),
        oracle,
        RetryEngine::from_config(&config.retry),
        config.classifier.clone(),
    )?;
    let ledger = ClassificationLedger::new(Arc::new(FsLedgerBackend::new(
        ledger_dir.unwrap_or_else(config::ledger_dir),
    )));

    let summary = ledger.classify_all(&docs, &classifier, cancel).await;

    for doc in &docs {
        let Some(record) = ledger.load(&doc.key).await? else {
            continue;
        };
        let placement = record.placement_section.as_deref().unwrap_or(&record.module);
        let folder = taxonomy
            .folder_path(placement)
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        println!("{}", doc.key);
        println!("  placement:  {placement} ({}) -> {folder}", record.confidence);
        let references: Vec<String> = record
            .reference_sections
            .iter()
            .map(|tag| format!("{} ({})", tag.node, tag.confidence))
            .collect();
        println!("  references: {}", references.join(", "));
    }
    println!(
        "\nclassified {}, skipped {}, failed {}",
        summary.classified,
        summary.skipped,
        summary.failures.len()
    );
    for failure in &summary.failures {
        println!("  {}: {}", failure.key, failure.error);
    }

    if summary.cancelled {
        return Err(CliError::Cancelled);
    }
    if !summary.failures.is_empty() {
        return Err(CliError::Failed(summary.failures.len()));
    }
    Ok(())
}

/// Where `generate` draws its evidence from.
struct EvidenceSources {
    evidence: Option<PathBuf>,
    documents: Vec<PathBuf>,
    ledger: PathBuf,
}

impl EvidenceSources {
    /// Research papers and classified documents, read as one store.
    async fn open(self) -> Result<MergedEvidenceStore, CliError> {
        let mut merged = MergedEvidenceStore::new();
        if let Some(path) = &self.evidence {
            merged = merged.with(Arc::new(JsonEvidenceStore::open(path)?));
        }
        if !self.documents.is_empty() {
            let docs = read_documents(&self.documents).await?;
            let ledger = ClassificationLedger::new(Arc::new(FsLedgerBackend::new(self.ledger)));
            let store = LedgerEvidenceStore::build(&ledger, &docs, DOCUMENT_EXCERPT_CHARS).await?;
            if store.len() < docs.len() {
                tracing::warn!(
                    cited = store.len(),
                    documents = docs.len(),
                    "Some documents are not classified yet, run `dossier classify` first"
                );
            }
            merged = merged.with(Arc::new(store));
        }
        Ok(merged)
    }
}

#[allow(clippy::too_many_arguments)]
async fn generate(
    taxonomy: Arc<Taxonomy>,
    config: &PipelineConfig,
    sources: EvidenceSources,
    guidance_dir: PathBuf,
    output_dir: PathBuf,
    nodes: Vec<String>,
    title: &str,
    cancel: &CancellationToken,
) -> Result<(), CliError> {
    let nodes = target_nodes(&taxonomy, nodes)?;
    let evidence = Arc::new(sources.open().await?);
    let artifacts = Arc::new(FsArtifactStore::new(guidance_dir, output_dir));
    let oracle = connect_oracle(config).await?;

    let orchestrator = Orchestrator::new(
        taxonomy,
        oracle,
        evidence,
        artifacts.clone(),
        RetryEngine::from_config(&config.retry),
        config.generation.clone(),
    )
    .with_graph(clinical_overview_dependencies())
    .with_routes(clinical_overview_evidence_routes());

    let summary = orchestrator.run(&nodes, cancel).await;

    let included = assemble_master_document(title, &summary.order, artifacts.as_ref()).await?;
    artifacts
        .write_document("run-summary.json", &serde_json::to_string_pretty(&summary)?)
        .await?;

    for report in &summary.completed {
        println!(
            "{:<10} score {:>3}  {}  revisions {}",
            report.node,
            report.quality.score,
            if report.quality.is_valid { "ok  " } else { "weak" },
            report.revisions
        );
    }
    for failure in &summary.failures {
        println!("{:<10} FAILED  {}", failure.key, failure.error);
    }
    println!(
        "\n{}/{} sections pass, {} in {}",
        summary.passed(),
        summary.completed.len(),
        included.len(),
        artifacts.output_dir().join(MASTER_DOCUMENT_NAME).display()
    );

    if summary.cancelled {
        return Err(CliError::Cancelled);
    }
    if !summary.failures.is_empty() {
        return Err(CliError::Failed(summary.failures.len()));
    }
    Ok(())
}

async fn connect_oracle(config: &PipelineConfig) -> Result<Arc<OllamaOracle>, CliError> {
    let oracle = OllamaOracle::from_config(&config.oracle)?;
    match oracle.is_model_available().await {
        Ok(true) => {}
        Ok(false) => tracing::warn!(model = oracle.model(), "Model not pulled on the Ollama server"),
        Err(e) => tracing::warn!(error = %e, "Could not list Ollama models"),
    }
    Ok(Arc::new(oracle))
}
