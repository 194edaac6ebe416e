//! Guidance input and generated artifact output.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use tokio::sync::RwLock;

use super::GenerationError;
use crate::pipeline::fs_helpers::{read_optional, write_atomic_async};

/// A line that opens another numbered section ("2.5.6.2 Benefits").
static SECTION_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\d+\.\d+").expect("valid heading regex"));

/// File name of a node's artifact: `2.5.6.1` -> `2_5_6_1.tex`.
pub fn artifact_file_name(node: &str) -> String {
    format!("{}.tex", node.replace('.', "_"))
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Persist (replace) the artifact for `node`. Visible to `read_artifact` on return.
    async fn write_artifact(&self, node: &str, content: &str) -> Result<(), GenerationError>;

    async fn read_artifact(&self, node: &str) -> Result<Option<String>, GenerationError>;

    /// Requirements text for `node`, `None` when there is none.
    async fn read_guidance(&self, node: &str) -> Result<Option<String>, GenerationError>;

    /// Persist a whole-document file (e.g. `main.tex`) next to the artifacts.
    async fn write_document(&self, name: &str, content: &str) -> Result<(), GenerationError>;
}

// ═══════════════════════════════════════════════════════════
// Guidance extraction
// ═══════════════════════════════════════════════════════════

/// Pull the block for `node` out of its parent's guidance text: from the line
/// starting with the node id up to the next numbered heading.
pub fn extract_guidance_block(text: &str, node: &str) -> Option<String> {
    let mut lines = text.lines();
    let start = lines.by_ref().find(|line| starts_with_id(line, node))?;

    let mut block = vec![start];
    for line in lines {
        if SECTION_HEADING.is_match(line) {
            break;
        }
        block.push(line);
    }
    Some(block.join("\n").trim().to_string())
}

fn starts_with_id(line: &str, node: &str) -> bool {
    line.trim_start().strip_prefix(node).is_some_and(|rest| {
        rest.is_empty() || rest.starts_with(|c: char| c.is_whitespace() || c == ':')
    })
}

fn artifact_header(node: &str) -> String {
    format!(
        "% Section {node}\n% Generated: {}\n\n",
        Utc::now().format("%Y-%m-%d %H:%M:%S")
    )
}

/// Drop the generated header comment lines written by `artifact_header`.
fn strip_artifact_header(content: &str) -> String {
    content
        .lines()
        .skip_while(|l| l.starts_with("% Section ") || l.starts_with("% Generated:"))
        .skip_while(|l| l.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

// ═══════════════════════════════════════════════════════════
// File-system store
// ═══════════════════════════════════════════════════════════

/// Guidance as `<guidance_dir>/<node>.txt`, artifacts as `<output_dir>/<node_with_underscores>.tex`.
pub struct FsArtifactStore {
    guidance_dir: PathBuf,
    output_dir: PathBuf,
}

impl FsArtifactStore {
    pub fn new(guidance_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            guidance_dir: guidance_dir.into(),
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn artifact_path(&self, node: &str) -> PathBuf {
        self.output_dir.join(artifact_file_name(node))
    }

    async fn read_text(path: &Path) -> Result<Option<String>, GenerationError> {
        Ok(read_optional(path)
            .await?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn write_artifact(&self, node: &str, content: &str) -> Result<(), GenerationError> {
        let full = format!("{}{}\n", artifact_header(node), content.trim_end());
        write_atomic_async(self.artifact_path(node), full.into_bytes()).await?;
        tracing::debug!(node, path = %self.artifact_path(node).display(), "Artifact written");
        Ok(())
    }

    async fn read_artifact(&self, node: &str) -> Result<Option<String>, GenerationError> {
        Ok(Self::read_text(&self.artifact_path(node))
            .await?
            .map(|text| strip_artifact_header(&text)))
    }

    async fn read_guidance(&self, node: &str) -> Result<Option<String>, GenerationError> {
        let own = self.guidance_dir.join(format!("{node}.txt"));
        if let Some(text) = Self::read_text(&own).await? {
            return Ok(Some(text));
        }

        // Nested nodes are often described inside their parent's file.
        let Some((parent, _)) = node.rsplit_once('.') else {
            return Ok(None);
        };
        let parent_file = self.guidance_dir.join(format!("{parent}.txt"));
        let Some(parent_text) = Self::read_text(&parent_file).await? else {
            return Ok(None);
        };
        let block = extract_guidance_block(&parent_text, node);
        if block.is_some() {
            tracing::debug!(node, parent, "Guidance taken from parent file");
        }
        Ok(block)
    }

    async fn write_document(&self, name: &str, content: &str) -> Result<(), GenerationError> {
        write_atomic_async(self.output_dir.join(name), content.as_bytes().to_vec()).await?;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════
// In-memory store
// ═══════════════════════════════════════════════════════════

/// In-process store for tests and dry runs. Writes can be switched off to
/// simulate an unreachable output location.
#[derive(Default)]
pub struct InMemoryArtifactStore {
    guidance: HashMap<String, String>,
    artifacts: RwLock<HashMap<String, String>>,
    documents: RwLock<HashMap<String, String>>,
    read_only: AtomicBool,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_guidance(mut self, node: &str, text: &str) -> Self {
        self.guidance.insert(node.to_string(), text.to_string());
        self
    }

    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), GenerationError> {
        if self.read_only.load(Ordering::SeqCst) {
            return Err(GenerationError::StoreUnavailable("memory artifact store is read-only".into()));
        }
        Ok(())
    }

    pub async fn artifact_count(&self) -> usize {
        self.artifacts.read().await.len()
    }

    pub async fn document(&self, name: &str) -> Option<String> {
        self.documents.read().await.get(name).cloned()
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn write_artifact(&self, node: &str, content: &str) -> Result<(), GenerationError> {
        self.check_writable()?;
        self.artifacts
            .write()
            .await
            .insert(node.to_string(), content.to_string());
        Ok(())
    }

    async fn read_artifact(&self, node: &str) -> Result<Option<String>, GenerationError> {
        Ok(self.artifacts.read().await.get(node).cloned())
    }

    async fn read_guidance(&self, node: &str) -> Result<Option<String>, GenerationError> {
        Ok(self.guidance.get(node).cloned())
    }

    async fn write_document(&self, name: &str, content: &str) -> Result<(), GenerationError> {
        self.check_writable()?;
        self.documents
            .write()
            .await
            .insert(name.to_string(), content.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARENT_GUIDANCE: &str = "\
2.5.6.1 Therapeutic Context
Describe the therapeutic context.
2.5.6.1.1 Disease or Condition
Epidemiology and natural history.
Include unmet need.
2.5.6.1.2 Current Therapies
Standard of care.
";

    #[test]
    fn file_name_uses_underscores() {
        assert_eq!(artifact_file_name("2.5.6.1"), "2_5_6_1.tex");
    }

    #[test]
    fn block_extracted_until_next_heading() {
        let block = extract_guidance_block(PARENT_GUIDANCE, "2.5.6.1.1").unwrap();
        assert_eq!(
            block,
            "2.5.6.1.1 Disease or Condition\nEpidemiology and natural history.\nInclude unmet need."
        );
        assert!(extract_guidance_block(PARENT_GUIDANCE, "2.5.6.1.3").is_none());
    }

    #[test]
    fn block_match_requires_exact_id() {
        // "2.5.6.1" must not match the "2.5.6.1.1" line first.
        let block = extract_guidance_block("2.5.6.1.1 Child\nx\n2.5.6.1 Parent\ny\n", "2.5.6.1").unwrap();
        assert!(block.starts_with("2.5.6.1 Parent"));
    }

    #[test]
    fn header_roundtrip() {
        let written = format!("{}\\section{{A}}\nBody", artifact_header("2.5.1"));
        assert_eq!(strip_artifact_header(&written), "\\section{A}\nBody");
    }

    #[tokio::test]
    async fn fs_store_artifacts_and_guidance() {
        let dir = tempfile::tempdir().unwrap();
        let guidance = dir.path().join("guidance");
        std::fs::create_dir_all(&guidance).unwrap();
        std::fs::write(guidance.join("2.5.1.txt"), "Explain the rationale.").unwrap();
        std::fs::write(guidance.join("2.5.6.1.txt"), PARENT_GUIDANCE).unwrap();

        let store = FsArtifactStore::new(&guidance, dir.path().join("out"));

        assert_eq!(
            store.read_guidance("2.5.1").await.unwrap().as_deref(),
            Some("Explain the rationale.")
        );
        let nested = store.read_guidance("2.5.6.1.2").await.unwrap().unwrap();
        assert!(nested.contains("Standard of care."));
        assert!(store.read_guidance("2.5.9").await.unwrap().is_none());
        assert!(store.read_guidance("2").await.unwrap().is_none());

        assert!(store.read_artifact("2.5.1").await.unwrap().is_none());
        store
            .write_artifact("2.5.1", "\\section{Rationale}\nText.")
            .await
            .unwrap();
        assert!(store.artifact_path("2.5.1").ends_with("2_5_1.tex"));
        assert_eq!(
            store.read_artifact("2.5.1").await.unwrap().as_deref(),
            Some("\\section{Rationale}\nText.")
        );
        let raw = std::fs::read_to_string(store.artifact_path("2.5.1")).unwrap();
        assert!(raw.starts_with("% Section 2.5.1\n% Generated: "));

        store.write_document("main.tex", "\\begin{document}").await.unwrap();
        assert!(dir.path().join("out").join("main.tex").exists());
    }

    #[tokio::test]
    async fn memory_store_roundtrip() {
        let store = InMemoryArtifactStore::new().with_guidance("2.5.4", "Efficacy guidance");
        assert_eq!(
            store.read_guidance("2.5.4").await.unwrap().as_deref(),
            Some("Efficacy guidance")
        );
        store.write_artifact("2.5.4", "body").await.unwrap();
        assert_eq!(store.read_artifact("2.5.4").await.unwrap().as_deref(), Some("body"));
        assert_eq!(store.artifact_count().await, 1);
    }

    #[tokio::test]
    async fn read_only_memory_store_rejects_writes() {
        let store = InMemoryArtifactStore::new();
        store.set_read_only(true);
        assert!(matches!(
            store.write_artifact("2.5.4", "body").await,
            Err(GenerationError::StoreUnavailable(_))
        ));
        assert!(store.write_document("main.tex", "doc").await.is_err());
        assert!(store.read_artifact("2.5.4").await.unwrap().is_none());

        store.set_read_only(false);
        store.write_artifact("2.5.4", "body").await.unwrap();
        assert_eq!(store.artifact_count().await, 1);
    }

    #[test]
    fn store_is_object_safe() {
        fn _assert(_: &dyn ArtifactStore) {}
    }
}
