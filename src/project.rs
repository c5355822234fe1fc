//! Project tree cache
//!
//! A snapshot of the Terraform-relevant files under the session's
//! working directory, rebuilt wholesale on demand so external edits can
//! never drift it. Search and validation marks operate on the cached
//! snapshot only; no I/O happens outside `rebuild`.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

use crate::error::TerradeckError;

/// File extensions the tree keeps
const RELEVANT_EXTENSIONS: &[&str] = &["tf", "tfvars", "hcl", "tfstate"];

/// Per-file validation state, updated after a validate run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ValidationOutcome {
    #[default]
    Unknown,
    Valid,
    Invalid {
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    File,
    Directory,
}

/// One node of the cached project tree; paths are relative to the root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectFileNode {
    pub path: PathBuf,
    pub kind: NodeKind,
    pub children: Vec<ProjectFileNode>,
    pub last_validation: ValidationOutcome,
}

impl ProjectFileNode {
    fn directory(path: PathBuf) -> Self {
        Self {
            path,
            kind: NodeKind::Directory,
            children: Vec::new(),
            last_validation: ValidationOutcome::Unknown,
        }
    }

    fn file(path: PathBuf) -> Self {
        Self {
            path,
            kind: NodeKind::File,
            children: Vec::new(),
            last_validation: ValidationOutcome::Unknown,
        }
    }

    /// Count of file nodes in this subtree
    pub fn file_count(&self) -> usize {
        match self.kind {
            NodeKind::File => 1,
            NodeKind::Directory => self.children.iter().map(ProjectFileNode::file_count).sum(),
        }
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}

fn is_relevant_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| RELEVANT_EXTENSIONS.contains(&ext))
        .unwrap_or(false)
}

/// Full directory walk into a fresh tree; hidden entries (including
/// `.terraform`) are skipped and directories without relevant files are
/// pruned.
pub fn scan_tree(root: &Path) -> Result<ProjectFileNode, TerradeckError> {
    if !root.is_dir() {
        return Err(TerradeckError::InvalidProjectRoot {
            path: root.display().to_string(),
        });
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_hidden(entry))
    {
        let entry = entry.map_err(|err| {
            TerradeckError::Io(
                err.into_io_error()
                    .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "walk failed")),
            )
        })?;
        if entry.file_type().is_file() && is_relevant_file(entry.path()) {
            let rel = entry
                .path()
                .strip_prefix(root)
                .expect("walked path is under root")
                .to_path_buf();
            files.push(rel);
        }
    }

    let mut tree = ProjectFileNode::directory(PathBuf::new());
    for file in &files {
        insert_file(&mut tree, file);
    }
    Ok(tree)
}

fn insert_file(root: &mut ProjectFileNode, rel: &Path) {
    let components: Vec<_> = rel.components().collect();
    let mut current = root;
    for (depth, component) in components.iter().enumerate() {
        let child_path = current.path.join(component);
        if depth + 1 == components.len() {
            current.children.push(ProjectFileNode::file(child_path));
        } else {
            let position = current
                .children
                .iter()
                .position(|c| c.kind == NodeKind::Directory && c.path == child_path);
            let index = match position {
                Some(index) => index,
                None => {
                    current.children.push(ProjectFileNode::directory(child_path));
                    current.children.len() - 1
                }
            };
            current = &mut current.children[index];
        }
    }
}

/// Cached project tree with superseded-rebuild protection
#[derive(Debug, Clone)]
pub struct ProjectState {
    root: PathBuf,
    tree: Arc<RwLock<Arc<ProjectFileNode>>>,
    next_generation: Arc<AtomicU64>,
    published_generation: Arc<AtomicU64>,
}

impl ProjectState {
    /// Create an empty cache for `root`; call `rebuild` to populate it
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            tree: Arc::new(RwLock::new(Arc::new(ProjectFileNode::directory(
                PathBuf::new(),
            )))),
            next_generation: Arc::new(AtomicU64::new(0)),
            published_generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Rebuild the tree from disk. Returns the published generation, or
    /// `None` when a newer rebuild finished first and this one was
    /// discarded (the latest rebuild is authoritative).
    pub fn rebuild(&self) -> Result<Option<u64>, TerradeckError> {
        // Generation is taken before the walk so overlapping rebuilds
        // order by when they started observing the filesystem.
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let tree = scan_tree(&self.root)?;

        let mut guard = self.tree.write();
        if generation <= self.published_generation.load(Ordering::SeqCst) {
            debug!(generation, "discarding superseded project rebuild");
            return Ok(None);
        }
        self.published_generation.store(generation, Ordering::SeqCst);
        *guard = Arc::new(tree);
        Ok(Some(generation))
    }

    /// Last-built snapshot; cheap to clone, safe to read concurrently
    pub fn tree(&self) -> Arc<ProjectFileNode> {
        self.tree.read().clone()
    }

    fn relativize<'a>(&self, path: &'a Path) -> &'a Path {
        path.strip_prefix(&self.root).unwrap_or(path)
    }

    /// Update a single file's validation mark without a rebuild.
    /// Returns false when the path is not in the cached tree.
    pub fn mark_validation(&self, path: &Path, outcome: ValidationOutcome) -> bool {
        let rel = self.relativize(path);
        let mut guard = self.tree.write();
        let mut next = (**guard).clone();
        let updated = apply_validation(&mut next, rel, &outcome);
        if updated {
            *guard = Arc::new(next);
        }
        updated
    }

    /// Case-insensitive substring match over cached relative paths.
    /// Operates on the last-built snapshot; never touches the disk.
    pub fn search(&self, query: &str) -> Vec<PathBuf> {
        let needle = query.to_lowercase();
        let tree = self.tree();
        let mut matches = Vec::new();
        collect_matches(&tree, &needle, &mut matches);
        matches
    }
}

fn apply_validation(node: &mut ProjectFileNode, rel: &Path, outcome: &ValidationOutcome) -> bool {
    if node.kind == NodeKind::File && node.path == rel {
        node.last_validation = outcome.clone();
        return true;
    }
    node.children
        .iter_mut()
        .any(|child| apply_validation(child, rel, outcome))
}

fn collect_matches(node: &ProjectFileNode, needle: &str, out: &mut Vec<PathBuf>) {
    for child in &node.children {
        if child.path.to_string_lossy().to_lowercase().contains(needle) {
            out.push(child.path.clone());
        }
        collect_matches(child, needle, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn project_with(files: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for file in files {
            let path = dir.path().join(file);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(path, "# terraform\n").unwrap();
        }
        dir
    }

    #[test]
    fn scan_keeps_only_relevant_extensions() {
        let dir = project_with(&["main.tf", "variables.tf", "README.md", "terraform.tfstate"]);
        let tree = scan_tree(dir.path()).unwrap();
        assert_eq!(tree.file_count(), 3);
        let names: Vec<_> = tree.children.iter().map(|c| c.path.clone()).collect();
        assert!(!names.contains(&PathBuf::from("README.md")));
    }

    #[test]
    fn scan_skips_hidden_and_dot_terraform() {
        let dir = project_with(&["main.tf", ".terraform/modules/mod.tf", ".hidden.tf"]);
        let tree = scan_tree(dir.path()).unwrap();
        assert_eq!(tree.file_count(), 1);
    }

    #[test]
    fn scan_nests_subdirectories() {
        let dir = project_with(&["main.tf", "modules/vpc/vpc.tf"]);
        let tree = scan_tree(dir.path()).unwrap();
        let modules = tree
            .children
            .iter()
            .find(|c| c.kind == NodeKind::Directory)
            .unwrap();
        assert_eq!(modules.path, PathBuf::from("modules"));
        assert_eq!(modules.file_count(), 1);
    }

    #[test]
    fn scan_rejects_missing_root() {
        let err = scan_tree(Path::new("/nonexistent/terradeck-project")).unwrap_err();
        assert!(matches!(err, TerradeckError::InvalidProjectRoot { .. }));
    }

    #[test]
    fn search_is_case_insensitive_substring() {
        let dir = project_with(&["variables.tf", "main.tf"]);
        let state = ProjectState::new(dir.path());
        state.rebuild().unwrap();

        assert_eq!(state.search("variab"), vec![PathBuf::from("variables.tf")]);
        assert_eq!(state.search("VARIAB"), vec![PathBuf::from("variables.tf")]);
        assert!(state.search("nothing").is_empty());
    }

    #[test]
    fn search_does_not_require_rebuild_after_external_edit() {
        let dir = project_with(&["main.tf"]);
        let state = ProjectState::new(dir.path());
        state.rebuild().unwrap();

        fs::write(dir.path().join("extra.tf"), "").unwrap();
        // Cached snapshot only; the new file appears after the next rebuild
        assert!(state.search("extra").is_empty());
        state.rebuild().unwrap();
        assert_eq!(state.search("extra"), vec![PathBuf::from("extra.tf")]);
    }

    #[test]
    fn mark_validation_updates_single_node() {
        let dir = project_with(&["main.tf", "variables.tf"]);
        let state = ProjectState::new(dir.path());
        state.rebuild().unwrap();

        assert!(state.mark_validation(
            Path::new("main.tf"),
            ValidationOutcome::Invalid {
                message: "unsupported block".to_string()
            }
        ));
        let tree = state.tree();
        let main = tree
            .children
            .iter()
            .find(|c| c.path == PathBuf::from("main.tf"))
            .unwrap();
        assert!(matches!(main.last_validation, ValidationOutcome::Invalid { .. }));

        let vars = tree
            .children
            .iter()
            .find(|c| c.path == PathBuf::from("variables.tf"))
            .unwrap();
        assert_eq!(vars.last_validation, ValidationOutcome::Unknown);
    }

    #[test]
    fn mark_validation_accepts_absolute_paths() {
        let dir = project_with(&["main.tf"]);
        let state = ProjectState::new(dir.path());
        state.rebuild().unwrap();
        assert!(state.mark_validation(&dir.path().join("main.tf"), ValidationOutcome::Valid));
    }

    #[test]
    fn mark_validation_unknown_path_is_noop() {
        let dir = project_with(&["main.tf"]);
        let state = ProjectState::new(dir.path());
        state.rebuild().unwrap();
        assert!(!state.mark_validation(Path::new("ghost.tf"), ValidationOutcome::Valid));
    }

    #[test]
    fn rebuild_resets_validation_marks() {
        let dir = project_with(&["main.tf"]);
        let state = ProjectState::new(dir.path());
        state.rebuild().unwrap();
        state.mark_validation(Path::new("main.tf"), ValidationOutcome::Valid);

        state.rebuild().unwrap();
        let tree = state.tree();
        assert_eq!(tree.children[0].last_validation, ValidationOutcome::Unknown);
    }

    #[test]
    fn rebuild_generations_are_monotonic() {
        let dir = project_with(&["main.tf"]);
        let state = ProjectState::new(dir.path());
        let first = state.rebuild().unwrap().unwrap();
        let second = state.rebuild().unwrap().unwrap();
        assert!(second > first);
    }
}
