//! Path resolution and allow/deny scope enforcement over a fixed repo root.
//!
//! Every path that reaches a child process or comes back from one passes
//! through here first. Deny wins on conflict; traversal never escapes root.

use std::path::{Component, Path, PathBuf};

use crew_core::CrewError;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Default total byte budget for a context bundle.
pub const DEFAULT_SCAN_BUDGET: usize = 50 * 1024;

/// One context file collected by [`ScopeGuard::scan`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextFile {
    /// Path relative to the repo root, `/`-separated.
    pub rel_path: String,
    pub content: String,
    /// True when the content was cut to fit the byte budget.
    pub truncated: bool,
}

/// Result of expanding context paths under a byte budget.
#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    pub files: Vec<ContextFile>,
    /// Paths that were requested but not included, with the reason.
    pub skipped: Vec<String>,
    /// True when at least one file was truncated or dropped for budget.
    pub truncated: bool,
    pub total_bytes: usize,
}

impl ScanOutcome {
    /// Human-readable warnings for the result's notes field. Empty when the
    /// scan was clean.
    pub fn warnings(&self) -> Vec<String> {
        let mut out = self.skipped.clone();
        if self.truncated {
            out.push("context bundle truncated to fit byte budget".to_string());
        }
        out
    }
}

/// Scope predicates bound to one canonicalized repository root.
#[derive(Debug, Clone)]
pub struct ScopeGuard {
    repo_root: PathBuf,
}

impl ScopeGuard {
    /// Bind to `repo_root`. The root must exist and be a directory.
    pub fn new(repo_root: &Path) -> Result<Self, CrewError> {
        let canonical = repo_root
            .canonicalize()
            .map_err(|e| CrewError::InvalidPath(format!("{}: {e}", repo_root.display())))?;
        if !canonical.is_dir() {
            return Err(CrewError::InvalidPath(format!(
                "{} is not a directory",
                canonical.display()
            )));
        }
        Ok(Self {
            repo_root: canonical,
        })
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    /// Resolve `path` (relative or absolute) to its canonical form, which
    /// must be a descendant of the repo root once symlinks are resolved.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, CrewError> {
        if path.trim().is_empty() {
            return Err(CrewError::InvalidPath("empty path".to_string()));
        }

        let candidate = Path::new(path);
        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.repo_root.join(candidate)
        };

        let canonical = joined
            .canonicalize()
            .map_err(|e| CrewError::InvalidPath(format!("{path}: {e}")))?;

        if canonical.starts_with(&self.repo_root) {
            Ok(canonical)
        } else {
            Err(CrewError::ScopeViolation(format!(
                "{path} escapes repo root {}",
                self.repo_root.display()
            )))
        }
    }

    /// Repo-relative, `/`-separated form of a path accepted by [`resolve`].
    ///
    /// [`resolve`]: ScopeGuard::resolve
    pub fn resolve_rel(&self, path: &str) -> Result<String, CrewError> {
        let canonical = self.resolve(path)?;
        let rel = canonical
            .strip_prefix(&self.repo_root)
            .map_err(|_| CrewError::ScopeViolation(format!("{path} escapes repo root")))?;
        Ok(path_to_slash(rel))
    }

    /// True iff `rel_path` matches at least one allow glob (everything when
    /// the list is empty) and no deny glob.
    pub fn allowed(&self, rel_path: &str, allow_globs: &[String], deny_globs: &[String]) -> bool {
        if matches_any(rel_path, deny_globs) {
            return false;
        }
        if allow_globs.is_empty() {
            return true;
        }
        matches_any(rel_path, allow_globs)
    }

    /// Syntactic check for child-reported paths: relative, traversal-free,
    /// and (for existing files) canonically inside the root. Used to filter
    /// `touched_paths` before they reach a caller.
    pub fn is_valid_touched_path(&self, path: &str) -> bool {
        if path.trim().is_empty() {
            return false;
        }
        let rel = Path::new(path);
        if rel.is_absolute() {
            return false;
        }
        if !rel
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        {
            return false;
        }

        let candidate = self.repo_root.join(rel);
        if candidate.exists() {
            return candidate
                .canonicalize()
                .is_ok_and(|resolved| resolved.starts_with(&self.repo_root));
        }
        // Deleted files are still reportable if syntactically in-tree.
        true
    }

    /// Expand `context_paths` (files or directories) into a bounded bundle.
    ///
    /// Missing paths are skipped with a warning entry rather than failing
    /// the whole scan; out-of-root paths fail hard with `ScopeViolation`.
    pub fn scan(
        &self,
        context_paths: &[String],
        allow_globs: &[String],
        deny_globs: &[String],
        max_bytes: Option<usize>,
    ) -> Result<ScanOutcome, CrewError> {
        let budget = max_bytes.unwrap_or(DEFAULT_SCAN_BUDGET);
        let mut outcome = ScanOutcome::default();

        for requested in context_paths {
            let resolved = match self.resolve(requested) {
                Ok(p) => p,
                Err(CrewError::ScopeViolation(msg)) => {
                    return Err(CrewError::ScopeViolation(msg));
                }
                Err(e) => {
                    warn!(path = %requested, error = %e, "skipping missing context path");
                    outcome
                        .skipped
                        .push(format!("context path '{requested}' skipped: {e}"));
                    continue;
                }
            };

            if resolved.is_dir() {
                for file in walk_files(&resolved) {
                    self.collect_file(&file, allow_globs, deny_globs, budget, &mut outcome);
                }
            } else {
                self.collect_file(&resolved, allow_globs, deny_globs, budget, &mut outcome);
            }
        }

        Ok(outcome)
    }

    fn collect_file(
        &self,
        path: &Path,
        allow_globs: &[String],
        deny_globs: &[String],
        budget: usize,
        outcome: &mut ScanOutcome,
    ) {
        let Ok(rel) = path.strip_prefix(&self.repo_root) else {
            return;
        };
        let rel_path = path_to_slash(rel);

        if !self.allowed(&rel_path, allow_globs, deny_globs) {
            outcome
                .skipped
                .push(format!("context path '{rel_path}' excluded by scope globs"));
            return;
        }

        if outcome.total_bytes >= budget {
            outcome.truncated = true;
            outcome
                .skipped
                .push(format!("context path '{rel_path}' dropped: byte budget exhausted"));
            return;
        }

        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) => {
                warn!(path = %rel_path, error = %e, "failed to read context file");
                outcome
                    .skipped
                    .push(format!("context path '{rel_path}' unreadable: {e}"));
                return;
            }
        };

        let remaining = budget - outcome.total_bytes;
        let truncated = bytes.len() > remaining;
        let kept = if truncated { &bytes[..remaining] } else { &bytes[..] };
        outcome.total_bytes += kept.len();
        if truncated {
            outcome.truncated = true;
        }
        outcome.files.push(ContextFile {
            rel_path,
            content: String::from_utf8_lossy(kept).into_owned(),
            truncated,
        });
    }
}

fn matches_any(rel_path: &str, globs: &[String]) -> bool {
    globs.iter().any(|g| match glob::Pattern::new(g) {
        Ok(pattern) => pattern.matches(rel_path),
        Err(e) => {
            warn!(glob = %g, error = %e, "ignoring invalid glob");
            false
        }
    })
}

fn walk_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = ignore::WalkBuilder::new(dir)
        .hidden(true)
        .git_ignore(true)
        .build()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_some_and(|t| t.is_file()))
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    files
}

fn path_to_slash(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
