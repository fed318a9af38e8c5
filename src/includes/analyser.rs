//! Include Dependency Analyser
//!
//! Indexes candidate include directories (non-recursive, files only) and
//! lazily computes, per source file, which of them its transitive
//! `#include` graph actually reaches. All state lives behind one mutex,
//! so concurrent file tasks can enlist directories and query paths
//! without observing half-built indexes.
//!
//! Comparisons are case-sensitive: on a case-insensitive filesystem an
//! `#include "Foo.h"` for a file stored as `foo.h` will not match.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use indexmap::IndexSet;
use tokio::sync::Mutex;

use crate::errors::Result;
use crate::includes::scanner::parse_includes;

/// Analysis result for one file. Only terminal states are stored; a
/// file being analysed is observable solely through the mutex.
#[derive(Debug, Clone)]
enum FileState {
    /// The file could not be read.
    Missing,
    /// Direct include-path requirements; `None` marks an include that
    /// resolved nowhere.
    Analysed(HashSet<Option<String>>),
}

#[derive(Debug, Default)]
struct AnalyserState {
    /// Basename (or relative include spelling) to every indexed file
    /// location carrying that name.
    file_locations: HashMap<String, HashSet<PathBuf>>,
    /// Enlisted include directories in enlistment order. Absolute paths
    /// inside the workspace root are stored workspace-relative.
    include_paths: IndexSet<String>,
    /// Memoised per-file direct requirements.
    file_states: HashMap<PathBuf, FileState>,
    /// Direct header dependencies, for the transitive walk.
    file_dependencies: HashMap<PathBuf, HashSet<PathBuf>>,
}

/// Where one `#include` was satisfied.
enum InclResolution {
    /// The header sits next to the including file; no `-I` needed.
    SameLocation(PathBuf),
    /// Satisfied by an enlisted include directory.
    Enlisted(String, PathBuf),
    /// No indexed location matches.
    Missing,
}

/// Shared, mutex-guarded include analyser for one build.
pub struct IncludeAnalyser {
    root: PathBuf,
    state: Mutex<AnalyserState>,
}

impl IncludeAnalyser {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            state: Mutex::new(AnalyserState::default()),
        }
    }

    /// Enlist candidate include directories, indexing the files each one
    /// holds. Already-enlisted directories are skipped; order of first
    /// enlistment is preserved. Unreadable directories are logged and
    /// skipped.
    pub async fn enlist(&self, dirs: &[String]) -> Result<()> {
        let mut state = self.state.lock().await;
        for dir in dirs {
            let normalised = self.normalise(dir);
            if state.include_paths.contains(&normalised) {
                continue;
            }

            let resolved = self.resolve_dir(&normalised);
            let mut entries = match tokio::fs::read_dir(&resolved).await {
                Ok(entries) => entries,
                Err(e) => {
                    log::debug!("skipping include path '{}': {}", dir, e);
                    state.include_paths.insert(normalised);
                    continue;
                }
            };

            while let Ok(Some(entry)) = entries.next_entry().await {
                let is_file = entry
                    .file_type()
                    .await
                    .map(|t| t.is_file())
                    .unwrap_or(false);
                if !is_file {
                    continue;
                }
                if let Ok(name) = entry.file_name().into_string() {
                    state
                        .file_locations
                        .entry(name)
                        .or_default()
                        .insert(entry.path());
                }
            }

            state.include_paths.insert(normalised);
        }
        Ok(())
    }

    /// The include directories required by `file` (relative to
    /// `location`) and its transitive headers, in enlistment order.
    /// `None` when the seed file itself cannot be read.
    pub async fn get_paths(&self, location: &Path, file: &str) -> Result<Option<Vec<String>>> {
        let seed = location.join(file);
        let mut state = self.state.lock().await;

        let required = match self.collect(&mut state, seed).await? {
            Some(required) => required,
            None => return Ok(None),
        };

        Ok(Some(
            state
                .include_paths
                .iter()
                .filter(|p| required.contains(&Some((*p).clone())))
                .cloned()
                .collect(),
        ))
    }

    /// Union of `get_paths` over several seed files, in enlistment
    /// order. Missing seeds contribute nothing.
    pub async fn get_paths_all(&self, seeds: &[PathBuf]) -> Result<Vec<String>> {
        let mut state = self.state.lock().await;
        let mut required: HashSet<Option<String>> = HashSet::new();

        for seed in seeds {
            if let Some(set) = self.collect(&mut state, seed.clone()).await? {
                required.extend(set);
            }
        }

        Ok(state
            .include_paths
            .iter()
            .filter(|p| required.contains(&Some((*p).clone())))
            .cloned()
            .collect())
    }

    /// Walk the dependency graph from `seed`, analysing files on first
    /// visit, and union their direct requirements. `None` when the seed
    /// is missing.
    async fn collect(
        &self,
        state: &mut AnalyserState,
        seed: PathBuf,
    ) -> Result<Option<HashSet<Option<String>>>> {
        self.ensure_analysed(state, &seed).await?;
        if matches!(state.file_states.get(&seed), Some(FileState::Missing)) {
            return Ok(None);
        }

        let mut required = HashSet::new();
        let mut visited = HashSet::new();
        let mut pending = vec![seed];

        while let Some(file) = pending.pop() {
            if !visited.insert(file.clone()) {
                continue;
            }
            self.ensure_analysed(state, &file).await?;

            if let Some(FileState::Analysed(direct)) = state.file_states.get(&file) {
                required.extend(direct.iter().cloned());
            }
            if let Some(deps) = state.file_dependencies.get(&file) {
                pending.extend(deps.iter().cloned());
            }
        }

        Ok(Some(required))
    }

    /// Analyse a file's direct includes on first sight.
    async fn ensure_analysed(&self, state: &mut AnalyserState, file: &Path) -> Result<()> {
        if state.file_states.contains_key(file) {
            return Ok(());
        }

        let content = match tokio::fs::read_to_string(file).await {
            Ok(content) => content,
            Err(_) => {
                state.file_states.insert(file.to_path_buf(), FileState::Missing);
                return Ok(());
            }
        };

        let location = file.parent().unwrap_or(&self.root).to_path_buf();
        let mut direct = HashSet::new();
        let mut deps = HashSet::new();

        for include in parse_includes(&content) {
            match self.find_incl_file(state, &location, &include).await {
                InclResolution::SameLocation(dep) => {
                    deps.insert(dep);
                }
                InclResolution::Enlisted(path, dep) => {
                    direct.insert(Some(path));
                    deps.insert(dep);
                }
                InclResolution::Missing => {
                    direct.insert(None);
                }
            }
        }

        state
            .file_states
            .insert(file.to_path_buf(), FileState::Analysed(direct));
        state.file_dependencies.insert(file.to_path_buf(), deps);
        Ok(())
    }

    /// Resolve one include: next to the including file, via an enlisted
    /// directory, or nowhere.
    async fn find_incl_file(
        &self,
        state: &AnalyserState,
        location: &Path,
        searched: &str,
    ) -> InclResolution {
        let beside = location.join(searched);
        if tokio::fs::metadata(&beside)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
        {
            return InclResolution::SameLocation(beside);
        }

        if let Some(candidates) = state.file_locations.get(searched) {
            for path in &state.include_paths {
                let candidate = self.resolve_dir(path).join(searched);
                if candidates.contains(&candidate) {
                    return InclResolution::Enlisted(path.clone(), candidate);
                }
            }
        }

        InclResolution::Missing
    }

    /// Store absolute paths inside the root as workspace-relative so
    /// enlistment and matching agree on one spelling.
    fn normalise(&self, dir: &str) -> String {
        let path = Path::new(dir);
        if path.is_absolute() {
            if let Ok(relative) = path.strip_prefix(&self.root) {
                let rendered = relative.display().to_string();
                if !rendered.is_empty() {
                    return rendered;
                }
            }
        }
        dir.to_string()
    }

    fn resolve_dir(&self, dir: &str) -> PathBuf {
        let path = Path::new(dir);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    /// include dirs inc1..inc3 with one header each; src/main.cpp pulls
    /// a.h directly and b.h through a.h; c.h is never reached.
    fn setup_workspace() -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("src")).unwrap();
        for (sub, header, content) in [
            ("inc1", "a.h", "#include \"b.h\"\n"),
            ("inc2", "b.h", "int b;\n"),
            ("inc3", "c.h", "int c;\n"),
        ] {
            fs::create_dir_all(root.join(sub)).unwrap();
            fs::write(root.join(sub).join(header), content).unwrap();
        }
        fs::write(
            root.join("src/main.cpp"),
            "#include \"a.h\"\nint main() { return 0; }\n",
        )
        .unwrap();
        dir
    }

    fn inc_dirs() -> Vec<String> {
        vec!["inc1".to_string(), "inc2".to_string(), "inc3".to_string()]
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_transitive_includes_trim_unused_paths() {
        let dir = setup_workspace();
        let analyser = IncludeAnalyser::new(dir.path());
        analyser.enlist(&inc_dirs()).await.unwrap();

        let paths = analyser
            .get_paths(dir.path(), "src/main.cpp")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(paths, vec!["inc1", "inc2"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_missing_seed_returns_none() {
        let dir = setup_workspace();
        let analyser = IncludeAnalyser::new(dir.path());
        analyser.enlist(&inc_dirs()).await.unwrap();

        let result = analyser.get_paths(dir.path(), "src/nope.cpp").await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_repeated_calls_are_stable() {
        let dir = setup_workspace();
        let analyser = IncludeAnalyser::new(dir.path());
        analyser.enlist(&inc_dirs()).await.unwrap();

        let first = analyser
            .get_paths(dir.path(), "src/main.cpp")
            .await
            .unwrap()
            .unwrap();
        for _ in 0..3 {
            let again = analyser
                .get_paths(dir.path(), "src/main.cpp")
                .await
                .unwrap()
                .unwrap();
            assert_eq!(again, first);
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_order_follows_enlistment_not_reachability() {
        let dir = setup_workspace();
        let analyser = IncludeAnalyser::new(dir.path());
        // Enlist in reverse: inc2 (b.h) before inc1 (a.h).
        analyser
            .enlist(&["inc2".to_string(), "inc1".to_string()])
            .await
            .unwrap();

        let paths = analyser
            .get_paths(dir.path(), "src/main.cpp")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(paths, vec!["inc2", "inc1"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_header_beside_source_needs_no_path() {
        let dir = setup_workspace();
        fs::write(dir.path().join("src/local.h"), "int l;\n").unwrap();
        fs::write(
            dir.path().join("src/uses_local.cpp"),
            "#include \"local.h\"\n",
        )
        .unwrap();

        let analyser = IncludeAnalyser::new(dir.path());
        analyser.enlist(&inc_dirs()).await.unwrap();

        let paths = analyser
            .get_paths(dir.path(), "src/uses_local.cpp")
            .await
            .unwrap()
            .unwrap();
        assert!(paths.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unresolvable_include_is_tolerated() {
        let dir = setup_workspace();
        fs::write(
            dir.path().join("src/broken.cpp"),
            "#include \"nowhere.h\"\n#include \"a.h\"\n",
        )
        .unwrap();

        let analyser = IncludeAnalyser::new(dir.path());
        analyser.enlist(&inc_dirs()).await.unwrap();

        let paths = analyser
            .get_paths(dir.path(), "src/broken.cpp")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(paths, vec!["inc1", "inc2"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cyclic_headers_terminate() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("inc")).unwrap();
        fs::write(root.join("inc/x.h"), "#include \"y.h\"\n").unwrap();
        fs::write(root.join("inc/y.h"), "#include \"x.h\"\n").unwrap();
        fs::write(root.join("main.cpp"), "#include \"x.h\"\n").unwrap();

        let analyser = IncludeAnalyser::new(root);
        analyser.enlist(&["inc".to_string()]).await.unwrap();

        let paths = analyser
            .get_paths(root, "main.cpp")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(paths, vec!["inc"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_absolute_dirs_inside_root_stored_relative() {
        let dir = setup_workspace();
        let absolute = dir.path().join("inc1").display().to_string();
        let analyser = IncludeAnalyser::new(dir.path());
        analyser.enlist(&[absolute]).await.unwrap();

        let paths = analyser
            .get_paths(dir.path(), "src/main.cpp")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(paths, vec!["inc1"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_nonexistent_include_dir_is_skipped() {
        let dir = setup_workspace();
        let analyser = IncludeAnalyser::new(dir.path());
        analyser
            .enlist(&["ghost".to_string(), "inc1".to_string(), "inc2".to_string()])
            .await
            .unwrap();

        let paths = analyser
            .get_paths(dir.path(), "src/main.cpp")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(paths, vec!["inc1", "inc2"]);
    }
}
