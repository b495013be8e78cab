//! Query engine over cached project models.
//!
//! A [`DesignServer`] holds one immutable [`Project`] model per project
//! directory and serves read-only index/page/context queries against it.
//! Builds are coalesced: at most one build runs at a time, callers asking
//! for the directory being built wait for it, and callers asking for a
//! different directory are turned away with [`EngineError::BuildInProgress`]
//! rather than queued behind someone else's work.

pub mod query;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use netlens_model::{build_project, BuildError, Project};

pub use query::{
    ComponentContext, ContextQuery, ContextResult, IndexResult, NetContext, NetTouch,
    PageResult, PageSummary, PinContext,
};

/// Errors surfaced to query callers.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Build(#[from] BuildError),

    /// Another project is being built right now; retry shortly.
    #[error("a build is already in progress for {}", busy.display())]
    BuildInProgress { busy: PathBuf },

    #[error("{kind} '{name}' not found{}", match suggestion {
        Some(s) => format!(", did you mean '{s}'?"),
        None => String::new(),
    })]
    NotFound {
        kind: &'static str,
        name: String,
        suggestion: Option<String>,
    },

    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

struct CacheState {
    /// Directory currently being built, if any.
    building: Option<PathBuf>,
    projects: HashMap<PathBuf, Arc<Project>>,
}

/// Serves queries against cached, immutable project models.
pub struct DesignServer {
    state: Mutex<CacheState>,
    build_done: Condvar,
}

impl Default for DesignServer {
    fn default() -> Self {
        Self::new()
    }
}

impl DesignServer {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CacheState {
                building: None,
                projects: HashMap::new(),
            }),
            build_done: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        // A panic mid-build clears `building` before unwinding, so a
        // poisoned lock still guards consistent state.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The cached model for `dir`, building it on first use. Concurrent
    /// callers for the same directory share one build; callers for another
    /// directory fail fast with [`EngineError::BuildInProgress`].
    pub fn project(&self, dir: &Path) -> Result<Arc<Project>, EngineError> {
        let dir = dir.to_path_buf();
        let mut state = self.lock();
        loop {
            if let Some(project) = state.projects.get(&dir) {
                return Ok(project.clone());
            }
            match &state.building {
                Some(busy) if *busy == dir => {
                    state = self
                        .build_done
                        .wait(state)
                        .unwrap_or_else(|e| e.into_inner());
                }
                Some(busy) => {
                    return Err(EngineError::BuildInProgress { busy: busy.clone() });
                }
                None => break,
            }
        }
        state.building = Some(dir.clone());
        drop(state);

        log::debug!("Building model for {}", dir.display());
        let built = build_project(&dir);

        let mut state = self.lock();
        state.building = None;
        let result = match built {
            Ok(project) => {
                let project = Arc::new(project);
                state.projects.insert(dir, project.clone());
                Ok(project)
            }
            // A failed build leaves any previously cached model untouched.
            Err(e) => Err(EngineError::Build(e)),
        };
        self.build_done.notify_all();
        result
    }

    /// Drop the cached model for `dir`; the next query rebuilds it.
    pub fn invalidate(&self, dir: &Path) {
        self.lock().projects.remove(dir);
    }

    /// Project overview: per-page counts and cross-page participation.
    pub fn index(&self, dir: &Path) -> Result<IndexResult, EngineError> {
        let project = self.project(dir)?;
        Ok(query::index(&project))
    }

    /// The serialized text of one named page.
    pub fn page(&self, dir: &Path, name: &str) -> Result<PageResult, EngineError> {
        let project = self.project(dir)?;
        query::page(&project, name)
    }

    /// Connectivity context for exactly one component or one net.
    pub fn context(
        &self,
        dir: &Path,
        request: &ContextQuery,
    ) -> Result<ContextResult, EngineError> {
        let project = self.project(dir)?;
        query::context(&project, request)
    }
}
