//! Store abstraction for Syndic's state workspaces.
//!
//! A Store is the logical container for the engine's databases and event
//! journals. All subsystem state (scheduler, governance, trace) is scoped
//! to a store root.

use std::path::PathBuf;

/// Store type discriminator.
///
/// - `User`: operator-local state at `~/.syndic/data/`
/// - `Repo`: project-scoped state at `<repo>/.syndic/data/`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreKind {
    User,
    Repo,
}

/// Handle to a Syndic state workspace.
#[derive(Debug, Clone)]
pub struct Store {
    /// Store type (User or Repo)
    pub kind: StoreKind,
    /// Absolute path to the store root directory
    pub root: PathBuf,
}
