mod memory;
mod schema;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::Result;
use crate::types::*;

/// Store defines the metadata database interface: users, public keys,
/// feature flags, and the project/link graph.
///
/// Implementations must keep two invariants:
/// - project names are unique per user;
/// - `link_to_project` only accepts terminal targets, so a stored
///   `project_dir` always resolves in one hop.
pub trait Store: Send + Sync {
    fn initialize(&self) -> Result<()>;

    // User operations. Users and keys are provisioned out-of-band;
    // these writes exist for provisioning tools and tests.
    fn create_user(&self, user: &User) -> Result<()>;
    fn add_public_key(&self, key: &PublicKey) -> Result<()>;
    fn find_user_by_id(&self, id: &str) -> Result<Option<User>>;
    fn find_user_by_name(&self, name: &str) -> Result<Option<User>>;
    /// Lookup by key text; `name` is advisory (the SSH username the
    /// key arrived with) and is not required to match.
    fn find_user_by_pubkey(&self, name: &str, key: &str) -> Result<Option<User>>;

    // Feature flags
    fn set_feature(&self, user_id: &str, feature: &FeatureData) -> Result<()>;
    /// Returns the user's feature row, or the permissive default when
    /// none exists.
    fn find_feature(&self, user_id: &str) -> Result<FeatureData>;
    fn has_feature_for_user(&self, user_id: &str, perm: &str) -> Result<bool>;

    // Project operations
    fn insert_project(&self, user_id: &str, name: &str, project_dir: &str) -> Result<String>;
    /// Bumps `updated_at`; called on every upload.
    fn update_project(&self, user_id: &str, name: &str) -> Result<()>;
    /// Repoints `project_dir`. With `commit=false` only the validation
    /// runs. Rejects targets that are themselves links.
    fn link_to_project(
        &self,
        user_id: &str,
        project_id: &str,
        project_dir: &str,
        commit: bool,
    ) -> Result<()>;
    /// Fails with `HasDependents` while other projects link here.
    fn remove_project(&self, project_id: &str) -> Result<()>;
    fn find_project_by_name(&self, user_id: &str, name: &str) -> Result<Option<Project>>;
    /// Reverse lookup: projects whose `project_dir` equals `name`,
    /// excluding the project itself.
    fn find_project_links(&self, user_id: &str, name: &str) -> Result<Vec<Project>>;
    fn find_projects_by_user(&self, user_id: &str) -> Result<Vec<Project>>;
    /// Prefix match on `name`, oldest first by `updated_at` (ties by
    /// id) so retention keeps the tail.
    fn find_projects_by_prefix(&self, user_id: &str, prefix: &str) -> Result<Vec<Project>>;
    fn find_all_projects(&self, pager: &Pager, by: ProjectOrder)
    -> Result<Paginate<ProjectWithUser>>;
}

/// Project row joined with its owner's name, for cross-user listings.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ProjectWithUser {
    #[serde(flatten)]
    pub project: Project,
    pub username: String,
}
