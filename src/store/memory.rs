use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use uuid::Uuid;

use super::{ProjectWithUser, Store};
use crate::error::{Error, Result};
use crate::types::*;

/// In-memory metadata store. All data created during runtime is lost
/// on exit; intended for tests and local experiments.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    users: Vec<User>,
    pubkeys: Vec<PublicKey>,
    features: HashMap<String, FeatureData>,
    projects: Vec<Project>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Administrative fields have no CLI command; provisioning tools
    /// and tests set them directly.
    pub fn set_blocked(&self, user_id: &str, name: &str, reason: &str) -> Result<()> {
        let mut inner = self.inner();
        let project = inner
            .projects
            .iter_mut()
            .find(|p| p.user_id == user_id && p.name == name)
            .ok_or(Error::NotFound)?;
        project.blocked = reason.to_string();
        Ok(())
    }

    pub fn set_acl(&self, user_id: &str, name: &str, acl: ProjectAcl) -> Result<()> {
        let mut inner = self.inner();
        let project = inner
            .projects
            .iter_mut()
            .find(|p| p.user_id == user_id && p.name == name)
            .ok_or(Error::NotFound)?;
        project.acl = acl;
        Ok(())
    }
}

impl Store for MemoryStore {
    fn initialize(&self) -> Result<()> {
        Ok(())
    }

    fn create_user(&self, user: &User) -> Result<()> {
        let mut inner = self.inner();
        if inner.users.iter().any(|u| u.name == user.name) {
            return Err(Error::AlreadyExists);
        }
        inner.users.push(user.clone());
        Ok(())
    }

    fn add_public_key(&self, key: &PublicKey) -> Result<()> {
        let mut inner = self.inner();
        if !inner
            .pubkeys
            .iter()
            .any(|k| k.user_id == key.user_id && k.key_text == key.key_text)
        {
            inner.pubkeys.push(key.clone());
        }
        Ok(())
    }

    fn find_user_by_id(&self, id: &str) -> Result<Option<User>> {
        Ok(self.inner().users.iter().find(|u| u.id == id).cloned())
    }

    fn find_user_by_name(&self, name: &str) -> Result<Option<User>> {
        Ok(self.inner().users.iter().find(|u| u.name == name).cloned())
    }

    fn find_user_by_pubkey(&self, _name: &str, key: &str) -> Result<Option<User>> {
        let inner = self.inner();
        let Some(pk) = inner.pubkeys.iter().find(|k| k.key_text == key) else {
            return Ok(None);
        };
        Ok(inner.users.iter().find(|u| u.id == pk.user_id).cloned())
    }

    fn set_feature(&self, user_id: &str, feature: &FeatureData) -> Result<()> {
        self.inner()
            .features
            .insert(user_id.to_string(), feature.clone());
        Ok(())
    }

    fn find_feature(&self, user_id: &str) -> Result<FeatureData> {
        Ok(self
            .inner()
            .features
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }

    fn has_feature_for_user(&self, user_id: &str, perm: &str) -> Result<bool> {
        Ok(self.find_feature(user_id)?.has_perm(perm))
    }

    fn insert_project(&self, user_id: &str, name: &str, project_dir: &str) -> Result<String> {
        let mut inner = self.inner();
        if inner
            .projects
            .iter()
            .any(|p| p.user_id == user_id && p.name == name)
        {
            return Err(Error::AlreadyExists);
        }
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        inner.projects.push(Project {
            id: id.clone(),
            user_id: user_id.to_string(),
            name: name.to_string(),
            project_dir: project_dir.to_string(),
            acl: ProjectAcl::default(),
            blocked: String::new(),
            created_at: now,
            updated_at: now,
        });
        Ok(id)
    }

    fn update_project(&self, user_id: &str, name: &str) -> Result<()> {
        let mut inner = self.inner();
        let project = inner
            .projects
            .iter_mut()
            .find(|p| p.user_id == user_id && p.name == name)
            .ok_or(Error::NotFound)?;
        project.updated_at = Utc::now();
        Ok(())
    }

    fn link_to_project(
        &self,
        user_id: &str,
        project_id: &str,
        project_dir: &str,
        commit: bool,
    ) -> Result<()> {
        let mut inner = self.inner();
        let project = inner
            .projects
            .iter()
            .find(|p| p.id == project_id && p.user_id == user_id)
            .cloned()
            .ok_or(Error::NotFound)?;

        if project_dir != project.name {
            let target = inner
                .projects
                .iter()
                .find(|p| p.user_id == user_id && p.name == project_dir)
                .ok_or_else(|| {
                    Error::validation(format!("({project_dir}) project does not exist"))
                })?;
            if target.is_link() {
                return Err(Error::validation(format!(
                    "({}) is itself a link to ({}); link to the terminal project instead",
                    target.name, target.project_dir
                )));
            }
        }

        if commit {
            let project = inner
                .projects
                .iter_mut()
                .find(|p| p.id == project_id)
                .ok_or(Error::NotFound)?;
            project.project_dir = project_dir.to_string();
            project.updated_at = Utc::now();
        }
        Ok(())
    }

    fn remove_project(&self, project_id: &str) -> Result<()> {
        let mut inner = self.inner();
        let project = inner
            .projects
            .iter()
            .find(|p| p.id == project_id)
            .cloned()
            .ok_or(Error::NotFound)?;

        let dependents = inner
            .projects
            .iter()
            .filter(|p| {
                p.user_id == project.user_id
                    && p.project_dir == project.name
                    && p.name != project.name
            })
            .count();
        if dependents > 0 {
            return Err(Error::HasDependents(dependents));
        }

        inner.projects.retain(|p| p.id != project_id);
        Ok(())
    }

    fn find_project_by_name(&self, user_id: &str, name: &str) -> Result<Option<Project>> {
        Ok(self
            .inner()
            .projects
            .iter()
            .find(|p| p.user_id == user_id && p.name == name)
            .cloned())
    }

    fn find_project_links(&self, user_id: &str, name: &str) -> Result<Vec<Project>> {
        let mut links: Vec<Project> = self
            .inner()
            .projects
            .iter()
            .filter(|p| p.user_id == user_id && p.project_dir == name && p.name != name)
            .cloned()
            .collect();
        links.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(links)
    }

    fn find_projects_by_user(&self, user_id: &str) -> Result<Vec<Project>> {
        let mut projects: Vec<Project> = self
            .inner()
            .projects
            .iter()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect();
        projects.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(projects)
    }

    fn find_projects_by_prefix(&self, user_id: &str, prefix: &str) -> Result<Vec<Project>> {
        let mut projects: Vec<Project> = self
            .inner()
            .projects
            .iter()
            .filter(|p| p.user_id == user_id && p.name.starts_with(prefix))
            .cloned()
            .collect();
        projects.sort_by(|a, b| {
            a.updated_at
                .cmp(&b.updated_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(projects)
    }

    fn find_all_projects(
        &self,
        pager: &Pager,
        by: ProjectOrder,
    ) -> Result<Paginate<ProjectWithUser>> {
        let inner = self.inner();
        let mut all: Vec<ProjectWithUser> = inner
            .projects
            .iter()
            .filter_map(|p| {
                let username = inner.users.iter().find(|u| u.id == p.user_id)?.name.clone();
                Some(ProjectWithUser {
                    project: p.clone(),
                    username,
                })
            })
            .collect();
        all.sort_by(|a, b| match by {
            ProjectOrder::CreatedAt => b.project.created_at.cmp(&a.project.created_at),
            ProjectOrder::UpdatedAt => b.project.updated_at.cmp(&a.project.updated_at),
        });

        let total = all.len();
        let data = all
            .into_iter()
            .skip(pager.page * pager.num)
            .take(pager.num)
            .collect();
        Ok(Paginate { data, total })
    }
}
