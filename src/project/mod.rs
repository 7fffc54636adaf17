//! Administrative operations on the project/link graph. The SSH CLI
//! is a thin wrapper over this service; every mutation honors the
//! dry-run flag and narrates what it would do through the returned
//! report.

use std::sync::Arc;

use crate::cache::{PurgePublisher, surrogate_key};
use crate::error::{Error, Result};
use crate::storage::{ObjectStorage, asset_bucket_name};
use crate::store::Store;
use crate::types::{Project, User};

pub struct ProjectService {
    pub store: Arc<dyn Store>,
    pub storage: Arc<dyn ObjectStorage>,
    pub purge: PurgePublisher,
}

/// What a mutating command did (or would do without `--write`).
#[derive(Debug, Default)]
pub struct OpReport {
    /// Projects removed, in order.
    pub removed_projects: Vec<String>,
    /// Object keys deleted by the orphan reaper, bucket-relative.
    pub removed_assets: Vec<String>,
    /// Projects skipped because others link to them: (name, links).
    pub skipped_dependents: Vec<(String, usize)>,
    /// True when `link` had to create the project row first.
    pub created_project: bool,
}

impl ProjectService {
    /// Upload-side hook: first upload creates the project, later
    /// uploads bump `updated_at`.
    pub fn ensure_project(&self, user: &User, name: &str) -> Result<Project> {
        if let Some(project) = self.store.find_project_by_name(&user.id, name)? {
            self.store.update_project(&user.id, name)?;
            return Ok(project);
        }
        tracing::info!(user = %user.name, project = name, "creating project on first upload");
        self.store.insert_project(&user.id, name, name)?;
        self.store
            .find_project_by_name(&user.id, name)?
            .ok_or(Error::NotFound)
    }

    /// Deletes every object under `<project_name>/`. A per-file
    /// failure aborts the batch and surfaces the error; the report
    /// shows how far it got.
    pub async fn rm_project_assets(
        &self,
        user: &User,
        project_name: &str,
        write: bool,
        report: &mut OpReport,
    ) -> Result<()> {
        let bucket = self
            .storage
            .get_bucket(&asset_bucket_name(&user.id))
            .await?;
        let prefix = format!("{project_name}/");
        let files = self.storage.list_objects(&bucket, &prefix, true).await?;

        for file in files {
            let key = format!("{project_name}/{}", file.name);
            tracing::info!(
                user = %user.name,
                bucket = %bucket.name,
                filename = %key,
                "attempting to delete file"
            );
            if write {
                self.storage.delete_object(&bucket, &key).await?;
            }
            report.removed_assets.push(key);
        }
        Ok(())
    }

    /// Repoints `project` at `to`. Creates the project row when
    /// missing (requires `write`), then reaps assets stored under the
    /// project's own name since requests now resolve through `to`.
    pub async fn link(
        &self,
        user: &User,
        project_name: &str,
        link_to: &str,
        write: bool,
    ) -> Result<OpReport> {
        tracing::info!(user = %user.name, project = project_name, link = link_to, "running `link`");
        let mut report = OpReport::default();

        self.store
            .find_project_by_name(&user.id, link_to)?
            .ok_or_else(|| Error::validation(format!("({link_to}) project does not exist")))?;

        let project_id = match self.store.find_project_by_name(&user.id, project_name)? {
            Some(project) => project.id,
            None => {
                if !write {
                    return Err(Error::validation(format!(
                        "({project_name}) cannot create a new project without `--write`"
                    )));
                }
                report.created_project = true;
                self.store
                    .insert_project(&user.id, project_name, project_name)?
            }
        };

        self.store
            .link_to_project(&user.id, &project_id, link_to, write)?;

        // anything stored under the old name is unreachable now
        self.rm_project_assets(user, project_name, write, &mut report)
            .await?;

        Ok(report)
    }

    /// Resets `project_dir` back to the project's own name.
    pub fn unlink(&self, user: &User, project_name: &str, write: bool) -> Result<()> {
        tracing::info!(user = %user.name, project = project_name, "running `unlink`");
        let project = self
            .store
            .find_project_by_name(&user.id, project_name)?
            .ok_or_else(|| Error::validation(format!("({project_name}) project does not exist")))?;

        self.store
            .link_to_project(&user.id, &project.id, &project.name, write)
    }

    /// Removes the project and its assets. Refuses while other
    /// projects link to it. A missing project row still reaps stray
    /// assets under the name.
    pub async fn rm(&self, user: &User, project_name: &str, write: bool) -> Result<OpReport> {
        tracing::info!(user = %user.name, project = project_name, "running `rm`");
        let mut report = OpReport::default();

        if let Some(project) = self.store.find_project_by_name(&user.id, project_name)? {
            let links = self.store.find_project_links(&user.id, project_name)?;
            if !links.is_empty() {
                return Err(Error::HasDependents(links.len()));
            }
            if write {
                self.store.remove_project(&project.id)?;
            }
            report.removed_projects.push(project.name);
        }

        self.rm_project_assets(user, project_name, write, &mut report)
            .await?;
        Ok(report)
    }

    /// Deletes projects whose name starts with `prefix` and that have
    /// no dependents, keeping the `keep` most recently updated.
    pub async fn prune(
        &self,
        user: &User,
        prefix: &str,
        keep: usize,
        write: bool,
    ) -> Result<OpReport> {
        tracing::info!(user = %user.name, prefix = prefix, keep, "running `prune`");
        if prefix.is_empty() || prefix == "*" {
            return Err(Error::validation("must provide valid prefix"));
        }

        let mut report = OpReport::default();
        let projects = self.store.find_projects_by_prefix(&user.id, prefix)?;

        let mut candidates: Vec<Project> = Vec::new();
        for project in projects {
            let links = self.store.find_project_links(&user.id, &project.name)?;
            if links.is_empty() {
                candidates.push(project);
            } else {
                report
                    .skipped_dependents
                    .push((project.name.clone(), links.len()));
            }
        }

        // candidates arrive oldest-first; the tail is the retention set
        let cut = candidates.len().saturating_sub(keep);
        let goodbye = &candidates[..cut];

        for project in goodbye {
            self.rm_project_assets(user, &project.name, write, &mut report)
                .await?;
            if write {
                tracing::info!(project = %project.name, "removing project");
                self.store.remove_project(&project.id)?;
            }
            report.removed_projects.push(project.name.clone());
        }

        Ok(report)
    }

    pub fn depends(&self, user: &User, project_name: &str) -> Result<Vec<Project>> {
        self.store.find_project_links(&user.id, project_name)
    }

    /// Publishes the project's surrogate key on the purge bus.
    pub fn cache(&self, user: &User, project_name: &str, write: bool) -> Result<()> {
        tracing::info!(user = %user.name, project = project_name, "running `cache`");
        if write {
            self.purge.publish(&surrogate_key(&user.name, project_name));
        }
        Ok(())
    }

    /// Wipes the whole HTTP cache. Admin only.
    pub fn cache_all(&self, user: &User, write: bool) -> Result<()> {
        if !self.store.has_feature_for_user(&user.id, "admin")? {
            return Err(Error::Unauthorized);
        }
        tracing::info!(user = %user.name, "admin running `cache-all`");
        if write {
            self.purge.publish("*");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::purge_bus;
    use crate::storage::MemoryStorage;
    use crate::store::MemoryStore;
    use bytes::Bytes;
    use chrono::Utc;
    use uuid::Uuid;

    struct Fixture {
        service: ProjectService,
        user: User,
        rx: tokio::sync::mpsc::Receiver<String>,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let storage = Arc::new(MemoryStorage::new());
        let user = User {
            id: Uuid::new_v4().to_string(),
            name: "alice".to_string(),
            created_at: Utc::now(),
        };
        store.create_user(&user).unwrap();
        storage
            .upsert_bucket(&asset_bucket_name(&user.id))
            .await
            .unwrap();

        let (purge, rx) = purge_bus();
        Fixture {
            service: ProjectService {
                store,
                storage,
                purge,
            },
            user,
            rx,
        }
    }

    async fn put(f: &Fixture, key: &str, body: &str) {
        let bucket = f
            .service
            .storage
            .get_bucket(&asset_bucket_name(&f.user.id))
            .await
            .unwrap();
        f.service
            .storage
            .put_object(&bucket, key, Bytes::from(body.to_string()))
            .await
            .unwrap();
    }

    async fn keys(f: &Fixture, prefix: &str) -> Vec<String> {
        let bucket = f
            .service
            .storage
            .get_bucket(&asset_bucket_name(&f.user.id))
            .await
            .unwrap();
        f.service
            .storage
            .list_objects(&bucket, prefix, true)
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.name)
            .collect()
    }

    #[tokio::test]
    async fn test_ensure_project_creates_then_bumps() {
        let f = fixture().await;
        let created = f.service.ensure_project(&f.user, "blog").unwrap();
        assert_eq!(created.project_dir, "blog");

        let before = created.updated_at;
        let again = f.service.ensure_project(&f.user, "blog").unwrap();
        assert_eq!(again.id, created.id);
        let bumped = f
            .service
            .store
            .find_project_by_name(&f.user.id, "blog")
            .unwrap()
            .unwrap();
        assert!(bumped.updated_at >= before);
    }

    #[tokio::test]
    async fn test_link_reaps_orphans_and_is_idempotent() {
        let f = fixture().await;
        f.service.ensure_project(&f.user, "v1").unwrap();
        f.service.ensure_project(&f.user, "staging").unwrap();
        put(&f, "staging/index.html", "old").await;

        let report = f.service.link(&f.user, "staging", "v1", true).await.unwrap();
        assert_eq!(report.removed_assets, vec!["staging/index.html"]);
        assert!(keys(&f, "staging/").await.is_empty());

        let staging = f
            .service
            .store
            .find_project_by_name(&f.user.id, "staging")
            .unwrap()
            .unwrap();
        assert_eq!(staging.project_dir, "v1");

        // second run finds nothing to reap and changes nothing
        let report = f.service.link(&f.user, "staging", "v1", true).await.unwrap();
        assert!(report.removed_assets.is_empty());
        assert!(!report.created_project);
    }

    #[tokio::test]
    async fn test_link_missing_target() {
        let f = fixture().await;
        f.service.ensure_project(&f.user, "a").unwrap();
        let err = f.service.link(&f.user, "a", "nope", true).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_link_creates_project_only_with_write() {
        let f = fixture().await;
        f.service.ensure_project(&f.user, "v1").unwrap();

        let err = f
            .service
            .link(&f.user, "fresh", "v1", false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let report = f.service.link(&f.user, "fresh", "v1", true).await.unwrap();
        assert!(report.created_project);
    }

    #[tokio::test]
    async fn test_link_unlink_round_trip() {
        let f = fixture().await;
        f.service.ensure_project(&f.user, "v1").unwrap();
        f.service.ensure_project(&f.user, "site").unwrap();

        f.service.link(&f.user, "site", "v1", true).await.unwrap();
        f.service.unlink(&f.user, "site", true).unwrap();

        let site = f
            .service
            .store
            .find_project_by_name(&f.user.id, "site")
            .unwrap()
            .unwrap();
        assert_eq!(site.project_dir, "site");
    }

    #[tokio::test]
    async fn test_rm_refuses_with_dependents() {
        let f = fixture().await;
        f.service.ensure_project(&f.user, "blog").unwrap();
        f.service.ensure_project(&f.user, "mirror").unwrap();
        f.service.link(&f.user, "mirror", "blog", true).await.unwrap();
        put(&f, "blog/index.html", "x").await;

        let err = f.service.rm(&f.user, "blog", true).await.unwrap_err();
        assert!(matches!(err, Error::HasDependents(1)));
        // no mutation happened
        assert!(
            f.service
                .store
                .find_project_by_name(&f.user.id, "blog")
                .unwrap()
                .is_some()
        );
        assert_eq!(keys(&f, "blog/").await.len(), 1);
    }

    #[tokio::test]
    async fn test_rm_removes_row_and_assets() {
        let f = fixture().await;
        f.service.ensure_project(&f.user, "blog").unwrap();
        put(&f, "blog/index.html", "x").await;
        put(&f, "blog/css/site.css", "y").await;

        let report = f.service.rm(&f.user, "blog", true).await.unwrap();
        assert_eq!(report.removed_projects, vec!["blog"]);
        assert_eq!(report.removed_assets.len(), 2);
        assert!(keys(&f, "blog/").await.is_empty());
        assert!(
            f.service
                .store
                .find_project_by_name(&f.user.id, "blog")
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_rm_dry_run_keeps_everything() {
        let f = fixture().await;
        f.service.ensure_project(&f.user, "blog").unwrap();
        put(&f, "blog/index.html", "x").await;

        let report = f.service.rm(&f.user, "blog", false).await.unwrap();
        assert_eq!(report.removed_assets.len(), 1);
        assert_eq!(keys(&f, "blog/").await.len(), 1);
        assert!(
            f.service
                .store
                .find_project_by_name(&f.user.id, "blog")
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_prune_retains_newest() {
        let f = fixture().await;
        for name in ["demo-1", "demo-2", "demo-3"] {
            f.service.ensure_project(&f.user, name).unwrap();
            put(&f, &format!("{name}/index.html"), name).await;
        }
        // bump updates in order so demo-3 is newest
        f.service.store.update_project(&f.user.id, "demo-2").unwrap();
        f.service.store.update_project(&f.user.id, "demo-3").unwrap();

        let report = f.service.prune(&f.user, "demo-", 1, true).await.unwrap();
        assert_eq!(report.removed_projects, vec!["demo-1", "demo-2"]);
        assert!(keys(&f, "demo-1/").await.is_empty());
        assert!(keys(&f, "demo-2/").await.is_empty());
        assert_eq!(keys(&f, "demo-3/").await.len(), 1);
    }

    #[tokio::test]
    async fn test_prune_skips_dependents_and_bad_prefix() {
        let f = fixture().await;
        f.service.ensure_project(&f.user, "demo-base").unwrap();
        f.service.ensure_project(&f.user, "demo-alias").unwrap();
        f.service
            .link(&f.user, "demo-alias", "demo-base", true)
            .await
            .unwrap();

        assert!(f.service.prune(&f.user, "", 0, true).await.is_err());
        assert!(f.service.prune(&f.user, "*", 0, true).await.is_err());

        let report = f.service.prune(&f.user, "demo-", 0, true).await.unwrap();
        // base is linked-to, alias has no dependents
        assert_eq!(report.skipped_dependents, vec![("demo-base".to_string(), 1)]);
        assert_eq!(report.removed_projects, vec!["demo-alias"]);
    }

    #[tokio::test]
    async fn test_prune_keep_covers_all() {
        let f = fixture().await;
        f.service.ensure_project(&f.user, "demo-1").unwrap();
        let report = f.service.prune(&f.user, "demo-", 3, true).await.unwrap();
        assert!(report.removed_projects.is_empty());
    }

    #[tokio::test]
    async fn test_cache_publishes_surrogate_key() {
        let mut f = fixture().await;
        f.service.ensure_project(&f.user, "blog").unwrap();

        f.service.cache(&f.user, "blog", false).unwrap();
        f.service.cache(&f.user, "blog", true).unwrap();

        let token = f.rx.try_recv().unwrap();
        assert_eq!(token, "alice-blog");
        // dry run published nothing else
        assert!(f.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cache_all_requires_admin() {
        let mut f = fixture().await;
        assert!(matches!(
            f.service.cache_all(&f.user, true).unwrap_err(),
            Error::Unauthorized
        ));

        f.service
            .store
            .set_feature(
                &f.user.id,
                &crate::types::FeatureData::new(vec!["admin".into()], 0, 0, 0),
            )
            .unwrap();
        f.service.cache_all(&f.user, true).unwrap();
        assert_eq!(f.rx.try_recv().unwrap(), "*");
    }
}
