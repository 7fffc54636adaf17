mod dns;

pub use dns::{DnsTxtResolver, StaticTxtResolver, TXT_LOOKUP_TIMEOUT, TxtResolver};

use crate::error::{Error, Result};
use crate::store::Store;
use crate::types::{AclType, Project, User};

/// Owner/project pair parsed out of a subdomain label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubdomainProps {
    pub username: String,
    pub project_name: String,
}

/// `<user>` serves the apex project; `<user>-<project>` everything
/// else. Split on the first `-` only, so project names may contain
/// dashes.
pub fn project_from_subdomain(subdomain: &str) -> Result<SubdomainProps> {
    let subdomain = subdomain.trim();
    if subdomain.is_empty() {
        return Err(Error::NotFound);
    }
    let (username, project_name) = match subdomain.split_once('-') {
        Some((user, project)) => (user.to_string(), project.to_string()),
        None => (subdomain.to_string(), subdomain.to_string()),
    };
    Ok(SubdomainProps {
        username,
        project_name,
    })
}

/// Custom domains opt in through a TXT record at
/// `_<prefix>.<host>` whose value is the intended subdomain.
pub async fn custom_domain_subdomain(
    resolver: &dyn TxtResolver,
    host: &str,
    txt_prefix: &str,
) -> Option<String> {
    let fqdn = format!("_{txt_prefix}.{host}");
    let records = match resolver.lookup_txt(&fqdn).await {
        Ok(records) => records,
        Err(e) => {
            tracing::debug!(fqdn = %fqdn, err = %e, "custom domain lookup failed");
            return None;
        }
    };
    records
        .iter()
        .map(|r| r.trim())
        .find(|r| !r.is_empty())
        .map(|r| r.to_string())
}

/// Maps the request Host to a subdomain. Empty result means the root
/// domain itself (marketing pages, feed, health).
pub async fn subdomain_from_host(
    resolver: &dyn TxtResolver,
    host: &str,
    domain: &str,
    txt_prefix: &str,
) -> Option<String> {
    let host_domain = host.split(':').next().unwrap_or(host).to_lowercase();
    let app_domain = domain.split(':').next().unwrap_or(domain).to_lowercase();

    if host_domain == app_domain {
        return None;
    }
    if let Some(label) = host_domain.strip_suffix(&format!(".{app_domain}")) {
        return Some(label.to_string());
    }
    custom_domain_subdomain(resolver, &host_domain, txt_prefix).await
}

/// SSH usernames of the form `<as_user>__<subdomain>` request
/// impersonation; plain usernames carry only the subdomain.
pub fn parse_ssh_user(ssh_user: &str) -> (Option<&str>, &str) {
    match ssh_user.split_once("__") {
        Some((as_user, subdomain)) => (Some(as_user), subdomain),
        None => (None, ssh_user),
    }
}

/// Evaluates a project's ACL for a requester. Web traffic has no
/// requester identity; only public projects pass. The SSH tunnel
/// bridge supplies the authenticated pubkey and, when registered, the
/// requester's user row.
pub fn has_project_access(
    project: &Project,
    owner: &User,
    requester: Option<&User>,
    pubkey: Option<&str>,
) -> bool {
    if let Some(requester) = requester {
        if requester.id == owner.id {
            return true;
        }
    }
    match project.acl.acl_type {
        AclType::Public => true,
        AclType::Pubkeys => pubkey.is_some_and(|k| project.acl.data.iter().any(|d| d == k)),
        AclType::Users => {
            requester.is_some_and(|u| project.acl.data.iter().any(|d| d == &u.name))
        }
    }
}

/// Stored `project_dir` values are terminal by construction; walk
/// defensively anyway, bounded at 5 hops.
pub const MAX_ALIAS_DEPTH: usize = 5;

pub fn resolve_effective_dir(store: &dyn Store, user_id: &str, project: &Project) -> Result<String> {
    let mut current = project.clone();
    for _ in 0..MAX_ALIAS_DEPTH {
        if !current.is_link() {
            return Ok(current.name);
        }
        match store.find_project_by_name(user_id, &current.project_dir)? {
            Some(next) => current = next,
            // dangling link: serve from the named prefix, the blob
            // lookup will 404
            None => return Ok(current.project_dir),
        }
    }
    Err(Error::Fatal(format!(
        "alias depth exceeded resolving project ({})",
        project.name
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, Store};
    use crate::types::ProjectAcl;
    use chrono::Utc;
    use uuid::Uuid;

    fn mkuser(name: &str) -> User {
        User {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            created_at: Utc::now(),
        }
    }

    fn mkproject(user: &User, name: &str, dir: &str) -> Project {
        Project {
            id: Uuid::new_v4().to_string(),
            user_id: user.id.clone(),
            name: name.to_string(),
            project_dir: dir.to_string(),
            acl: ProjectAcl::default(),
            blocked: String::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_project_from_subdomain() {
        let apex = project_from_subdomain("alice").unwrap();
        assert_eq!(apex.username, "alice");
        assert_eq!(apex.project_name, "alice");

        let project = project_from_subdomain("alice-blog").unwrap();
        assert_eq!(project.username, "alice");
        assert_eq!(project.project_name, "blog");

        // only the first dash splits
        let dashed = project_from_subdomain("alice-my-site").unwrap();
        assert_eq!(dashed.project_name, "my-site");

        assert!(project_from_subdomain("").is_err());
    }

    #[tokio::test]
    async fn test_subdomain_from_host() {
        let resolver = StaticTxtResolver::new().with_record("_pgs.example.com", "alice-blog");

        assert_eq!(
            subdomain_from_host(&resolver, "pgs.sh", "pgs.sh", "pgs").await,
            None
        );
        assert_eq!(
            subdomain_from_host(&resolver, "Alice.PGS.sh:3000", "pgs.sh:3000", "pgs").await,
            Some("alice".to_string())
        );
        assert_eq!(
            subdomain_from_host(&resolver, "example.com", "pgs.sh", "pgs").await,
            Some("alice-blog".to_string())
        );
        assert_eq!(
            subdomain_from_host(&resolver, "unknown.net", "pgs.sh", "pgs").await,
            None
        );
    }

    #[test]
    fn test_parse_ssh_user() {
        assert_eq!(parse_ssh_user("alice-blog"), (None, "alice-blog"));
        assert_eq!(
            parse_ssh_user("admin__alice-blog"),
            (Some("admin"), "alice-blog")
        );
    }

    #[test]
    fn test_acl_public() {
        let owner = mkuser("alice");
        let project = mkproject(&owner, "blog", "blog");
        assert!(has_project_access(&project, &owner, None, None));
    }

    #[test]
    fn test_acl_pubkeys() {
        let owner = mkuser("alice");
        let mut project = mkproject(&owner, "blog", "blog");
        project.acl = ProjectAcl {
            acl_type: AclType::Pubkeys,
            data: vec!["SHA256:good".to_string()],
        };

        assert!(!has_project_access(&project, &owner, None, None));
        assert!(has_project_access(&project, &owner, None, Some("SHA256:good")));
        assert!(!has_project_access(&project, &owner, None, Some("SHA256:bad")));
    }

    #[test]
    fn test_acl_users_and_owner_bypass() {
        let owner = mkuser("alice");
        let friend = mkuser("bob");
        let stranger = mkuser("mallory");
        let mut project = mkproject(&owner, "blog", "blog");
        project.acl = ProjectAcl {
            acl_type: AclType::Users,
            data: vec!["bob".to_string()],
        };

        assert!(has_project_access(&project, &owner, Some(&friend), None));
        assert!(!has_project_access(&project, &owner, Some(&stranger), None));
        assert!(has_project_access(&project, &owner, Some(&owner), None));
    }

    #[test]
    fn test_resolve_effective_dir() {
        let store = MemoryStore::new();
        let u = mkuser("alice");
        store.create_user(&u).unwrap();
        store.insert_project(&u.id, "v1", "v1").unwrap();
        let v2 = store.insert_project(&u.id, "v2", "v2").unwrap();
        store.link_to_project(&u.id, &v2, "v1", true).unwrap();

        let v2 = store.find_project_by_name(&u.id, "v2").unwrap().unwrap();
        assert_eq!(resolve_effective_dir(&store, &u.id, &v2).unwrap(), "v1");

        let v1 = store.find_project_by_name(&u.id, "v1").unwrap().unwrap();
        assert_eq!(resolve_effective_dir(&store, &u.id, &v1).unwrap(), "v1");
    }

    #[test]
    fn test_dangling_link_serves_named_prefix() {
        let store = MemoryStore::new();
        let u = mkuser("alice");
        store.create_user(&u).unwrap();
        let p = mkproject(&u, "site", "gone");
        // not inserted through the store, simulating a row whose
        // target was removed out-of-band
        assert_eq!(resolve_effective_dir(&store, &u.id, &p).unwrap(), "gone");
    }
}
