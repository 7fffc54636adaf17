use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    /// Subdomain prefix; unique across the service.
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicKey {
    pub user_id: String,
    pub key_text: String,
}

/// Per-user entitlements and quotas. Users without a feature row get
/// [`FeatureData::default`], which permits uploads but nothing else.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureData {
    pub perms: Vec<String>,
    pub storage_max: u64,
    pub file_max: i64,
    pub special_file_max: i64,
}

impl FeatureData {
    pub fn new(perms: Vec<String>, storage_max: u64, file_max: i64, special_file_max: i64) -> Self {
        Self {
            perms,
            storage_max,
            file_max,
            special_file_max,
        }
    }

    pub fn has_perm(&self, perm: &str) -> bool {
        self.perms.iter().any(|p| p == perm)
    }
}

impl Default for FeatureData {
    fn default() -> Self {
        Self {
            perms: vec!["write".to_string()],
            storage_max: 25 * 1024 * 1024,
            file_max: 10 * 1024 * 1024,
            special_file_max: 5 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AclType {
    Public,
    Pubkeys,
    Users,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectAcl {
    #[serde(rename = "type")]
    pub acl_type: AclType,
    /// Allow-list for the non-public types: key fingerprints for
    /// `pubkeys`, usernames for `users`.
    #[serde(default)]
    pub data: Vec<String>,
}

impl Default for ProjectAcl {
    fn default() -> Self {
        Self {
            acl_type: AclType::Public,
            data: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub user_id: String,
    /// Unique per user.
    pub name: String,
    /// Effective asset directory. When it differs from `name` this
    /// project is a link onto the project whose name matches.
    pub project_dir: String,
    pub acl: ProjectAcl,
    /// Non-empty when administratively disabled; the string is shown
    /// to clients with a 403.
    pub blocked: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    /// A link serves another project's assets.
    pub fn is_link(&self) -> bool {
        self.project_dir != self.name
    }
}

/// Page of results plus the total row count.
#[derive(Debug, Clone)]
pub struct Paginate<T> {
    pub data: Vec<T>,
    pub total: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct Pager {
    pub num: usize,
    pub page: usize,
}

/// Sort order accepted by `find_all_projects`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectOrder {
    CreatedAt,
    UpdatedAt,
}

impl ProjectOrder {
    pub fn column(self) -> &'static str {
        match self {
            Self::CreatedAt => "created_at",
            Self::UpdatedAt => "updated_at",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_link() {
        let mut p = Project {
            id: "1".to_string(),
            user_id: "u".to_string(),
            name: "blog".to_string(),
            project_dir: "blog".to_string(),
            acl: ProjectAcl::default(),
            blocked: String::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(!p.is_link());
        p.project_dir = "v2".to_string();
        assert!(p.is_link());
    }

    #[test]
    fn test_acl_json_round_trip() {
        let acl = ProjectAcl {
            acl_type: AclType::Pubkeys,
            data: vec!["SHA256:abc".to_string()],
        };
        let json = serde_json::to_string(&acl).unwrap();
        assert!(json.contains("\"pubkeys\""));
        let back: ProjectAcl = serde_json::from_str(&json).unwrap();
        assert_eq!(back.acl_type, AclType::Pubkeys);
        assert_eq!(back.data, acl.data);
    }
}
