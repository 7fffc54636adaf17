use std::env;
use std::path::PathBuf;
use std::time::Duration;

fn get_env(key: &str, fallback: &str) -> String {
    env::var(key).unwrap_or_else(|_| fallback.to_string())
}

/// Site-wide configuration, derived from environment variables.
///
/// Every variable is optional; defaults are chosen so `plinth serve`
/// works out of the box on a dev machine.
#[derive(Debug, Clone)]
pub struct ConfigSite {
    /// Root domain the service is reachable at, e.g. `plinth.sh`.
    pub domain: String,
    pub web_port: u16,
    pub protocol: String,
    /// How long cached responses stay valid.
    pub cache_ttl: Duration,
    /// Value sent in `Cache-Control` on served assets.
    pub cache_control: String,
    pub ssh_host: String,
    pub ssh_port: u16,
    /// TXT record prefix for custom domains: `_<prefix>.<host>`.
    pub txt_prefix: String,
    pub storage_dir: PathBuf,
    pub db_path: PathBuf,
    pub max_asset_size: i64,
    /// Needs to be small for caching files like _headers and _redirects.
    pub max_special_file_size: i64,
}

impl ConfigSite {
    pub fn from_env() -> Self {
        let cache_ttl = parse_duration(&get_env("PLINTH_CACHE_TTL", ""))
            .unwrap_or(Duration::from_secs(600));
        let cache_control = get_env(
            "PLINTH_CACHE_CONTROL",
            &format!("max-age={}", cache_ttl.as_secs()),
        );

        Self {
            domain: get_env("PLINTH_DOMAIN", "plinth.sh"),
            web_port: get_env("PLINTH_WEB_PORT", "3000").parse().unwrap_or(3000),
            protocol: get_env("PLINTH_PROTOCOL", "https"),
            cache_ttl,
            cache_control,
            ssh_host: get_env("PLINTH_SSH_HOST", "0.0.0.0"),
            ssh_port: get_env("PLINTH_SSH_PORT", "2222").parse().unwrap_or(2222),
            txt_prefix: get_env("PLINTH_TXT_PREFIX", "plinth"),
            storage_dir: get_env("PLINTH_STORAGE_DIR", ".storage").into(),
            db_path: get_env("PLINTH_DB_PATH", "./data/plinth.db").into(),
            max_asset_size: 10 * 1024 * 1024,
            max_special_file_size: 5 * 1024,
        }
    }

    /// Public URL for an asset. Apex projects (name == username) live
    /// directly on `<user>.<domain>`.
    pub fn asset_url(&self, username: &str, project_name: &str, fpath: &str) -> String {
        if username == project_name {
            format!("{}://{}.{}/{}", self.protocol, username, self.domain, fpath)
        } else {
            format!(
                "{}://{}-{}.{}/{}",
                self.protocol, username, project_name, self.domain, fpath
            )
        }
    }
}

impl Default for ConfigSite {
    fn default() -> Self {
        Self {
            domain: "plinth.sh".to_string(),
            web_port: 3000,
            protocol: "https".to_string(),
            cache_ttl: Duration::from_secs(600),
            cache_control: "max-age=600".to_string(),
            ssh_host: "0.0.0.0".to_string(),
            ssh_port: 2222,
            txt_prefix: "plinth".to_string(),
            storage_dir: ".storage".into(),
            db_path: "./data/plinth.db".into(),
            max_asset_size: 10 * 1024 * 1024,
            max_special_file_size: 5 * 1024,
        }
    }
}

/// Accepts "600s", "10m" or a bare number of seconds.
fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Some(mins) = s.strip_suffix('m') {
        return mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60));
    }
    let secs = s.strip_suffix('s').unwrap_or(s);
    secs.parse::<u64>().ok().map(Duration::from_secs)
}
