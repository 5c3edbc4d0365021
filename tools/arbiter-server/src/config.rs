//! Server configuration, read once from the environment at startup.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// Root for per-session SQLite files.
    pub data_dir: PathBuf,
    pub data_api_url: Option<String>,
    pub data_api_key: Option<String>,
    pub allowed_origins: Vec<String>,
    /// Map image bucket; echoed to clients building asset URLs.
    pub asset_bucket_name: Option<String>,
}

fn default_origins() -> Vec<String> {
    vec![
        "http://localhost:5173".to_string(),
        "http://localhost:3000".to_string(),
    ]
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let port = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(3030);
        let data_dir = std::env::var("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));
        let allowed_origins = std::env::var("ALLOWED_ORIGINS")
            .ok()
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().trim_end_matches('/').to_string())
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|origins| !origins.is_empty())
            .unwrap_or_else(default_origins);

        Self {
            port,
            data_dir,
            data_api_url: std::env::var("DATA_API_URL").ok().filter(|s| !s.is_empty()),
            data_api_key: std::env::var("DATA_API_KEY").ok().filter(|s| !s.is_empty()),
            allowed_origins,
            asset_bucket_name: std::env::var("ASSET_BUCKET_NAME").ok(),
        }
    }

    /// Host of the first https origin — the production host whose hyphenated
    /// preview subdomains are also admitted.
    pub fn production_host(&self) -> Option<&str> {
        self.allowed_origins
            .iter()
            .find_map(|origin| origin.strip_prefix("https://"))
    }

    /// An origin is allowed if listed exactly, or if it is a hyphenated
    /// subdomain of the production host (deploy previews).
    pub fn origin_allowed(&self, origin: &str) -> bool {
        if self.allowed_origins.iter().any(|o| o == origin) {
            return true;
        }
        let (Some(host), Some(prod)) = (origin.strip_prefix("https://"), self.production_host())
        else {
            return false;
        };
        match host.strip_suffix(prod).and_then(|p| p.strip_suffix('.')) {
            Some(label) => !label.is_empty() && label.contains('-'),
            None => false,
        }
    }

    /// Database file for one session, ids sanitized for the filesystem.
    pub fn session_db_path(&self, campaign_id: &str, combat_id: &str) -> PathBuf {
        fn sanitize(s: &str) -> String {
            s.chars()
                .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
                .collect()
        }
        self.sessions_dir()
            .join(format!("{}__{}.db", sanitize(campaign_id), sanitize(combat_id)))
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.data_dir.join("sessions")
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.sessions_dir())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(origins: &[&str]) -> ServerConfig {
        ServerConfig {
            port: 3030,
            data_dir: PathBuf::from("./data"),
            data_api_url: None,
            data_api_key: None,
            allowed_origins: origins.iter().map(|s| s.to_string()).collect(),
            asset_bucket_name: None,
        }
    }

    #[test]
    fn exact_origins_are_allowed() {
        let cfg = config_with(&["https://play.ledgerveil.app", "http://localhost:5173"]);
        assert!(cfg.origin_allowed("https://play.ledgerveil.app"));
        assert!(cfg.origin_allowed("http://localhost:5173"));
        assert!(!cfg.origin_allowed("https://evil.example"));
    }

    #[test]
    fn hyphenated_preview_subdomains_are_allowed() {
        let cfg = config_with(&["https://play.ledgerveil.app"]);
        assert!(cfg.origin_allowed("https://feature-grid.play.ledgerveil.app"));
        assert!(!cfg.origin_allowed("https://preview.play.ledgerveil.app")); // no hyphen
        assert!(!cfg.origin_allowed("https://evilplay.ledgerveil.app")); // not a subdomain
        assert!(!cfg.origin_allowed("http://feature-grid.play.ledgerveil.app")); // not https
    }

    #[test]
    fn session_paths_are_sanitized() {
        let cfg = config_with(&[]);
        let path = cfg.session_db_path("camp/../../etc", "fight 1");
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert_eq!(name, "camp_______etc__fight_1.db");
    }
}
