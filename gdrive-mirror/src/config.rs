use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;

use crate::retry::RetryPolicy;
use crate::sync::conversion::{ConversionMode, ConversionTable, NON_DOWNLOADABLE_MIME_TYPES};
use crate::sync::engine::SyncSettings;
use crate::sync::lock::LOCK_FILE_NAME;

const CREDENTIALS_FILE_NAME: &str = ".oauth2.json";
const CLIENT_SECRETS_FILE_NAME: &str = "client_secrets.json";
const CONFIG_DIR_NAME: &str = "gdrive-mirror";
const ENV_FILE_NAME: &str = ".env";
const DEFAULT_TRASH_DIR: &str = ".Trash";
const DEFAULT_BACKUP_DIR: &str = ".Backups";
const DEFAULT_PAGE_SIZE: u64 = 1000;
const MAX_PAGE_SIZE: u64 = 1000;
const DEFAULT_LIST_ATTEMPTS: u64 = 3;

/// Values given on the command line; each one wins over the environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub work_dir: Option<PathBuf>,
    pub credentials: Option<PathBuf>,
    pub client_secrets: Option<PathBuf>,
    pub conversion: Option<ConversionMode>,
    /// The dotenv file actually loaded at startup, if any.
    pub env_file: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct MirrorConfig {
    pub work_dir: PathBuf,
    pub credentials_path: PathBuf,
    pub client_secrets_path: PathBuf,
    /// Dotenv file settings may come from; kept out of pruning when it lives
    /// inside the mirror.
    pub env_file: PathBuf,
    pub conversion: ConversionMode,
    /// Relative to `work_dir`.
    pub trash_dir: PathBuf,
    /// Relative to `work_dir`.
    pub backup_dir: PathBuf,
    pub page_size: u32,
    pub list_attempts: u32,
    pub ignore_mimetypes: HashSet<String>,
}

impl MirrorConfig {
    pub fn from_env(overrides: ConfigOverrides) -> anyhow::Result<Self> {
        let cwd = std::env::current_dir().context("current directory is unavailable")?;
        Ok(Self::resolve(
            overrides,
            |name| std::env::var(name).ok(),
            dirs::home_dir().as_deref(),
            dirs::config_dir().as_deref(),
            &cwd,
        ))
    }

    pub fn resolve(
        overrides: ConfigOverrides,
        env: impl Fn(&str) -> Option<String>,
        home: Option<&Path>,
        config_dir: Option<&Path>,
        cwd: &Path,
    ) -> Self {
        let absolute = |value: PathBuf| {
            let value = match home {
                Some(home) => expand_with_home(&value.to_string_lossy(), home),
                None => value,
            };
            cwd.join(value)
        };
        let work_dir = absolute(
            overrides
                .work_dir
                .or_else(|| env("GDRIVE_MIRROR_DIR").map(PathBuf::from))
                .unwrap_or_else(|| cwd.to_path_buf()),
        );
        let credentials_path = overrides
            .credentials
            .or_else(|| env("GDRIVE_CREDENTIALS").map(PathBuf::from))
            .map(&absolute)
            .unwrap_or_else(|| work_dir.join(CREDENTIALS_FILE_NAME));
        let client_secrets_path = overrides
            .client_secrets
            .or_else(|| env("GDRIVE_CLIENT_SECRETS").map(PathBuf::from))
            .map(&absolute)
            .unwrap_or_else(|| default_client_secrets(config_dir, &work_dir));
        let env_file = overrides
            .env_file
            .map(&absolute)
            .unwrap_or_else(|| cwd.join(ENV_FILE_NAME));
        let trash_dir = env("GDRIVE_TRASH_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_TRASH_DIR));
        let backup_dir = env("GDRIVE_BACKUP_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_BACKUP_DIR));
        let page_size = read_u64(&env, "GDRIVE_PAGE_SIZE", DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE);
        let list_attempts = read_u64(&env, "GDRIVE_LIST_ATTEMPTS", DEFAULT_LIST_ATTEMPTS);

        Self {
            work_dir,
            credentials_path,
            client_secrets_path,
            env_file,
            conversion: overrides.conversion.unwrap_or_default(),
            trash_dir,
            backup_dir,
            page_size: page_size as u32,
            list_attempts: list_attempts.min(u64::from(u32::MAX)) as u32,
            ignore_mimetypes: NON_DOWNLOADABLE_MIME_TYPES
                .iter()
                .map(|mime| mime.to_string())
                .collect(),
        }
    }

    pub fn lock_path(&self) -> PathBuf {
        self.work_dir.join(LOCK_FILE_NAME)
    }

    pub fn list_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.list_attempts,
            Duration::from_millis(500),
            Duration::from_secs(8),
        )
    }

    /// Paths inside the work dir that belong to the tool rather than the
    /// mirror, relative to `work_dir`.
    pub fn reserved_paths(&self) -> Vec<PathBuf> {
        let mut reserved = vec![
            PathBuf::from(LOCK_FILE_NAME),
            self.trash_dir.clone(),
            self.backup_dir.clone(),
        ];
        for path in [&self.credentials_path, &self.client_secrets_path, &self.env_file] {
            if let Ok(relative) = path.strip_prefix(&self.work_dir) {
                reserved.push(relative.to_path_buf());
            }
        }
        reserved
    }

    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            root: self.work_dir.clone(),
            trash_dir: self.trash_dir.clone(),
            backup_dir: self.backup_dir.clone(),
            ignore_mimetypes: self.ignore_mimetypes.clone(),
            conversion: ConversionTable::new(self.conversion),
            reserved: self.reserved_paths(),
        }
    }
}

fn default_client_secrets(config_dir: Option<&Path>, work_dir: &Path) -> PathBuf {
    match config_dir {
        Some(dir) => dir.join(CONFIG_DIR_NAME).join(CLIENT_SECRETS_FILE_NAME),
        None => work_dir.join(CLIENT_SECRETS_FILE_NAME),
    }
}

fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}

fn read_u64(env: impl Fn(&str) -> Option<String>, name: &str, default: u64) -> u64 {
    env(name)
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn resolve_with(overrides: ConfigOverrides, vars: &[(&str, &str)]) -> MirrorConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        MirrorConfig::resolve(
            overrides,
            |name| vars.get(name).cloned(),
            Some(Path::new("/home/user")),
            Some(Path::new("/home/user/.config")),
            Path::new("/srv/cwd"),
        )
    }

    #[test]
    fn expands_tilde_to_home_dir() {
        let home = PathBuf::from("/tmp/home-user");
        assert_eq!(
            expand_with_home("~/Drive", &home),
            PathBuf::from("/tmp/home-user/Drive")
        );
        assert_eq!(expand_with_home("~", &home), home);
        assert_eq!(expand_with_home("/abs", &home), PathBuf::from("/abs"));
    }

    #[test]
    fn defaults_follow_the_work_dir() {
        let config = resolve_with(ConfigOverrides::default(), &[]);

        assert_eq!(config.work_dir, PathBuf::from("/srv/cwd"));
        assert_eq!(config.credentials_path, PathBuf::from("/srv/cwd/.oauth2.json"));
        assert_eq!(
            config.client_secrets_path,
            PathBuf::from("/home/user/.config/gdrive-mirror/client_secrets.json")
        );
        assert_eq!(config.lock_path(), PathBuf::from("/srv/cwd/.drive-downloader.lock"));
        assert_eq!(config.conversion, ConversionMode::OpenDocument);
        assert_eq!(config.page_size, 1000);
        assert_eq!(config.list_attempts, 3);
        assert!(config.ignore_mimetypes.contains("application/vnd.google-apps.form"));
        assert!(!config.ignore_mimetypes.contains("application/vnd.google-apps.document"));
    }

    #[test]
    fn flags_win_over_environment() {
        let overrides = ConfigOverrides {
            work_dir: Some(PathBuf::from("~/Drive")),
            credentials: Some(PathBuf::from("creds.json")),
            client_secrets: None,
            conversion: Some(ConversionMode::Pdf),
            env_file: None,
        };
        let config = resolve_with(
            overrides,
            &[
                ("GDRIVE_MIRROR_DIR", "/elsewhere"),
                ("GDRIVE_CLIENT_SECRETS", "/etc/secrets.json"),
            ],
        );

        assert_eq!(config.work_dir, PathBuf::from("/home/user/Drive"));
        assert_eq!(config.credentials_path, PathBuf::from("/srv/cwd/creds.json"));
        assert_eq!(config.client_secrets_path, PathBuf::from("/etc/secrets.json"));
        assert_eq!(config.conversion, ConversionMode::Pdf);
    }

    #[test]
    fn numeric_settings_are_validated() {
        let config = resolve_with(
            ConfigOverrides::default(),
            &[("GDRIVE_PAGE_SIZE", "5000"), ("GDRIVE_LIST_ATTEMPTS", "0")],
        );
        assert_eq!(config.page_size, 1000);
        assert_eq!(config.list_attempts, 3);

        let config = resolve_with(ConfigOverrides::default(), &[("GDRIVE_PAGE_SIZE", "250")]);
        assert_eq!(config.page_size, 250);
    }

    #[test]
    fn reserved_paths_cover_tool_files_inside_work_dir() {
        let overrides = ConfigOverrides {
            client_secrets: Some(PathBuf::from("/srv/cwd/client_secrets.json")),
            ..ConfigOverrides::default()
        };
        let config = resolve_with(overrides, &[("GDRIVE_BACKUP_DIR", "old-versions")]);
        let reserved = config.reserved_paths();

        for expected in [
            ".drive-downloader.lock",
            ".Trash",
            "old-versions",
            ".oauth2.json",
            "client_secrets.json",
            ".env",
        ] {
            assert!(reserved.contains(&PathBuf::from(expected)), "{expected} not reserved");
        }

        let settings = config.sync_settings();
        assert_eq!(settings.root, PathBuf::from("/srv/cwd"));
        assert_eq!(settings.backup_dir, PathBuf::from("old-versions"));
    }

    #[test]
    fn credentials_outside_work_dir_are_not_reserved() {
        let overrides = ConfigOverrides {
            credentials: Some(PathBuf::from("/var/lib/creds.json")),
            ..ConfigOverrides::default()
        };
        let config = resolve_with(overrides, &[]);
        let reserved = config.reserved_paths();
        assert!(!reserved.iter().any(|path| path.ends_with("creds.json")));
        assert!(reserved.contains(&PathBuf::from(".env")));
    }

    #[test]
    fn loaded_env_file_is_reserved_when_inside_the_mirror() {
        let overrides = ConfigOverrides {
            work_dir: Some(PathBuf::from("/srv/mirror")),
            env_file: Some(PathBuf::from("/srv/mirror/.env")),
            ..ConfigOverrides::default()
        };
        let config = resolve_with(overrides, &[]);
        assert_eq!(config.env_file, PathBuf::from("/srv/mirror/.env"));
        assert!(config.reserved_paths().contains(&PathBuf::from(".env")));

        let overrides = ConfigOverrides {
            work_dir: Some(PathBuf::from("/srv/mirror")),
            ..ConfigOverrides::default()
        };
        let config = resolve_with(overrides, &[]);
        assert_eq!(config.env_file, PathBuf::from("/srv/cwd/.env"));
        assert!(!config.reserved_paths().contains(&PathBuf::from(".env")));
    }
}
