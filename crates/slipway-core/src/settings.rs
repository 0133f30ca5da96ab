use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Key-derivation passphrase used when `SLIPWAY_SECRET` is not set. A fixed
/// compiled-in passphrase is a known weakness of this design; it is kept
/// deliberately (see DESIGN.md) rather than silently replaced.
pub const DEFAULT_SECRET_PASSPHRASE: &str = "slipway-manager-secret-key";

const DEFAULT_PUBLIC_ROOT: &str = "/var/www/html";
const DEFAULT_COMPOSER_URL: &str = "https://getcomposer.org/download/latest-stable/composer.phar";
const DEFAULT_NODE_VERSION: &str = "22.16.0";
const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 600;

/// Process-wide configuration, constructed once at startup and passed by
/// reference into each component. No component reads the environment
/// directly.
#[derive(Clone, Debug)]
pub struct Settings {
    /// Root under which every application's working directory lives.
    pub public_root: PathBuf,
    /// Shared cache for downloaded toolchains (composer.phar, Node runtime).
    pub cache_dir: PathBuf,
    pub php_executable: String,
    pub composer_url: String,
    pub node_version: String,
    /// Upper bound for any single external process invocation.
    pub command_timeout: Duration,
    /// `chown -R` target applied during the permission pass, when set.
    pub file_owner: Option<String>,
    pub secret_passphrase: String,
}

impl Default for Settings {
    fn default() -> Self {
        let cache_dir = dirs::cache_dir()
            .unwrap_or_else(env::temp_dir)
            .join("slipway");

        Self {
            public_root: PathBuf::from(DEFAULT_PUBLIC_ROOT),
            cache_dir,
            php_executable: "php".to_owned(),
            composer_url: DEFAULT_COMPOSER_URL.to_owned(),
            node_version: DEFAULT_NODE_VERSION.to_owned(),
            command_timeout: Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS),
            file_owner: None,
            secret_passphrase: DEFAULT_SECRET_PASSPHRASE.to_owned(),
        }
    }
}

impl Settings {
    /// Build settings from the process environment (and `.env`, if present).
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let mut settings = Self::default();

        if let Ok(value) = dotenvy::var("PUBLIC_PATH") {
            settings.public_root = PathBuf::from(value);
        }
        if let Ok(value) = dotenvy::var("SLIPWAY_CACHE_DIR") {
            settings.cache_dir = PathBuf::from(value);
        }
        if let Ok(value) = dotenvy::var("PHP_EXECUTABLE") {
            settings.php_executable = value;
        }
        if let Ok(value) = dotenvy::var("COMPOSER_URL") {
            settings.composer_url = value;
        }
        if let Ok(value) = dotenvy::var("NODE_VERSION") {
            settings.node_version = value;
        }
        if let Ok(value) = dotenvy::var("COMMAND_TIMEOUT_SECS") {
            match value.parse::<u64>() {
                Ok(secs) => settings.command_timeout = Duration::from_secs(secs),
                Err(_) => tracing::warn!("ignoring unparseable COMMAND_TIMEOUT_SECS: {}", value),
            }
        }
        if let Ok(value) = dotenvy::var("FILE_OWNER") {
            settings.file_owner = Some(value);
        }
        if let Ok(value) = dotenvy::var("SLIPWAY_SECRET") {
            settings.secret_passphrase = value;
        }

        settings
    }

    /// The working directory is always a pure function of the hostname,
    /// never independently editable.
    pub fn directory_for_hostname(&self, hostname: &str) -> PathBuf {
        self.public_root.join(hostname)
    }

    /// Stable location of the cached toolchain executables (`node`, `npm`).
    pub fn toolchain_bin_dir(&self) -> PathBuf {
        self.cache_dir.join("bin")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_is_a_pure_function_of_hostname() {
        let settings = Settings {
            public_root: PathBuf::from("/srv/www"),
            ..Settings::default()
        };

        assert_eq!(
            settings.directory_for_hostname("demo.example.com"),
            PathBuf::from("/srv/www/demo.example.com")
        );
        assert_eq!(
            settings.directory_for_hostname("demo.example.com"),
            settings.directory_for_hostname("demo.example.com"),
        );
    }

    #[test]
    fn defaults_are_sensible() {
        let settings = Settings::default();

        assert_eq!(settings.public_root, PathBuf::from("/var/www/html"));
        assert_eq!(settings.php_executable, "php");
        assert_eq!(settings.command_timeout, Duration::from_secs(600));
        assert!(settings.file_owner.is_none());
        assert!(settings.toolchain_bin_dir().ends_with("slipway/bin"));
    }
}
