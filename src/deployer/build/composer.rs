use std::collections::HashMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use anyhow::Context;
use slipway_core::Settings;

use crate::deployer::exec::run_command;

const INSTALL_ARGS: [&str; 4] = [
    "install",
    "--no-dev",
    "--optimize-autoloader",
    "--no-interaction",
];

/// Dependency-manager runner: install backend dependencies in production
/// mode with a pinned, cached composer.phar. Failures are folded into the
/// returned log; they never abort the deployment.
pub(super) async fn run(settings: &Settings, app_dir: &Path) -> String {
    let mut log = String::new();

    // Interpreter preflight; without a working PHP there is nothing to do.
    match run_command(
        &settings.php_executable,
        &["-v"],
        None,
        &HashMap::new(),
        settings.command_timeout,
    ) {
        Ok(result) if result.success && result.output.contains("PHP") => {
            let version = result.output.lines().next().unwrap_or_default();
            log.push_str(&format!("Using {}\n", version.trim()));
        }
        Ok(result) => {
            log.push_str(&format!(
                "error: php interpreter not usable at {} ({})\n",
                settings.php_executable,
                result.describe_exit()
            ));
            return log;
        }
        Err(err) => {
            log.push_str(&format!(
                "error: php interpreter not found at {}: {:#}\n",
                settings.php_executable, err
            ));
            return log;
        }
    }

    let result = match ensure_composer(settings, &mut log).await {
        Some(phar) => {
            log.push_str("Installing dependencies with cached composer:\n");
            let phar = phar.to_string_lossy().into_owned();
            let mut args = vec![phar.as_str()];
            args.extend(INSTALL_ARGS);

            run_command(
                &settings.php_executable,
                &args,
                Some(app_dir),
                &HashMap::new(),
                settings.command_timeout,
            )
        }
        None => {
            // Download failed; the system composer is the last resort.
            log.push_str("Installing dependencies with system composer:\n");
            run_command(
                "composer",
                &INSTALL_ARGS,
                Some(app_dir),
                &HashMap::new(),
                settings.command_timeout,
            )
        }
    };

    match result {
        Ok(install) => {
            log.push_str(&install.output);
            if !install.success {
                log.push_str(&format!(
                    "error: composer install failed ({})\n",
                    install.describe_exit()
                ));
            }
        }
        Err(err) => log.push_str(&format!("error: composer could not be run: {:#}\n", err)),
    }

    log
}

/// Shared-cache composer.phar, downloaded once and reused across
/// deployments. Returns `None` when neither cached nor downloadable.
async fn ensure_composer(settings: &Settings, log: &mut String) -> Option<PathBuf> {
    let phar = settings.cache_dir.join("composer.phar");
    if phar.exists() {
        return Some(phar);
    }

    log.push_str("Downloading composer...\n");
    match download_to(&settings.composer_url, &phar).await {
        Ok(()) => {
            log.push_str("Composer downloaded into shared cache\n");
            Some(phar)
        }
        Err(err) => {
            log.push_str(&format!("error: composer download failed: {:#}\n", err));
            None
        }
    }
}

/// Fetch `url` into `dest` atomically: write a uniquely-named sibling first
/// and rename into place, so two concurrent first-time downloads cannot
/// corrupt each other's output.
pub(super) async fn download_to(url: &str, dest: &Path) -> anyhow::Result<()> {
    let parent = dest
        .parent()
        .ok_or_else(|| anyhow::anyhow!("download target has no parent directory"))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("create cache directory {}", parent.display()))?;

    let response = reqwest::get(url)
        .await
        .with_context(|| format!("request {}", url))?
        .error_for_status()
        .with_context(|| format!("download {}", url))?;
    let bytes = response.bytes().await.context("read download body")?;

    let staging = parent.join(format!(
        ".{}.part-{}",
        dest.file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "download".to_owned()),
        uuid::Uuid::new_v4()
    ));

    fs::write(&staging, &bytes)
        .with_context(|| format!("write staging file {}", staging.display()))?;
    fs::set_permissions(&staging, fs::Permissions::from_mode(0o755))
        .context("mark downloaded artifact executable")?;

    if let Err(err) = fs::rename(&staging, dest) {
        let _ = fs::remove_file(&staging);
        return Err(err).with_context(|| format!("move download into place at {}", dest.display()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[tokio::test]
    async fn cached_phar_is_reused_without_download() {
        let cache = TempDir::new().unwrap();
        fs::write(cache.path().join("composer.phar"), "fake phar").unwrap();

        let settings = Settings {
            cache_dir: cache.path().to_path_buf(),
            // An unroutable URL proves no download is attempted.
            composer_url: "http://127.0.0.1:1/composer.phar".to_owned(),
            ..Settings::default()
        };

        let mut log = String::new();
        let phar = ensure_composer(&settings, &mut log).await;

        assert_eq!(phar, Some(cache.path().join("composer.phar")));
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn failed_download_reports_and_returns_none() {
        let cache = TempDir::new().unwrap();
        let settings = Settings {
            cache_dir: cache.path().to_path_buf(),
            composer_url: "http://127.0.0.1:1/composer.phar".to_owned(),
            ..Settings::default()
        };

        let mut log = String::new();
        let phar = ensure_composer(&settings, &mut log).await;

        assert!(phar.is_none());
        assert!(log.contains("composer download failed"));
    }

    #[tokio::test]
    async fn unusable_interpreter_skips_the_install() {
        let app_dir = TempDir::new().unwrap();
        let settings = Settings {
            php_executable: "definitely-not-php".to_owned(),
            ..Settings::default()
        };

        let log = run(&settings, app_dir.path()).await;
        assert!(log.contains("php interpreter not found"));
        assert!(!log.contains("Installing dependencies"));
    }
}
