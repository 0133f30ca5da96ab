mod composer;
mod node;

use std::path::Path;

use slipway_core::Settings;

/// Build toolchains the dispatcher knows how to drive. Detection is
/// signature-based on manifest files at the application root.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BuildTool {
    /// Backend dependency manifest (`composer.json`).
    Composer,
    /// Frontend framework manifest (`angular.json`).
    Angular,
}

impl BuildTool {
    pub fn manifest(self) -> &'static str {
        match self {
            BuildTool::Composer => "composer.json",
            BuildTool::Angular => "angular.json",
        }
    }
}

/// Priority order: first matching manifest wins, at most one runner per
/// deployment. Extending dispatch means adding a pair here, nothing else.
const DETECTORS: [BuildTool; 2] = [BuildTool::Composer, BuildTool::Angular];

pub fn detect(app_dir: &Path) -> Option<BuildTool> {
    DETECTORS
        .into_iter()
        .find(|tool| app_dir.join(tool.manifest()).exists())
}

/// Runs the matching build toolchain, if any. Runner failures are folded
/// into the returned log text; the dispatcher never aborts a deployment.
pub struct BuildDispatcher<'a> {
    pub settings: &'a Settings,
}

impl BuildDispatcher<'_> {
    #[tracing::instrument(skip(self), fields(app_dir = %app_dir.display()))]
    pub async fn run(&self, app_dir: &Path) -> String {
        match detect(app_dir) {
            Some(BuildTool::Composer) => composer::run(self.settings, app_dir).await,
            Some(BuildTool::Angular) => node::run(self.settings, app_dir).await,
            None => "no build system detected, skipping build step\n".to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    #[test]
    fn composer_manifest_selects_the_dependency_runner() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("composer.json"), "{}").unwrap();

        assert_eq!(detect(dir.path()), Some(BuildTool::Composer));
    }

    #[test]
    fn angular_manifest_selects_the_frontend_runner() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("angular.json"), "{}").unwrap();

        assert_eq!(detect(dir.path()), Some(BuildTool::Angular));
    }

    #[test]
    fn backend_manifest_wins_when_both_are_present() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("composer.json"), "{}").unwrap();
        fs::write(dir.path().join("angular.json"), "{}").unwrap();

        assert_eq!(detect(dir.path()), Some(BuildTool::Composer));
    }

    #[test]
    fn no_manifest_means_no_runner() {
        let dir = TempDir::new().unwrap();

        assert_eq!(detect(dir.path()), None);
    }

    #[tokio::test]
    async fn dispatch_without_manifests_is_a_logged_noop() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::default();
        let dispatcher = BuildDispatcher {
            settings: &settings,
        };

        let log = dispatcher.run(dir.path()).await;
        assert!(log.contains("no build system detected"));
    }
}
