use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use slipway_core::Settings;

use crate::deployer::exec::run_command;

use super::composer::download_to;

/// Frontend build runner: provision a pinned Node.js runtime in the shared
/// cache, install dependencies, produce the production bundle, and publish
/// it as the application's `public/` directory. Failures are folded into
/// the returned log; they never abort the deployment.
pub(super) async fn run(settings: &Settings, app_dir: &Path) -> String {
    let mut log = String::new();

    if let Err(err) = ensure_node(settings, &mut log).await {
        log.push_str(&format!("error: node runtime unavailable: {:#}\n", err));
        return log;
    }

    // Toolchains resolve node/npm through the cache's stable bin names.
    let bin_dir = settings.toolchain_bin_dir();
    let mut overlay = HashMap::new();
    overlay.insert(
        "PATH".to_owned(),
        format!(
            "{}:{}",
            bin_dir.display(),
            env::var("PATH").unwrap_or_default()
        ),
    );

    log.push_str("Installing dependencies with npm:\n");
    match run_command(
        "npm",
        &["install", "--no-audit", "--no-fund"],
        Some(app_dir),
        &overlay,
        settings.command_timeout,
    ) {
        Ok(install) => {
            log.push_str(&install.output);
            if !install.success {
                log.push_str(&format!(
                    "error: npm install failed ({})\n",
                    install.describe_exit()
                ));
            }
        }
        Err(err) => {
            log.push_str(&format!("error: npm could not be run: {:#}\n", err));
            return log;
        }
    }

    log.push_str("Building production bundle:\n");
    match run_command(
        "npm",
        &["exec", "ng", "build", "--configuration=production"],
        Some(app_dir),
        &overlay,
        settings.command_timeout,
    ) {
        Ok(build) => {
            log.push_str(&build.output);
            if !build.success {
                log.push_str(&format!(
                    "error: production build failed ({}), keeping previous public/ contents\n",
                    build.describe_exit()
                ));
                return log;
            }
        }
        Err(err) => {
            log.push_str(&format!("error: ng build could not be run: {:#}\n", err));
            return log;
        }
    }

    let output_path = match output_path_from_manifest(app_dir) {
        Ok(path) => path,
        Err(err) => {
            log.push_str(&format!(
                "error: could not determine build output directory: {:#}\n",
                err
            ));
            return log;
        }
    };

    if let Err(err) = publish_output(app_dir, &output_path, &mut log) {
        log.push_str(&format!("error: publishing build output failed: {:#}\n", err));
        return log;
    }

    // Reclaim space: the dependency cache and the raw bundle are only
    // needed during the build.
    for leftover in ["node_modules", output_path.as_str()] {
        let _ = fs::remove_dir_all(app_dir.join(leftover));
    }
    log.push_str("Removed node_modules and raw build output\n");

    log
}

/// The first declared project's configured output path from the frontend
/// manifest. Document order matters, which is why the manifest is parsed
/// with order-preserving maps.
fn output_path_from_manifest(app_dir: &Path) -> anyhow::Result<String> {
    let manifest = fs::read_to_string(app_dir.join("angular.json")).context("read angular.json")?;
    let manifest: serde_json::Value =
        serde_json::from_str(&manifest).context("parse angular.json")?;

    let projects = manifest
        .get("projects")
        .and_then(serde_json::Value::as_object)
        .ok_or_else(|| anyhow::anyhow!("angular.json declares no projects"))?;

    let (name, project) = projects
        .iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("angular.json declares no projects"))?;

    project
        .pointer("/architect/build/options/outputPath")
        .and_then(serde_json::Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| anyhow::anyhow!("project {} declares no output path", name))
}

/// Replace `public/` with the build output. A bundle that nests its entry
/// page under `browser/` is published from that nested directory.
fn publish_output(app_dir: &Path, output_path: &str, log: &mut String) -> anyhow::Result<()> {
    let mut dist = app_dir.join(output_path);
    if dist.join("browser").join("index.html").exists() {
        dist = dist.join("browser");
    }

    if !dist.exists() {
        anyhow::bail!("build output directory {} does not exist", dist.display());
    }

    let public = app_dir.join("public");
    if public.exists() {
        fs::remove_dir_all(&public)
            .with_context(|| format!("clear previous {}", public.display()))?;
    }
    fs::create_dir_all(&public).with_context(|| format!("create {}", public.display()))?;
    copy_tree(&dist, &public)?;

    log.push_str("Build output published to public/\n");
    Ok(())
}

/// Pinned Node.js runtime behind stable `bin/node` and `bin/npm` names in
/// the shared cache. Download and extraction land in uniquely-named staging
/// paths and are renamed into place, so concurrent first-time downloads
/// cannot corrupt each other.
async fn ensure_node(settings: &Settings, log: &mut String) -> anyhow::Result<()> {
    let bin_dir = settings.toolchain_bin_dir();
    let node = bin_dir.join("node");
    let npm = bin_dir.join("npm");

    if node.exists() && npm.exists() {
        return Ok(());
    }

    fs::create_dir_all(&bin_dir)
        .with_context(|| format!("create toolchain cache {}", bin_dir.display()))?;

    let (release, url) = node_release(&settings.node_version)?;
    let release_dir = bin_dir.join(&release);

    if !release_dir.exists() {
        log.push_str(&format!("Downloading Node.js {}...\n", settings.node_version));

        let archive = bin_dir.join(format!("{}.tar.xz", release));
        download_to(&url, &archive).await?;

        let staging = bin_dir.join(format!(".extract-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&staging).context("create extraction staging directory")?;

        let tar = run_command(
            "tar",
            &[
                "-xf",
                &archive.to_string_lossy(),
                "-C",
                &staging.to_string_lossy(),
            ],
            None,
            &HashMap::new(),
            settings.command_timeout,
        )
        .context("run tar")?;

        if !tar.success {
            let _ = fs::remove_dir_all(&staging);
            let _ = fs::remove_file(&archive);
            anyhow::bail!("tar extraction failed ({}): {}", tar.describe_exit(), tar.output);
        }

        // A concurrent deployment may have won the race; its finished
        // extraction is just as good.
        let extracted = staging.join(&release);
        if !release_dir.exists() {
            fs::rename(&extracted, &release_dir)
                .with_context(|| format!("move runtime into place at {}", release_dir.display()))?;
        }

        let _ = fs::remove_dir_all(&staging);
        let _ = fs::remove_file(&archive);
    }

    for (link, target) in [(&node, "node"), (&npm, "npm")] {
        let _ = fs::remove_file(link);
        std::os::unix::fs::symlink(release_dir.join("bin").join(target), link)
            .with_context(|| format!("link {}", link.display()))?;
    }

    log.push_str("Node and npm installed into shared cache\n");
    Ok(())
}

/// Platform/architecture-matched release name and download URL.
fn node_release(version: &str) -> anyhow::Result<(String, String)> {
    let platform = match env::consts::OS {
        "linux" => "linux",
        "macos" => "darwin",
        other => anyhow::bail!("unsupported platform for the node runtime: {}", other),
    };

    let arch = match env::consts::ARCH {
        "x86_64" => "x64",
        "aarch64" => "arm64",
        "arm" => "armv7l",
        other => anyhow::bail!("unsupported architecture for the node runtime: {}", other),
    };

    let release = format!("node-v{}-{}-{}", version, platform, arch);
    let url = format!("https://nodejs.org/dist/v{}/{}.tar.xz", version, release);

    Ok((release, url))
}

fn copy_tree(src: &Path, dst: &Path) -> anyhow::Result<()> {
    for entry in fs::read_dir(src).with_context(|| format!("read {}", src.display()))? {
        let entry = entry?;
        let target = dst.join(entry.file_name());

        if entry.path().is_dir() {
            fs::create_dir_all(&target)?;
            copy_tree(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)
                .with_context(|| format!("copy {}", entry.path().display()))?;
        }
    }

    Ok(())
}
