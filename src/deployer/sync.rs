use std::collections::HashMap;
use std::fs;
use std::path::Path;

use slipway_core::Settings;

use super::exec::run_command;

/// Result of one synchronization pass. `transcript` is the verbatim,
/// ordered output of every git invocation (clone/fetch, reset, pull,
/// status) for forensic reproducibility.
#[derive(Debug)]
pub struct SyncOutcome {
    pub ok: bool,
    pub transcript: String,
}

/// Clones a fresh working copy or forcibly reconciles an existing one to
/// the remote's current state. Local modifications are always discarded;
/// this converges to the remote, it never merges.
pub struct RepoSynchronizer<'a> {
    pub settings: &'a Settings,
}

impl RepoSynchronizer<'_> {
    #[tracing::instrument(skip(self, overlay), fields(directory = %directory.display()))]
    pub fn sync(
        &self,
        directory: &Path,
        repo_url: &str,
        overlay: &HashMap<String, String>,
    ) -> SyncOutcome {
        let mut transcript = String::new();

        let ok = if directory.join(".git").exists() {
            self.converge(directory, overlay, &mut transcript)
        } else {
            self.clone(directory, repo_url, overlay, &mut transcript)
        };

        SyncOutcome { ok, transcript }
    }

    fn clone(
        &self,
        directory: &Path,
        repo_url: &str,
        overlay: &HashMap<String, String>,
        transcript: &mut String,
    ) -> bool {
        if !directory.exists() {
            if let Err(err) = fs::create_dir_all(directory) {
                transcript.push_str(&format!(
                    "failed to create directory {}: {}\n",
                    directory.display(),
                    err
                ));
                return false;
            }
            transcript.push_str(&format!("Created directory {}\n", directory.display()));
        }

        transcript.push_str("Cloning repository:\n");
        self.git(
            &["clone", repo_url, &directory.to_string_lossy()],
            None,
            overlay,
            transcript,
        )
    }

    fn converge(
        &self,
        directory: &Path,
        overlay: &HashMap<String, String>,
        transcript: &mut String,
    ) -> bool {
        transcript.push_str("Resetting local changes and updating repository:\n");

        let steps: [&[&str]; 3] = [
            &["fetch", "origin"],
            &["reset", "--hard", "origin/HEAD"],
            &["pull", "origin"],
        ];

        for args in steps {
            if !self.git(args, Some(directory), overlay, transcript) {
                return false;
            }
        }

        match run_command(
            "git",
            &["status", "--porcelain"],
            Some(directory),
            overlay,
            self.settings.command_timeout,
        ) {
            Ok(status) if status.success && status.output.trim().is_empty() => {
                transcript.push_str("Working tree clean and up to date\n");
            }
            Ok(status) => {
                // Not fatal: the deployment proceeds on a dirty tree.
                transcript.push_str(&format!(
                    "warning: working tree not clean after sync:\n{}\n",
                    status.output
                ));
            }
            Err(err) => {
                transcript.push_str(&format!("warning: git status failed: {:#}\n", err));
            }
        }

        true
    }

    fn git(
        &self,
        args: &[&str],
        cwd: Option<&Path>,
        overlay: &HashMap<String, String>,
        transcript: &mut String,
    ) -> bool {
        match run_command("git", args, cwd, overlay, self.settings.command_timeout) {
            Ok(result) => {
                transcript.push_str(&result.output);
                if !result.success {
                    transcript.push_str(&format!(
                        "git {} failed ({})\n",
                        args.first().unwrap_or(&"?"),
                        result.describe_exit()
                    ));
                }
                result.success
            }
            Err(err) => {
                transcript.push_str(&format!("git {:?} could not be run: {:#}\n", args, err));
                false
            }
        }
    }
}
