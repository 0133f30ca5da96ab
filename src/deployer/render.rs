use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use slipway_core::models::{Application, DatabaseRecord};
use slipway_core::secrets::SecretCodec;
use slipway_core::DeployError;
use slipway_core::Settings;

use super::exec::run_command;

/// Expands `%UPPER_SNAKE%` placeholders in an application's config maps and
/// writes the results into the working directory. Unrecognized placeholders
/// are left verbatim so unrelated `%...%` text in templates survives.
pub struct TemplateRenderer<'a> {
    pub settings: &'a Settings,
    pub codec: &'a SecretCodec,
}

impl TemplateRenderer<'_> {
    /// Substitution table for one application. Database placeholders are
    /// only present when a database is linked; the password is decrypted
    /// transiently and never logged.
    fn replacements(
        &self,
        app: &Application,
        database: Option<&DatabaseRecord>,
    ) -> Result<Vec<(&'static str, String)>, DeployError> {
        let mut table = vec![
            ("%APP_NAME%", app.name.clone()),
            ("%APP_URL%", format!("https://{}", app.hostname)),
            ("%APP_ENV%", "production".to_owned()),
        ];

        if let Some(db) = database {
            table.push(("%DB_HOST%", db.host.clone()));
            table.push(("%DB_PORT%", db.port.to_string()));
            table.push(("%DB_NAME%", db.db_name.clone()));
            table.push(("%DB_USER%", db.username.clone()));
            table.push(("%DB_PASS%", self.codec.decrypt(&db.password)?));
            table.push(("%DB_TYPE%", db.kind.dsn_tag().to_owned()));
        }

        Ok(table)
    }

    /// Render every config map in insertion order. Per-file failures are
    /// appended to the log and the loop continues; only a failure to build
    /// the substitution table (an undecryptable database password) is
    /// reported to the caller, and even that is non-fatal per policy.
    #[tracing::instrument(skip_all, fields(app_id = %app.id))]
    pub fn render_config_maps(
        &self,
        app: &Application,
        database: Option<&DatabaseRecord>,
        directory: &Path,
        log: &mut String,
    ) -> Result<(), DeployError> {
        let replacements = self.replacements(app, database)?;

        for entry in &app.config_maps {
            match self.render_one(directory, &entry.path, &entry.template, &replacements) {
                Ok(()) => {
                    log.push_str(&format!("Wrote config file {}\n", entry.path));

                    let present: Vec<&str> = replacements
                        .iter()
                        .map(|(token, _)| *token)
                        .filter(|token| entry.template.contains(token))
                        .collect();

                    if !present.is_empty() {
                        // Audit the original template, not the rendered
                        // output, so secret values stay out of the log.
                        log.push_str(&format!(
                            "Placeholders in {}: {}\n",
                            entry.path,
                            present.join(", ")
                        ));
                    }
                }
                Err(err) => {
                    let err = DeployError::Render(format!("{}: {}", entry.path, err));
                    tracing::warn!("{}", err);
                    log.push_str(&format!("warning: {}\n", err));
                }
            }
        }

        self.normalize_permissions(directory, log);

        Ok(())
    }

    fn render_one(
        &self,
        directory: &Path,
        relative_path: &str,
        template: &str,
        replacements: &[(&'static str, String)],
    ) -> std::io::Result<()> {
        let rendered = render_template(template, replacements);

        let target = directory.join(relative_path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(target, rendered)
    }

    /// Best-effort ownership/permission pass over the whole tree; failures
    /// are logged and never fatal.
    fn normalize_permissions(&self, directory: &Path, log: &mut String) {
        if let Some(owner) = &self.settings.file_owner {
            match run_command(
                "chown",
                &["-R", owner, &directory.to_string_lossy()],
                None,
                &Default::default(),
                self.settings.command_timeout,
            ) {
                Ok(result) if result.success => {}
                Ok(result) => log.push_str(&format!(
                    "warning: chown -R {} failed ({})\n",
                    owner,
                    result.describe_exit()
                )),
                Err(err) => log.push_str(&format!("warning: chown could not be run: {:#}\n", err)),
            }
        }

        if let Err(err) = set_mode_recursively(directory, 0o755) {
            log.push_str(&format!("warning: permission pass incomplete: {}\n", err));
        } else {
            log.push_str("Permissions normalized\n");
        }
    }
}

/// Apply the substitution table; any `%TOKEN%` not in the table stays
/// untouched.
pub fn render_template(template: &str, replacements: &[(&'static str, String)]) -> String {
    replacements
        .iter()
        .fold(template.to_owned(), |text, (token, value)| {
            text.replace(token, value)
        })
}

fn set_mode_recursively(path: &Path, mode: u32) -> std::io::Result<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;

    if path.is_dir() {
        for entry in fs::read_dir(path)? {
            set_mode_recursively(&entry?.path(), mode)?;
        }
    }

    Ok(())
}
