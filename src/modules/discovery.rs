//! Discovery pass: scan module directories and fill the descriptor tables.
//!
//! Each candidate file is compiled and its top level evaluated in a probe
//! engine, just far enough to read the `category`, `name` and optional
//! `description` fields of the returned map. No lifecycle hook runs.
//! Broken files are skipped and reported; they never abort the pass.

use rhai::Engine;
use std::fs;
use std::path::{Path, PathBuf};

use super::{ModuleCategory, ModuleDescriptor, ModuleTables};
use crate::config::ScriptingConfig;
use crate::error::{DriverError, DriverResult};
use crate::scripting::{create_sandboxed_engine, read_definition};

/// Outcome of a discovery pass.
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    /// Modules added to the tables, in scan order
    pub discovered: Vec<ModuleDescriptor>,
    /// Files or directories that were skipped, with the reason
    pub errors: Vec<DriverError>,
}

impl DiscoveryReport {
    /// True when every candidate file was accepted
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Scan `dirs` and build fresh descriptor tables.
///
/// One pass covers every directory given; the returned tables are meant to
/// replace the previous ones wholesale. Within a category the first file (in
/// directory order, then sorted path order) to claim a name wins.
pub fn scan_dirs<I, P>(dirs: I, config: &ScriptingConfig) -> (ModuleTables, DiscoveryReport)
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    let engine = create_sandboxed_engine(config, "discovery");
    let extension = config.extension.trim_start_matches('.').to_lowercase();

    let mut tables = ModuleTables::new();
    let mut report = DiscoveryReport::default();

    for dir in dirs {
        let dir = dir.as_ref();
        let files = match module_files(dir, &extension) {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "Skipping module directory");
                report.errors.push(e);
                continue;
            }
        };

        for path in files {
            let desc = match probe_module(&engine, &path) {
                Ok(desc) => desc,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping module");
                    report.errors.push(e);
                    continue;
                }
            };

            let category = desc.category;
            match tables.table_mut(category).insert(desc.clone()) {
                Ok(()) => {
                    tracing::info!(
                        module = %desc.name,
                        category = %category,
                        path = %desc.path.display(),
                        "Discovered module"
                    );
                    report.discovered.push(desc);
                }
                Err(dup) => {
                    let existing = tables
                        .find(category, &dup.name)
                        .map(|d| d.path.display().to_string())
                        .unwrap_or_default();
                    tracing::warn!(
                        module = %dup.name,
                        category = %category,
                        path = %dup.path.display(),
                        existing = %existing,
                        "Duplicate module name; keeping the first"
                    );
                    report.errors.push(DriverError::Parse {
                        path: dup.path,
                        message: format!(
                            "duplicate {} module name '{}' (already loaded from {})",
                            category, dup.name, existing
                        ),
                    });
                }
            }
        }
    }

    (tables, report)
}

/// Sorted module files in `dir` with the given (lowercase) extension.
///
/// A missing directory yields no files; a path that is not a directory is an
/// error.
fn module_files(dir: &Path, extension: &str) -> DriverResult<Vec<PathBuf>> {
    if !dir.exists() {
        tracing::debug!(dir = %dir.display(), "Module directory does not exist");
        return Ok(Vec::new());
    }
    if !dir.is_dir() {
        return Err(DriverError::Parse {
            path: dir.to_path_buf(),
            message: "not a directory".to_string(),
        });
    }

    let dir = fs::canonicalize(dir).unwrap_or_else(|_| dir.to_path_buf());
    let mut files = Vec::new();
    for entry in fs::read_dir(&dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let matches = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(extension));
        if matches {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Read a module's declared category, name and description.
pub fn probe_module(engine: &Engine, path: &Path) -> DriverResult<ModuleDescriptor> {
    let (_, table) = read_definition(engine, path)?;

    let parse_error = |message: String| DriverError::Parse {
        path: path.to_path_buf(),
        message,
    };

    let category: ModuleCategory = table
        .get("category")
        .and_then(|v| v.clone().into_string().ok())
        .ok_or_else(|| parse_error("missing string field 'category'".to_string()))?
        .parse()
        .map_err(parse_error)?;

    let name = table
        .get("name")
        .and_then(|v| v.clone().into_string().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| parse_error("missing string field 'name'".to_string()))?;

    let description = table
        .get("description")
        .and_then(|v| v.clone().into_string().ok())
        .unwrap_or_default();

    Ok(ModuleDescriptor {
        name,
        description,
        category,
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, file: &str, body: &str) {
        fs::write(dir.join(file), body).unwrap();
    }

    #[test]
    fn classifies_by_declared_category() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "pad.rhai",
            r#"#{ category: "Input", name: "Pad", description: "Dance pad" }"#,
        );
        write(dir.path(), "strobe.rhai", r#"#{ category: "lights", name: "Strobe" }"#);
        write(dir.path(), "notes.txt", r#"#{ category: "lights", name: "Ignored" }"#);

        let (tables, report) = scan_dirs([dir.path()], &ScriptingConfig::default());
        assert!(report.is_clean(), "{:?}", report.errors);
        assert_eq!(tables.table(ModuleCategory::Input).names(), ["Pad"]);
        assert_eq!(tables.table(ModuleCategory::Lights).names(), ["Strobe"]);
        assert!(tables.table(ModuleCategory::Peripheral).is_empty());

        let pad = tables.find(ModuleCategory::Input, "pad").unwrap();
        assert_eq!(pad.description, "Dance pad");
        assert!(pad.path.is_absolute());
    }

    #[test]
    fn malformed_modules_are_reported_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a_syntax.rhai", "#{ category: ");
        write(dir.path(), "b_category.rhai", r#"#{ category: "gamepad", name: "X" }"#);
        write(dir.path(), "c_noname.rhai", r#"#{ category: "input" }"#);
        write(dir.path(), "d_ok.rhai", r#"#{ category: "peripheral", name: "Panel" }"#);

        let (tables, report) = scan_dirs([dir.path()], &ScriptingConfig::default());
        assert_eq!(report.errors.len(), 3);
        assert!(report
            .errors
            .iter()
            .all(|e| matches!(e, DriverError::Parse { .. })));
        assert_eq!(tables.len(), 1);
        assert_eq!(report.discovered.len(), 1);
    }

    #[test]
    fn duplicate_names_keep_first_file() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.rhai", r#"#{ category: "input", name: "Pad" }"#);
        write(dir.path(), "b.rhai", r#"#{ category: "input", name: "PAD" }"#);

        let (tables, report) = scan_dirs([dir.path()], &ScriptingConfig::default());
        assert_eq!(tables.len(), 1);
        assert_eq!(report.errors.len(), 1);
        let kept = tables.find(ModuleCategory::Input, "pad").unwrap();
        assert!(kept.path.ends_with("a.rhai"));
    }

    #[test]
    fn missing_directory_is_skipped() {
        let (tables, report) = scan_dirs(
            [Path::new("/nonexistent/modules")],
            &ScriptingConfig::default(),
        );
        assert!(tables.is_empty());
        assert!(report.is_clean());
    }

    #[test]
    fn file_instead_of_directory_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.rhai", r#"#{ category: "input", name: "Pad" }"#);
        let (_, report) = scan_dirs([dir.path().join("a.rhai")], &ScriptingConfig::default());
        assert_eq!(report.errors.len(), 1);
    }

    #[test]
    fn custom_extension() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "joy1.mod", r#"#{ category: "input", name: "Joystick1" }"#);
        write(dir.path(), "joy2.rhai", r#"#{ category: "input", name: "Joystick2" }"#);

        let config = ScriptingConfig {
            extension: ".mod".to_string(),
            ..Default::default()
        };
        let (tables, _) = scan_dirs([dir.path()], &config);
        assert_eq!(tables.table(ModuleCategory::Input).names(), ["Joystick1"]);
    }
}
