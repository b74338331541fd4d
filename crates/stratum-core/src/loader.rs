//! Discovers migration files on disk and turns them into [`Migration`]s.
//!
//! File names follow `<version>_<snake_name>.<ext>`. YAML files describe
//! operations declaratively; SQL files carry `-- up` / `-- down` sections.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use chrono::Utc;
use regex::Regex;
use serde::Deserialize;
use stratum_common::{Error, Result, Version};
use tracing::{debug, info};

use crate::migration::{Migration, MigrationDefinition, MigrationSet, Predicate, SchemaFn};
use crate::operation::Operation;
use crate::recorder::Recorder;

static FILE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)_([a-z0-9][a-z0-9_]*)\.(yml|yaml|sql)$").expect("static regex is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TemplateFormat {
    #[default]
    Yaml,
    Sql,
}

impl TemplateFormat {
    fn extension(self) -> &'static str {
        match self {
            TemplateFormat::Yaml => "yml",
            TemplateFormat::Sql => "sql",
        }
    }
}

impl std::str::FromStr for TemplateFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "yaml" | "yml" => Ok(TemplateFormat::Yaml),
            "sql" => Ok(TemplateFormat::Sql),
            other => Err(Error::Config(format!(
                "unknown migration format {other:?} (expected yaml or sql)"
            ))),
        }
    }
}

/// On-disk shape of a YAML migration.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MigrationFile {
    #[serde(default)]
    change: Option<Vec<Operation>>,
    #[serde(default)]
    up: Option<Vec<Operation>>,
    #[serde(default)]
    down: Option<Vec<Operation>>,
    #[serde(default = "default_should_execute")]
    should_execute: bool,
}

fn default_should_execute() -> bool {
    true
}

pub struct MigrationLoader {
    paths: Vec<PathBuf>,
}

impl MigrationLoader {
    pub fn new(paths: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Loads every migration under the configured paths. Duplicate versions
    /// across files are a configuration error.
    pub fn load(&self) -> Result<MigrationSet> {
        let mut migrations = Vec::new();
        for dir in &self.paths {
            if !dir.exists() {
                debug!("migration directory {} does not exist, skipping", dir.display());
                continue;
            }
            for path in sorted_entries(dir)? {
                let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                if !FILE_NAME.is_match(file_name) {
                    debug!("ignoring {}", path.display());
                    continue;
                }
                migrations.push(load_file(&path)?);
            }
        }
        info!("discovered {} migration file(s)", migrations.len());
        MigrationSet::new(migrations)
    }

    /// Writes a new timestamped migration template into `dir` and returns
    /// its path.
    pub fn create(dir: &Path, name: &str, format: TemplateFormat) -> Result<PathBuf> {
        let snake = to_snake_case(name);
        if snake.is_empty() {
            return Err(Error::Config(format!("invalid migration name {name:?}")));
        }
        fs::create_dir_all(dir)?;

        let version = Utc::now().format("%Y%m%d%H%M%S").to_string();
        let path = dir.join(format!("{version}_{snake}.{}", format.extension()));
        if path.exists() {
            return Err(Error::Config(format!("{} already exists", path.display())));
        }

        let body = match format {
            TemplateFormat::Yaml => format!(
                "# {}\n# Operations listed under `change` are reversed automatically on rollback.\n# Use `up` and `down` instead for changes that cannot be inverted.\nchange: []\n",
                to_camel_case(&snake)
            ),
            TemplateFormat::Sql => format!("-- {}\n\n-- up\n\n\n-- down\n\n", to_camel_case(&snake)),
        };
        fs::write(&path, body)?;
        info!("created {}", path.display());
        Ok(path)
    }
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

fn load_file(path: &Path) -> Result<Migration> {
    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    let caps = FILE_NAME
        .captures(file_name)
        .ok_or_else(|| Error::Config(format!("invalid migration file name {file_name}")))?;
    let version: Version = caps[1].parse()?;
    let name = to_camel_case(&caps[2]);
    let content = fs::read_to_string(path)?;

    let definition = if &caps[3] == "sql" {
        sql_definition(version, name, &content)
    } else {
        yaml_definition(version, name, &content).map_err(|e| in_file(path, e))?
    };
    Migration::try_from(definition).map_err(|e| in_file(path, e))
}

/// Prefixes a configuration error with the file it came from.
fn in_file(path: &Path, err: Error) -> Error {
    match err {
        Error::Config(msg) => Error::Config(format!("{}: {msg}", path.display())),
        other => other,
    }
}

fn yaml_definition(version: Version, name: String, content: &str) -> Result<MigrationDefinition> {
    let file: MigrationFile = serde_yaml::from_str(content)
        .map_err(|e| Error::Config(format!("invalid migration yaml: {e}")))?;
    let authored = [&file.change, &file.up, &file.down];
    for op in authored.into_iter().flatten().flatten() {
        reject_captured_definition(op)?;
    }
    let should_execute = if file.should_execute {
        None
    } else {
        Some(Arc::new(|| false) as Predicate)
    };
    Ok(MigrationDefinition {
        version,
        name,
        change: file.change.map(replaying),
        up: file.up.map(replaying),
        down: file.down.map(replaying),
        should_execute,
    })
}

/// A captured definition is what makes a drop invertible. Only the
/// inversion engine may attach one; authored drops stay irreversible.
fn reject_captured_definition(op: &Operation) -> Result<()> {
    match op {
        Operation::DropTable {
            definition: Some(_),
            ..
        }
        | Operation::DropColumn {
            definition: Some(_),
            ..
        } => Err(Error::Config(format!(
            "{op} may not declare a definition; authored drops are irreversible"
        ))),
        _ => Ok(()),
    }
}

fn sql_definition(version: Version, name: String, content: &str) -> MigrationDefinition {
    let (up, down) = split_sql_sections(content);
    MigrationDefinition {
        version,
        name,
        up: Some(raw_sql(up)),
        down: Some(raw_sql(down)),
        ..Default::default()
    }
}

fn replaying(operations: Vec<Operation>) -> SchemaFn {
    Arc::new(move |recorder: &mut Recorder| {
        for op in &operations {
            recorder.record(op.clone());
        }
    })
}

fn raw_sql(sql: String) -> SchemaFn {
    Arc::new(move |recorder: &mut Recorder| {
        if !sql.is_empty() {
            recorder.execute(sql.clone());
        }
    })
}

/// Splits a SQL migration on its `-- up` and `-- down` marker lines. Text
/// before the first marker is ignored.
fn split_sql_sections(content: &str) -> (String, String) {
    #[derive(PartialEq)]
    enum Section {
        Preamble,
        Up,
        Down,
    }

    let mut section = Section::Preamble;
    let mut up = Vec::new();
    let mut down = Vec::new();
    for line in content.lines() {
        match line.trim().to_ascii_lowercase().as_str() {
            "-- up" => section = Section::Up,
            "-- down" => section = Section::Down,
            _ => match section {
                Section::Up => up.push(line),
                Section::Down => down.push(line),
                Section::Preamble => {}
            },
        }
    }
    (up.join("\n").trim().to_string(), down.join("\n").trim().to_string())
}

fn to_camel_case(snake: &str) -> String {
    snake
        .split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

fn to_snake_case(name: &str) -> String {
    let mut out = String::new();
    let mut prev_lower = false;
    for ch in name.chars() {
        if ch.is_ascii_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
            prev_lower = false;
        } else if ch.is_ascii_alphanumeric() {
            out.push(ch);
            prev_lower = ch.is_ascii_lowercase() || ch.is_ascii_digit();
        } else if !out.is_empty() && !out.ends_with('_') {
            out.push('_');
            prev_lower = false;
        }
    }
    out.trim_matches('_').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::{MigrationDirection, MigrationMode};
    use crate::operation::OperationKind;

    fn write(dir: &Path, name: &str, body: &str) {
        fs::write(dir.join(name), body).unwrap();
    }

    #[test]
    fn loads_yaml_and_sql_files_in_version_order() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "2_add_c_to_t1.yml",
            "change:\n  - op: add_column\n    table: t1\n    column: { name: c, type: TEXT }\n",
        );
        write(
            dir.path(),
            "1_create_t1.yaml",
            "change:\n  - op: create_table\n    name: t1\n    columns:\n      - { name: id, type: INTEGER }\n",
        );
        write(
            dir.path(),
            "3_backfill.sql",
            "-- backfill c\n-- up\nUPDATE t1 SET c = 'x';\n-- down\nUPDATE t1 SET c = NULL;\n",
        );
        write(dir.path(), "README.md", "not a migration");

        let set = MigrationLoader::new([dir.path()]).load().unwrap();
        let names: Vec<&str> = set.iter().map(|m| m.name()).collect();
        assert_eq!(names, vec!["CreateT1", "AddCToT1", "Backfill"]);

        let backfill = set.get(Version::new(3)).unwrap();
        assert_eq!(backfill.mode(), MigrationMode::UpDown);
        assert_eq!(
            backfill.plan(MigrationDirection::Down).unwrap(),
            vec![Operation::ExecuteRawSql {
                sql: "UPDATE t1 SET c = NULL;".into()
            }]
        );

        let add = set.get(Version::new(2)).unwrap();
        let down = add.plan(MigrationDirection::Down).unwrap();
        assert_eq!(down[0].kind(), OperationKind::DropColumn);
    }

    #[test]
    fn yaml_should_execute_false_becomes_a_predicate() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "7_optional.yml",
            "should_execute: false\nup:\n  - op: execute\n    sql: SELECT 1\ndown: []\n",
        );
        let set = MigrationLoader::new([dir.path()]).load().unwrap();
        let m = set.get(Version::new(7)).unwrap();
        assert!(!m.should_execute());
        assert_eq!(m.mode(), MigrationMode::UpDown);
    }

    #[test]
    fn yaml_with_both_modes_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "1_mixed.yml", "change: []\nup: []\ndown: []\n");
        let err = MigrationLoader::new([dir.path()]).load().unwrap_err();
        assert!(matches!(err, Error::Config(ref msg) if msg.contains("1_mixed.yml")));
    }

    #[test]
    fn errors_name_the_file_once() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "1_empty.yml", "should_execute: true\n");
        let err = MigrationLoader::new([dir.path()]).load().unwrap_err();
        let text = err.to_string();
        assert!(text.contains("1_empty.yml"), "{text}");
        assert_eq!(text.matches("configuration error").count(), 1, "{text}");
    }

    #[test]
    fn authored_drops_cannot_carry_a_definition() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "4_drop_email.yml",
            "change:\n  - op: drop_column\n    table: users\n    column: email\n    definition: { name: email, type: TEXT }\n",
        );
        let err = MigrationLoader::new([dir.path()]).load().unwrap_err();
        assert!(
            matches!(err, Error::Config(ref msg) if msg.contains("4_drop_email.yml") && msg.contains("drop column email from users")),
            "{err}"
        );

        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "5_drop_legacy.yml",
            "down:\n  - op: drop_table\n    name: legacy\n    definition:\n      name: legacy\n      columns:\n        - { name: id, type: INTEGER }\nup: []\n",
        );
        assert!(matches!(
            MigrationLoader::new([dir.path()]).load(),
            Err(Error::Config(ref msg)) if msg.contains("drop table legacy")
        ));
    }

    #[test]
    fn authored_drops_in_change_are_irreversible() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "4_drop_legacy.yml",
            "change:\n  - op: drop_column\n    table: users\n    column: email\n  - op: drop_table\n    name: legacy\n",
        );
        let set = MigrationLoader::new([dir.path()]).load().unwrap();
        let m = set.get(Version::new(4)).unwrap();
        assert_eq!(m.plan(MigrationDirection::Up).unwrap().len(), 2);
        assert!(matches!(
            m.plan(MigrationDirection::Down),
            Err(Error::IrreversibleOperation { position: 1, .. })
        ));
    }

    #[test]
    fn unknown_yaml_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "1_typo.yml", "chnage: []\n");
        assert!(matches!(
            MigrationLoader::new([dir.path()]).load(),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn duplicate_versions_across_directories_fail() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        write(a.path(), "5_one.sql", "-- up\nSELECT 1;\n-- down\nSELECT 2;\n");
        write(b.path(), "05_two.sql", "-- up\nSELECT 1;\n-- down\nSELECT 2;\n");
        let err = MigrationLoader::new([a.path(), b.path()]).load().unwrap_err();
        assert!(err.to_string().contains("duplicate migration version 5"));
    }

    #[test]
    fn missing_directory_yields_empty_set() {
        let dir = tempfile::tempdir().unwrap();
        let set = MigrationLoader::new([dir.path().join("nope")]).load().unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn create_writes_loadable_templates() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = MigrationLoader::create(dir.path(), "AddUsersTable", TemplateFormat::Yaml).unwrap();
        let file_name = yaml.file_name().unwrap().to_str().unwrap();
        assert!(file_name.ends_with("_add_users_table.yml"));
        assert!(FILE_NAME.is_match(file_name));

        let set = MigrationLoader::new([dir.path()]).load().unwrap();
        assert_eq!(set.iter().next().unwrap().name(), "AddUsersTable");
    }

    #[test]
    fn sql_sections_ignore_preamble() {
        let (up, down) = split_sql_sections("-- note\nSELECT 0;\n-- UP\nSELECT 1;\n\n-- Down\nSELECT 2;");
        assert_eq!(up, "SELECT 1;");
        assert_eq!(down, "SELECT 2;");
    }

    #[test]
    fn case_conversions() {
        assert_eq!(to_camel_case("add_c_to_t1"), "AddCToT1");
        assert_eq!(to_snake_case("AddUsersTable"), "add_users_table");
        assert_eq!(to_snake_case("add users-table"), "add_users_table");
        assert_eq!(to_snake_case("!!"), "");
    }
}
