//! YAML configuration loader with custom tag support
//!
//! Supported tags:
//! - `!include path` - Include another YAML file
//! - `!include_dir_list dir` - Include all YAML files in a directory as a list
//! - `!include_dir_merge_list dir` - Merge lists from all YAML files in a directory
//! - `!secret key` - Substitute from secrets.yaml
//! - `!env_var VAR` - Environment variable substitution
//!
//! A typical zone setup keeps one file per zone and pulls them in with
//! `zone: !include_dir_merge_list zones`.

use std::fs;
use std::path::{Path, PathBuf};

use serde_yaml::value::TaggedValue;
use serde_yaml::{Mapping, Value};
use tracing::{debug, trace};

use crate::error::{ConfigError, ConfigResult};
use crate::secrets::Secrets;

/// Custom tags understood by the loader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tag {
    Include,
    IncludeDirList,
    IncludeDirMergeList,
    Secret,
    EnvVar,
}

impl Tag {
    fn parse(tag: &str) -> Option<Self> {
        match tag.trim_start_matches('!') {
            "include" => Some(Tag::Include),
            "include_dir_list" => Some(Tag::IncludeDirList),
            "include_dir_merge_list" => Some(Tag::IncludeDirMergeList),
            "secret" => Some(Tag::Secret),
            "env_var" => Some(Tag::EnvVar),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Tag::Include => "!include",
            Tag::IncludeDirList => "!include_dir_list",
            Tag::IncludeDirMergeList => "!include_dir_merge_list",
            Tag::Secret => "!secret",
            Tag::EnvVar => "!env_var",
        }
    }
}

/// YAML loader with custom tag support
pub struct YamlLoader {
    /// Base directory for relative paths
    config_dir: PathBuf,
    secrets: Secrets,
    /// Files currently being loaded, outermost first
    loading: Vec<PathBuf>,
}

impl YamlLoader {
    /// Create a loader for a config directory, reading its `secrets.yaml`
    pub fn new(config_dir: impl Into<PathBuf>) -> ConfigResult<Self> {
        let config_dir = config_dir.into();
        let secrets = Secrets::load(&config_dir)?;
        Ok(Self::with_secrets(config_dir, secrets))
    }

    pub fn with_secrets(config_dir: impl Into<PathBuf>, secrets: Secrets) -> Self {
        Self {
            config_dir: config_dir.into(),
            secrets,
            loading: Vec::new(),
        }
    }

    /// Load a file, relative to the config directory unless absolute
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> ConfigResult<Value> {
        let path = self.resolve_path(path.as_ref());
        if self.loading.contains(&path) {
            return Err(ConfigError::CircularInclude { path });
        }
        debug!("Loading YAML file: {:?}", path);

        let content = fs::read_to_string(&path).map_err(|source| ConfigError::ReadFile {
            path: path.clone(),
            source,
        })?;

        self.loading.push(path.clone());
        let result = self.load_string(&content, &path);
        self.loading.pop();
        result
    }

    /// Parse YAML text and resolve its tags relative to `source_path`
    pub fn load_string(&mut self, content: &str, source_path: &Path) -> ConfigResult<Value> {
        let value: Value =
            serde_yaml::from_str(content).map_err(|source| ConfigError::ParseYaml {
                path: source_path.to_path_buf(),
                source,
            })?;
        self.resolve(value, source_path)
    }

    fn resolve(&mut self, value: Value, source_path: &Path) -> ConfigResult<Value> {
        match value {
            Value::Tagged(tagged) => self.resolve_tagged(*tagged, source_path),
            Value::Mapping(map) => {
                let mut resolved = Mapping::with_capacity(map.len());
                for (key, value) in map {
                    resolved.insert(
                        self.resolve(key, source_path)?,
                        self.resolve(value, source_path)?,
                    );
                }
                Ok(Value::Mapping(resolved))
            }
            Value::Sequence(seq) => seq
                .into_iter()
                .map(|v| self.resolve(v, source_path))
                .collect::<ConfigResult<Vec<_>>>()
                .map(Value::Sequence),
            other => Ok(other),
        }
    }

    fn resolve_tagged(&mut self, tagged: TaggedValue, source_path: &Path) -> ConfigResult<Value> {
        let Some(tag) = Tag::parse(&tagged.tag.to_string()) else {
            // Unknown tags pass through with their content resolved
            let value = self.resolve(tagged.value, source_path)?;
            return Ok(Value::Tagged(Box::new(TaggedValue {
                tag: tagged.tag,
                value,
            })));
        };

        let arg = string_arg(tag, &tagged.value)?;
        trace!("Resolving {} {}", tag.name(), arg);

        match tag {
            Tag::Include => {
                let path = self.relative_to(source_path, &arg);
                self.load_file(path)
            }
            Tag::IncludeDirList => self.include_dir(source_path, &arg, false),
            Tag::IncludeDirMergeList => self.include_dir(source_path, &arg, true),
            Tag::Secret => Ok(self.secrets.get(&arg)?.clone()),
            Tag::EnvVar => std::env::var(&arg)
                .map(Value::String)
                .map_err(|_| ConfigError::EnvVarNotFound { var: arg }),
        }
    }

    /// Load every YAML file of a directory in name order
    ///
    /// With `merge`, sequences are flattened into the result.
    fn include_dir(&mut self, source_path: &Path, dir: &str, merge: bool) -> ConfigResult<Value> {
        let dir = self.relative_to(source_path, dir);
        let mut result = Vec::new();
        for file in yaml_files(&dir)? {
            match self.load_file(&file)? {
                Value::Sequence(seq) if merge => result.extend(seq),
                other => result.push(other),
            }
        }
        Ok(Value::Sequence(result))
    }

    /// Resolve a tag argument against the directory of the including file
    fn relative_to(&self, source_path: &Path, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            return path.to_path_buf();
        }
        source_path
            .parent()
            .unwrap_or(&self.config_dir)
            .join(path)
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.config_dir.join(path)
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }
}

fn string_arg(tag: Tag, value: &Value) -> ConfigResult<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        other if matches!(tag, Tag::Include | Tag::IncludeDirList | Tag::IncludeDirMergeList) => {
            Err(ConfigError::InvalidIncludePath {
                path: format!("{:?}", other),
                reason: "path must be a string".to_string(),
            })
        }
        _ => Err(ConfigError::invalid(tag.name(), "argument must be a string")),
    }
}

/// `.yaml` and `.yml` files of a directory, sorted by path
fn yaml_files(dir: &Path) -> ConfigResult<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(ConfigError::DirectoryNotFound {
            path: dir.to_path_buf(),
        });
    }

    let entries = fs::read_dir(dir).map_err(|source| ConfigError::ReadFile {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .is_some_and(|ext| ext == "yaml" || ext == "yml")
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Look up a top-level section (e.g. `zone`) of a loaded configuration
///
/// Returns `None` if the section is absent or the root is not a mapping.
pub fn section<'a>(config: &'a Value, key: &str) -> Option<&'a Value> {
    config.as_mapping()?.get(key)
}

/// Load a YAML file with full tag processing
pub fn load_yaml(config_dir: impl Into<PathBuf>, file: impl AsRef<Path>) -> ConfigResult<Value> {
    let mut loader = YamlLoader::new(config_dir)?;
    loader.load_file(file)
}

/// Load a YAML string with tag processing
pub fn load_yaml_string(
    config_dir: impl Into<PathBuf>,
    content: &str,
    source_name: &str,
) -> ConfigResult<Value> {
    let mut loader = YamlLoader::new(config_dir)?;
    loader.load_string(content, Path::new(source_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &Path, name: &str, content: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        let mut file = fs::File::create(path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
    }

    #[test]
    fn test_load_simple_yaml() {
        let dir = TempDir::new().unwrap();
        write_file(
            dir.path(),
            "configuration.yaml",
            r#"
homeassistant:
  name: Home
zone:
  - name: Office
    latitude: 32.8773367
    longitude: -117.2494053
"#,
        );

        let value = load_yaml(dir.path(), "configuration.yaml").unwrap();
        let zones = section(&value, "zone").unwrap().as_sequence().unwrap();
        assert_eq!(zones.len(), 1);
        assert!(section(&value, "missing").is_none());
    }

    #[test]
    fn test_include() {
        let dir = TempDir::new().unwrap();
        write_file(
            dir.path(),
            "zones.yaml",
            "- name: Office\n  latitude: 1.0\n  longitude: 2.0\n",
        );
        write_file(dir.path(), "configuration.yaml", "zone: !include zones.yaml\n");

        let value = load_yaml(dir.path(), "configuration.yaml").unwrap();
        let zones = section(&value, "zone").unwrap().as_sequence().unwrap();
        assert_eq!(zones[0]["name"].as_str(), Some("Office"));
    }

    #[test]
    fn test_secret_keeps_number_type() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "secrets.yaml", "home_latitude: 32.87336\n");
        write_file(
            dir.path(),
            "configuration.yaml",
            "homeassistant:\n  latitude: !secret home_latitude\n",
        );

        let value = load_yaml(dir.path(), "configuration.yaml").unwrap();
        let core = section(&value, "homeassistant").unwrap();
        assert_eq!(core["latitude"].as_f64(), Some(32.87336));
    }

    #[test]
    fn test_env_var() {
        let dir = TempDir::new().unwrap();
        std::env::set_var("TEST_ZONE_CONFIG_NAME", "Beach House");
        write_file(
            dir.path(),
            "configuration.yaml",
            "homeassistant:\n  name: !env_var TEST_ZONE_CONFIG_NAME\n",
        );

        let value = load_yaml(dir.path(), "configuration.yaml").unwrap();
        assert_eq!(value["homeassistant"]["name"].as_str(), Some("Beach House"));

        std::env::remove_var("TEST_ZONE_CONFIG_NAME");
    }

    #[test]
    fn test_include_dir_list() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "zones/office.yaml", "name: Office\n");
        write_file(dir.path(), "zones/gym.yaml", "name: Gym\n");
        write_file(
            dir.path(),
            "configuration.yaml",
            "zone: !include_dir_list zones\n",
        );

        let value = load_yaml(dir.path(), "configuration.yaml").unwrap();
        let zones = section(&value, "zone").unwrap().as_sequence().unwrap();
        // Sorted by file name
        assert_eq!(zones[0]["name"].as_str(), Some("Gym"));
        assert_eq!(zones[1]["name"].as_str(), Some("Office"));
    }

    #[test]
    fn test_include_dir_merge_list() {
        let dir = TempDir::new().unwrap();
        write_file(
            dir.path(),
            "zones/work.yaml",
            "- name: Office\n- name: Warehouse\n",
        );
        write_file(dir.path(), "zones/sport.yml", "- name: Gym\n");
        write_file(dir.path(), "zones/notes.txt", "ignored");
        write_file(
            dir.path(),
            "configuration.yaml",
            "zone: !include_dir_merge_list zones\n",
        );

        let value = load_yaml(dir.path(), "configuration.yaml").unwrap();
        let zones = section(&value, "zone").unwrap().as_sequence().unwrap();
        assert_eq!(zones.len(), 3);
    }

    #[test]
    fn test_missing_include_dir() {
        let dir = TempDir::new().unwrap();
        write_file(
            dir.path(),
            "configuration.yaml",
            "zone: !include_dir_merge_list zones\n",
        );

        let result = load_yaml(dir.path(), "configuration.yaml");
        assert!(matches!(result, Err(ConfigError::DirectoryNotFound { .. })));
    }

    #[test]
    fn test_circular_include_detection() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "a.yaml", "include_b: !include b.yaml\n");
        write_file(dir.path(), "b.yaml", "include_a: !include a.yaml\n");

        let result = load_yaml(dir.path(), "a.yaml");
        assert!(matches!(result, Err(ConfigError::CircularInclude { .. })));
    }

    #[test]
    fn test_missing_secret() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "secrets.yaml", "existing: value\n");
        write_file(dir.path(), "configuration.yaml", "password: !secret nonexistent\n");

        let result = load_yaml(dir.path(), "configuration.yaml");
        assert!(matches!(result, Err(ConfigError::SecretNotFound { .. })));
    }

    #[test]
    fn test_unknown_tag_is_kept() {
        let dir = TempDir::new().unwrap();
        let value = load_yaml_string(dir.path(), "icon: !custom mdi:home\n", "inline.yaml").unwrap();
        assert!(matches!(value["icon"], Value::Tagged(_)));
    }

    #[test]
    fn test_tag_argument_must_be_string() {
        let dir = TempDir::new().unwrap();
        let result = load_yaml_string(dir.path(), "name: !env_var [A, B]\n", "inline.yaml");
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));

        let result = load_yaml_string(dir.path(), "zone: !include 5\n", "inline.yaml");
        assert!(matches!(result, Err(ConfigError::InvalidIncludePath { .. })));
    }
}
