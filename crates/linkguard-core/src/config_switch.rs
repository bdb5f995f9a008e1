//! Process config switcher.
//!
//! The UE stack is described by a YAML document with a `processes` list.
//! Exactly one entry, selected by its `type` and `id`, has its config file
//! path toggled between two known variants. The document is the single
//! source of truth: every switch is a read-modify-write that replaces the
//! file atomically (temp file in the same directory, fsync, rename).
//!
//! The edit is made on the source text, so everything except the one value
//! survives byte for byte. Only layouts the text editor cannot handle (flow
//! collections, block scalars) fall back to re-rendering the document.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde_yaml::Value;

use crate::error::ConfigError;
use crate::settings::ProcessConfigSettings;
use crate::yaml_patch::{self, EntryKey};

/// Which of the two known config files the managed entry points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigVariant {
    Original,
    Alternate,
}

impl std::fmt::Display for ConfigVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigVariant::Original => write!(f, "original"),
            ConfigVariant::Alternate => write!(f, "alternate"),
        }
    }
}

/// Result of a successful switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchOutcome {
    pub previous: Option<String>,
    pub current: String,
    /// `false` when the target variant was already active and nothing was
    /// written.
    pub changed: bool,
}

pub struct ConfigSwitcher {
    settings: ProcessConfigSettings,
}

impl ConfigSwitcher {
    pub fn new(settings: ProcessConfigSettings) -> Self {
        Self { settings }
    }

    pub fn path(&self) -> &Path {
        &self.settings.path
    }

    /// Config file path associated with a variant.
    pub fn variant_path(&self, variant: ConfigVariant) -> &str {
        match variant {
            ConfigVariant::Original => &self.settings.original,
            ConfigVariant::Alternate => &self.settings.alternate,
        }
    }

    /// Point the managed entry at `target`'s config file.
    ///
    /// Only the entry's config field is rewritten; other entries, fields and
    /// mapping order are carried through unchanged.
    pub fn switch(&self, target: ConfigVariant) -> Result<SwitchOutcome, ConfigError> {
        let (source, mut doc) = self.load()?;
        let new_value = self.variant_path(target).to_string();

        let entry = self.locate_entry(&mut doc)?;
        let field_key = Value::String(self.settings.field.clone());
        let previous = entry.get(&field_key).and_then(Value::as_str).map(str::to_string);

        if previous.as_deref() == Some(new_value.as_str()) {
            tracing::debug!(
                variant = %target,
                path = %self.settings.path.display(),
                "process config already on requested variant"
            );
            return Ok(SwitchOutcome {
                previous,
                current: new_value,
                changed: false,
            });
        }

        entry.insert(field_key, Value::String(new_value.clone()));
        let rendered = match self.patch_in_place(&source, &new_value, &doc) {
            Some(patched) => patched,
            None => {
                tracing::warn!(
                    path = %self.settings.path.display(),
                    "process config layout not editable in place, rewriting whole document"
                );
                serde_yaml::to_string(&doc).map_err(|e| self.malformed(e.to_string()))?
            }
        };
        self.persist(&rendered)?;

        tracing::info!(
            variant = %target,
            from = previous.as_deref().unwrap_or(""),
            to = %new_value,
            path = %self.settings.path.display(),
            "process config switched"
        );

        Ok(SwitchOutcome {
            previous,
            current: new_value,
            changed: true,
        })
    }

    /// Variant currently recorded in the document, if it matches either
    /// known path.
    pub fn active_variant(&self) -> Result<Option<ConfigVariant>, ConfigError> {
        let (_, mut doc) = self.load()?;
        let entry = self.locate_entry(&mut doc)?;
        let field_key = Value::String(self.settings.field.clone());
        let current = entry.get(&field_key).and_then(Value::as_str);
        Ok(match current {
            Some(p) if p == self.settings.original => Some(ConfigVariant::Original),
            Some(p) if p == self.settings.alternate => Some(ConfigVariant::Alternate),
            _ => None,
        })
    }

    /// Text edit of the source, accepted only if it parses to exactly
    /// `expected`.
    fn patch_in_place(&self, source: &str, new_value: &str, expected: &Value) -> Option<String> {
        let key = EntryKey {
            process_type: &self.settings.process_type,
            process_id: &self.settings.process_id,
            field: &self.settings.field,
        };
        let patched = yaml_patch::replace_entry_field(source, &key, new_value)?;
        match serde_yaml::from_str::<Value>(&patched) {
            Ok(reparsed) if reparsed == *expected => Some(patched),
            _ => None,
        }
    }

    fn load(&self) -> Result<(String, Value), ConfigError> {
        let path = &self.settings.path;
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConfigError::NotFound { path: path.clone() });
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.clone(),
                    source,
                });
            }
        };
        let doc: Value = serde_yaml::from_str(&raw).map_err(|e| self.malformed(e.to_string()))?;
        if !doc.is_mapping() {
            return Err(self.malformed("top level is not a mapping".into()));
        }
        Ok((raw, doc))
    }

    fn locate_entry<'a>(
        &self,
        doc: &'a mut Value,
    ) -> Result<&'a mut serde_yaml::Mapping, ConfigError> {
        let type_key = Value::String("type".into());
        let id_key = Value::String("id".into());
        let process_type = self.settings.process_type.as_str();
        let process_id = self.settings.process_id.as_str();

        let processes = match doc.get_mut("processes") {
            Some(Value::Sequence(seq)) => seq,
            Some(Value::Null) | None => return Err(self.entry_missing()),
            Some(_) => return Err(self.malformed("`processes` is not a list".into())),
        };

        let mut matches = processes.iter_mut().filter_map(Value::as_mapping_mut).filter(|m| {
            m.get(&type_key).and_then(Value::as_str) == Some(process_type)
                && m.get(&id_key).and_then(Value::as_str) == Some(process_id)
        });

        let entry = matches.next().ok_or_else(|| self.entry_missing())?;
        if matches.next().is_some() {
            return Err(self.malformed(format!(
                "multiple process entries with type={process_type} id={process_id}"
            )));
        }
        Ok(entry)
    }

    fn persist(&self, contents: &str) -> Result<(), ConfigError> {
        let path = &self.settings.path;
        let io_err = |source: std::io::Error| ConfigError::Io {
            path: path.clone(),
            source,
        };
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let mut tmp = tempfile::Builder::new()
            .prefix(".linkguard-")
            .suffix(".yaml.tmp")
            .tempfile_in(&parent)
            .map_err(io_err)?;
        tmp.write_all(contents.as_bytes()).map_err(io_err)?;
        if let Ok(meta) = fs::metadata(path) {
            // Keep the original mode; the temp file is created 0600.
            fs::set_permissions(tmp.path(), meta.permissions()).map_err(io_err)?;
        }
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(path).map_err(|e| io_err(e.error))?;
        Ok(())
    }

    fn malformed(&self, reason: String) -> ConfigError {
        ConfigError::Malformed {
            path: self.settings.path.clone(),
            reason,
        }
    }

    fn entry_missing(&self) -> ConfigError {
        ConfigError::EntryMissing {
            path: self.settings.path.clone(),
            process_type: self.settings.process_type.clone(),
            process_id: self.settings.process_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{SAMPLE_PROCESS_CONFIG, switcher_for, write_process_config};

    #[test]
    fn switch_to_alternate_rewrites_only_managed_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_process_config(dir.path(), SAMPLE_PROCESS_CONFIG);
        let switcher = switcher_for(&path);

        let outcome = switcher.switch(ConfigVariant::Alternate).unwrap();
        assert!(outcome.changed);
        assert_eq!(outcome.previous.as_deref(), Some("configs/uhd/ue_uhd.conf"));
        assert_eq!(outcome.current, "configs/uhd/ue_uhd_alt.conf");

        let doc: Value = serde_yaml::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        let procs = doc["processes"].as_sequence().unwrap();
        assert_eq!(procs.len(), 3);
        assert_eq!(procs[0]["id"], "gnb_1");
        assert_eq!(procs[0]["config_file"], "configs/gnb.conf");
        assert_eq!(procs[1]["config_file"], "configs/uhd/ue_uhd_alt.conf");
        assert_eq!(procs[1]["args"][0], "--verbose");
        // A same-type entry with another id is untouched.
        assert_eq!(procs[2]["config_file"], "configs/uhd/ue_uhd.conf");
        assert_eq!(doc["metrics"]["enabled"], true);

        assert_eq!(
            switcher.active_variant().unwrap(),
            Some(ConfigVariant::Alternate)
        );
    }

    #[test]
    fn switch_preserves_key_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_process_config(dir.path(), SAMPLE_PROCESS_CONFIG);
        let switcher = switcher_for(&path);
        switcher.switch(ConfigVariant::Alternate).unwrap();

        let doc: Value = serde_yaml::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        let top: Vec<&str> = doc
            .as_mapping()
            .unwrap()
            .keys()
            .filter_map(Value::as_str)
            .collect();
        assert_eq!(top, ["version", "processes", "metrics"]);

        let entry: Vec<&str> = doc["processes"][1]
            .as_mapping()
            .unwrap()
            .keys()
            .filter_map(Value::as_str)
            .collect();
        assert_eq!(entry, ["type", "id", "config_file", "args"]);
    }

    #[test]
    fn switch_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_process_config(dir.path(), SAMPLE_PROCESS_CONFIG);
        let switcher = switcher_for(&path);

        switcher.switch(ConfigVariant::Alternate).unwrap();
        let once = fs::read_to_string(&path).unwrap();
        let second = switcher.switch(ConfigVariant::Alternate).unwrap();
        let twice = fs::read_to_string(&path).unwrap();

        assert!(!second.changed);
        assert_eq!(once, twice);
    }

    #[test]
    fn round_trip_restores_original_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_process_config(dir.path(), SAMPLE_PROCESS_CONFIG);
        let switcher = switcher_for(&path);

        switcher.switch(ConfigVariant::Alternate).unwrap();
        let outcome = switcher.switch(ConfigVariant::Original).unwrap();
        assert!(outcome.changed);
        assert_eq!(
            switcher.active_variant().unwrap(),
            Some(ConfigVariant::Original)
        );
    }

    #[test]
    fn missing_document_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let switcher = switcher_for(&dir.path().join("absent.yaml"));
        assert!(matches!(
            switcher.switch(ConfigVariant::Alternate),
            Err(ConfigError::NotFound { .. })
        ));
    }

    #[test]
    fn unparsable_document_is_malformed_and_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let garbage = "processes: [rtue, {id: unclosed\n";
        let path = write_process_config(dir.path(), garbage);
        let switcher = switcher_for(&path);

        assert!(matches!(
            switcher.switch(ConfigVariant::Alternate),
            Err(ConfigError::Malformed { .. })
        ));
        assert_eq!(fs::read_to_string(&path).unwrap(), garbage);
    }

    #[test]
    fn missing_entry_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_process_config(
            dir.path(),
            "processes:\n  - type: gnb\n    id: gnb_1\n    config_file: a.conf\n",
        );
        let err = switcher_for(&path)
            .switch(ConfigVariant::Alternate)
            .unwrap_err();
        match err {
            ConfigError::EntryMissing {
                process_type,
                process_id,
                ..
            } => {
                assert_eq!(process_type, "rtue");
                assert_eq!(process_id, "rtue_uhd_1");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn duplicate_entries_are_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let doc = "processes:\n  - type: rtue\n    id: rtue_uhd_1\n  - type: rtue\n    id: rtue_uhd_1\n";
        let path = write_process_config(dir.path(), doc);
        assert!(matches!(
            switcher_for(&path).switch(ConfigVariant::Alternate),
            Err(ConfigError::Malformed { .. })
        ));
    }

    #[test]
    fn leaves_no_temp_files_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_process_config(dir.path(), SAMPLE_PROCESS_CONFIG);
        switcher_for(&path).switch(ConfigVariant::Alternate).unwrap();

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, ["default.yaml"]);
    }

    #[test]
    fn switch_keeps_every_other_byte() {
        let dir = tempfile::tempdir().unwrap();
        let original = "\
# UE stack layout
version: \"2\"

processes:
    # radio head first
    -   type: gnb
        id: gnb_1
        config_file: configs/gnb.conf
        gain: 0x1F
    -   type: rtue
        id: rtue_uhd_1
        config_file: 'configs/uhd/ue_uhd.conf'  # managed by linkguard
        args: [--verbose]

metrics: {enabled: yes}
";
        let path = write_process_config(dir.path(), original);
        let switcher = switcher_for(&path);

        switcher.switch(ConfigVariant::Alternate).unwrap();
        let switched = fs::read_to_string(&path).unwrap();
        assert_eq!(
            switched,
            original.replace(
                "'configs/uhd/ue_uhd.conf'  # managed",
                "'configs/uhd/ue_uhd_alt.conf'  # managed"
            )
        );

        switcher.switch(ConfigVariant::Original).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), original);
    }

    #[test]
    fn flow_style_document_still_switches() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_process_config(
            dir.path(),
            "processes: [{type: rtue, id: rtue_uhd_1, config_file: configs/uhd/ue_uhd.conf}]\n",
        );
        let switcher = switcher_for(&path);
        assert!(switcher.switch(ConfigVariant::Alternate).unwrap().changed);
        assert_eq!(
            switcher.active_variant().unwrap(),
            Some(ConfigVariant::Alternate)
        );
    }
}
