//! TOML machine files.
//!
//! ```toml
//! name = "Counter"
//! cycletime = 50
//! functions = "functions.rhai"
//!
//! [[streamsheet]]
//! name = "S1"
//! condition_column = "A"
//! cells = """
//! B1: =B1 + 1
//! """
//! messages = [{ items = [1, 2] }]
//! trigger = { type = "continuously" }
//! loop = { path = "items", enabled = true }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use streamsheets_engine::engine::CellRef;

use super::cells::write_grd_content;
use crate::error::{Result, StreamsheetError};
use crate::machine::{DEFAULT_CYCLETIME_MS, Machine};
use crate::messaging::{DEFAULT_CAPACITY, LoopSettings, Message};
use crate::sheet::DEFAULT_MAX_EVALUATIONS;
use crate::streamsheet::StreamSheet;
use crate::trigger::TriggerConfig;

const MAX_MACHINE_FILE_BYTES: u64 = 1_048_576; // 1 MiB
const MAX_FUNCTION_FILE_BYTES: u64 = 1_048_576; // 1 MiB

fn default_cycletime() -> u64 {
    DEFAULT_CYCLETIME_MS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MachineFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default = "default_cycletime")]
    pub cycletime: u64,
    /// Custom Rhai functions, relative to the machine file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub functions: Option<PathBuf>,
    #[serde(default, rename = "streamsheet")]
    pub streamsheets: Vec<SheetFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SheetFile {
    pub name: String,
    /// Column letters, e.g. `"A"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition_column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_evaluations: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inbox_capacity: Option<usize>,
    /// Cell lines in `.grd` format.
    #[serde(default)]
    pub cells: String,
    #[serde(default)]
    pub trigger: TriggerConfig,
    #[serde(default, rename = "loop", skip_serializing_if = "Option::is_none")]
    pub loop_settings: Option<LoopSettings>,
    /// Initial inbox payloads.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<Value>,
}

fn read_limited(path: &Path, limit: u64) -> Result<String> {
    let meta = std::fs::metadata(path)?;
    if meta.len() > limit {
        return Err(StreamsheetError::FileTooLarge {
            size: meta.len(),
            limit,
        });
    }
    Ok(std::fs::read_to_string(path)?)
}

/// Read a custom-functions script, refusing files over 1 MiB.
pub fn read_functions_file(path: &Path) -> Result<String> {
    read_limited(path, MAX_FUNCTION_FILE_BYTES)
}

/// Concatenate function files; a file listed twice is loaded once.
fn merge_functions(paths: &[PathBuf]) -> Result<Option<String>> {
    let mut seen: Vec<PathBuf> = Vec::new();
    let mut merged = String::new();
    for path in paths {
        let canonical = std::fs::canonicalize(path)?;
        if seen.contains(&canonical) {
            continue;
        }
        let content = read_functions_file(&canonical)?;
        if !merged.is_empty() {
            merged.push_str("\n\n");
        }
        merged.push_str(&content);
        debug!(path = %canonical.display(), "loaded functions");
        seen.push(canonical);
    }
    Ok((!merged.is_empty()).then_some(merged))
}

impl MachineFile {
    /// Build a stopped machine. `extra_functions` are loaded after the
    /// file's own functions script.
    pub fn build(self, base_dir: &Path, extra_functions: &[PathBuf]) -> Result<Machine> {
        let mut machine = Machine::new(self.name.unwrap_or_else(|| "Machine".to_string()));
        machine.set_cycletime(self.cycletime);

        let mut paths: Vec<PathBuf> = self
            .functions
            .iter()
            .map(|path| base_dir.join(path))
            .collect();
        paths.extend(extra_functions.iter().cloned());
        machine.set_functions(merge_functions(&paths)?);

        for entry in self.streamsheets {
            let sheet = entry.build(&machine)?;
            machine.add_streamsheet(sheet)?;
        }
        info!(
            machine = %machine.name(),
            streamsheets = machine.len(),
            cycletime = machine.cycletime(),
            "machine loaded"
        );
        Ok(machine)
    }

    /// Snapshot a machine: cell inputs, settings and queued payloads.
    pub fn from_machine(machine: &Machine) -> MachineFile {
        MachineFile {
            name: Some(machine.name().to_string()),
            cycletime: machine.cycletime(),
            functions: None,
            streamsheets: machine.streamsheets().map(SheetFile::from_streamsheet).collect(),
        }
    }
}

impl SheetFile {
    fn invalid(&self, message: impl Into<String>) -> StreamsheetError {
        StreamsheetError::Setting {
            sheet: self.name.clone(),
            message: message.into(),
        }
    }

    pub fn build(&self, machine: &Machine) -> Result<StreamSheet> {
        let mut sheet = machine.new_sheet()?;
        sheet.load_cells(&self.cells)?;

        if let Some(letters) = &self.condition_column {
            let column = CellRef::letters_to_col(letters.trim())
                .ok_or_else(|| self.invalid(format!("bad condition column '{}'", letters)))?;
            sheet.set_condition_column(Some(column));
        }
        if let Some(max) = self.max_evaluations {
            if max == 0 {
                return Err(self.invalid("max_evaluations must be positive"));
            }
            sheet.set_max_evaluations(max);
        }

        let mut streamsheet = StreamSheet::new(self.name.clone(), sheet, self.trigger.clone());
        if let Some(settings) = &self.loop_settings {
            streamsheet.set_loop_settings(settings.clone());
        }
        if let Some(capacity) = self.inbox_capacity {
            if capacity == 0 {
                return Err(self.invalid("inbox_capacity must be positive"));
            }
            streamsheet.process_mut().set_inbox_capacity(capacity);
        }
        for payload in &self.messages {
            streamsheet.put_message(Message::new(payload.clone()));
        }
        Ok(streamsheet)
    }

    pub fn from_streamsheet(streamsheet: &StreamSheet) -> SheetFile {
        let sheet = streamsheet.sheet();
        let loop_settings = streamsheet.process().loop_settings();
        let capacity = streamsheet.inbox().capacity();
        SheetFile {
            name: streamsheet.name().to_string(),
            condition_column: sheet.condition_column().map(CellRef::col_to_letters),
            max_evaluations: (sheet.max_evaluations() != DEFAULT_MAX_EVALUATIONS)
                .then(|| sheet.max_evaluations()),
            inbox_capacity: (capacity != DEFAULT_CAPACITY).then_some(capacity),
            cells: write_grd_content(sheet.grid()),
            trigger: streamsheet.trigger().config().clone(),
            loop_settings: (*loop_settings != LoopSettings::default())
                .then(|| loop_settings.clone()),
            messages: streamsheet
                .inbox()
                .iter()
                .map(|message| without_nulls(&message.payload))
                .collect(),
        }
    }
}

/// TOML has no null. Null fields are left out; null array items and a null
/// payload become empty tables so array positions keep their loop index.
fn without_nulls(value: &Value) -> Value {
    match value {
        Value::Null => Value::Object(Default::default()),
        Value::Array(items) => Value::Array(items.iter().map(without_nulls).collect()),
        Value::Object(fields) => Value::Object(
            fields
                .iter()
                .filter(|(_, field)| !field.is_null())
                .map(|(key, field)| (key.clone(), without_nulls(field)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Parse a machine file. Relative function paths resolve against `base_dir`.
pub fn parse_machine(content: &str, base_dir: &Path, extra_functions: &[PathBuf]) -> Result<Machine> {
    let file: MachineFile = toml::from_str(content)?;
    file.build(base_dir, extra_functions)
}

pub fn load_machine(path: &Path, extra_functions: &[PathBuf]) -> Result<Machine> {
    let content = read_limited(path, MAX_MACHINE_FILE_BYTES)?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    parse_machine(&content, base_dir, extra_functions)
}

pub fn save_machine(machine: &Machine, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(&MachineFile::from_machine(machine))?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trigger::TriggerKind;

    const MACHINE: &str = r#"
name = "Demo"
cycletime = 20

[[streamsheet]]
name = "S1"
condition_column = "a"
max_evaluations = 500
inbox_capacity = 5
cells = """
A1: 1
B1: =B1 + 1
"""
messages = [{ items = [1, 2] }, { items = [3] }]
trigger = { type = "continuously" }
loop = { path = "items", enabled = true }

[[streamsheet]]
name = "Worker"
trigger = { type = "execute", repeat = "endless" }
"#;

    #[test]
    fn test_parse_machine() {
        let machine = parse_machine(MACHINE, Path::new("."), &[]).unwrap();
        assert_eq!(machine.name(), "Demo");
        assert_eq!(machine.cycletime(), 20);
        assert_eq!(machine.len(), 2);

        let s1 = machine.streamsheet("S1").unwrap();
        assert_eq!(s1.trigger_kind(), TriggerKind::Continuously);
        assert_eq!(s1.sheet().condition_column(), Some(0));
        assert_eq!(s1.sheet().max_evaluations(), 500);
        assert_eq!(s1.inbox().capacity(), 5);
        assert_eq!(s1.inbox().size(), 2);
        assert_eq!(s1.process().loop_settings(), &LoopSettings::over("items"));

        let worker = machine.streamsheet("Worker").unwrap();
        assert_eq!(worker.trigger_kind(), TriggerKind::Execute);
        assert!(worker.trigger().is_endless());
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let err = parse_machine("speed = 3\n", Path::new("."), &[]).unwrap_err();
        assert!(matches!(err, StreamsheetError::Config(_)));

        let content = "[[streamsheet]]\nname = \"S1\"\ncolour = \"red\"\n";
        assert!(parse_machine(content, Path::new("."), &[]).is_err());
    }

    #[test]
    fn test_duplicate_sheet_names_rejected() {
        let content = "[[streamsheet]]\nname = \"S1\"\n\n[[streamsheet]]\nname = \"S1\"\n";
        let err = parse_machine(content, Path::new("."), &[]).unwrap_err();
        assert!(matches!(err, StreamsheetError::DuplicateSheet(name) if name == "S1"));
    }

    #[test]
    fn test_bad_settings_rejected() {
        let content = "[[streamsheet]]\nname = \"S1\"\ncondition_column = \"1\"\n";
        let err = parse_machine(content, Path::new("."), &[]).unwrap_err();
        assert!(matches!(err, StreamsheetError::Setting { .. }));

        let content = "[[streamsheet]]\nname = \"S1\"\ncells = \"nonsense\"\n";
        let err = parse_machine(content, Path::new("."), &[]).unwrap_err();
        assert!(matches!(err, StreamsheetError::Parse { line: 1, .. }));
    }

    #[test]
    fn test_functions_file_relative_to_machine() {
        let dir = std::env::temp_dir().join("streamsheets_functions_test");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("double.rhai"), "fn double(x) { x * 2.0 }").unwrap();
        let content = "functions = \"double.rhai\"\n\n[[streamsheet]]\nname = \"S1\"\ntrigger = { type = \"continuously\" }\ncells = \"A1: =double(4.0)\"\n";

        let mut machine = parse_machine(content, &dir, &[]).unwrap();
        assert!(machine.functions().unwrap().contains("fn double"));
        machine.start();
        machine.cycle();
        let a1 = CellRef::from_str("A1").unwrap();
        let s1 = machine.streamsheet("S1").unwrap();
        assert_eq!(s1.sheet().display_value(&a1), "8");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_load_rejects_oversized_file() {
        let path = std::env::temp_dir().join("streamsheets_machine_large.toml");
        let oversized = "#".repeat(MAX_MACHINE_FILE_BYTES as usize + 1);
        std::fs::write(&path, oversized).unwrap();

        let err = load_machine(&path, &[]).unwrap_err();
        assert!(matches!(err, StreamsheetError::FileTooLarge { .. }));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_save_and_reload() {
        let machine = parse_machine(MACHINE, Path::new("."), &[]).unwrap();
        let path = std::env::temp_dir().join("streamsheets_saved_machine.toml");
        save_machine(&machine, &path).unwrap();

        let reloaded = load_machine(&path, &[]).unwrap();
        let s1 = reloaded.streamsheet("S1").unwrap();
        assert_eq!(s1.sheet().condition_column(), Some(0));
        assert_eq!(s1.inbox().size(), 2);
        assert_eq!(s1.process().loop_settings(), &LoopSettings::over("items"));
        assert!(s1.sheet().cell(&CellRef::new(1, 0)).is_some());
        assert!(reloaded.streamsheet("Worker").unwrap().trigger().is_endless());

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_save_drops_null_payload_values() {
        let mut machine = parse_machine(MACHINE, Path::new("."), &[]).unwrap();
        machine.put_message(
            "Worker",
            Message::new(serde_json::json!({ "a": null, "b": 1, "items": [1, null] })),
        );
        machine.put_message("Worker", Message::new(Value::Null));
        let path = std::env::temp_dir().join("streamsheets_saved_nulls.toml");
        save_machine(&machine, &path).unwrap();

        let reloaded = load_machine(&path, &[]).unwrap();
        let payloads: Vec<Value> = reloaded
            .streamsheet("Worker")
            .unwrap()
            .inbox()
            .iter()
            .map(|message| message.payload.clone())
            .collect();
        assert_eq!(
            payloads,
            vec![
                serde_json::json!({ "b": 1, "items": [1, {}] }),
                serde_json::json!({}),
            ]
        );

        let _ = std::fs::remove_file(&path);
    }
}
