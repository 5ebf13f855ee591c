//! Configuration documents.
//!
//! A document maps role names to instrument entries:
//!
//! ```json
//! {
//!     "src": {
//!         "object": "HP_6632A",
//!         "definition": "source",
//!         "address": "GPIB0::14::INSTR",
//!         "init": [["set_voltage", {"voltage": 0}], ["off", {}]]
//!     }
//! }
//! ```
//!
//! Entries keep the order they were written in, and a repeated role name is
//! kept as a second entry rather than overwriting the first, so the loader
//! can refuse it. JSON and TOML are accepted; TOML itself forbids repeated
//! keys, so there the parser reports them.

use crate::driver::command::Arguments;
use crate::error::{BenchError, BenchResult};
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::Path;

/// One `(method, arguments)` instruction, written as a two-element array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "(String, Arguments)", into = "(String, Arguments)")]
pub struct InitStep {
    /// Command name
    pub method: String,
    /// Named arguments
    pub arguments: Arguments,
}

impl InitStep {
    /// A step with named arguments.
    pub fn new(method: impl Into<String>, arguments: Arguments) -> Self {
        Self {
            method: method.into(),
            arguments,
        }
    }

    /// A step without arguments.
    pub fn call(method: impl Into<String>) -> Self {
        Self::new(method, Arguments::new())
    }
}

impl From<(String, Arguments)> for InitStep {
    fn from((method, arguments): (String, Arguments)) -> Self {
        Self { method, arguments }
    }
}

impl From<InitStep> for (String, Arguments) {
    fn from(step: InitStep) -> Self {
        (step.method, step.arguments)
    }
}

/// Configuration of one role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigEntry {
    /// Concrete driver type name
    pub object: String,
    /// Capability namespace
    pub definition: String,
    /// Resource address
    pub address: String,
    /// Init steps, run in order after binding
    #[serde(default)]
    pub init: Vec<InitStep>,
    /// Constructor options handed to the driver factory
    #[serde(default, skip_serializing_if = "Arguments::is_empty")]
    pub kwargs: Arguments,
}

impl ConfigEntry {
    /// Entry with no init steps and no options.
    pub fn new(
        object: impl Into<String>,
        definition: impl Into<String>,
        address: impl Into<String>,
    ) -> Self {
        Self {
            object: object.into(),
            definition: definition.into(),
            address: address.into(),
            init: Vec::new(),
            kwargs: Arguments::new(),
        }
    }

    /// Append an init step.
    pub fn with_step(mut self, step: InitStep) -> Self {
        self.init.push(step);
        self
    }

    /// Set constructor options.
    pub fn with_kwargs(mut self, kwargs: Arguments) -> Self {
        self.kwargs = kwargs;
        self
    }
}

/// Role name → entry, in document order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigurationDocument {
    entries: Vec<(String, ConfigEntry)>,
}

impl ConfigurationDocument {
    /// Empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry. Repeated roles are kept and rejected at load time.
    pub fn push(&mut self, role: impl Into<String>, entry: ConfigEntry) {
        self.entries.push((role.into(), entry));
    }

    /// Builder form of [`ConfigurationDocument::push`].
    pub fn with_entry(mut self, role: impl Into<String>, entry: ConfigEntry) -> Self {
        self.push(role, entry);
        self
    }

    /// Parse a JSON document.
    pub fn from_json_str(text: &str) -> BenchResult<Self> {
        serde_json::from_str(text).map_err(|e| BenchError::Document(e.to_string()))
    }

    /// Parse a TOML document.
    pub fn from_toml_str(text: &str) -> BenchResult<Self> {
        toml::from_str(text).map_err(|e| BenchError::Document(e.to_string()))
    }

    /// Read a document from disk, choosing the format by extension
    /// (`.json` or `.toml`).
    pub fn from_path(path: impl AsRef<Path>) -> BenchResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let parsed = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&text),
            Some("toml") => Self::from_toml_str(&text),
            _ => {
                return Err(BenchError::Document(format!(
                    "{}: unsupported document format (expected .json or .toml)",
                    path.display()
                )))
            }
        };
        parsed.map_err(|e| match e {
            BenchError::Document(msg) => BenchError::Document(format!("{}: {msg}", path.display())),
            other => other,
        })
    }

    /// Entries in document order.
    pub fn entries(&self) -> &[(String, ConfigEntry)] {
        &self.entries
    }

    /// Role names in document order.
    pub fn roles(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(role, _)| role.as_str())
    }

    /// First entry for `role`.
    pub fn get(&self, role: &str) -> Option<&ConfigEntry> {
        self.entries
            .iter()
            .find(|(r, _)| r == role)
            .map(|(_, entry)| entry)
    }

    /// Number of entries, repeats included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the document has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Give up the entries.
    pub fn into_entries(self) -> Vec<(String, ConfigEntry)> {
        self.entries
    }
}

impl<'de> Deserialize<'de> for ConfigurationDocument {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct DocumentVisitor;

        impl<'de> Visitor<'de> for DocumentVisitor {
            type Value = ConfigurationDocument;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a mapping of role names to instrument entries")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((role, entry)) = map.next_entry::<String, ConfigEntry>()? {
                    entries.push((role, entry));
                }
                Ok(ConfigurationDocument { entries })
            }
        }

        deserializer.deserialize_map(DocumentVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    const SCENARIO: &str = r#"{
        "src": {
            "object": "X",
            "definition": "source",
            "address": "GPIB0::14::INSTR",
            "init": [["set_voltage", {"voltage": 0}], ["off", {}]]
        }
    }"#;

    #[test]
    fn test_parse_json_scenario() {
        let doc = ConfigurationDocument::from_json_str(SCENARIO).unwrap();
        let entry = doc.get("src").unwrap();

        assert_eq!(entry.object, "X");
        assert_eq!(entry.init.len(), 2);
        assert_eq!(entry.init[0].method, "set_voltage");
        assert_eq!(entry.init[0].arguments.get("voltage"), Some(&json!(0)));
        assert_eq!(entry.init[1], InitStep::call("off"));
    }

    #[test]
    fn test_document_order_is_preserved() {
        let doc = ConfigurationDocument::from_json_str(
            r#"{
                "zeta": {"object": "A", "definition": "sink", "address": "GPIB0::1::INSTR"},
                "alpha": {"object": "B", "definition": "sink", "address": "GPIB0::2::INSTR"},
                "mid": {"object": "C", "definition": "sink", "address": "GPIB0::3::INSTR"}
            }"#,
        )
        .unwrap();

        assert_eq!(doc.roles().collect::<Vec<_>>(), vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_repeated_roles_are_kept() {
        let doc = ConfigurationDocument::from_json_str(
            r#"{
                "dmm": {"object": "A", "definition": "multimeter", "address": "GPIB0::1::INSTR"},
                "dmm": {"object": "B", "definition": "multimeter", "address": "GPIB0::2::INSTR"}
            }"#,
        )
        .unwrap();

        assert_eq!(doc.len(), 2);
        assert_eq!(doc.get("dmm").unwrap().object, "A");
    }

    #[test]
    fn test_missing_init_means_no_steps() {
        let doc = ConfigurationDocument::from_json_str(
            r#"{"load": {"object": "A", "definition": "sink", "address": "GPIB0::1::INSTR"}}"#,
        )
        .unwrap();

        assert!(doc.get("load").unwrap().init.is_empty());
        assert!(doc.get("load").unwrap().kwargs.is_empty());
    }

    #[test]
    fn test_unknown_entry_fields_are_rejected() {
        let err = ConfigurationDocument::from_json_str(
            r#"{"load": {"object": "A", "definition": "sink", "adress": "GPIB0::1::INSTR"}}"#,
        )
        .unwrap_err();

        assert!(matches!(err, BenchError::Document(ref msg) if msg.contains("adress")));
    }

    #[test]
    fn test_malformed_init_step() {
        let err = ConfigurationDocument::from_json_str(
            r#"{"src": {"object": "X", "definition": "source", "address": "GPIB0::1::INSTR",
                "init": [["off"]]}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, BenchError::Document(_)));

        let err = ConfigurationDocument::from_json_str(r#"["src"]"#).unwrap_err();
        assert!(matches!(err, BenchError::Document(ref msg) if msg.contains("role names")));
    }

    #[test]
    fn test_parse_toml() {
        let doc = ConfigurationDocument::from_toml_str(
            r#"
            [v_in]
            object = "HP_6632A"
            definition = "source"
            address = "GPIB0::14::INSTR"
            init = [["set_voltage", { voltage = 12.0 }], ["on", {}]]

            [v_in_meter]
            object = "HP_34401A"
            definition = "multimeter"
            address = "GPIB0::22::INSTR"
            kwargs = { factor = 2.0 }
            "#,
        )
        .unwrap();

        assert_eq!(doc.roles().collect::<Vec<_>>(), vec!["v_in", "v_in_meter"]);
        let meter = doc.get("v_in_meter").unwrap();
        assert_eq!(meter.kwargs.get("factor"), Some(&json!(2.0)));
        assert_eq!(doc.get("v_in").unwrap().init[1].method, "on");
    }

    #[test]
    fn test_from_path_picks_format_by_extension() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        file.write_all(SCENARIO.as_bytes()).unwrap();

        let doc = ConfigurationDocument::from_path(file.path()).unwrap();
        assert_eq!(doc.len(), 1);

        let other = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        let err = ConfigurationDocument::from_path(other.path()).unwrap_err();
        assert!(matches!(err, BenchError::Document(ref msg) if msg.contains("unsupported")));
    }
}
