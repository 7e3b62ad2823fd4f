use std::collections::BTreeSet;

use clap::ValueEnum;
use qst_ir::Label;
use qst_isa::Format;
use serde::{Deserialize, Serialize};

/// Bytecode format as written on the command line and in manifests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FormatName {
    Legacy,
    Desktop,
    NetworkVariant,
}

impl From<FormatName> for Format {
    fn from(name: FormatName) -> Self {
        match name {
            FormatName::Legacy => Format::Legacy,
            FormatName::Desktop => Format::Desktop,
            FormatName::NetworkVariant => Format::NetworkVariant,
        }
    }
}

/// Label table of a script, stored next to its bytecode.
///
/// ```yaml
/// format: network-variant
/// label_offsets: [0, -1, 24]
/// entry_labels: [0]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelManifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<FormatName>,
    /// Offset of every label, -1 for unused labels.
    pub label_offsets: Vec<i32>,
    #[serde(default = "default_entry_labels")]
    pub entry_labels: BTreeSet<Label>,
}

fn default_entry_labels() -> BTreeSet<Label> {
    BTreeSet::from([0])
}

impl LabelManifest {
    /// The command line format wins over the manifest's.
    pub fn format(&self, flag: Option<FormatName>) -> Format {
        flag.or(self.format).map(Format::from).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let manifest: LabelManifest = serde_yaml::from_str("label_offsets: [0, -1, 8]").unwrap();
        assert_eq!(manifest.format, None);
        assert_eq!(manifest.label_offsets, [0, -1, 8]);
        assert_eq!(manifest.entry_labels, BTreeSet::from([0]));
        assert_eq!(manifest.format(None), Format::NetworkVariant);
        assert_eq!(manifest.format(Some(FormatName::Legacy)), Format::Legacy);
    }

    #[test]
    fn format_names_are_kebab_case() {
        let manifest = LabelManifest {
            format: Some(FormatName::NetworkVariant),
            label_offsets: vec![0],
            entry_labels: BTreeSet::from([0, 7]),
        };
        let yaml = serde_yaml::to_string(&manifest).unwrap();
        assert!(yaml.contains("format: network-variant"), "got {yaml}");
        assert_eq!(serde_yaml::from_str::<LabelManifest>(&yaml).unwrap(), manifest);
    }
}
