//! Compiled narration output.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One narrated scene: the text fragment and, when voiced, the audio
/// artifact locator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct NarrationFragment {
    /// Original unit index this fragment was produced from
    pub unit_index: usize,

    /// Narration text for this unit
    pub text: String,

    /// Storage locators of the synthesized audio, in chunk order.
    /// Empty when the audio stage did not run. Long fragments are
    /// pre-chunked for synthesis, so one unit may yield several segments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub audio_refs: Vec<String>,
}

/// Final deliverable for a `completed*` job.
///
/// Fragments are ordered by original unit index regardless of the order
/// units resolved in, so output is deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
pub struct CompiledOutput {
    /// Narration fragments in unit-index order
    pub fragments: Vec<NarrationFragment>,

    /// Unit indices that were skipped due to exhausted retries or
    /// non-retryable provider failures
    #[serde(default)]
    pub skipped_units: Vec<usize>,
}

impl CompiledOutput {
    /// Whether any unit had to be skipped.
    pub fn has_warnings(&self) -> bool {
        !self.skipped_units.is_empty()
    }

    /// Concatenated narration text, fragment order.
    pub fn full_text(&self) -> String {
        self.fragments
            .iter()
            .map(|f| f.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_ordering_and_warnings() {
        let output = CompiledOutput {
            fragments: vec![
                NarrationFragment {
                    unit_index: 0,
                    text: "A door opens.".into(),
                    audio_refs: vec!["audio/0.ogg".into()],
                },
                NarrationFragment {
                    unit_index: 2,
                    text: "The room is empty.".into(),
                    audio_refs: vec!["audio/2.ogg".into()],
                },
            ],
            skipped_units: vec![1],
        };

        assert!(output.has_warnings());
        assert_eq!(output.full_text(), "A door opens.\nThe room is empty.");
    }
}
