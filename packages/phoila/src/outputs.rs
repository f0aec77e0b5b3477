//! Notebook output model.
//!
//! Outputs follow the nbformat v4 shape: each carries an `output_type` tag
//! and text fields may be either one string or a list of lines.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ExtractError;
use crate::widgets::WIDGET_VIEW_MIME_TYPE;

pub type MimeBundle = Map<String, Value>;

/// Text that nbformat stores either whole or split into lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MultilineText {
    Single(String),
    Lines(Vec<String>),
}

impl MultilineText {
    pub fn joined(&self) -> String {
        match self {
            MultilineText::Single(s) => s.clone(),
            MultilineText::Lines(lines) => lines.concat(),
        }
    }
}

impl Default for MultilineText {
    fn default() -> Self {
        MultilineText::Single(String::new())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "output_type", rename_all = "snake_case")]
pub enum Output {
    Stream {
        name: String,
        #[serde(default)]
        text: MultilineText,
    },
    DisplayData {
        #[serde(default)]
        data: MimeBundle,
        #[serde(default)]
        metadata: MimeBundle,
    },
    ExecuteResult {
        #[serde(default)]
        execution_count: Option<u32>,
        #[serde(default)]
        data: MimeBundle,
        #[serde(default)]
        metadata: MimeBundle,
    },
    Error {
        ename: String,
        evalue: String,
        #[serde(default)]
        traceback: Vec<String>,
    },
}

impl Output {
    fn data(&self) -> Option<&MimeBundle> {
        match self {
            Output::DisplayData { data, .. } | Output::ExecuteResult { data, .. } => Some(data),
            _ => None,
        }
    }

    /// Best plain-text rendering of this output, if it has one.
    pub fn plain_text(&self) -> Option<String> {
        match self {
            Output::Stream { text, .. } => Some(text.joined()),
            Output::Error { ename, evalue, .. } => Some(format!("{ename}: {evalue}")),
            _ => self
                .data()
                .and_then(|data| data.get("text/plain"))
                .and_then(|value| serde_json::from_value::<MultilineText>(value.clone()).ok())
                .map(|text| text.joined()),
        }
    }

    /// The widget model this output displays, when it is a widget view.
    pub fn widget_model_id(&self) -> Option<&str> {
        self.data()?
            .get(WIDGET_VIEW_MIME_TYPE)?
            .get("model_id")?
            .as_str()
    }
}

/// The outputs of one cell as rendered by the server. Always trusted: the
/// server already executed the notebook.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct OutputArea {
    pub outputs: Vec<Output>,
    pub trusted: bool,
}

#[derive(Deserialize)]
struct OutputBlock {
    outputs: Option<Value>,
}

impl OutputArea {
    /// Build an output area from the text of the `index`-th output block in a
    /// content record. The block is a JSON object with an `outputs` array.
    pub fn from_block(index: usize, text: &str) -> Result<Self, ExtractError> {
        let block: OutputBlock = serde_json::from_str(text.trim())
            .map_err(|source| ExtractError::InvalidJson { index, source })?;
        let outputs = block
            .outputs
            .filter(Value::is_array)
            .ok_or(ExtractError::MissingOutputs { index })?;
        let outputs = serde_json::from_value(outputs)
            .map_err(|source| ExtractError::InvalidOutputs { index, source })?;

        Ok(Self {
            outputs,
            trusted: true,
        })
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    pub fn widget_views(&self) -> impl Iterator<Item = &str> {
        self.outputs.iter().filter_map(Output::widget_model_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_output_kind() {
        let area = OutputArea::from_block(
            0,
            r#"{"outputs": [
                {"output_type": "stream", "name": "stdout", "text": ["a\n", "b\n"]},
                {"output_type": "execute_result", "execution_count": 3,
                 "data": {"text/plain": "42"}, "metadata": {}},
                {"output_type": "display_data",
                 "data": {"application/vnd.jupyter.widget-view+json": {"model_id": "m1", "version_major": 2}}},
                {"output_type": "error", "ename": "ValueError", "evalue": "bad", "traceback": []}
            ]}"#,
        )
        .unwrap();

        assert!(area.trusted);
        assert_eq!(area.len(), 4);
        assert_eq!(area.outputs[0].plain_text().as_deref(), Some("a\nb\n"));
        assert_eq!(area.outputs[1].plain_text().as_deref(), Some("42"));
        assert_eq!(area.outputs[3].plain_text().as_deref(), Some("ValueError: bad"));
        assert_eq!(area.widget_views().collect::<Vec<_>>(), vec!["m1"]);
    }

    #[test]
    fn empty_outputs_are_fine() {
        let area = OutputArea::from_block(0, "  {\"outputs\": []}\n").unwrap();
        assert!(area.is_empty());
    }

    #[test]
    fn missing_outputs_is_an_error() {
        assert!(matches!(
            OutputArea::from_block(2, "{\"cell\": 1}"),
            Err(ExtractError::MissingOutputs { index: 2 })
        ));
        assert!(matches!(
            OutputArea::from_block(0, "{\"outputs\": 5}"),
            Err(ExtractError::MissingOutputs { index: 0 })
        ));
        assert!(matches!(
            OutputArea::from_block(1, "{oops"),
            Err(ExtractError::InvalidJson { index: 1, .. })
        ));
    }

    #[test]
    fn unknown_output_type_is_rejected() {
        let err = OutputArea::from_block(0, r#"{"outputs": [{"output_type": "bogus"}]}"#);
        assert!(matches!(err, Err(ExtractError::InvalidOutputs { .. })));
    }
}
