//! Request templates: the immutable description of one HTTP call that every
//! worker replays on each pass.

use serde::Deserialize;
use std::collections::HashMap;
use std::io::Read;
use tracing::debug;

use crate::errors::SetupError;

/// One HTTP call to replay. Loaded once, then shared read-only by all workers.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RequestTemplate {
    pub id: String,
    pub url: String,
    pub method: String,

    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Absent means the request is sent without a body.
    #[serde(default)]
    pub body: Option<String>,
}

/// Reads a JSON array of templates.
///
/// Malformed input, a missing required field or an empty list is a setup
/// error. Method and URL are deliberately *not* validated here: an unusable
/// method or URL is recorded per attempt as a build failure by the executor.
pub fn load_templates<R: Read>(mut reader: R) -> Result<Vec<RequestTemplate>, SetupError> {
    let mut raw = String::new();
    reader.read_to_string(&mut raw)?;

    let templates: Vec<RequestTemplate> = serde_json::from_str(&raw)?;
    if templates.is_empty() {
        return Err(SetupError::NoTemplates);
    }

    for (index, template) in templates.iter().enumerate() {
        if template.id.is_empty() {
            return Err(SetupError::InvalidTemplate {
                index,
                message: "'id' cannot be empty".to_string(),
            });
        }
    }

    debug!(count = templates.len(), "Loaded request templates");
    Ok(templates)
}
