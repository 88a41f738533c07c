use thiserror::Error;

/// Errors produced while compiling or rendering a mapping template.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TemplateError {
    /// The template text could not be parsed.
    #[error("template failure at offset {offset}: {reason} in \"{source_text}\"")]
    Compile {
        source_text: String,
        offset: usize,
        reason: String,
    },

    /// Rendering failed, e.g. a `$util` function rejected its argument.
    #[error("template render failure: {0}")]
    Render(String),
}
