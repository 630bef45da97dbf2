use std::io;
use thiserror::Error;

use crate::config::errors::ConfigError;

/// Errors produced while reading a `.kcd` file.
#[derive(Debug, Error)]
pub enum KcdParseError {
    #[error("Not a valid .kcd file: {path}")]
    InvalidExtension { path: String },
    #[error("Failed to open '{path}'. \nError: {source}")]
    OpenFile {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("XML parsing error: {source}")]
    Xml {
        #[from]
        source: quick_xml::Error,
    },
    #[error("Element '{element}' is missing the '{attribute}' attribute")]
    MissingAttribute {
        element: &'static str,
        attribute: &'static str,
    },
    #[error("Attribute '{attribute}' of '{element}' has invalid value '{value}'")]
    InvalidAttribute {
        element: &'static str,
        attribute: &'static str,
        value: String,
    },
    #[error("Multiplexed signals are not supported")]
    Multiplex,
    #[error("Signal '{name}' has a bit length of zero")]
    ZeroLengthSignal { name: String },
    #[error("No Bus named '{name}' in the document")]
    BusNotFound { name: String },
    #[error("Signal '{name}' found outside a Message element")]
    StraySignal { name: String },
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors produced while writing a configuration into a `.kcd` file.
#[derive(Debug, Error)]
pub enum KcdSaveError {
    #[error("Output path must end in .kcd: {path}")]
    InvalidExtension { path: String },
    #[error("Failed to create '{path}'. \nError: {source}")]
    CreateFile {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("Failed to create directories for '{path}'. \nError: {source}")]
    CreateDirectory {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("Failed while writing '{path}'. \nError: {source}")]
    Write {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("Failed to format KCD content")]
    Format,
}
