//! Attachment descriptors stored on a queue record.
//!
//! Inline attachments were embedded into the stored message when it was
//! enqueued. File and print-format descriptors are resolved at send time.

use serde::{Deserialize, Serialize};

/// Reference to a file held by the blob service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileRef {
    /// Stored-file record identifier
    Id(String),
    /// Public or private file URL, e.g. `/files/report.pdf`
    Url(String),
}

impl std::fmt::Display for FileRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Id(id) => write!(f, "file id {id}"),
            Self::Url(url) => write!(f, "file url {url}"),
        }
    }
}

/// Directive to render a document through a print format and attach the output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrintFormatRequest {
    pub doctype: String,
    pub name: String,
    #[serde(default)]
    pub print_format: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub lang: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Attachment {
    Inline {
        file_name: String,
        #[serde(default)]
        content_type: Option<String>,
        content: Vec<u8>,
    },
    File(FileRef),
    PrintFormat(PrintFormatRequest),
}

impl Attachment {
    /// Whether the bytes are already carried by the descriptor
    #[must_use]
    pub const fn has_content(&self) -> bool {
        matches!(self, Self::Inline { .. })
    }
}
