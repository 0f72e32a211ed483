//! Send-time attachment resolution.
//!
//! Stored-file and print-format descriptors carry no bytes; they are fetched
//! here and appended to the message as base64 MIME parts.

use std::{
    collections::HashMap,
    fmt::Write,
    path::{Component, Path, PathBuf},
    sync::{PoisonError, RwLock},
};

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use courier_common::{FileRef, PrintFormatRequest, QueueId};
use mailparse::MailHeaderMap;

use crate::error::RenderError;

/// File bytes plus what is needed to name them in a MIME part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub file_name: String,
    pub content_type: Option<String>,
    pub content: Vec<u8>,
}

impl StoredFile {
    /// Declared content type, else a guess from the file extension
    #[must_use]
    pub fn mime_type(&self) -> String {
        self.content_type.clone().unwrap_or_else(|| {
            mime_guess::from_path(&self.file_name)
                .first_or_octet_stream()
                .essence_str()
                .to_string()
        })
    }
}

#[async_trait]
pub trait BlobService: Send + Sync + std::fmt::Debug {
    async fn fetch(&self, file: &FileRef) -> Result<StoredFile, RenderError>;
}

/// Renders a document through a print format
#[async_trait]
pub trait PrintFormatter: Send + Sync + std::fmt::Debug {
    async fn render(&self, request: &PrintFormatRequest) -> Result<StoredFile, RenderError>;
}

/// Blob service over a site directory.
///
/// `/files/...` URLs resolve under `<root>/public/files`, `/private/files/...`
/// under `<root>/private/files`. File ids must be registered up front.
#[derive(Debug)]
pub struct FsBlobStore {
    root: PathBuf,
    files: RwLock<HashMap<String, PathBuf>>,
}

impl FsBlobStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            files: RwLock::default(),
        }
    }

    /// Make a stored-file id resolvable. Relative paths are taken from the root.
    pub fn register(&self, id: impl Into<String>, path: impl Into<PathBuf>) {
        let path = path.into();
        let path = if path.is_absolute() {
            path
        } else {
            self.root.join(path)
        };

        self.files
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.into(), path);
    }

    fn resolve(&self, file: &FileRef) -> Result<PathBuf, RenderError> {
        let blob_error = |reason: &str| RenderError::Blob {
            file: file.to_string(),
            reason: reason.to_string(),
        };

        match file {
            FileRef::Id(id) => self
                .files
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(id)
                .cloned()
                .ok_or_else(|| blob_error("no such file")),
            FileRef::Url(url) => {
                let (base, relative) = if let Some(rest) = url.strip_prefix("/private/files/") {
                    (self.root.join("private").join("files"), rest)
                } else if let Some(rest) = url.strip_prefix("/files/") {
                    (self.root.join("public").join("files"), rest)
                } else {
                    return Err(blob_error("not a site file URL"));
                };

                let relative = Path::new(relative);
                if relative
                    .components()
                    .any(|c| !matches!(c, Component::Normal(_)))
                {
                    return Err(blob_error("path escapes the files directory"));
                }

                Ok(base.join(relative))
            }
        }
    }
}

#[async_trait]
impl BlobService for FsBlobStore {
    async fn fetch(&self, file: &FileRef) -> Result<StoredFile, RenderError> {
        let path = self.resolve(file)?;

        let content = tokio::fs::read(&path).await.map_err(|e| RenderError::Blob {
            file: file.to_string(),
            reason: e.to_string(),
        })?;

        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(StoredFile {
            file_name,
            content_type: None,
            content,
        })
    }
}

/// Boundary used when a single-part message has to become multipart.
///
/// Derived from the record id so the same record always renders the same bytes.
#[must_use]
pub fn boundary_for(id: &QueueId) -> String {
    format!("=_courier_{id}")
}

fn attachment_part(boundary: &str, file: &StoredFile) -> String {
    let mut part = String::new();
    let name = file.file_name.replace('"', "");

    let _ = write!(
        part,
        "--{boundary}\r\n\
         Content-Type: {}; name=\"{name}\"\r\n\
         Content-Transfer-Encoding: base64\r\n\
         Content-Disposition: attachment; filename=\"{name}\"\r\n\r\n",
        file.mime_type()
    );

    let encoded = STANDARD.encode(&file.content);
    for line in encoded.as_bytes().chunks(76) {
        part.push_str(&String::from_utf8_lossy(line));
        part.push_str("\r\n");
    }

    part
}

/// Append `files` to `message` as attachment parts.
///
/// A `multipart/mixed` message gets the parts inserted before its closing
/// delimiter; anything else is wrapped so its original body becomes the
/// first part.
///
/// # Errors
/// [`RenderError::Message`] when the message headers cannot be parsed, or a
/// multipart message has no closing delimiter.
pub fn attach(message: &str, files: &[StoredFile], id: &QueueId) -> Result<String, RenderError> {
    if files.is_empty() {
        return Ok(message.to_string());
    }

    let (headers, body_offset) = mailparse::parse_headers(message.as_bytes())
        .map_err(|e| RenderError::Message(e.to_string()))?;
    let body = message.get(body_offset..).unwrap_or_default();

    let content_type = headers.get_first_value("Content-Type");
    let parsed = content_type.as_deref().map(mailparse::parse_content_type);

    if let Some(parsed) = &parsed
        && parsed.mimetype == "multipart/mixed"
        && let Some(boundary) = parsed.params.get("boundary")
    {
        let closing = format!("--{boundary}--");
        let Some(position) = message.rfind(&closing) else {
            return Err(RenderError::Message(format!(
                "multipart message is missing its closing delimiter {closing}"
            )));
        };

        let mut out = String::with_capacity(message.len());
        out.push_str(&message[..position]);
        if !out.ends_with('\n') {
            out.push_str("\r\n");
        }
        for file in files {
            out.push_str(&attachment_part(boundary, file));
        }
        out.push_str(&message[position..]);
        return Ok(out);
    }

    let boundary = boundary_for(id);
    let mut out = String::with_capacity(message.len() * 2);
    let mut has_mime_version = false;

    for header in &headers {
        let key = header.get_key();
        if key.eq_ignore_ascii_case("Content-Type")
            || key.eq_ignore_ascii_case("Content-Transfer-Encoding")
        {
            continue;
        }
        has_mime_version |= key.eq_ignore_ascii_case("MIME-Version");

        let _ = write!(
            out,
            "{key}: {}\r\n",
            String::from_utf8_lossy(header.get_value_raw())
        );
    }
    if !has_mime_version {
        out.push_str("MIME-Version: 1.0\r\n");
    }
    let _ = write!(
        out,
        "Content-Type: multipart/mixed; boundary=\"{boundary}\"\r\n\r\n"
    );

    let _ = write!(
        out,
        "--{boundary}\r\nContent-Type: {}\r\n",
        content_type.as_deref().unwrap_or("text/plain; charset=\"utf-8\"")
    );
    if let Some(encoding) = headers.get_first_value("Content-Transfer-Encoding") {
        let _ = write!(out, "Content-Transfer-Encoding: {encoding}\r\n");
    }
    out.push_str("\r\n");
    out.push_str(body);
    if !body.ends_with('\n') {
        out.push_str("\r\n");
    }

    for file in files {
        out.push_str(&attachment_part(&boundary, file));
    }
    let _ = write!(out, "--{boundary}--\r\n");

    Ok(out)
}
