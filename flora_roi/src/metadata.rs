// THEORY:
// Each photograph of the dataset comes with an XML side record. The ROI engine
// needs only three of its elements: `<Content>` (the organ tag),
// `<ObservationId>` (groups photographs of the same plant) and, when present,
// `<MediaId>`. The reader below extracts exactly those, by element name, and
// ignores the rest of the document.

use crate::core_modules::organ::OrganTag;
use crate::error::{RoiError, RoiResult};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservationRecord {
    pub organ: OrganTag,
    pub observation_id: Option<String>,
    pub media_id: Option<String>,
}

/// One image and its side record, ready for dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageJob {
    pub image_path: PathBuf,
    pub metadata_path: PathBuf,
    pub record: ObservationRecord,
}

impl ImageJob {
    /// File name of the image, used for output naming and logs.
    pub fn file_name(&self) -> String {
        self.image_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// File stem of the side record.
    pub fn record_stem(&self) -> String {
        self.metadata_path
            .file_stem()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Text content of the first `<name>...</name>` element, trimmed.
fn element_text<'a>(document: &'a str, name: &str) -> Option<&'a str> {
    let open = format!("<{name}>");
    let close = format!("</{name}>");
    let start = document.find(&open)? + open.len();
    let end = start + document[start..].find(&close)?;
    Some(document[start..end].trim())
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

pub fn parse_record(document: &str) -> ObservationRecord {
    let field = |name: &str| element_text(document, name).filter(|t| !t.is_empty()).map(unescape);
    ObservationRecord {
        organ: field("Content").map_or(OrganTag::Unknown, |c| OrganTag::parse(&c)),
        observation_id: field("ObservationId"),
        media_id: field("MediaId"),
    }
}

pub fn read_record(path: &Path) -> RoiResult<ObservationRecord> {
    let bytes = std::fs::read(path).map_err(|e| RoiError::Metadata {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    // Older records of the dataset are Latin-1; lossy decoding keeps the ASCII tags intact.
    let document = String::from_utf8_lossy(&bytes);
    Ok(parse_record(&document))
}
