//! sendlink wire protocol: message types and version.

use serde::{Deserialize, Serialize};

/// Current protocol version. Carried in the metadata frame and the TCP handshake.
pub const PROTOCOL_VERSION: u8 = 1;

/// All channel message types. Encoding is bincode; framing is length-prefix (see wire module).
///
/// Every payload is sealed with the transfer key; only the frame kind, version
/// and chunk sequence number travel in the clear.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    /// First frame from the sender: sealed [`FileMetadata`].
    Metadata { protocol_version: u8, sealed: Vec<u8> },
    /// One sealed slice of the file.
    Chunk { seq: u64, sealed: Vec<u8> },
    /// End of stream: sealed [`Completion`].
    Done { sealed: Vec<u8> },
    /// Receiver's confirmation after verifying `Done`: sealed file digest.
    Ack { sealed: Vec<u8> },
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Metadata { .. } => "metadata",
            Message::Chunk { .. } => "chunk",
            Message::Done { .. } => "done",
            Message::Ack { .. } => "ack",
        }
    }
}

/// File description sent once at transfer start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub name: String,
    pub size: u64,
    pub mime_type: String,
}

/// Fallback name when the sender's name has no usable final component.
pub const FALLBACK_FILE_NAME: &str = "download";

impl FileMetadata {
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
            mime_type: "application/octet-stream".to_string(),
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }

    /// Final path component of `name`, safe to join onto a local directory.
    pub fn sanitized_name(&self) -> String {
        let last = self
            .name
            .rsplit(|c| c == '/' || c == '\\')
            .next()
            .unwrap_or("")
            .trim();
        let cleaned: String = last.chars().filter(|c| !c.is_control()).collect();
        if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
            FALLBACK_FILE_NAME.to_string()
        } else {
            cleaned
        }
    }
}

/// End-of-stream summary. Lets the receiver detect a truncated or altered file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    pub chunks: u64,
    pub bytes: u64,
    /// SHA-256 of the whole plaintext file.
    pub digest: [u8; 32],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitized_name_strips_directories() {
        assert_eq!(FileMetadata::new("report.pdf", 1).sanitized_name(), "report.pdf");
        assert_eq!(
            FileMetadata::new("../../etc/passwd", 1).sanitized_name(),
            "passwd"
        );
        assert_eq!(
            FileMetadata::new("C:\\Users\\me\\photo.jpg", 1).sanitized_name(),
            "photo.jpg"
        );
    }

    #[test]
    fn sanitized_name_falls_back() {
        for name in ["", "..", ".", "dir/", "  ", "\u{7}"] {
            assert_eq!(
                FileMetadata::new(name, 0).sanitized_name(),
                FALLBACK_FILE_NAME,
                "{name:?}"
            );
        }
    }

    #[test]
    fn default_mime_type() {
        let m = FileMetadata::new("a.bin", 3);
        assert_eq!(m.mime_type, "application/octet-stream");
        assert_eq!(m.with_mime_type("text/plain").mime_type, "text/plain");
    }
}
