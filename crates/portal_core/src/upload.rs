//! Upload validation against an extension/MIME allow-list.
//!
//! Checks run in a fixed order, cheapest first: empty input, size, type,
//! then content sniffing.

use uuid::Uuid;

use crate::error::PortalError;
use crate::types::FileKind;

pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;
const MAX_FILENAME_LEN: usize = 100;
const SNIFF_LEN: usize = 512;

/// Expected leading bytes for an extension.
#[derive(Debug, Clone, Copy)]
enum Signature {
    Prefix(&'static [u8]),
    /// RIFF container with a form type at offset 8.
    Riff(&'static [u8]),
    /// UTF-8 text without NUL bytes.
    Text,
}

struct FileTypeRule {
    extension: &'static str,
    kind: FileKind,
    mime_types: &'static [&'static str],
    signature: Signature,
}

const OLE2: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0];
const ZIP: &[u8] = b"PK\x03\x04";

const RULES: &[FileTypeRule] = &[
    FileTypeRule {
        extension: "jpg",
        kind: FileKind::Image,
        mime_types: &["image/jpeg", "image/pjpeg"],
        signature: Signature::Prefix(&[0xFF, 0xD8, 0xFF]),
    },
    FileTypeRule {
        extension: "jpeg",
        kind: FileKind::Image,
        mime_types: &["image/jpeg", "image/pjpeg"],
        signature: Signature::Prefix(&[0xFF, 0xD8, 0xFF]),
    },
    FileTypeRule {
        extension: "png",
        kind: FileKind::Image,
        mime_types: &["image/png"],
        signature: Signature::Prefix(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]),
    },
    FileTypeRule {
        extension: "gif",
        kind: FileKind::Image,
        mime_types: &["image/gif"],
        signature: Signature::Prefix(b"GIF8"),
    },
    FileTypeRule {
        extension: "bmp",
        kind: FileKind::Image,
        mime_types: &["image/bmp", "image/x-ms-bmp"],
        signature: Signature::Prefix(b"BM"),
    },
    FileTypeRule {
        extension: "webp",
        kind: FileKind::Image,
        mime_types: &["image/webp"],
        signature: Signature::Riff(b"WEBP"),
    },
    FileTypeRule {
        extension: "pdf",
        kind: FileKind::Document,
        mime_types: &["application/pdf"],
        signature: Signature::Prefix(b"%PDF"),
    },
    FileTypeRule {
        extension: "doc",
        kind: FileKind::Document,
        mime_types: &["application/msword"],
        signature: Signature::Prefix(OLE2),
    },
    FileTypeRule {
        extension: "docx",
        kind: FileKind::Document,
        mime_types: &["application/vnd.openxmlformats-officedocument.wordprocessingml.document"],
        signature: Signature::Prefix(ZIP),
    },
    FileTypeRule {
        extension: "rtf",
        kind: FileKind::Document,
        mime_types: &["application/rtf", "text/rtf"],
        signature: Signature::Prefix(b"{\\rtf"),
    },
    FileTypeRule {
        extension: "xls",
        kind: FileKind::Spreadsheet,
        mime_types: &["application/vnd.ms-excel"],
        signature: Signature::Prefix(OLE2),
    },
    FileTypeRule {
        extension: "xlsx",
        kind: FileKind::Spreadsheet,
        mime_types: &["application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"],
        signature: Signature::Prefix(ZIP),
    },
    FileTypeRule {
        extension: "csv",
        kind: FileKind::Spreadsheet,
        mime_types: &["text/csv", "application/csv", "application/vnd.ms-excel", "text/plain"],
        signature: Signature::Text,
    },
    FileTypeRule {
        extension: "ppt",
        kind: FileKind::Presentation,
        mime_types: &["application/vnd.ms-powerpoint"],
        signature: Signature::Prefix(OLE2),
    },
    FileTypeRule {
        extension: "pptx",
        kind: FileKind::Presentation,
        mime_types: &["application/vnd.openxmlformats-officedocument.presentationml.presentation"],
        signature: Signature::Prefix(ZIP),
    },
    FileTypeRule {
        extension: "txt",
        kind: FileKind::Text,
        mime_types: &["text/plain"],
        signature: Signature::Text,
    },
    FileTypeRule {
        extension: "md",
        kind: FileKind::Text,
        mime_types: &["text/markdown", "text/x-markdown", "text/plain"],
        signature: Signature::Text,
    },
];

fn rule_for(extension: &str) -> Option<&'static FileTypeRule> {
    RULES.iter().find(|r| r.extension == extension)
}

/// Every extension the validator knows how to check.
pub fn supported_extensions() -> Vec<String> {
    RULES.iter().map(|r| r.extension.to_string()).collect()
}

#[derive(Debug, Clone)]
pub struct UploadPolicy {
    pub max_bytes: u64,
    /// Lower-case extensions without the dot. Must be a subset of
    /// [`supported_extensions`]; unknown entries are ignored.
    pub allowed_extensions: Vec<String>,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            allowed_extensions: supported_extensions(),
        }
    }
}

/// What the client sent.
#[derive(Debug, Clone)]
pub struct FileDescriptor {
    pub filename: String,
    pub declared_mime: Option<String>,
    pub content: Vec<u8>,
}

/// Accepted upload metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedUpload {
    pub filename: String,
    pub original_filename: String,
    pub extension: String,
    pub kind: FileKind,
    pub mime_type: String,
    pub size_bytes: u64,
}

impl UploadPolicy {
    pub fn validate(&self, file: &FileDescriptor) -> Result<ValidatedUpload, PortalError> {
        let original = base_name(&file.filename);
        if original.is_empty() {
            return Err(PortalError::Validation("filename is required".into()));
        }
        if file.content.is_empty() {
            return Err(PortalError::Validation("file is empty".into()));
        }

        let size = file.content.len() as u64;
        if size > self.max_bytes {
            return Err(PortalError::FileTooLarge {
                size,
                max: self.max_bytes,
            });
        }

        let extension = extension_of(original)
            .ok_or_else(|| PortalError::UnsupportedType(format!("{original} has no extension")))?;
        let rule = rule_for(&extension)
            .filter(|_| self.allowed_extensions.iter().any(|e| e == &extension))
            .ok_or_else(|| PortalError::UnsupportedType(format!(".{extension} files are not allowed")))?;

        if let Some(declared) = declared_mime(file.declared_mime.as_deref()) {
            if !rule.mime_types.contains(&declared.as_str()) {
                return Err(PortalError::UnsupportedType(format!(
                    "{declared} is not a valid type for .{extension}"
                )));
            }
        }

        if !signature_matches(rule.signature, &file.content) {
            return Err(PortalError::ContentMismatch(format!(
                "content is not a .{extension} file"
            )));
        }

        Ok(ValidatedUpload {
            filename: sanitize_filename(original),
            original_filename: original.to_string(),
            extension,
            kind: rule.kind,
            mime_type: rule.mime_types[0].to_string(),
            size_bytes: size,
        })
    }
}

/// Strip any client-supplied directory components.
fn base_name(name: &str) -> &str {
    let trimmed = name.trim();
    trimmed
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or(trimmed)
        .trim()
}

fn extension_of(name: &str) -> Option<String> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Normalized declared MIME, or None when the client did not declare one.
fn declared_mime(raw: Option<&str>) -> Option<String> {
    let mime = raw?.split(';').next()?.trim().to_ascii_lowercase();
    if mime.is_empty() || mime == "application/octet-stream" {
        None
    } else {
        Some(mime)
    }
}

fn signature_matches(signature: Signature, content: &[u8]) -> bool {
    match signature {
        Signature::Prefix(magic) => content.starts_with(magic),
        Signature::Riff(form) => {
            content.len() >= 12 && content.starts_with(b"RIFF") && &content[8..12] == form
        }
        Signature::Text => {
            let head = &content[..content.len().min(SNIFF_LEN)];
            if head.contains(&0) {
                return false;
            }
            match std::str::from_utf8(head) {
                Ok(_) => true,
                // A multi-byte sequence cut by the sniff window is fine;
                // one cut by the end of the file is not.
                Err(e) => e.error_len().is_none() && content.len() > SNIFF_LEN,
            }
        }
    }
}

/// Keep `[A-Za-z0-9._-]`, replace the rest with `_`, cap the length while
/// preserving the extension.
pub fn sanitize_filename(name: &str) -> String {
    let safe: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if safe.len() <= MAX_FILENAME_LEN {
        return safe;
    }
    match safe.rsplit_once('.') {
        Some((stem, ext)) if ext.len() + 1 < MAX_FILENAME_LEN => {
            let keep = MAX_FILENAME_LEN - ext.len() - 1;
            format!("{}.{}", &stem[..keep.min(stem.len())], ext)
        }
        _ => safe[..MAX_FILENAME_LEN].to_string(),
    }
}

/// Blob key for a stored upload.
pub fn storage_key(file_id: Uuid, kind: FileKind, extension: &str, proposal_id: Option<Uuid>) -> String {
    match proposal_id {
        Some(pid) => format!("proposals/{pid}/{}/{file_id}.{extension}", kind.as_str()),
        None => format!("general/{}/{file_id}.{extension}", kind.as_str()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn descriptor(name: &str, mime: Option<&str>, content: &[u8]) -> FileDescriptor {
        FileDescriptor {
            filename: name.into(),
            declared_mime: mime.map(str::to_string),
            content: content.to_vec(),
        }
    }

    fn pdf_bytes() -> Vec<u8> {
        b"%PDF-1.7\n1 0 obj\n".to_vec()
    }

    #[test]
    fn accepts_valid_pdf() {
        let ok = UploadPolicy::default()
            .validate(&descriptor("Q3 Brief.pdf", Some("application/pdf"), &pdf_bytes()))
            .unwrap();
        assert_eq!(ok.extension, "pdf");
        assert_eq!(ok.kind, FileKind::Document);
        assert_eq!(ok.filename, "Q3_Brief.pdf");
        assert_eq!(ok.original_filename, "Q3 Brief.pdf");
        assert_eq!(ok.mime_type, "application/pdf");
    }

    #[test]
    fn rejects_oversized_before_type_checks() {
        let policy = UploadPolicy {
            max_bytes: 4,
            ..Default::default()
        };
        let err = policy
            .validate(&descriptor("malware.exe", None, b"MZ\x90\x00\x03"))
            .unwrap_err();
        assert!(matches!(err, PortalError::FileTooLarge { size: 5, max: 4 }));
    }

    #[test]
    fn rejects_unknown_extension() {
        let err = UploadPolicy::default()
            .validate(&descriptor("run.exe", None, b"MZ"))
            .unwrap_err();
        assert!(matches!(err, PortalError::UnsupportedType(_)));
    }

    #[test]
    fn rejects_extension_outside_policy() {
        let policy = UploadPolicy {
            allowed_extensions: vec!["pdf".into()],
            ..Default::default()
        };
        let err = policy
            .validate(&descriptor("notes.txt", Some("text/plain"), b"hello"))
            .unwrap_err();
        assert!(matches!(err, PortalError::UnsupportedType(_)));
    }

    #[test]
    fn rejects_mime_disagreeing_with_extension() {
        let err = UploadPolicy::default()
            .validate(&descriptor("report.pdf", Some("image/png"), &pdf_bytes()))
            .unwrap_err();
        assert!(matches!(err, PortalError::UnsupportedType(_)));
    }

    #[test]
    fn octet_stream_and_params_are_tolerated() {
        let policy = UploadPolicy::default();
        assert!(policy
            .validate(&descriptor("a.pdf", Some("application/octet-stream"), &pdf_bytes()))
            .is_ok());
        assert!(policy
            .validate(&descriptor("a.txt", Some("text/plain; charset=utf-8"), b"hi"))
            .is_ok());
    }

    #[test]
    fn sniffing_catches_renamed_binaries() {
        let err = UploadPolicy::default()
            .validate(&descriptor("photo.png", Some("image/png"), &pdf_bytes()))
            .unwrap_err();
        assert!(matches!(err, PortalError::ContentMismatch(_)));

        let err = UploadPolicy::default()
            .validate(&descriptor("notes.txt", Some("text/plain"), b"\x00\x01binary"))
            .unwrap_err();
        assert!(matches!(err, PortalError::ContentMismatch(_)));
    }

    #[test]
    fn text_sniff_tolerates_only_window_truncation() {
        let policy = UploadPolicy::default();
        let err = policy
            .validate(&descriptor("price.txt", Some("text/plain"), b"total \xE2\x82"))
            .unwrap_err();
        assert!(matches!(err, PortalError::ContentMismatch(_)));

        // The euro sign straddles the window edge but is complete in the file.
        let mut long = vec![b'a'; SNIFF_LEN - 1];
        long.extend_from_slice("€ tail".as_bytes());
        assert!(policy
            .validate(&descriptor("price.txt", Some("text/plain"), &long))
            .is_ok());
    }

    #[test]
    fn office_open_xml_needs_zip_header() {
        let policy = UploadPolicy::default();
        assert!(policy
            .validate(&descriptor("deck.pptx", None, b"PK\x03\x04rest"))
            .is_ok());
        assert!(matches!(
            policy.validate(&descriptor("deck.pptx", None, b"plain text")),
            Err(PortalError::ContentMismatch(_))
        ));
    }

    #[test]
    fn webp_checks_riff_form_type() {
        let policy = UploadPolicy::default();
        assert!(policy
            .validate(&descriptor("a.webp", None, b"RIFF\x00\x00\x00\x00WEBPVP8 "))
            .is_ok());
        assert!(policy
            .validate(&descriptor("a.webp", None, b"RIFF\x00\x00\x00\x00WAVEfmt "))
            .is_err());
    }

    #[test]
    fn empty_inputs_are_validation_errors() {
        let policy = UploadPolicy::default();
        assert!(matches!(
            policy.validate(&descriptor("  ", None, b"x")),
            Err(PortalError::Validation(_))
        ));
        assert!(matches!(
            policy.validate(&descriptor("a.txt", None, b"")),
            Err(PortalError::Validation(_))
        ));
    }

    #[test]
    fn directory_components_are_stripped() {
        let ok = UploadPolicy::default()
            .validate(&descriptor("..\\..\\etc/notes.md", None, b"# hi"))
            .unwrap();
        assert_eq!(ok.original_filename, "notes.md");
    }

    #[test]
    fn sanitize_caps_length_and_keeps_extension() {
        let long = format!("{}.docx", "a".repeat(150));
        let safe = sanitize_filename(&long);
        assert_eq!(safe.len(), 100);
        assert!(safe.ends_with(".docx"));
        assert_eq!(sanitize_filename("my <script>.txt"), "my__script_.txt");
    }

    #[test]
    fn storage_key_layout() {
        let id = Uuid::nil();
        assert_eq!(
            storage_key(id, FileKind::Image, "png", None),
            format!("general/image/{id}.png")
        );
        let pid = Uuid::new_v4();
        assert_eq!(
            storage_key(id, FileKind::Text, "md", Some(pid)),
            format!("proposals/{pid}/text/{id}.md")
        );
    }

    proptest! {
        #[test]
        fn anything_over_the_ceiling_is_too_large(max in 1u64..256, extra in 1usize..64) {
            let policy = UploadPolicy { max_bytes: max, ..Default::default() };
            let mut content = b"%PDF".to_vec();
            content.resize(max as usize + extra, b'x');
            let result = policy.validate(&descriptor("big.pdf", Some("application/pdf"), &content));
            let is_too_large = matches!(result, Err(PortalError::FileTooLarge { .. }));
            prop_assert!(is_too_large);
        }
    }
}
