use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::FileError;

/// An outbound email as it travels through the dispatch pipeline.
///
/// Field names on the wire are `from`, `to`, `cc`, `bcc`, `subject`,
/// `textContent`, `htmlContent` and `attachments`. Attachment bytes are
/// carried as standard base64 strings keyed by filename. Every field is
/// optional when decoding, and `null` reads as empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EmailMessage {
    #[serde(alias = "From", deserialize_with = "null_as_default")]
    pub from: String,

    #[serde(alias = "To", deserialize_with = "null_as_default")]
    pub to: Vec<String>,

    #[serde(alias = "CC", alias = "Cc", deserialize_with = "null_as_default")]
    pub cc: Vec<String>,

    #[serde(alias = "BCC", alias = "Bcc", deserialize_with = "null_as_default")]
    pub bcc: Vec<String>,

    #[serde(alias = "Subject", deserialize_with = "null_as_default")]
    pub subject: String,

    /// Plain-text body. Empty means absent.
    #[serde(alias = "TextContent", deserialize_with = "null_as_default")]
    pub text_content: String,

    /// HTML body. Empty means absent.
    #[serde(alias = "HtmlContent", deserialize_with = "null_as_default")]
    pub html_content: String,

    /// Attachment bytes keyed by filename.
    #[serde(alias = "Attachments", with = "base64_attachments")]
    pub attachments: BTreeMap<String, Vec<u8>>,
}

impl EmailMessage {
    /// Create a message with a sender and subject and nothing else.
    pub fn new(from: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            subject: subject.into(),
            ..Self::default()
        }
    }

    /// Append a `To` recipient.
    #[must_use]
    pub fn to(mut self, address: impl Into<String>) -> Self {
        self.to.push(address.into());
        self
    }

    /// Append a `Cc` recipient.
    #[must_use]
    pub fn cc(mut self, address: impl Into<String>) -> Self {
        self.cc.push(address.into());
        self
    }

    /// Append a blind-copy recipient. Bcc addresses only appear in the SMTP
    /// envelope, never in the rendered headers.
    #[must_use]
    pub fn bcc(mut self, address: impl Into<String>) -> Self {
        self.bcc.push(address.into());
        self
    }

    #[must_use]
    pub fn text(mut self, body: impl Into<String>) -> Self {
        self.text_content = body.into();
        self
    }

    #[must_use]
    pub fn html(mut self, body: impl Into<String>) -> Self {
        self.html_content = body.into();
        self
    }

    /// Attach in-memory bytes under `filename`, replacing any previous
    /// attachment with the same name.
    #[must_use]
    pub fn attachment(mut self, filename: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.attachments.insert(filename.into(), bytes.into());
        self
    }

    /// Replace the `To` recipients.
    pub fn set_recipients(&mut self, to: Vec<String>) {
        self.to = to;
    }

    /// Read the file at `path` and attach its bytes under the file's base name.
    pub fn add_attachment(&mut self, path: impl AsRef<Path>) -> Result<(), FileError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| FileError {
            path: path.to_path_buf(),
            source,
        })?;
        let filename = path
            .file_name()
            .map_or_else(|| path.to_string_lossy(), |name| name.to_string_lossy())
            .into_owned();
        self.attachments.insert(filename, bytes);
        Ok(())
    }

    pub fn has_text(&self) -> bool {
        !self.text_content.is_empty()
    }

    pub fn has_html(&self) -> bool {
        !self.html_content.is_empty()
    }

    /// Every envelope recipient: `to`, then `cc`, then `bcc`.
    pub fn recipients(&self) -> impl Iterator<Item = &str> {
        self.to
            .iter()
            .chain(&self.cc)
            .chain(&self.bcc)
            .map(String::as_str)
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

mod base64_attachments {
    use std::collections::BTreeMap;

    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(
        attachments: &BTreeMap<String, Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_map(
            attachments
                .iter()
                .map(|(name, bytes)| (name, STANDARD.encode(bytes))),
        )
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<BTreeMap<String, Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = Option::<BTreeMap<String, String>>::deserialize(deserializer)?;
        encoded
            .unwrap_or_default()
            .into_iter()
            .map(|(name, data)| match STANDARD.decode(data.as_bytes()) {
                Ok(bytes) => Ok((name, bytes)),
                Err(e) => Err(D::Error::custom(format!("attachment {name}: {e}"))),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn builder_collects_fields() {
        let msg = EmailMessage::new("alice@example.com", "Quarterly report")
            .to("bob@example.com")
            .to("carol@example.com")
            .cc("dave@example.com")
            .bcc("audit@example.com")
            .text("see attached")
            .attachment("report.csv", b"a,b\n1,2\n".to_vec());

        assert_eq!(msg.to, vec!["bob@example.com", "carol@example.com"]);
        assert_eq!(msg.cc, vec!["dave@example.com"]);
        assert!(msg.has_text());
        assert!(!msg.has_html());
        assert_eq!(msg.attachments["report.csv"], b"a,b\n1,2\n");
    }

    #[test]
    fn recipients_spans_to_cc_and_bcc() {
        let msg = EmailMessage::new("a@example.com", "s")
            .to("to@example.com")
            .cc("cc@example.com")
            .bcc("bcc@example.com");
        let all: Vec<&str> = msg.recipients().collect();
        assert_eq!(
            all,
            vec!["to@example.com", "cc@example.com", "bcc@example.com"]
        );
    }

    #[test]
    fn set_recipients_replaces_to() {
        let mut msg = EmailMessage::new("a@example.com", "s").to("old@example.com");
        msg.set_recipients(vec!["new@example.com".into()]);
        assert_eq!(msg.to, vec!["new@example.com"]);
    }

    #[test]
    fn attachment_with_same_name_replaces_previous() {
        let msg = EmailMessage::new("a@example.com", "s")
            .attachment("a.txt", b"one".to_vec())
            .attachment("a.txt", b"two".to_vec());
        assert_eq!(msg.attachments.len(), 1);
        assert_eq!(msg.attachments["a.txt"], b"two");
    }

    #[test]
    fn add_attachment_uses_base_filename() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("invoice.pdf");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(&[0x25, 0x50, 0x44, 0x46, 0x00, 0xff]).unwrap();

        let mut msg = EmailMessage::new("a@example.com", "invoice");
        msg.add_attachment(&path).unwrap();

        assert_eq!(msg.attachments.len(), 1);
        assert_eq!(
            msg.attachments["invoice.pdf"],
            vec![0x25, 0x50, 0x44, 0x46, 0x00, 0xff]
        );
    }

    #[test]
    fn add_attachment_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.bin");

        let mut msg = EmailMessage::new("a@example.com", "s");
        let err = msg.add_attachment(&path).unwrap_err();

        assert_eq!(err.path, path);
        assert_eq!(err.source.kind(), std::io::ErrorKind::NotFound);
        assert!(msg.attachments.is_empty());
    }

    #[test]
    fn attachments_serialize_as_base64() {
        let msg = EmailMessage::new("a@example.com", "s")
            .attachment("hello.txt", b"Hello World".to_vec());
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["attachments"]["hello.txt"], "SGVsbG8gV29ybGQ=");
        assert_eq!(json["textContent"], "");
        assert!(json.get("text_content").is_none());
    }

    #[test]
    fn invalid_base64_attachment_is_rejected() {
        let json = r#"{"from":"a@example.com","attachments":{"x.bin":"***"}}"#;
        let err = serde_json::from_str::<EmailMessage>(json).unwrap_err();
        assert!(err.to_string().contains("x.bin"));
    }

    #[test]
    fn null_attachments_decode_as_empty() {
        let json = r#"{"from":"a@example.com","attachments":null}"#;
        let msg: EmailMessage = serde_json::from_str(json).unwrap();
        assert!(msg.attachments.is_empty());
    }
}
