//! Turns an [`EmailMessage`] into a transport-ready `lettre` message.

use courier_core::{DeliveryError, EmailMessage};
use lettre::Message;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};

/// Which body layout a message renders to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    /// `multipart/alternative` with the plain text first and the HTML part
    /// last, so clients prefer the HTML.
    Alternative,
    /// A single `text/plain` body.
    PlainText,
    /// A single `text/html` body. Also used when both bodies are empty.
    Html,
}

impl BodyKind {
    pub fn select(message: &EmailMessage) -> Self {
        match (message.has_text(), message.has_html()) {
            (true, true) => Self::Alternative,
            (true, false) => Self::PlainText,
            (false, _) => Self::Html,
        }
    }
}

enum Body {
    Single(SinglePart),
    Alternative(MultiPart),
}

fn body(message: &EmailMessage) -> Body {
    match BodyKind::select(message) {
        BodyKind::Alternative => Body::Alternative(
            MultiPart::alternative()
                .singlepart(SinglePart::plain(message.text_content.clone()))
                .singlepart(SinglePart::html(message.html_content.clone())),
        ),
        BodyKind::PlainText => Body::Single(SinglePart::plain(message.text_content.clone())),
        BodyKind::Html => Body::Single(SinglePart::html(message.html_content.clone())),
    }
}

fn mailbox(field: &str, address: &str) -> Result<Mailbox, DeliveryError> {
    address
        .parse()
        .map_err(|e| DeliveryError::Render(format!("invalid {field} address {address:?}: {e}")))
}

/// Build the MIME message.
///
/// `From`, `To`, `Cc` and `Subject` are copied verbatim. Bcc recipients are
/// only added to the envelope. Attachments become `application/octet-stream`
/// parts of a `multipart/mixed` wrapper, named by their map key.
pub fn render(message: &EmailMessage) -> Result<Message, DeliveryError> {
    let mut builder = Message::builder()
        .from(mailbox("from", &message.from)?)
        .subject(&message.subject);
    for address in &message.to {
        builder = builder.to(mailbox("to", address)?);
    }
    for address in &message.cc {
        builder = builder.cc(mailbox("cc", address)?);
    }
    for address in &message.bcc {
        builder = builder.bcc(mailbox("bcc", address)?);
    }

    let built = if message.attachments.is_empty() {
        match body(message) {
            Body::Single(part) => builder.singlepart(part),
            Body::Alternative(parts) => builder.multipart(parts),
        }
    } else {
        let octet_stream = ContentType::parse("application/octet-stream")
            .map_err(|e| DeliveryError::Render(format!("attachment content type: {e}")))?;
        let mut mixed = match body(message) {
            Body::Single(part) => MultiPart::mixed().singlepart(part),
            Body::Alternative(parts) => MultiPart::mixed().multipart(parts),
        };
        for (filename, bytes) in &message.attachments {
            mixed = mixed.singlepart(
                Attachment::new(filename.clone()).body(bytes.clone(), octet_stream.clone()),
            );
        }
        builder.multipart(mixed)
    };

    built.map_err(|e| DeliveryError::Render(format!("failed to build email: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> EmailMessage {
        EmailMessage::new("sender@example.com", "Test Subject").to("recipient@example.com")
    }

    fn formatted(message: &EmailMessage) -> String {
        String::from_utf8_lossy(&render(message).unwrap().formatted()).into_owned()
    }

    #[test]
    fn select_body_kind() {
        assert_eq!(BodyKind::select(&base().text("t").html("h")), BodyKind::Alternative);
        assert_eq!(BodyKind::select(&base().text("t")), BodyKind::PlainText);
        assert_eq!(BodyKind::select(&base().html("h")), BodyKind::Html);
        assert_eq!(BodyKind::select(&base()), BodyKind::Html);
    }

    #[test]
    fn both_bodies_render_html_primary_alternative() {
        let out = formatted(&base().text("plain body").html("<p>html body</p>"));
        assert!(out.contains("multipart/alternative"));
        let plain = out.find("text/plain").expect("plain part");
        let html = out.find("text/html").expect("html part");
        assert!(plain < html, "html part must come last");
    }

    #[test]
    fn text_only_renders_plain() {
        let out = formatted(&base().text("just text"));
        assert!(out.contains("text/plain"));
        assert!(!out.contains("text/html"));
        assert!(!out.contains("multipart"));
    }

    #[test]
    fn html_only_renders_html() {
        let out = formatted(&base().html("<h1>Hello</h1>"));
        assert!(out.contains("text/html"));
        assert!(!out.contains("text/plain"));
    }

    #[test]
    fn empty_bodies_render_html() {
        let out = formatted(&base());
        assert!(out.contains("text/html"));
        assert!(!out.contains("text/plain"));
    }

    #[test]
    fn headers_are_copied() {
        let out = formatted(
            &base()
                .to("second@example.com")
                .cc("copy@example.com")
                .text("body"),
        );
        assert!(out.contains("Subject: Test Subject"));
        assert!(out.contains("sender@example.com"));
        assert!(out.contains("recipient@example.com"));
        assert!(out.contains("second@example.com"));
        assert!(out.contains("Cc: copy@example.com"));
    }

    #[test]
    fn bcc_only_in_envelope() {
        let message = render(&base().bcc("hidden@example.com").text("body")).unwrap();
        let out = String::from_utf8_lossy(&message.formatted()).into_owned();
        assert!(!out.contains("hidden@example.com"));
        assert!(
            message
                .envelope()
                .to()
                .iter()
                .any(|a| a.to_string() == "hidden@example.com")
        );
    }

    #[test]
    fn attachments_become_mixed_parts() {
        let out = formatted(
            &base()
                .text("see attached")
                .html("<p>see attached</p>")
                .attachment("report.csv", b"a,b\n".to_vec())
                .attachment("logo.png", vec![0x89, 0x50, 0x4e, 0x47]),
        );
        assert!(out.contains("multipart/mixed"));
        assert!(out.contains("multipart/alternative"));
        assert!(out.contains("application/octet-stream"));
        assert!(out.contains("report.csv"));
        assert!(out.contains("logo.png"));
    }

    #[test]
    fn invalid_from_is_rejected() {
        let mut message = base();
        message.from = "not-valid".to_owned();
        let err = render(&message).unwrap_err();
        assert!(matches!(err, DeliveryError::Render(_)));
        assert!(err.to_string().contains("from"));
    }

    #[test]
    fn invalid_recipient_is_rejected() {
        let err = render(&base().cc("nope")).unwrap_err();
        assert!(matches!(err, DeliveryError::Render(_)));
    }

    #[test]
    fn no_recipients_is_rejected() {
        let message = EmailMessage::new("sender@example.com", "nobody");
        assert!(matches!(render(&message), Err(DeliveryError::Render(_))));
    }
}
