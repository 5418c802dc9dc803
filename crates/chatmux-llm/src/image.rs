//! Image reference normalization shared by the adapters

use base64::{
    Engine as _,
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
};

use crate::types::{Content, ContentPart, Message};

const SIGNATURES: &[(&[u8], &str)] = &[
    (&[0xFF, 0xD8, 0xFF], "image/jpeg"),
    (&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A], "image/png"),
    (b"GIF87a", "image/gif"),
    (b"GIF89a", "image/gif"),
];

/// Media type inferred from magic bytes, PNG when nothing matches
pub fn sniff_media_type(bytes: &[u8]) -> &'static str {
    SIGNATURES
        .iter()
        .find(|(magic, _)| bytes.starts_with(magic))
        .map_or("image/png", |(_, media_type)| media_type)
}

fn is_passthrough(reference: &str) -> bool {
    let lower = reference.get(..8).unwrap_or(reference).to_ascii_lowercase();
    lower.starts_with("data:") || lower.starts_with("http://") || lower.starts_with("https://")
}

/// Canonical form of an image reference
///
/// Data URIs and external URLs pass through unchanged. Anything else is
/// treated as a bare payload: base64 text is kept as is, other bytes are
/// encoded, and the result is wrapped in a `data:` URI whose media type
/// comes from the payload's signature.
pub fn normalize_image_reference(reference: &str) -> String {
    if is_passthrough(reference) {
        return reference.to_owned();
    }

    let compact: String = reference.chars().filter(|c| !c.is_whitespace()).collect();

    let (payload, decoded) = match STANDARD
        .decode(&compact)
        .or_else(|_| URL_SAFE_NO_PAD.decode(compact.trim_end_matches('=')))
    {
        Ok(bytes) => (compact, bytes),
        Err(_) => (STANDARD.encode(reference.as_bytes()), reference.as_bytes().to_vec()),
    };

    format!("data:{};base64,{payload}", sniff_media_type(&decoded))
}

/// Normalize every image part of a message list in place
pub fn normalize_message_images(messages: &mut [Message]) {
    for message in messages {
        if let Content::Parts(parts) = &mut message.content {
            for part in parts {
                if let ContentPart::Image { url, .. } = part {
                    *url = normalize_image_reference(url);
                }
            }
        }
    }
}
