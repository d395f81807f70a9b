//! File-type detection for downloaded payloads.

/// Bytes needed by [`sniff_extension`].
pub const SNIFF_LEN: usize = 16;

const SIGNATURES: &[(&[u8], &str)] = &[
    (b"\x89PNG\r\n\x1a\n", "png"),
    (b"\xff\xd8\xff", "jpg"),
    (b"GIF87a", "gif"),
    (b"GIF89a", "gif"),
    (b"%PDF", "pdf"),
    (b"ID3", "mp3"),
    (b"\xff\xfb", "mp3"),
    (b"OggS", "ogg"),
    (b"FWS", "swf"),
    (b"CWS", "swf"),
    (b"ZWS", "swf"),
    (b"{\\rtf", "rtf"),
    (b"PK\x03\x04", "zip"),
];

/// Guess an extension from the leading bytes of a file.
pub fn sniff_extension(head: &[u8]) -> Option<&'static str> {
    if head.len() >= 12 && &head[..4] == b"RIFF" && &head[8..12] == b"WEBP" {
        return Some("webp");
    }
    SIGNATURES
        .iter()
        .find(|(magic, _)| head.starts_with(magic))
        .map(|(_, ext)| *ext)
}

/// Extension of the last path segment of a URL, if it looks like one.
pub fn url_extension(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let name = path.rsplit('/').next()?;
    let (_, ext) = name.rsplit_once('.')?;
    if ext.is_empty() || ext.len() > 5 || !ext.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Sniffed type first, then the URL's extension, then `bin`.
pub fn choose_extension(head: &[u8], url: &str) -> String {
    sniff_extension(head)
        .map(str::to_string)
        .or_else(|| url_extension(url))
        .unwrap_or_else(|| "bin".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sniff_known_signatures() {
        assert_eq!(sniff_extension(b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR"), Some("png"));
        assert_eq!(sniff_extension(b"\xff\xd8\xff\xe0\0\x10JFIF"), Some("jpg"));
        assert_eq!(sniff_extension(b"RIFF\0\0\0\0WEBPVP8 "), Some("webp"));
        assert_eq!(sniff_extension(b"GIF89a"), Some("gif"));
        assert_eq!(sniff_extension(b"plain text"), None);
    }

    #[test]
    fn test_url_extension_fallback() {
        assert_eq!(
            url_extension("https://d.example.net/art/foo/1/story.TXT?x=1").as_deref(),
            Some("txt")
        );
        assert_eq!(url_extension("https://d.example.net/art/foo/1/noext"), None);
        assert_eq!(choose_extension(b"once upon a time", "https://x/y/story.txt"), "txt");
        assert_eq!(choose_extension(b"GIF87a....", "https://x/y/anim.png"), "gif");
        assert_eq!(choose_extension(b"??", "https://x/y/blob"), "bin");
    }
}
