use percent_encoding::percent_decode_str;
use sha2::Digest as _;
use unicode_normalization::UnicodeNormalization as _;
use url::Url;

/// Upper bound for a sanitized name, extension included.
pub const MAX_NAME_LEN: usize = 250;

const ELLIPSIS: &str = "...";

/// Turns an arbitrary title into a single safe path segment.
///
/// Accents are decomposed to their ASCII base letters, anything outside
/// `[A-Za-z0-9_-()[]., ]` is dropped, and the result is capped at
/// [`MAX_NAME_LEN`] characters without cutting into the extension. A title that
/// loses every character falls back to `untitled-<hash>`.
pub fn sanitize(raw: &str) -> String {
    let ascii = raw
        .nfkd()
        .filter(|c| c.is_ascii() && !c.is_ascii_control())
        .filter(|c| is_allowed(*c))
        .collect::<String>();
    let mut name = ascii.trim().to_owned();

    if name.is_empty() || name.chars().all(|c| c == '.') {
        name = untitled(raw);
    }
    if is_windows_reserved_name(&name) {
        let idx = name.find('.').unwrap_or(name.len());
        name.insert(idx, '_');
    }

    cap_keeping_extension(&name, MAX_NAME_LEN)
}

/// Shortens a directory name for filesystems with a small per-component limit.
/// The cut is marked with `...` so it shows up in listings.
pub fn trim_path_part(name: &str, max_len: Option<usize>) -> String {
    let Some(max_len) = max_len else {
        return name.to_owned();
    };
    if name.chars().count() <= max_len {
        return name.to_owned();
    }
    let keep = max_len.saturating_sub(ELLIPSIS.len());
    let mut out = name.chars().take(keep).collect::<String>();
    out.push_str(&ELLIPSIS[..max_len.min(ELLIPSIS.len())]);
    out
}

/// Splits `name` into stem and extension the way most file managers do: the
/// extension starts at the last dot, and a leading dot is part of the stem.
pub fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if name[..idx].chars().any(|c| c != '.') => (&name[..idx], &name[idx..]),
        _ => (name, ""),
    }
}

/// Extension of `name` without the dot, lowercased.
pub fn extension_of(name: &str) -> Option<String> {
    let (_, ext) = split_extension(name);
    let ext = ext.trim_start_matches('.');
    if ext.is_empty() {
        None
    } else {
        Some(ext.to_ascii_lowercase())
    }
}

/// Reads the attachment name from a `Content-Disposition` header value.
pub fn filename_from_content_disposition(value: &str) -> Option<String> {
    let mut plain = None;
    let mut extended = None;

    for param in value.split(';').map(str::trim) {
        let Some((key, val)) = param.split_once('=') else {
            continue;
        };
        match key.trim().to_ascii_lowercase().as_str() {
            "filename*" => {
                // RFC 5987: charset'lang'percent-encoded
                let encoded = val.trim().rsplit('\'').next().unwrap_or_default();
                extended = Some(percent_decode_str(encoded).decode_utf8_lossy().into_owned());
            }
            "filename" => {
                plain = Some(val.trim().trim_matches('"').to_owned());
            }
            _ => {}
        }
    }

    let name = extended.or(plain)?;
    if name.trim().is_empty() {
        return None;
    }
    Some(sanitize(&name))
}

/// Derives a file name from the last path segment of `url`.
pub fn filename_from_url(url: &Url) -> String {
    let path = url.path();
    let last = path.rsplit('/').next().unwrap_or_default();
    let decoded = percent_decode_str(last).decode_utf8_lossy();
    let decoded = decoded.trim();

    let mut name = if decoded.is_empty() {
        let host = url.host_str().unwrap_or_default();
        let dir = path.strip_suffix('/').unwrap_or(path);
        format!("{host}{dir}").replace('/', "_")
    } else {
        // decoding may have produced new separators
        decoded.rsplit('/').next().unwrap_or(decoded).to_owned()
    };

    let (_, ext) = split_extension(&name);
    if ext.len() < 2 || ext.len() > 5 {
        name.push_str(".html");
    }

    sanitize(&name)
}

fn is_allowed(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '(' | ')' | '[' | ']' | '.' | ',' | ' ')
}

fn untitled(raw: &str) -> String {
    let digest = sha2::Sha256::digest(raw.as_bytes());
    format!("untitled-{}", &hex::encode(digest)[..8])
}

fn is_windows_reserved_name(name: &str) -> bool {
    const RESERVED: &[&str] = &[
        "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
        "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
    ];
    let stem = name.split('.').next().unwrap_or_default().trim_end();
    RESERVED.contains(&stem.to_ascii_uppercase().as_str())
}

fn cap_keeping_extension(name: &str, max_len: usize) -> String {
    if name.chars().count() <= max_len {
        return name.to_owned();
    }
    let (stem, ext) = split_extension(name);
    let ext_len = ext.chars().count();
    if ext_len >= max_len {
        return name.chars().take(max_len).collect();
    }
    let mut out = stem.chars().take(max_len - ext_len).collect::<String>();
    out.push_str(ext);
    out
}
