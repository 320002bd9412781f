use std::borrow::Cow;

/// Control bytes that still count as text.
const ALLOWED_CONTROL: [u8; 6] = [8, 9, 10, 12, 13, 27];

/// Classify a blob as binary.
///
/// Any NUL byte makes it binary. Otherwise it is binary when non-printable
/// bytes outnumber one in every 128 printable ones.
pub fn is_binary(data: &[u8]) -> bool {
    let mut printable: usize = 0;
    let mut nonprintable: usize = 0;

    for &byte in data {
        match byte {
            0 => return true,
            127 => nonprintable += 1,
            b if b < 32 && !ALLOWED_CONTROL.contains(&b) => nonprintable += 1,
            _ => printable += 1,
        }
    }

    (printable >> 7) < nonprintable
}

/// Split text into lines on `\n` or `\r\n`.
///
/// A final line break does not produce an empty trailing line, and empty
/// text has no lines at all.
pub fn split_lines(text: &str) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }

    let body = text.strip_suffix('\n').unwrap_or(text);
    body.split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line).to_string())
        .collect()
}

/// Decode blob bytes as UTF-8, replacing invalid sequences.
pub fn decode(data: &[u8]) -> Cow<'_, str> {
    let text = String::from_utf8_lossy(data);
    if let Cow::Owned(_) = text {
        log::debug!("lossy UTF-8 decode of {} byte blob", data.len());
    }
    text
}

/// Lines of a blob, or `None` when the blob is binary.
pub fn blob_lines(data: &[u8]) -> Option<Vec<String>> {
    if is_binary(data) {
        return None;
    }
    Some(split_lines(&decode(data)))
}
