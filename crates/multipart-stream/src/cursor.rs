//! Byte search helpers used by the frame decoder.

pub const CRLF: &[u8] = b"\r\n";

/// Returns the offset of the first `needle` in `haystack` at or after `start`.
pub fn find(haystack: &[u8], needle: &[u8], start: usize) -> Option<usize> {
    if start > haystack.len() {
        return None;
    }
    if needle.is_empty() {
        return Some(start);
    }
    haystack[start..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|offset| offset + start)
}

pub fn starts_with_at(haystack: &[u8], prefix: &[u8], at: usize) -> bool {
    haystack
        .get(at..)
        .map(|rest| rest.starts_with(prefix))
        .unwrap_or(false)
}

/// Outcome of scanning the header lines that follow a boundary token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderBlock {
    /// The terminating blank line has not arrived yet.
    Incomplete,
    Complete {
        content_length: Option<usize>,
        body_start: usize,
    },
}

/// Parses `Name: value\r\n` lines starting at `start` up to the blank line.
///
/// Only `Content-Length` is interpreted; other headers are skipped. When the
/// header appears more than once the last parseable value wins.
pub fn parse_header_block(data: &[u8], start: usize) -> HeaderBlock {
    let mut content_length = None;
    let mut pos = start;
    loop {
        if starts_with_at(data, CRLF, pos) {
            return HeaderBlock::Complete {
                content_length,
                body_start: pos + CRLF.len(),
            };
        }
        let Some(line_end) = find(data, CRLF, pos) else {
            return HeaderBlock::Incomplete;
        };
        if let Some(length) = parse_content_length(&data[pos..line_end]) {
            content_length = Some(length);
        }
        pos = line_end + CRLF.len();
    }
}

/// Reads the value of a single `Content-Length` header line.
pub fn parse_content_length(line: &[u8]) -> Option<usize> {
    let colon = line.iter().position(|&b| b == b':')?;
    let (name, value) = line.split_at(colon);
    let name = std::str::from_utf8(name).ok()?.trim();
    if !name.eq_ignore_ascii_case("content-length") {
        return None;
    }
    std::str::from_utf8(&value[1..]).ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_respects_start_offset() {
        let data = b"abcabc";
        assert_eq!(find(data, b"abc", 0), Some(0));
        assert_eq!(find(data, b"abc", 1), Some(3));
        assert_eq!(find(data, b"abc", 4), None);
        assert_eq!(find(data, b"abc", 7), None);
    }

    #[test]
    fn header_block_waits_for_blank_line() {
        let partial = b"Content-Length: 12\r\n";
        assert_eq!(parse_header_block(partial, 0), HeaderBlock::Incomplete);

        let split_crlf = b"Content-Length: 12\r\n\r";
        assert_eq!(parse_header_block(split_crlf, 0), HeaderBlock::Incomplete);

        let complete = b"Content-Length: 12\r\n\r\n{}";
        assert_eq!(
            parse_header_block(complete, 0),
            HeaderBlock::Complete {
                content_length: Some(12),
                body_start: 22,
            }
        );
    }

    #[test]
    fn header_names_are_case_insensitive_and_others_ignored() {
        let data = b"X-Part: 1\r\ncontent-LENGTH:7\r\n\r\n";
        assert_eq!(
            parse_header_block(data, 0),
            HeaderBlock::Complete {
                content_length: Some(7),
                body_start: data.len(),
            }
        );
    }

    #[test]
    fn unparseable_length_is_none() {
        assert_eq!(parse_content_length(b"Content-Length: lots"), None);
        assert_eq!(parse_content_length(b"Content-Type: application/json"), None);
        assert_eq!(parse_content_length(b"no colon here"), None);
    }
}
