//! Stateless HTTP text utilities: header lookup, status-line verification and
//! bounded integer conversions.

/// Result of a header lookup.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum HeaderLookup {
    /// No header with that name exists in the block.
    NotFound,
    /// The header exists but its value does not fit the capture buffer.
    /// Nothing is written; truncated values are never returned.
    TooSmall,
    /// The header was found; its value occupies this many bytes of the
    /// capture buffer.
    Found(usize),
}

/// Locate `name` in an HTTP header block and copy its value into `out`.
///
/// A name only matches immediately after a CRLF, so occurrences inside the
/// status line or inside other header values are ignored. Matching is
/// case-insensitive; optional spaces are allowed around the colon; trailing
/// spaces are trimmed from the value. Passing an empty `out` probes for
/// presence: a header with a non-empty value then reports
/// [`HeaderLookup::TooSmall`].
pub fn header_value(headers: &[u8], name: &str, out: &mut [u8]) -> HeaderLookup {
    let name = name.as_bytes();
    let mut pos = 0;
    while let Some(crlf) = find(&headers[pos..], b"\r\n") {
        let line = &headers[pos + crlf + 2..];
        pos += crlf + 2;
        if line.len() < name.len() || !line[..name.len()].eq_ignore_ascii_case(name) {
            continue;
        }
        let mut rest = &line[name.len()..];
        while rest.first() == Some(&b' ') {
            rest = &rest[1..];
        }
        if rest.first() != Some(&b':') {
            continue;
        }
        rest = &rest[1..];
        while rest.first() == Some(&b' ') {
            rest = &rest[1..];
        }
        // Value runs to the end of the line. A line that never terminates is
        // indistinguishable from a value we cannot capture in full.
        let Some(end) = find(rest, b"\r\n") else {
            return HeaderLookup::TooSmall;
        };
        let mut value = &rest[..end];
        while value.last() == Some(&b' ') {
            value = &value[..value.len() - 1];
        }
        if value.len() > out.len() {
            return HeaderLookup::TooSmall;
        }
        out[..value.len()].copy_from_slice(value);
        return HeaderLookup::Found(value.len());
    }
    HeaderLookup::NotFound
}

/// Whether `name` occurs as a header in the block, regardless of its value.
pub fn header_present(headers: &[u8], name: &str) -> bool {
    !matches!(header_value(headers, name, &mut []), HeaderLookup::NotFound)
}

/// Result of checking a buffered response head.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum StatusLine {
    /// The terminating blank line has not arrived yet.
    Incomplete,
    /// The head is complete but the status token is missing, non-numeric or
    /// outside `100..=599`.
    Malformed,
    /// The head is complete and well-formed.
    Complete {
        /// The 3-digit status code.
        status: u16,
        /// Length of the header block including the terminating blank line.
        header_len: usize,
    },
}

/// Verify that `buf` holds a complete response head and extract the status.
///
/// The head is complete once `\r\n\r\n` appears. The status is the first
/// space-delimited numeric token after the leading protocol token, which
/// covers `HTTP/1.1 200 OK` as well as the legacy `ICY 200 OK` form.
pub fn verify_status_line(buf: &[u8]) -> StatusLine {
    let Some(end) = find(buf, b"\r\n\r\n") else {
        return StatusLine::Incomplete;
    };
    let head = &buf[..end + 2];
    let Some(space) = head.iter().position(|&b| b == b' ') else {
        return StatusLine::Malformed;
    };
    let mut token = &head[space..];
    while token.first() == Some(&b' ') {
        token = &token[1..];
    }
    let digits = token
        .iter()
        .take_while(|b| b.is_ascii_digit())
        .count();
    if digits == 0 || digits > 3 {
        return StatusLine::Malformed;
    }
    // The token must be delimited, not run into the line ending mid-number.
    match token.get(digits) {
        Some(&b' ') | Some(&b'\r') => {}
        _ => return StatusLine::Malformed,
    }
    let Ok(status) = parse_dec(&token[..digits]) else {
        return StatusLine::Malformed;
    };
    if !(100..=599).contains(&status) {
        return StatusLine::Malformed;
    }
    StatusLine::Complete {
        status: status as u16,
        header_len: end + 4,
    }
}

/// Parsing failed: no digits, too many digits, or overflow.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct IntParseError;

/// Parse the leading decimal digits of `s` into a `u32`.
///
/// Stops at the first non-digit. At least one digit is required and at most
/// ten are accepted; any overflow is rejected.
pub fn parse_dec(s: &[u8]) -> Result<u32, IntParseError> {
    let mut value: u32 = 0;
    let mut digits = 0;
    for &b in s {
        if !b.is_ascii_digit() {
            break;
        }
        digits += 1;
        if digits > 10 {
            return Err(IntParseError);
        }
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_add((b - b'0') as u32))
            .ok_or(IntParseError)?;
    }
    if digits == 0 {
        return Err(IntParseError);
    }
    Ok(value)
}

/// Parse the leading hexadecimal digits of `s` into a `u32`.
///
/// An optional `0x`/`0X` prefix is accepted. Stops at the first non-hex
/// character (which is how chunk-size extensions are skipped). At least one
/// digit is required and at most eight are accepted.
pub fn parse_hex(s: &[u8]) -> Result<u32, IntParseError> {
    let s = if s.len() >= 2 && s[0] == b'0' && (s[1] == b'x' || s[1] == b'X') {
        &s[2..]
    } else {
        s
    };
    let mut value: u32 = 0;
    let mut digits = 0;
    for &b in s {
        let nibble = match b {
            b'0'..=b'9' => b - b'0',
            b'a'..=b'f' => b - b'a' + 10,
            b'A'..=b'F' => b - b'A' + 10,
            _ => break,
        };
        digits += 1;
        if digits > 8 {
            return Err(IntParseError);
        }
        value = (value << 4) | nibble as u32;
    }
    if digits == 0 {
        return Err(IntParseError);
    }
    Ok(value)
}

/// Format `value` as uppercase hex into `out`, returning the used prefix.
pub fn format_hex(value: u32, out: &mut [u8; 8]) -> &str {
    const DIGITS: &[u8; 16] = b"0123456789ABCDEF";
    let mut tmp = [b'0'; 8];
    let mut i = 8;
    let mut v = value;
    loop {
        i -= 1;
        tmp[i] = DIGITS[(v & 0xF) as usize];
        v >>= 4;
        if v == 0 {
            break;
        }
    }
    let len = 8 - i;
    out[..len].copy_from_slice(&tmp[i..]);
    // Only ASCII hex digits were written.
    core::str::from_utf8(&out[..len]).unwrap_or("0")
}

/// Format `value` as decimal into `out`, returning the used prefix.
pub fn format_dec(value: u32, out: &mut [u8; 10]) -> &str {
    let mut tmp = [b'0'; 10];
    let mut i = 10;
    let mut v = value;
    loop {
        i -= 1;
        tmp[i] = b'0' + (v % 10) as u8;
        v /= 10;
        if v == 0 {
            break;
        }
    }
    let len = 10 - i;
    out[..len].copy_from_slice(&tmp[i..]);
    core::str::from_utf8(&out[..len]).unwrap_or("0")
}

/// First occurrence of `needle` in `haystack`.
pub(crate) fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
