//! Pure parsers for modem reply text.
//!
//! Every function here takes the raw accumulated reply from the command
//! engine and extracts structured data. A reply that does not match the
//! expected grammar produces a sentinel (`-1` / `None`), never an error:
//! callers poll continuously and must shrug off a garbled exchange.

/// One SMS as reported by a `+CMGR:` / `+CMGRD:` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmsEnvelope {
    pub status: String,
    pub sender: String,
    /// Local timestamp in modem form, e.g. `25/12/25,17:48:42-32`.
    pub timestamp: String,
    pub content: String,
}

/// Extract the RSSI value from a `+CSQ: <rssi>,<ber>` reply. `-1` if absent.
pub fn signal_quality(reply: &str) -> i32 {
    let Some(start) = reply.find("+CSQ: ") else {
        return -1;
    };
    let rest = &reply[start + 6..];
    let Some(end) = rest.find(',') else {
        return -1;
    };
    rest[..end].trim().parse().unwrap_or(-1)
}

/// Message count from a `+CPMS: "SM",used,total,...` reply.
///
/// The count is the second comma-delimited field of the prefix line.
/// Returns `-1` when the line or field is missing or non-numeric.
pub fn storage_count(reply: &str) -> i32 {
    let Some(start) = reply.find("+CPMS:") else {
        return -1;
    };
    let line = reply[start..].lines().next().unwrap_or("");
    let mut fields = line.split(',');
    fields.next(); // +CPMS: "SM"
    match fields.next() {
        Some(count) => count.trim().parse().unwrap_or(-1),
        None => -1,
    }
}

/// Parse a `+CMGR:` / `+CMGRD:` reply into an [`SmsEnvelope`].
///
/// Header grammar: `+CMGR: "REC READ","+16512524765","","25/12/25,17:48:42-32"`.
/// Fields may contain commas inside their quotes, so the parameter list is
/// tokenized quote-aware rather than split on commas. Token 3 (reserved) is
/// skipped. Content is everything after the header line up to the trailing
/// `OK` sentinel. Returns `None` if the header prefix is missing or fewer
/// than four tokens are recovered.
pub fn sms_envelope(reply: &str) -> Option<SmsEnvelope> {
    let header_start = reply.find("+CMGR:").or_else(|| reply.find("+CMGRD:"))?;
    let after = &reply[header_start..];
    let line_end = after.find('\n').unwrap_or(after.len());
    let header = &after[..line_end];

    let params = header.split_once(':')?.1.trim();
    let tokens = split_quoted(params);
    if tokens.len() < 4 {
        return None;
    }

    let mut content = "";
    if line_end < after.len() {
        let body = &after[line_end + 1..];
        let body_end = body
            .find("\r\n\r\nOK")
            .or_else(|| body.find("\r\nOK"))
            .unwrap_or(body.len());
        content = body[..body_end].trim();
    }

    Some(SmsEnvelope {
        status: tokens[0].clone(),
        sender: tokens[1].clone(),
        timestamp: tokens[3].clone(),
        content: content.to_string(),
    })
}

/// Network time from a `+CCLK: "26/01/05,19:30:45-32"` reply: the first
/// quoted field, or `None` when the quotes are absent.
pub fn network_time(reply: &str) -> Option<String> {
    let start = reply.find('"')?;
    let rest = &reply[start + 1..];
    let end = rest.find('"')?;
    let time = &rest[..end];
    if time.is_empty() {
        None
    } else {
        Some(time.to_string())
    }
}

/// Storage index from an unsolicited `+CMTI: "SM",25` line.
pub fn unsolicited_sms_index(line: &str) -> Option<u32> {
    let line = line.trim();
    if !line.starts_with("+CMTI:") {
        return None;
    }
    let index = line.rsplit(',').next()?;
    index.trim().parse().ok()
}

/// Split a comma-separated AT parameter list, treating double-quoted
/// substrings as single tokens (quotes removed, inner commas preserved).
fn split_quoted(params: &str) -> Vec<String> {
    let bytes = params.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;
    while pos < bytes.len() && tokens.len() < 8 {
        if bytes[pos] == b'"' {
            pos += 1;
            let start = pos;
            while pos < bytes.len() && bytes[pos] != b'"' {
                pos += 1;
            }
            tokens.push(params[start..pos].to_string());
            if pos < bytes.len() {
                pos += 1; // closing quote
            }
            while pos < bytes.len() && (bytes[pos] == b',' || bytes[pos] == b' ') {
                pos += 1;
            }
        } else {
            let start = pos;
            while pos < bytes.len() && bytes[pos] != b',' {
                pos += 1;
            }
            tokens.push(params[start..pos].trim().to_string());
            if pos < bytes.len() {
                pos += 1; // comma
            }
        }
    }
    tokens
}
