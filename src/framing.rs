//! Response framing shared by every handler: cache validators keyed to
//! commit ids or file mtimes, conditional-GET evaluation and RFC 5987
//! Content-Disposition encoding.

use std::time::SystemTime;

use axum::http::{header, HeaderMap, HeaderValue};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

use crate::git::ResolvedCommit;

/// IMF-fixdate, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`.
const HTTP_DATE: &[BorrowedFormatItem<'_>] = format_description!(
    "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
);

pub fn http_date(moment: OffsetDateTime) -> String {
    moment
        .to_offset(time::UtcOffset::UTC)
        .format(&HTTP_DATE)
        .unwrap_or_default()
}

pub fn parse_http_date(value: &str) -> Option<OffsetDateTime> {
    PrimitiveDateTime::parse(value.trim(), &HTTP_DATE)
        .ok()
        .map(PrimitiveDateTime::assume_utc)
}

/// The `ETag` / `Last-Modified` pair attached to a response. Repo
/// content keys both to the resolved commit, static content to the
/// file's mtime, so clients actually get cache hits.
#[derive(Debug, Clone)]
pub struct Validators {
    pub etag: String,
    pub last_modified: OffsetDateTime,
}

impl Validators {
    pub fn for_commit(commit: &ResolvedCommit) -> Self {
        Self {
            etag: format!("\"{}\"", commit.id),
            last_modified: commit.committed,
        }
    }

    pub fn for_mtime(mtime: SystemTime) -> Self {
        let last_modified = OffsetDateTime::from(mtime);
        Self {
            etag: format!("\"{}\"", last_modified.unix_timestamp()),
            last_modified,
        }
    }
}

/// Evaluates `If-Modified-Since` / `If-None-Match` against the response
/// validators. Runs before any body bytes are produced.
pub fn not_modified(request_headers: &HeaderMap, validators: &Validators) -> bool {
    if let Some(since) = request_headers
        .get(header::IF_MODIFIED_SINCE)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_http_date)
    {
        // header precision is one second
        if since.unix_timestamp() >= validators.last_modified.unix_timestamp() {
            return true;
        }
    }

    if let Some(if_none_match) = request_headers
        .get(header::IF_NONE_MATCH)
        .and_then(|value| value.to_str().ok())
    {
        if if_none_match.trim() == "*" || if_none_match.contains(validators.etag.as_str()) {
            return true;
        }
    }

    false
}

/// Stamps `Date`, `Last-Modified` and `ETag` onto a response.
pub fn apply_validators(headers: &mut HeaderMap, validators: &Validators) {
    for (name, value) in [
        (header::DATE, http_date(OffsetDateTime::now_utc())),
        (header::LAST_MODIFIED, http_date(validators.last_modified)),
        (header::ETAG, validators.etag.clone()),
    ] {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(name, value);
        }
    }
}

/// Characters a filename may contain and still be emitted verbatim
/// inside a quoted `filename=` parameter (RFC 5987 attr-char).
const PLAIN_NAME_EXTRA: &[u8] = b"!#$%&+-.^_`{}~";

const DISPOSITION_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'!')
    .remove(b'#')
    .remove(b'$')
    .remove(b'&')
    .remove(b'+')
    .remove(b'-')
    .remove(b'.')
    .remove(b'^')
    .remove(b'_')
    .remove(b'`')
    .remove(b'{')
    .remove(b'}')
    .remove(b'~');

fn is_plain_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || PLAIN_NAME_EXTRA.contains(&b))
}

/// Builds an `attachment` Content-Disposition for the recommended
/// filename. Plain names go out verbatim; anything else carries both a
/// Latin-1 fallback (offending codepoints replaced by `_`) and the
/// percent-encoded `filename*` form.
pub fn content_disposition(filename: &str) -> HeaderValue {
    if is_plain_name(filename) {
        if let Ok(value) = HeaderValue::from_str(&format!("attachment; filename=\"{filename}\"")) {
            return value;
        }
    }

    let mut value = Vec::with_capacity(filename.len() * 2 + 48);
    value.extend_from_slice(b"attachment; filename=\"");
    for c in filename.chars() {
        value.push(match u8::try_from(u32::from(c)) {
            Ok(byte) if byte > 0x1f && byte != b'"' && byte != b'\\' => byte,
            _ => b'_',
        });
    }
    value.extend_from_slice(b"\"; filename*=utf-8''");
    value.extend_from_slice(utf8_percent_encode(filename, DISPOSITION_ENCODE).to_string().as_bytes());

    HeaderValue::from_bytes(&value).unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}
