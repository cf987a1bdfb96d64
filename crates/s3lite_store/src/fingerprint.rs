//! Content fingerprints compatible with S3 ETags.

/// Returns the lowercase hex MD5 digest of `body`.
pub fn content_hash(body: &[u8]) -> String {
    format!("{:x}", md5::compute(body))
}

/// Returns the fingerprint S3 reports for a single-part upload of `body`:
/// the hex MD5 digest wrapped in double quotes.
pub fn content_fingerprint(body: &[u8]) -> String {
    format!("\"{}\"", content_hash(body))
}
