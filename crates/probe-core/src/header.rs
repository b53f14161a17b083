//! Raw capture file header sniffing.

/// Raw OFLOW capture files begin with this ASCII literal plus a terminating
/// newline.
pub const OFLOW_FILE_MAGIC: &[u8] = b"%%ORBFLOW1.0.0%%";

/// True if `prefix` (the first bytes read from a file) identifies it as an
/// OFLOW capture.
pub fn is_oflow_file(prefix: &[u8]) -> bool {
    prefix.len() >= OFLOW_FILE_MAGIC.len() && &prefix[..OFLOW_FILE_MAGIC.len()] == OFLOW_FILE_MAGIC
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn recognizes_header() {
        let mut buf = OFLOW_FILE_MAGIC.to_vec();
        buf.push(b'\n');
        buf.extend_from_slice(b"trailing data");
        assert!(is_oflow_file(&buf));
    }

    #[test]
    fn rejects_short_or_mismatched_prefix() {
        assert!(!is_oflow_file(b"short"));
        assert!(!is_oflow_file(b"%%NOTORBFLOW1.0%%"));
    }
}
