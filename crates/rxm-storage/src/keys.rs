use rxm_types::RecordId;

/// Record tables: `id(8)`, big-endian so lexicographic order = id order.
pub fn record_key(id: RecordId) -> [u8; 8] {
    id.to_be_bytes()
}

/// `migration_log` partition: `seq(8)`, big-endian append order.
pub fn log_key(seq: u64) -> [u8; 8] {
    seq.to_be_bytes()
}

/// `meta` partition: `table_utf8 ++ \x00 ++ label_utf8`
///
/// The null delimiter keeps a counter for "patients" from colliding with a
/// table whose name merely starts with "patients".
pub fn meta_key(table: &str, label: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(table.len() + 1 + label.len());
    buf.extend_from_slice(table.as_bytes());
    buf.push(0x00);
    buf.extend_from_slice(label.as_bytes());
    buf
}

/// Decode the id out of a record table key.
pub fn decode_u64_key(key: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = key.get(..8)?.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_keys_sort_by_id() {
        assert!(record_key(1) < record_key(2));
        assert!(record_key(255) < record_key(256));
        assert!(record_key(2) < record_key(1000));
    }

    #[test]
    fn log_keys_decode_back() {
        assert_eq!(decode_u64_key(&log_key(42)), Some(42));
        assert_eq!(decode_u64_key(&[1, 2, 3]), None);
    }

    #[test]
    fn meta_keys_do_not_bleed_across_tables() {
        let a = meta_key("patients", "next_id");
        let b = meta_key("patients_archive", "next_id");
        assert!(!b.starts_with(&meta_key("patients", "")));
        assert!(a.starts_with(&meta_key("patients", "")));
    }
}
