//! Length-prefixed primitives shared by several payload kinds: strings
//! (`u16` length + raw UTF-8) and string-keyed maps (`u16` count then
//! length-prefixed key/value pairs, written in sorted key order to match the
//! original's `std::map` iteration order).

use std::collections::BTreeMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{SnapError, SnapResult};

/// Writes a length-prefixed UTF-8 string.
pub fn write_string(buf: &mut BytesMut, s: &str) {
    let bytes = s.as_bytes();
    buf.put_u16_le(bytes.len() as u16);
    buf.put_slice(bytes);
}

/// Reads a length-prefixed UTF-8 string.
pub fn read_string(bytes: &mut Bytes) -> SnapResult<String> {
    if bytes.len() < 2 {
        return Err(SnapError::Protocol("truncated string length".into()));
    }
    let len = bytes.get_u16_le() as usize;
    if bytes.len() < len {
        return Err(SnapError::Protocol("truncated string payload".into()));
    }
    let raw = bytes.split_to(len);
    String::from_utf8(raw.to_vec())
        .map_err(|e| SnapError::Protocol(format!("invalid UTF-8 in string: {e}")))
}

/// Writes a string-keyed map: `u16` count then length-prefixed key/value
/// pairs in key-sorted order (deterministic, matching `BTreeMap`'s natural
/// iteration).
pub fn write_map(buf: &mut BytesMut, map: &BTreeMap<String, String>) {
    buf.put_u16_le(map.len() as u16);
    for (k, v) in map {
        write_string(buf, k);
        write_string(buf, v);
    }
}

/// Reads a string-keyed map written by [`write_map`].
pub fn read_map(bytes: &mut Bytes) -> SnapResult<BTreeMap<String, String>> {
    if bytes.len() < 2 {
        return Err(SnapError::Protocol("truncated map count".into()));
    }
    let count = bytes.get_u16_le();
    let mut map = BTreeMap::new();
    for _ in 0..count {
        let key = read_string(bytes)?;
        let value = read_string(bytes)?;
        map.insert(key, value);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_roundtrip() {
        let mut buf = BytesMut::new();
        write_string(&mut buf, "hello world");
        let mut frozen = buf.freeze();
        assert_eq!(read_string(&mut frozen).unwrap(), "hello world");
    }

    #[test]
    fn empty_string_roundtrip() {
        let mut buf = BytesMut::new();
        write_string(&mut buf, "");
        let mut frozen = buf.freeze();
        assert_eq!(read_string(&mut frozen).unwrap(), "");
    }

    #[test]
    fn map_roundtrip_preserves_entries() {
        let mut map = BTreeMap::new();
        map.insert("mac".to_string(), "00:11:22:33:44:55".to_string());
        map.insert("hostName".to_string(), "living-room".to_string());
        map.insert("version".to_string(), "0.1.0".to_string());

        let mut buf = BytesMut::new();
        write_map(&mut buf, &map);
        let mut frozen = buf.freeze();
        let decoded = read_map(&mut frozen).unwrap();
        assert_eq!(decoded, map);
    }

    #[test]
    fn map_roundtrip_sorted_order_is_stable() {
        let mut buf = BytesMut::new();
        let map: BTreeMap<String, String> = [("b", "2"), ("a", "1"), ("c", "3")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        write_map(&mut buf, &map);

        // Two independently-constructed maps with the same entries must
        // serialize identically, since BTreeMap iterates in sorted order.
        let mut buf2 = BytesMut::new();
        let map2: BTreeMap<String, String> = [("c", "3"), ("a", "1"), ("b", "2")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        write_map(&mut buf2, &map2);

        assert_eq!(buf, buf2);
    }

    #[test]
    fn read_string_rejects_truncated_payload() {
        let mut buf = BytesMut::new();
        buf.put_u16_le(10);
        buf.put_slice(b"short");
        let mut frozen = buf.freeze();
        assert!(read_string(&mut frozen).is_err());
    }
}
