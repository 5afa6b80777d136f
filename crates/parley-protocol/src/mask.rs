//! Payload masking.
//!
//! Client-to-server frames XOR every payload byte `i` with `key[i % 4]`.
//! Masking is its own inverse, so the same function masks and unmasks.

/// Apply (or remove) a masking key in place.
#[inline]
pub fn apply_mask(buf: &mut [u8], mask: [u8; 4]) {
    let mut chunks = buf.chunks_exact_mut(4);
    for chunk in &mut chunks {
        for (byte, key) in chunk.iter_mut().zip(mask) {
            *byte ^= key;
        }
    }
    for (byte, key) in chunks.into_remainder().iter_mut().zip(mask) {
        *byte ^= key;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn reference_mask(buf: &mut [u8], mask: [u8; 4]) {
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte ^= mask[i % 4];
        }
    }

    #[test]
    fn rfc_example_unmasks_hello() {
        // RFC 6455 section 5.7, single-frame masked text message.
        let mut payload = [0x7f, 0x9f, 0x4d, 0x51, 0x58];
        apply_mask(&mut payload, [0x37, 0xfa, 0x21, 0x3d]);
        assert_eq!(&payload, b"Hello");
    }

    #[test]
    fn empty_buffer_is_untouched() {
        let mut payload: [u8; 0] = [];
        apply_mask(&mut payload, [1, 2, 3, 4]);
        assert!(payload.is_empty());
    }

    #[test]
    fn zero_key_is_identity() {
        let mut payload = *b"unchanged";
        apply_mask(&mut payload, [0; 4]);
        assert_eq!(&payload, b"unchanged");
    }

    proptest! {
        #[test]
        fn matches_bytewise_definition(data in proptest::collection::vec(any::<u8>(), 0..300), key in any::<[u8; 4]>()) {
            let mut fast = data.clone();
            let mut slow = data;
            apply_mask(&mut fast, key);
            reference_mask(&mut slow, key);
            prop_assert_eq!(fast, slow);
        }

        #[test]
        fn masking_twice_restores_plaintext(data in proptest::collection::vec(any::<u8>(), 0..300), key in any::<[u8; 4]>()) {
            let mut buf = data.clone();
            apply_mask(&mut buf, key);
            apply_mask(&mut buf, key);
            prop_assert_eq!(buf, data);
        }
    }
}
