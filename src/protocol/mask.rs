//! Payload masking (RFC 6455 Section 5.3).
//!
//! Every frame a client sends carries a fresh 4-byte key; the payload is
//! XORed with the key repeated. Applying the same key twice restores the
//! original bytes.

use crate::error::Result;

/// Draw a masking key from the operating system's random source.
///
/// # Errors
///
/// Returns `Error::Io` if the random source is unavailable.
pub fn generate_mask() -> Result<[u8; 4]> {
    let mut key = [0u8; 4];
    getrandom::getrandom(&mut key)?;
    Ok(key)
}

/// XOR `data` with `mask`, starting at key offset 0.
#[inline]
pub fn apply_mask(data: &mut [u8], mask: [u8; 4]) {
    let mask_u32 = u32::from_ne_bytes(mask);
    let mut chunks = data.chunks_exact_mut(4);
    for chunk in &mut chunks {
        let val = u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) ^ mask_u32;
        chunk.copy_from_slice(&val.to_ne_bytes());
    }
    for (byte, key) in chunks.into_remainder().iter_mut().zip(mask) {
        *byte ^= key;
    }
}
