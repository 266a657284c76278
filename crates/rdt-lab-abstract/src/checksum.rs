//! 16-bit one's-complement checksum shared by data and acknowledgment frames.

/// Sums `data` as big-endian 16-bit words with end-around carry.
///
/// A trailing odd byte is treated as the high byte of a zero-padded word.
pub fn ones_complement_sum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut words = data.chunks_exact(2);

    for word in &mut words {
        sum += u32::from(u16::from_be_bytes([word[0], word[1]]));
        // Fold eagerly so the accumulator never needs more than 17 bits.
        if sum > 0xFFFF {
            sum = (sum & 0xFFFF) + 1;
        }
    }

    if let Some(&byte) = words.remainder().first() {
        sum += u32::from(byte) << 8;
        if sum > 0xFFFF {
            sum = (sum & 0xFFFF) + 1;
        }
    }

    sum as u16
}

/// The one's complement of [`ones_complement_sum`], masked to 16 bits.
pub fn internet_checksum(data: &[u8]) -> u16 {
    !ones_complement_sum(data)
}
