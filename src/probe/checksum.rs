/// Calculate the Internet checksum (RFC 1071)
///
/// Sums big-endian 16-bit words, padding an odd trailing byte with a zero
/// low byte, folds carries back into the low 16 bits and returns the
/// complement. Summing a message whose checksum field is already filled in
/// yields 0.
pub fn checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;

    let mut words = data.chunks_exact(2);
    for word in &mut words {
        sum += u16::from_be_bytes([word[0], word[1]]) as u32;
    }

    // Handle odd byte
    if let [last] = words.remainder() {
        sum += (*last as u32) << 8;
    }

    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !(sum as u16)
}
