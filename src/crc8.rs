//! Table driven CRC-8 (polynomial 0x07, seed 0x00, no reflection) used for the
//! trailing checksum byte of every frame.

const POLYNOMIAL: u8 = 0x07;

/// Lookup table, built at compile time.
pub const CRC8_TABLE: [u8; 256] = generate_table();

/// Builds the 256 entry lookup table by reducing every index MSB first over 8 rounds.
pub const fn generate_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u8;
        let mut bit = 0;
        while bit < 8 {
            if crc & 0x80 != 0 {
                crc = (crc << 1) ^ POLYNOMIAL;
            } else {
                crc <<= 1;
            }
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Computes the checksum over `data`.
pub fn compute_checksum(data: &[u8]) -> u8 {
    data.iter()
        .fold(0u8, |crc, byte| CRC8_TABLE[(crc ^ byte) as usize])
}
