/* Integrity */

/// CRC8 over `data`: polynomial 0x07 (x^8 + x^2 + x + 1), MSB-first,
/// initial value 0xFF. Every outgoing frame carries this over its first
/// nine bytes.
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc: u8 = 0xFF;

    for byte in data {
        crc ^= byte;

        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ 0x07
            } else {
                crc << 1
            };
        }
    }

    crc
}

/* Two's complement */

/// Interprets the low `bits` bits of `value` as a two's-complement signed
/// integer.
pub fn from_twos_complement(value: u16, bits: u32) -> i32 {
    let value = i32::from(value);

    if value & (1 << (bits - 1)) != 0 {
        value - (1 << bits)
    } else {
        value
    }
}

/// Encodes `value` as a `bits`-wide two's-complement field. Out-of-range
/// values are truncated to the field width.
pub fn to_twos_complement(value: i32, bits: u32) -> u16 {
    (value & ((1 << bits) - 1)) as u16
}

/* Field packing */

pub(crate) fn be_u16(hi: u8, lo: u8) -> u16 {
    (u16::from(hi) << 8) | u16::from(lo)
}

pub(crate) fn split_be_u16(value: u16) -> (u8, u8) {
    ((value >> 8) as u8, (value & 0x00FF) as u8)
}

/// Packs a 3-bit mode/state field and a 3-bit source field into one byte,
/// the layout shared by the launcher, emergency-stop and hand-brake fields.
pub(crate) fn pack_mode_field(mode: u8, source: u8) -> u8 {
    ((source & 0b111) << 3) | (mode & 0b111)
}

/// Splits a mode byte into its (mode, source) parts.
pub(crate) fn unpack_mode_field(byte: u8) -> (u8, u8) {
    (byte & 0b0000_0111, (byte & 0b0011_1000) >> 3)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc8_is_deterministic() {
        let frame = [0x07, 0xF9, 0xFF, 0x02, 0x00, 0x02, 0x7B, 0x00, 0x01];

        let first = crc8(&frame);
        let second = crc8(&frame);

        assert_eq!(first, second);
    }

    #[test]
    fn crc8_known_values() {
        // Init value over empty input
        assert_eq!(crc8(&[]), 0xFF);

        // Single bytes, verified against a bitwise reference of poly 0x07
        assert_eq!(crc8(&[0x00]), 0xF3);
        assert_eq!(crc8(&[0xFF]), 0x00);
    }

    #[test]
    fn crc8_differs_on_corruption() {
        let frame = [0x00, 0xB4, 0x12, 0x01, 0x00, 0x00, 0x10, 0x20, 0x01];
        let mut corrupted = frame;
        corrupted[6] ^= 0x01;

        assert_ne!(crc8(&frame), crc8(&corrupted));
    }

    #[test]
    fn twos_complement_round_trip() {
        for bits in [4u32, 12, 16] {
            let min = -(1i32 << (bits - 1));
            let max = (1i32 << (bits - 1)) - 1;

            for value in min..=max {
                assert_eq!(
                    from_twos_complement(to_twos_complement(value, bits), bits),
                    value,
                    "bits = {bits}"
                );
            }
        }
    }

    #[test]
    fn twos_complement_decode() {
        assert_eq!(from_twos_complement(0xFFF, 12), -1);
        assert_eq!(from_twos_complement(0x800, 12), -2048);
        assert_eq!(from_twos_complement(0x7FF, 12), 2047);
        assert_eq!(from_twos_complement(0xFFFF, 16), -1);
        assert_eq!(from_twos_complement(0x8000, 16), -32768);
    }

    #[test]
    fn mode_field_packing() {
        let byte = pack_mode_field(0x01, 0x05);

        assert_eq!(byte, 0b0010_1001);
        assert_eq!(unpack_mode_field(byte), (0x01, 0x05));
    }

    #[test]
    fn be_u16_split_and_join() {
        assert_eq!(split_be_u16(0x07F9), (0x07, 0xF9));
        assert_eq!(be_u16(0x07, 0xF9), 0x07F9);
    }
}
