//! Block check calculations used by XMODEM.

/// Arithmetic checksum of the classic XMODEM variant: the payload bytes
/// summed modulo 256.
pub fn checksum8(data: &[u8]) -> u8 {
    data.iter()
        .fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// CRC-16/XMODEM (poly 0x1021, init 0x0000, no reflection).
pub fn crc16_xmodem(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= u16::from(byte) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum8_wraps() {
        assert_eq!(checksum8(&[]), 0);
        assert_eq!(checksum8(&[0x01, 0x02, 0x03]), 0x06);
        assert_eq!(checksum8(&[0xFF, 0x02]), 0x01);
        assert_eq!(checksum8(&[0x1A; 128]), 0x00);
    }

    #[test]
    fn test_checksum8_is_order_independent() {
        let a = [0x10, 0x80, 0xF0, 0x03];
        let b = [0xF0, 0x03, 0x10, 0x80];
        assert_eq!(checksum8(&a), checksum8(&b));
    }

    #[test]
    fn test_crc16_xmodem_check_value() {
        assert_eq!(crc16_xmodem(b"123456789"), 0x31C3);
        assert_eq!(crc16_xmodem(&[]), 0x0000);
    }
}
