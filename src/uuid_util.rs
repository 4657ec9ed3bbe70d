/// Parse a UUID string (with or without dashes, case-insensitive) into 16
/// bytes. Only the hex shape is validated here; version and variant are the
/// caller's concern.
#[inline]
pub fn parse_uuid(uuid_str: &str) -> std::io::Result<[u8; 16]> {
    let mut bytes = [0u8; 16];
    let mut count = 0usize;
    let mut first_nibble: Option<u8> = None;
    for &c in uuid_str.as_bytes() {
        let hex = match c {
            b'0'..=b'9' => c - b'0',
            b'a'..=b'f' => c - b'a' + 10,
            b'A'..=b'F' => c - b'A' + 10,
            b'-' => continue,
            _ => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("Invalid uuid: {uuid_str}"),
                ));
            }
        };
        if let Some(first) = first_nibble.take() {
            if count == 16 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("Invalid uuid: {uuid_str}"),
                ));
            }
            bytes[count] = (first << 4) | hex;
            count += 1;
        } else {
            first_nibble = Some(hex);
        }
    }
    if first_nibble.is_some() || count != 16 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Invalid uuid: {uuid_str}"),
        ));
    }

    Ok(bytes)
}

/// Whether 16 raw bytes look like a version-4 UUID: version nibble 4 and
/// RFC 4122 variant bits. Used for wire-format detection, not authentication.
#[inline]
pub fn is_uuid_v4_shape(bytes: &[u8]) -> bool {
    bytes.len() == 16 && (bytes[6] >> 4) == 4 && (bytes[8] >> 6) == 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_uuid_with_dashes() {
        let bytes = parse_uuid("550e8400-e29b-41d4-a716-446655440000").unwrap();
        assert_eq!(bytes[0], 0x55);
        assert_eq!(bytes[1], 0x0e);
        assert_eq!(bytes[15], 0x00);
    }

    #[test]
    fn test_parse_uuid_without_dashes() {
        let bytes = parse_uuid("550e8400e29b41d4a716446655440000").unwrap();
        assert_eq!(bytes[0], 0x55);
        assert_eq!(bytes[6], 0x41);
    }

    #[test]
    fn test_parse_uuid_case_insensitive() {
        let lower = parse_uuid("7b79e5e1-0eb0-4a88-8b0f-60ebf2a0ab1c").unwrap();
        let upper = parse_uuid("7B79E5E1-0EB0-4A88-8B0F-60EBF2A0AB1C").unwrap();
        assert_eq!(lower, upper);
    }

    #[test]
    fn test_parse_uuid_rejects_bad_input() {
        assert!(parse_uuid("").is_err());
        assert!(parse_uuid("550e8400-e29b-41d4-a716").is_err());
        assert!(parse_uuid("550e8400-e29b-41d4-a716-44665544000z").is_err());
        assert!(parse_uuid("550e8400e29b41d4a71644665544000000").is_err());
    }

    #[test]
    fn test_v4_shape() {
        let v4 = parse_uuid("7b79e5e1-0eb0-4a88-8b0f-60ebf2a0ab1c").unwrap();
        assert!(is_uuid_v4_shape(&v4));

        // version 1
        let v1 = parse_uuid("550e8400-e29b-11d4-a716-446655440000").unwrap();
        assert!(!is_uuid_v4_shape(&v1));

        // wrong variant (upper 2 bits of byte 8 are 11 instead of 10)
        let bad_variant = parse_uuid("550e8400-e29b-41d4-c716-446655440000").unwrap();
        assert!(!is_uuid_v4_shape(&bad_variant));

        assert!(!is_uuid_v4_shape(&[0u8; 15]));
    }
}
