use flowsector::{DpiError, PayloadReader};

#[test]
fn u16_u32_reads_are_bounded() {
    let reader = PayloadReader::new(&[1, 2, 3, 4]);
    assert_eq!(reader.u16_be(0).unwrap(), 0x0102);
    assert_eq!(reader.u16_be(2).unwrap(), 0x0304);
    assert_eq!(reader.u32_be(0).unwrap(), 0x0102_0304);
    assert!(matches!(reader.u16_be(3), Err(DpiError::Truncated)));
    assert!(matches!(reader.u32_be(1), Err(DpiError::Truncated)));
    assert!(matches!(reader.u32_be(usize::MAX - 1), Err(DpiError::Truncated)));
}

fn encode(host: &str) -> Vec<u8> {
    let mut out = Vec::new();
    for label in host.split('.') {
        out.push(label.len() as u8);
        out.extend_from_slice(label.as_bytes());
    }
    out.push(0);
    out
}

#[test]
fn name_length_counts_labels_and_terminator() {
    let name = encode("www.example.com");
    let reader = PayloadReader::new(&name);
    assert_eq!(reader.name_length(0), 17);
}

#[test]
fn name_length_of_root_is_one() {
    let reader = PayloadReader::new(&[0x00]);
    assert_eq!(reader.name_length(0), 1);
}

#[test]
fn name_length_stops_at_compression_pointer() {
    let reader = PayloadReader::new(&[0xc0, 0x0c]);
    assert_eq!(reader.name_length(0), 2);

    let packet = [1, b'a', 0xc0, 0x00];
    let reader = PayloadReader::new(&packet);
    assert_eq!(reader.name_length(0), 4);
}

#[test]
fn name_length_is_zero_on_truncation() {
    let reader = PayloadReader::new(&[3, b'a']);
    assert_eq!(reader.name_length(0), 0);
    let reader = PayloadReader::new(&[]);
    assert_eq!(reader.name_length(0), 0);
}

#[test]
fn decode_name_lowercases_and_validates() {
    let name = encode("WWW.Example.COM");
    let reader = PayloadReader::new(&name);
    let mut off = 0;
    let decoded = reader.decode_name(&mut off, 256, false);
    assert_eq!(decoded.name, "www.example.com");
    assert!(decoded.valid);
    // The cursor stops at the terminator.
    assert_eq!(off, 16);
}

#[test]
fn decode_name_substitutes_invalid_characters() {
    let mut name = vec![3, b'a', b'%', b'b'];
    name.extend_from_slice(&encode("com")[..]);
    let reader = PayloadReader::new(&name);
    let mut off = 0;
    let decoded = reader.decode_name(&mut off, 256, false);
    assert_eq!(decoded.name, "a_b.com");
    assert!(!decoded.valid);

    let mut name = vec![2, b'a', 0x07];
    name.extend_from_slice(&encode("com")[..]);
    let reader = PayloadReader::new(&name);
    let mut off = 0;
    let decoded = reader.decode_name(&mut off, 256, false);
    assert_eq!(decoded.name, "a?.com");
    assert!(!decoded.valid);
}

#[test]
fn decode_name_relaxed_keeps_punctuation() {
    let mut name = vec![3, b'a', b'%', b'B'];
    name.extend_from_slice(&encode("local")[..]);
    let reader = PayloadReader::new(&name);
    let mut off = 0;
    let decoded = reader.decode_name(&mut off, 256, true);
    assert_eq!(decoded.name, "a%b.local");
    assert!(decoded.valid);
}

#[test]
fn decode_name_refuses_compression_pointers() {
    let packet = [0xc0, 0x0c, 0, 0];
    let reader = PayloadReader::new(&packet);
    let mut off = 0;
    let decoded = reader.decode_name(&mut off, 256, false);
    assert!(decoded.name.is_empty());
}

#[test]
fn decode_name_caps_output_length() {
    let long_label: String = "a".repeat(63);
    let host = [
        long_label.as_str(),
        long_label.as_str(),
        long_label.as_str(),
        long_label.as_str(),
        long_label.as_str(),
    ]
    .join(".");
    let name = encode(&host);
    let reader = PayloadReader::new(&name);
    let mut off = 0;
    let decoded = reader.decode_name(&mut off, 256, false);
    assert!(decoded.name.len() <= 255);
}

#[test]
fn decode_name_empties_result_on_truncated_label() {
    // Label claims 10 bytes, payload carries 2.
    let packet = [10, b'a', b'b'];
    let reader = PayloadReader::new(&packet);
    let mut off = 0;
    let decoded = reader.decode_name(&mut off, 256, false);
    assert!(decoded.name.is_empty());
}
