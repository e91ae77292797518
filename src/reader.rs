use byteorder::{BigEndian, ByteOrder};

use crate::errors::DpiError;

/// Bitmap of the characters allowed in a DNS name: `[A-Za-z0-9_-]`.
/// One bit per possible byte value.
const NAME_VALID_CHARS: [u32; 8] = [
    0x0000_0000,
    0x03ff_2000,
    0x87ff_fffe,
    0x07ff_fffe,
    0,
    0,
    0,
    0,
];

#[inline]
pub(crate) fn is_valid_name_char(c: u8) -> bool {
    NAME_VALID_CHARS[(c >> 5) as usize] & (1u32 << (c & 0x1f)) != 0
}

/// Result of decoding a wire-format name into its dotted form.
#[derive(Clone, Debug)]
pub struct DecodedName {
    pub name: String,
    /// Cleared when any character fell outside `[A-Za-z0-9_-]`.
    pub valid: bool,
}

/// Bounded accessor over one packet payload.
///
/// Every load is checked against the payload length; the functions here
/// assume an untrusted input packet.
#[derive(Copy, Clone, Debug)]
pub struct PayloadReader<'a> {
    payload: &'a [u8],
}

impl<'a> PayloadReader<'a> {
    pub fn new(payload: &'a [u8]) -> Self {
        PayloadReader { payload }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    #[inline]
    pub fn u8_at(&self, offset: usize) -> Result<u8, DpiError> {
        self.payload.get(offset).copied().ok_or(DpiError::Truncated)
    }

    #[inline]
    pub fn u16_be(&self, offset: usize) -> Result<u16, DpiError> {
        if offset.checked_add(2).map_or(true, |end| end > self.payload.len()) {
            return Err(DpiError::Truncated);
        }
        Ok(BigEndian::read_u16(&self.payload[offset..]))
    }

    #[inline]
    pub fn u32_be(&self, offset: usize) -> Result<u32, DpiError> {
        if offset.checked_add(4).map_or(true, |end| end > self.payload.len()) {
            return Err(DpiError::Truncated);
        }
        Ok(BigEndian::read_u32(&self.payload[offset..]))
    }

    /// Bytes `[offset, offset + len)` of the payload.
    #[inline]
    pub fn slice(&self, offset: usize, len: usize) -> Result<&'a [u8], DpiError> {
        self.payload
            .get(offset..offset.checked_add(len).ok_or(DpiError::Truncated)?)
            .ok_or(DpiError::Truncated)
    }

    /// Total length on wire of the encoded name starting at `offset`:
    /// label-length byte, label bytes, repeat. A `0x00` terminator counts 1;
    /// a compression pointer (top two bits of the length byte set) counts 2
    /// and is not followed. Returns 0 when the name runs past the payload.
    pub fn name_length(&self, offset: usize) -> usize {
        let mut i = offset;
        let mut total = 0usize;
        loop {
            let len = match self.payload.get(i) {
                Some(&len) => len,
                None => return 0,
            };
            if len == 0 {
                return total + 1;
            }
            if len & 0xc0 == 0xc0 {
                return total + 2;
            }
            let advance = len as usize + 1;
            total += advance;
            i += advance;
        }
    }

    /// Decodes the name at `*offset` into a dotted, lowercased hostname of
    /// at most `max_out - 1` bytes, advancing the offset past the consumed
    /// bytes.
    ///
    /// With `relaxed` set (mDNS service names carry arbitrary instance
    /// labels) characters are copied with lowercasing only. Otherwise every
    /// character must be in `[A-Za-z0-9_-]`; an invalid printable character
    /// is written as `_`, a non-printable one as `?`, and the validity flag
    /// is cleared. A compression pointer empties the result and stops the
    /// walk: names carrying pointers are not expected in the question
    /// section.
    pub fn decode_name(&self, offset: &mut usize, max_out: usize, relaxed: bool) -> DecodedName {
        let mut out: Vec<u8> = Vec::with_capacity(64);
        let mut valid = true;
        let max = max_out.saturating_sub(1);

        while out.len() < max && *offset < self.payload.len() && self.payload[*offset] != 0 {
            let label_len = self.payload[*offset];
            *offset += 1;

            if label_len & 0xc0 != 0 || *offset + label_len as usize >= self.payload.len() {
                out.clear();
                break;
            }

            if !out.is_empty() && out.len() < max {
                out.push(b'.');
            }

            let mut remaining = label_len;
            while out.len() < max && remaining != 0 {
                let c = self.payload[*offset];
                *offset += 1;
                if relaxed || is_valid_name_char(c) {
                    out.push(c.to_ascii_lowercase());
                } else {
                    valid = false;
                    out.push(if (0x20..=0x7e).contains(&c) { b'_' } else { b'?' });
                }
                remaining -= 1;
            }
        }

        let mut name = String::from_utf8_lossy(&out).into_owned();
        if name.len() > max {
            // Replacement characters from lossy decoding can exceed the cap.
            let mut cut = max;
            while !name.is_char_boundary(cut) {
                cut -= 1;
            }
            name.truncate(cut);
        }
        DecodedName { name, valid }
    }
}
