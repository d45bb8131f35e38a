use crate::error::{DiameterError, Result};
use bytes::{BufMut, Bytes, BytesMut};

/// Fixed size of the Diameter message header
pub const HEADER_LEN: usize = 20;

/// The only Diameter version this codec speaks
pub const DIAMETER_VERSION: u8 = 1;

/// AVP header without / with the Vendor-Id field
pub const AVP_HEADER_LEN: usize = 8;
pub const AVP_VENDOR_HEADER_LEN: usize = 12;

/// Largest value a 24-bit length field can carry
pub const MAX_LENGTH: usize = 0x00FF_FFFF;

// Header flags
pub const FLAG_REQUEST: u8 = 0x80;
pub const FLAG_PROXIABLE: u8 = 0x40;
pub const FLAG_ERROR: u8 = 0x20;
pub const FLAG_RETRANSMIT: u8 = 0x10;

// AVP flags
pub const AVP_FLAG_VENDOR: u8 = 0x80;
pub const AVP_FLAG_MANDATORY: u8 = 0x40;
pub const AVP_FLAG_PROTECTED: u8 = 0x20;

/// Diameter message header (20 bytes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiameterHeader {
    pub version: u8,
    pub length: u32,
    pub flags: u8,
    pub command_code: u32,
    pub application_id: u32,
    pub hop_by_hop_id: u32,
    pub end_to_end_id: u32,
}

/// A framed (raw) AVP: header fields plus the unpadded value bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramedAvp {
    pub code: u32,
    pub flags: u8,
    pub vendor_id: Option<u32>,
    pub value: Bytes,
}

fn read_u24(data: &[u8]) -> u32 {
    u32::from_be_bytes([0, data[0], data[1], data[2]])
}

fn read_u32(data: &[u8]) -> u32 {
    u32::from_be_bytes([data[0], data[1], data[2], data[3]])
}

fn put_u24(out: &mut BytesMut, value: u32) {
    out.extend_from_slice(&value.to_be_bytes()[1..4]);
}

/// Round a declared length up to the next 4-byte boundary
pub fn padded_len(length: usize) -> usize {
    length.div_ceil(4) * 4
}

/// Cheap probe: could these bytes start a Diameter message?
///
/// A `false` means the bytes are definitely not Diameter. A `true` is no
/// guarantee, only that the header is long enough and claims version 1.
pub fn could_be_diameter(data: &[u8]) -> bool {
    data.len() >= HEADER_LEN && data[0] == DIAMETER_VERSION
}

impl DiameterHeader {
    /// Parse header from bytes
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(DiameterError::malformed(format!(
                "header needs {HEADER_LEN} bytes, got {}",
                data.len()
            )));
        }

        let version = data[0];
        if version != DIAMETER_VERSION {
            return Err(DiameterError::ProtocolVersionMismatch(version));
        }

        let length = read_u24(&data[1..4]);
        if (length as usize) < HEADER_LEN {
            return Err(DiameterError::malformed(format!(
                "message length {length} shorter than the header"
            )));
        }

        Ok(Self {
            version,
            length,
            flags: data[4],
            command_code: read_u24(&data[5..8]),
            application_id: read_u32(&data[8..12]),
            hop_by_hop_id: read_u32(&data[12..16]),
            end_to_end_id: read_u32(&data[16..20]),
        })
    }

    /// Serialize header to bytes
    pub fn encode(&self, out: &mut BytesMut) {
        out.reserve(HEADER_LEN);
        out.put_u8(self.version);
        put_u24(out, self.length);
        out.put_u8(self.flags);
        put_u24(out, self.command_code);
        out.put_u32(self.application_id);
        out.put_u32(self.hop_by_hop_id);
        out.put_u32(self.end_to_end_id);
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(HEADER_LEN);
        self.encode(&mut out);
        out.freeze()
    }

    /// Check if this is a request
    pub fn is_request(&self) -> bool {
        (self.flags & FLAG_REQUEST) != 0
    }

    /// Check if this is an answer
    pub fn is_answer(&self) -> bool {
        !self.is_request()
    }

    pub fn is_proxiable(&self) -> bool {
        (self.flags & FLAG_PROXIABLE) != 0
    }

    pub fn is_error(&self) -> bool {
        (self.flags & FLAG_ERROR) != 0
    }

    pub fn is_retransmitted(&self) -> bool {
        (self.flags & FLAG_RETRANSMIT) != 0
    }
}

impl FramedAvp {
    /// Create a non-vendor AVP
    pub fn new(code: u32, value: impl Into<Bytes>) -> Self {
        Self {
            code,
            flags: 0,
            vendor_id: None,
            value: value.into(),
        }
    }

    /// Build a Grouped AVP by serializing the children in order
    pub fn grouped(code: u32, children: &[FramedAvp]) -> Self {
        let mut value = BytesMut::new();
        encode_avps(children, &mut value);
        Self::new(code, value.freeze())
    }

    /// Attach a Vendor-Id; sets the Vendor flag
    pub fn with_vendor(mut self, vendor_id: u32) -> Self {
        self.vendor_id = Some(vendor_id);
        self.flags |= AVP_FLAG_VENDOR;
        self
    }

    /// Set the Mandatory flag
    pub fn mandatory(mut self) -> Self {
        self.flags |= AVP_FLAG_MANDATORY;
        self
    }

    /// Set the Protected flag
    pub fn protected(mut self) -> Self {
        self.flags |= AVP_FLAG_PROTECTED;
        self
    }

    pub fn is_vendor_specific(&self) -> bool {
        self.vendor_id.is_some()
    }

    pub fn is_mandatory(&self) -> bool {
        (self.flags & AVP_FLAG_MANDATORY) != 0
    }

    pub fn is_protected(&self) -> bool {
        (self.flags & AVP_FLAG_PROTECTED) != 0
    }

    /// 12 bytes when a Vendor-Id is present, 8 otherwise
    pub fn header_len(&self) -> usize {
        if self.vendor_id.is_some() {
            AVP_VENDOR_HEADER_LEN
        } else {
            AVP_HEADER_LEN
        }
    }

    /// Declared length: header plus value, padding excluded
    pub fn length(&self) -> usize {
        self.header_len() + self.value.len()
    }

    /// Bytes this AVP occupies on the wire, padding included
    pub fn wire_len(&self) -> usize {
        padded_len(self.length())
    }

    /// Parse one AVP starting at `offset`.
    ///
    /// Returns the AVP and the number of bytes consumed, which is the
    /// declared length rounded up to a multiple of 4. Trailing padding
    /// missing at the very end of the buffer is tolerated.
    pub fn decode(data: &Bytes, offset: usize) -> Result<(Self, usize)> {
        let remaining = data.len().saturating_sub(offset);
        if remaining < AVP_HEADER_LEN {
            return Err(DiameterError::malformed(format!(
                "AVP header needs {AVP_HEADER_LEN} bytes at offset {offset}, {remaining} left"
            )));
        }
        let raw = &data[offset..];

        let code = read_u32(&raw[0..4]);
        let flags = raw[4];
        let length = read_u24(&raw[5..8]) as usize;

        let (vendor_id, header_len) = if (flags & AVP_FLAG_VENDOR) != 0 {
            if remaining < AVP_VENDOR_HEADER_LEN {
                return Err(DiameterError::malformed(format!(
                    "vendor AVP {code} truncated"
                )));
            }
            (Some(read_u32(&raw[8..12])), AVP_VENDOR_HEADER_LEN)
        } else {
            (None, AVP_HEADER_LEN)
        };

        if length < header_len {
            return Err(DiameterError::malformed(format!(
                "AVP {code} declares length {length}, below its {header_len}-byte header"
            )));
        }
        if length > remaining {
            return Err(DiameterError::malformed(format!(
                "AVP {code} declares length {length}, only {remaining} bytes left"
            )));
        }

        let value = data.slice(offset + header_len..offset + length);
        let consumed = padded_len(length).min(remaining);

        Ok((
            Self {
                code,
                flags,
                vendor_id,
                value,
            },
            consumed,
        ))
    }

    /// Serialize AVP, padding included
    pub fn encode(&self, out: &mut BytesMut) {
        let flags = if self.vendor_id.is_some() {
            self.flags | AVP_FLAG_VENDOR
        } else {
            self.flags & !AVP_FLAG_VENDOR
        };
        let length = self.length();
        debug_assert!(length <= MAX_LENGTH, "AVP {} too long", self.code);

        out.reserve(self.wire_len());
        out.put_u32(self.code);
        out.put_u8(flags);
        put_u24(out, length as u32);
        if let Some(vendor_id) = self.vendor_id {
            out.put_u32(vendor_id);
        }
        out.extend_from_slice(&self.value);
        out.put_bytes(0, self.wire_len() - length);
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(self.wire_len());
        self.encode(&mut out);
        out.freeze()
    }

    /// Frame the value bytes as a sequence of child AVPs (Grouped)
    pub fn children(&self) -> Result<Vec<FramedAvp>> {
        decode_avps(&self.value)
    }
}

/// Decode AVPs until the buffer is exhausted
pub fn decode_avps(data: &Bytes) -> Result<Vec<FramedAvp>> {
    let mut avps = Vec::new();
    let mut offset = 0;

    while offset < data.len() {
        let (avp, consumed) = FramedAvp::decode(data, offset)?;
        avps.push(avp);
        offset += consumed;
    }

    Ok(avps)
}

/// Encode AVPs in order, each padded to a 4-byte boundary
pub fn encode_avps(avps: &[FramedAvp], out: &mut BytesMut) {
    for avp in avps {
        avp.encode(out);
    }
}
