use crate::avp::{read_text, read_u32};
use crate::builder::MessageBuilder;
use crate::constants::*;
use crate::ids::IdGenerator;
use bytes::{Bytes, BytesMut};
use diastack_core::codec::HEADER_LEN;
use diastack_core::{decode_avps, encode_avps, DiameterError, DiameterHeader, FramedAvp, Result};
use diastack_dict::{Dictionary, TypedAvp};

/// Diameter message: header plus AVPs in wire order.
///
/// AVPs are kept framed; typed values are resolved on access against a
/// [`Dictionary`].
#[derive(Debug, Clone)]
pub struct DiameterMessage {
    header: DiameterHeader,
    avps: Vec<FramedAvp>,
}

impl DiameterMessage {
    pub(crate) fn from_parts(mut header: DiameterHeader, avps: Vec<FramedAvp>) -> Self {
        header.length = (HEADER_LEN + avps.iter().map(FramedAvp::wire_len).sum::<usize>()) as u32;
        Self { header, avps }
    }

    /// Start a request with fresh hop-by-hop and end-to-end ids
    pub fn request(command_code: u32, application_id: u32, ids: &IdGenerator) -> MessageBuilder {
        MessageBuilder::request(command_code, application_id, ids)
    }

    /// Start the answer to this request.
    ///
    /// Origin-Host and Origin-Realm are taken from the request's
    /// Destination-Host and Destination-Realm, so they are missing when the
    /// request was routed by realm alone, and name the final destination
    /// rather than this node when answering on behalf of another host. Use
    /// [`create_answer_from`](Self::create_answer_from) to answer as a
    /// specific node.
    pub fn create_answer(&self, result_code: u32) -> MessageBuilder {
        MessageBuilder::answer_to(self, result_code)
    }

    /// Start the answer to this request with Origin-Host and Origin-Realm
    /// set to the answering node
    pub fn create_answer_from(&self, result_code: u32, origin_host: &str, origin_realm: &str) -> MessageBuilder {
        MessageBuilder::answer_to(self, result_code)
            .origin_host(origin_host)
            .origin_realm(origin_realm)
    }

    /// Frame a complete message.
    ///
    /// Only the header and the AVP framing are checked; a message missing
    /// Origin-Host still decodes so that it can be inspected.
    pub fn decode(data: &Bytes) -> Result<Self> {
        let header = DiameterHeader::decode(data)?;
        let length = header.length as usize;
        if data.len() < length {
            return Err(DiameterError::malformed(format!(
                "message declares {length} bytes, buffer holds {}",
                data.len()
            )));
        }

        let avps = decode_avps(&data.slice(HEADER_LEN..length))?;
        Ok(Self { header, avps })
    }

    pub fn decode_slice(data: &[u8]) -> Result<Self> {
        Self::decode(&Bytes::copy_from_slice(data))
    }

    pub fn encode(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(self.header.length as usize);
        self.encode_into(&mut out);
        out.freeze()
    }

    pub fn encode_into(&self, out: &mut BytesMut) {
        self.header.encode(out);
        encode_avps(&self.avps, out);
    }

    pub fn header(&self) -> &DiameterHeader {
        &self.header
    }

    pub fn command_code(&self) -> u32 {
        self.header.command_code
    }

    pub fn application_id(&self) -> u32 {
        self.header.application_id
    }

    pub fn hop_by_hop_id(&self) -> u32 {
        self.header.hop_by_hop_id
    }

    pub fn end_to_end_id(&self) -> u32 {
        self.header.end_to_end_id
    }

    pub fn is_request(&self) -> bool {
        self.header.is_request()
    }

    pub fn is_answer(&self) -> bool {
        self.header.is_answer()
    }

    /// Total encoded length in bytes
    pub fn len(&self) -> usize {
        self.header.length as usize
    }

    pub fn is_empty(&self) -> bool {
        self.avps.is_empty()
    }

    pub fn avps(&self) -> &[FramedAvp] {
        &self.avps
    }

    pub fn into_avps(self) -> Vec<FramedAvp> {
        self.avps
    }

    /// First AVP with this code
    pub fn avp(&self, code: u32) -> Option<&FramedAvp> {
        self.avps.iter().find(|a| a.code == code)
    }

    pub fn avps_with(&self, code: u32) -> impl Iterator<Item = &FramedAvp> {
        self.avps.iter().filter(move |a| a.code == code)
    }

    fn required_text(&self, code: u32, name: &'static str) -> Result<&str> {
        let avp = self
            .avp(code)
            .ok_or(DiameterError::MissingRequiredAvp { code, name })?;
        read_text(avp).ok_or_else(|| DiameterError::InvalidAvpValue {
            code,
            reason: "not valid UTF-8".to_string(),
        })
    }

    pub fn origin_host(&self) -> Result<&str> {
        self.required_text(AVP_ORIGIN_HOST, "Origin-Host")
    }

    pub fn origin_realm(&self) -> Result<&str> {
        self.required_text(AVP_ORIGIN_REALM, "Origin-Realm")
    }

    pub fn destination_host(&self) -> Option<&str> {
        self.avp(AVP_DESTINATION_HOST).and_then(read_text)
    }

    pub fn destination_realm(&self) -> Option<&str> {
        self.avp(AVP_DESTINATION_REALM).and_then(read_text)
    }

    pub fn session_id(&self) -> Option<&str> {
        self.avp(AVP_SESSION_ID).and_then(read_text)
    }

    pub fn result_code(&self) -> Option<u32> {
        self.unsigned32(AVP_RESULT_CODE)
    }

    /// First AVP with this code read as a 4-byte unsigned value
    pub fn unsigned32(&self, code: u32) -> Option<u32> {
        self.avp(code).and_then(read_u32)
    }

    /// Resolve the first AVP with this code against the dictionary
    pub fn resolve(&self, dictionary: &Dictionary, code: u32) -> Result<Option<TypedAvp>> {
        self.avp(code).map(|avp| dictionary.resolve(avp)).transpose()
    }

    /// Resolve every AVP, in order
    pub fn typed_avps(&self, dictionary: &Dictionary) -> Result<Vec<TypedAvp>> {
        self.avps.iter().map(|avp| dictionary.resolve(avp)).collect()
    }

    pub fn is_cer(&self) -> bool {
        self.command_code() == CMD_CAPABILITIES_EXCHANGE && self.is_request()
    }

    pub fn is_cea(&self) -> bool {
        self.command_code() == CMD_CAPABILITIES_EXCHANGE && self.is_answer()
    }

    pub fn is_dwr(&self) -> bool {
        self.command_code() == CMD_DEVICE_WATCHDOG && self.is_request()
    }

    pub fn is_dwa(&self) -> bool {
        self.command_code() == CMD_DEVICE_WATCHDOG && self.is_answer()
    }

    pub fn is_dpr(&self) -> bool {
        self.command_code() == CMD_DISCONNECT_PEER && self.is_request()
    }

    pub fn is_dpa(&self) -> bool {
        self.command_code() == CMD_DISCONNECT_PEER && self.is_answer()
    }

    /// CER, DWR, DPR and their answers; handled by the peer itself
    pub fn is_base_protocol(&self) -> bool {
        matches!(
            self.command_code(),
            CMD_CAPABILITIES_EXCHANGE | CMD_DEVICE_WATCHDOG | CMD_DISCONNECT_PEER
        )
    }

    fn raw(&self, code: u32) -> Option<&[u8]> {
        self.avp(code).map(|a| a.value.as_ref())
    }

    fn host_ip_addresses(&self) -> Vec<&[u8]> {
        self.avps_with(AVP_HOST_IP_ADDRESS)
            .map(|a| a.value.as_ref())
            .collect()
    }
}

/// Messages are equal when command, direction and the routing identities
/// agree. Capabilities exchange also compares Host-IP-Address, but only
/// when both sides carry it.
impl PartialEq for DiameterMessage {
    fn eq(&self, other: &Self) -> bool {
        if self.command_code() != other.command_code() || self.is_request() != other.is_request() {
            return false;
        }

        let general = [
            AVP_ORIGIN_HOST,
            AVP_ORIGIN_REALM,
            AVP_DESTINATION_HOST,
            AVP_DESTINATION_REALM,
        ]
        .into_iter()
        .all(|code| self.raw(code) == other.raw(code));
        if !general {
            return false;
        }

        if self.command_code() == CMD_CAPABILITIES_EXCHANGE {
            let (mine, theirs) = (self.host_ip_addresses(), other.host_ip_addresses());
            if !mine.is_empty() && !theirs.is_empty() {
                return mine == theirs;
            }
        }
        true
    }
}
