//! Constructors for common AVP shapes, so callers do not hand-encode values.

use bytes::Bytes;
use diastack_core::FramedAvp;
use diastack_dict::{Address, Value};
use std::net::IpAddr;

/// DiameterIdentity / UTF8String AVP
pub fn text(code: u32, value: &str) -> FramedAvp {
    FramedAvp::new(code, Bytes::copy_from_slice(value.as_bytes()))
}

pub fn unsigned32(code: u32, value: u32) -> FramedAvp {
    FramedAvp::new(code, Bytes::copy_from_slice(&value.to_be_bytes()))
}

pub fn address(code: u32, ip: IpAddr) -> FramedAvp {
    FramedAvp::new(code, Address::from(ip).encode())
}

/// AVP from a typed value
pub fn typed(code: u32, value: &Value) -> FramedAvp {
    FramedAvp::new(code, value.encode())
}

/// Read a 4-byte big-endian value without consulting the dictionary
pub fn read_u32(avp: &FramedAvp) -> Option<u32> {
    let raw: [u8; 4] = avp.value.as_ref().try_into().ok()?;
    Some(u32::from_be_bytes(raw))
}

/// Read a text value without consulting the dictionary
pub fn read_text(avp: &FramedAvp) -> Option<&str> {
    std::str::from_utf8(&avp.value).ok()
}
