use bytes::Bytes;
use diastack_core::{DiameterError, Result};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Seconds between the NTP epoch (1900) and the UNIX epoch (1970)
const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

// Address families (IANA "Address Family Numbers")
pub const ADDRESS_FAMILY_IPV4: u16 = 1;
pub const ADDRESS_FAMILY_IPV6: u16 = 2;

/// AVP base data type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AvpType {
    OctetString,
    Utf8String,
    DiameterIdentity,
    DiameterUri,
    Unsigned32,
    Unsigned64,
    Integer32,
    Integer64,
    Float32,
    Float64,
    Time,
    Address,
    IpFilterRule,
    QosFilterRule,
}

/// Scalar AVP value after parsing
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    OctetString(Bytes),
    Utf8String(String),
    DiameterIdentity(String),
    DiameterUri(String),
    Unsigned32(u32),
    Unsigned64(u64),
    Integer32(i32),
    Integer64(i64),
    Float32(f32),
    Float64(f64),
    Time(u32),
    Address(Address),
    IpFilterRule(String),
    QosFilterRule(String),
}

/// Address value: a 2-octet address family followed by the address
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Ip(IpAddr),
    Other { family: u16, bytes: Bytes },
}

impl FromStr for AvpType {
    type Err = String;

    /// Type names as they appear in dictionary files
    fn from_str(name: &str) -> std::result::Result<Self, Self::Err> {
        match name {
            "OctetString" => Ok(Self::OctetString),
            "UTF8String" | "Utf8String" => Ok(Self::Utf8String),
            "DiameterIdentity" => Ok(Self::DiameterIdentity),
            "DiameterURI" | "DiameterUri" => Ok(Self::DiameterUri),
            "Unsigned32" | "AppId" | "VendorId" => Ok(Self::Unsigned32),
            "Unsigned64" => Ok(Self::Unsigned64),
            "Integer32" => Ok(Self::Integer32),
            "Integer64" => Ok(Self::Integer64),
            "Float32" => Ok(Self::Float32),
            "Float64" => Ok(Self::Float64),
            "Time" => Ok(Self::Time),
            "Address" | "IPAddress" => Ok(Self::Address),
            "IPFilterRule" => Ok(Self::IpFilterRule),
            "QoSFilterRule" => Ok(Self::QosFilterRule),
            other => Err(other.to_string()),
        }
    }
}

pub(crate) fn fixed<const N: usize>(code: u32, data: &[u8]) -> Result<[u8; N]> {
    data.try_into().map_err(|_| DiameterError::InvalidAvpValue {
        code,
        reason: format!("expected {N} bytes, got {}", data.len()),
    })
}

fn text(code: u32, data: &[u8]) -> Result<String> {
    String::from_utf8(data.to_vec()).map_err(|_| DiameterError::InvalidAvpValue {
        code,
        reason: "invalid UTF-8 string".to_string(),
    })
}

impl AvpType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::OctetString => "OctetString",
            Self::Utf8String => "UTF8String",
            Self::DiameterIdentity => "DiameterIdentity",
            Self::DiameterUri => "DiameterURI",
            Self::Unsigned32 => "Unsigned32",
            Self::Unsigned64 => "Unsigned64",
            Self::Integer32 => "Integer32",
            Self::Integer64 => "Integer64",
            Self::Float32 => "Float32",
            Self::Float64 => "Float64",
            Self::Time => "Time",
            Self::Address => "Address",
            Self::IpFilterRule => "IPFilterRule",
            Self::QosFilterRule => "QoSFilterRule",
        }
    }

    /// Parse raw bytes of AVP `code` into a Value according to data type
    pub fn parse(&self, code: u32, data: &[u8]) -> Result<Value> {
        match self {
            Self::OctetString => Ok(Value::OctetString(Bytes::copy_from_slice(data))),
            Self::Utf8String => Ok(Value::Utf8String(text(code, data)?)),
            Self::DiameterIdentity => Ok(Value::DiameterIdentity(text(code, data)?)),
            Self::DiameterUri => Ok(Value::DiameterUri(text(code, data)?)),
            Self::IpFilterRule => Ok(Value::IpFilterRule(text(code, data)?)),
            Self::QosFilterRule => Ok(Value::QosFilterRule(text(code, data)?)),
            Self::Unsigned32 => Ok(Value::Unsigned32(u32::from_be_bytes(fixed(code, data)?))),
            Self::Unsigned64 => Ok(Value::Unsigned64(u64::from_be_bytes(fixed(code, data)?))),
            Self::Integer32 => Ok(Value::Integer32(i32::from_be_bytes(fixed(code, data)?))),
            Self::Integer64 => Ok(Value::Integer64(i64::from_be_bytes(fixed(code, data)?))),
            Self::Float32 => Ok(Value::Float32(f32::from_be_bytes(fixed(code, data)?))),
            Self::Float64 => Ok(Value::Float64(f64::from_be_bytes(fixed(code, data)?))),
            Self::Time => Ok(Value::Time(u32::from_be_bytes(fixed(code, data)?))),
            Self::Address => Ok(Value::Address(Address::parse(code, data)?)),
        }
    }
}

impl Address {
    pub fn parse(code: u32, data: &[u8]) -> Result<Self> {
        if data.len() < 2 {
            return Err(DiameterError::InvalidAvpValue {
                code,
                reason: "address shorter than its family field".to_string(),
            });
        }
        let family = u16::from_be_bytes([data[0], data[1]]);
        let body = &data[2..];

        match family {
            ADDRESS_FAMILY_IPV4 => {
                let octets: [u8; 4] = fixed(code, body)?;
                Ok(Self::Ip(IpAddr::V4(Ipv4Addr::from(octets))))
            }
            ADDRESS_FAMILY_IPV6 => {
                let octets: [u8; 16] = fixed(code, body)?;
                Ok(Self::Ip(IpAddr::V6(Ipv6Addr::from(octets))))
            }
            family => Ok(Self::Other {
                family,
                bytes: Bytes::copy_from_slice(body),
            }),
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut out = Vec::with_capacity(18);
        match self {
            Self::Ip(IpAddr::V4(ip)) => {
                out.extend_from_slice(&ADDRESS_FAMILY_IPV4.to_be_bytes());
                out.extend_from_slice(&ip.octets());
            }
            Self::Ip(IpAddr::V6(ip)) => {
                out.extend_from_slice(&ADDRESS_FAMILY_IPV6.to_be_bytes());
                out.extend_from_slice(&ip.octets());
            }
            Self::Other { family, bytes } => {
                out.extend_from_slice(&family.to_be_bytes());
                out.extend_from_slice(bytes);
            }
        }
        Bytes::from(out)
    }

    pub fn ip(&self) -> Option<IpAddr> {
        match self {
            Self::Ip(ip) => Some(*ip),
            Self::Other { .. } => None,
        }
    }
}

impl From<IpAddr> for Address {
    fn from(ip: IpAddr) -> Self {
        Self::Ip(ip)
    }
}

impl Value {
    /// The base type this value belongs to
    pub fn avp_type(&self) -> AvpType {
        match self {
            Self::OctetString(_) => AvpType::OctetString,
            Self::Utf8String(_) => AvpType::Utf8String,
            Self::DiameterIdentity(_) => AvpType::DiameterIdentity,
            Self::DiameterUri(_) => AvpType::DiameterUri,
            Self::Unsigned32(_) => AvpType::Unsigned32,
            Self::Unsigned64(_) => AvpType::Unsigned64,
            Self::Integer32(_) => AvpType::Integer32,
            Self::Integer64(_) => AvpType::Integer64,
            Self::Float32(_) => AvpType::Float32,
            Self::Float64(_) => AvpType::Float64,
            Self::Time(_) => AvpType::Time,
            Self::Address(_) => AvpType::Address,
            Self::IpFilterRule(_) => AvpType::IpFilterRule,
            Self::QosFilterRule(_) => AvpType::QosFilterRule,
        }
    }

    /// Serialize into AVP value bytes (unpadded)
    pub fn encode(&self) -> Bytes {
        match self {
            Self::OctetString(bytes) => bytes.clone(),
            Self::Utf8String(s)
            | Self::DiameterIdentity(s)
            | Self::DiameterUri(s)
            | Self::IpFilterRule(s)
            | Self::QosFilterRule(s) => Bytes::copy_from_slice(s.as_bytes()),
            Self::Unsigned32(v) | Self::Time(v) => Bytes::copy_from_slice(&v.to_be_bytes()),
            Self::Unsigned64(v) => Bytes::copy_from_slice(&v.to_be_bytes()),
            Self::Integer32(v) => Bytes::copy_from_slice(&v.to_be_bytes()),
            Self::Integer64(v) => Bytes::copy_from_slice(&v.to_be_bytes()),
            Self::Float32(v) => Bytes::copy_from_slice(&v.to_be_bytes()),
            Self::Float64(v) => Bytes::copy_from_slice(&v.to_be_bytes()),
            Self::Address(address) => address.encode(),
        }
    }

    /// Text view of the string family
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Utf8String(s)
            | Self::DiameterIdentity(s)
            | Self::DiameterUri(s)
            | Self::IpFilterRule(s)
            | Self::QosFilterRule(s) => Some(s),
            _ => None,
        }
    }

    /// Time value as wall-clock time (NTP seconds, RFC 5905 era 0)
    pub fn as_system_time(&self) -> Option<SystemTime> {
        match self {
            Self::Time(ntp) => {
                let unix = u64::from(*ntp).checked_sub(NTP_UNIX_OFFSET)?;
                Some(UNIX_EPOCH + Duration::from_secs(unix))
            }
            _ => None,
        }
    }
}
