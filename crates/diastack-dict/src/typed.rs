use crate::data_type::{Address, Value};
use crate::definition::{AvpDefinition, AvpId};
use bytes::Bytes;
use diastack_core::{DiameterError, FramedAvp, Result};
use std::sync::Arc;

/// A framed AVP resolved against the dictionary
#[derive(Debug, Clone, PartialEq)]
pub struct TypedAvp {
    /// The AVP as it was framed; re-encoding it reproduces the wire bytes
    pub avp: FramedAvp,
    /// `None` for AVPs the dictionary does not know
    pub definition: Option<Arc<AvpDefinition>>,
    pub value: TypedValue,
}

/// Closed set of value kinds an AVP resolves into
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Scalar(Value),
    Enumerated(EnumValue),
    Grouped(GroupedValue),
    /// Undictionaried AVP, kept as octets
    Raw(Bytes),
}

/// Enumerated value; `name` is `None` when the number is not mapped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumValue {
    pub value: i64,
    pub name: Option<String>,
}

/// Children of a Grouped AVP plus whatever did not match the declared layout
#[derive(Debug, Clone, PartialEq)]
pub struct GroupedValue {
    pub children: Vec<TypedAvp>,
    pub issues: Vec<GroupedIssue>,
}

/// Population problems inside a Grouped AVP. Never fatal here; the
/// caller decides how severe they are.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupedIssue {
    Missing { id: AvpId, min: u32, found: u32 },
    TooMany { id: AvpId, max: u32, found: u32 },
    Unexpected { id: AvpId, mandatory: bool, known: bool },
}

impl TypedValue {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Scalar(value) => value.avp_type().name(),
            Self::Enumerated(_) => "Enumerated",
            Self::Grouped(_) => "Grouped",
            Self::Raw(_) => "Raw",
        }
    }
}

impl GroupedValue {
    /// First child with the given code
    pub fn child(&self, code: u32) -> Option<&TypedAvp> {
        self.children.iter().find(|c| c.avp.code == code)
    }

    pub fn children_with(&self, code: u32) -> impl Iterator<Item = &TypedAvp> {
        self.children.iter().filter(move |c| c.avp.code == code)
    }

    /// Unexpected children that carry the Mandatory flag
    pub fn unexpected_mandatory(&self) -> impl Iterator<Item = AvpId> + '_ {
        self.issues.iter().filter_map(|issue| match issue {
            GroupedIssue::Unexpected {
                id,
                mandatory: true,
                ..
            } => Some(*id),
            _ => None,
        })
    }
}

impl TypedAvp {
    pub fn id(&self) -> AvpId {
        AvpId::new(self.avp.code, self.avp.vendor_id)
    }

    pub fn name(&self) -> Option<&str> {
        self.definition.as_ref().map(|d| d.name.as_str())
    }

    pub fn is_known(&self) -> bool {
        self.definition.is_some()
    }

    fn mismatch(&self, expected: &'static str) -> DiameterError {
        DiameterError::AvpTypeMismatch {
            code: self.avp.code,
            expected,
            actual: self.value.kind_name(),
        }
    }

    pub fn as_scalar(&self) -> Result<&Value> {
        match &self.value {
            TypedValue::Scalar(value) => Ok(value),
            TypedValue::Enumerated(_) | TypedValue::Grouped(_) | TypedValue::Raw(_) => {
                Err(self.mismatch("Scalar"))
            }
        }
    }

    pub fn as_u32(&self) -> Result<u32> {
        match self.as_scalar() {
            Ok(Value::Unsigned32(v)) => Ok(*v),
            _ => Err(self.mismatch("Unsigned32")),
        }
    }

    pub fn as_u64(&self) -> Result<u64> {
        match self.as_scalar() {
            Ok(Value::Unsigned64(v)) => Ok(*v),
            _ => Err(self.mismatch("Unsigned64")),
        }
    }

    pub fn as_i32(&self) -> Result<i32> {
        match self.as_scalar() {
            Ok(Value::Integer32(v)) => Ok(*v),
            _ => Err(self.mismatch("Integer32")),
        }
    }

    pub fn as_i64(&self) -> Result<i64> {
        match self.as_scalar() {
            Ok(Value::Integer64(v)) => Ok(*v),
            _ => Err(self.mismatch("Integer64")),
        }
    }

    /// Any of the string types
    pub fn as_str(&self) -> Result<&str> {
        self.as_scalar()
            .ok()
            .and_then(Value::as_str)
            .ok_or_else(|| self.mismatch("UTF8String"))
    }

    pub fn as_address(&self) -> Result<&Address> {
        match self.as_scalar() {
            Ok(Value::Address(address)) => Ok(address),
            _ => Err(self.mismatch("Address")),
        }
    }

    pub fn as_enumerated(&self) -> Result<&EnumValue> {
        match &self.value {
            TypedValue::Enumerated(value) => Ok(value),
            TypedValue::Scalar(_) | TypedValue::Grouped(_) | TypedValue::Raw(_) => {
                Err(self.mismatch("Enumerated"))
            }
        }
    }

    pub fn as_grouped(&self) -> Result<&GroupedValue> {
        match &self.value {
            TypedValue::Grouped(value) => Ok(value),
            TypedValue::Scalar(_) | TypedValue::Enumerated(_) | TypedValue::Raw(_) => {
                Err(self.mismatch("Grouped"))
            }
        }
    }

    /// Octets of an undictionaried AVP or an OctetString
    pub fn as_bytes(&self) -> Result<&Bytes> {
        match &self.value {
            TypedValue::Raw(bytes) | TypedValue::Scalar(Value::OctetString(bytes)) => Ok(bytes),
            _ => Err(self.mismatch("OctetString")),
        }
    }

    /// Back to the framed form, unchanged
    pub fn into_framed(self) -> FramedAvp {
        self.avp
    }
}
