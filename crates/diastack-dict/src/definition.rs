use crate::data_type::AvpType;
use crate::error::DictionaryError;

/// AVP identity: code plus optional vendor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AvpId {
    pub code: u32,
    pub vendor_id: Option<u32>,
}

impl AvpId {
    /// Vendor-Id 0 is the IETF space and is the same as no vendor
    pub fn new(code: u32, vendor_id: Option<u32>) -> Self {
        Self {
            code,
            vendor_id: vendor_id.filter(|v| *v != 0),
        }
    }

    /// An IETF (non-vendor) AVP
    pub const fn base(code: u32) -> Self {
        Self {
            code,
            vendor_id: None,
        }
    }
}

impl std::fmt::Display for AvpId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.vendor_id {
            Some(vendor) => write!(f, "{}/{}", self.code, vendor),
            None => write!(f, "{}", self.code),
        }
    }
}

/// Integer family an enumeration is carried in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumBase {
    Integer32,
    Unsigned32,
}

/// Expected child of a Grouped AVP
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupedMember {
    pub id: AvpId,
    pub min: u32,
    /// `None` means unbounded
    pub max: Option<u32>,
}

/// What an AVP decodes into
#[derive(Debug, Clone, PartialEq)]
pub enum AvpKind {
    Scalar(AvpType),
    Enumerated {
        base: EnumBase,
        values: Vec<(i64, String)>,
    },
    Grouped(Vec<GroupedMember>),
}

/// Dictionary entry for one AVP
#[derive(Debug, Clone, PartialEq)]
pub struct AvpDefinition {
    pub id: AvpId,
    pub name: String,
    pub mandatory: bool,
    pub kind: AvpKind,
}

impl AvpDefinition {
    pub fn builder(name: impl Into<String>, code: u32) -> AvpDefinitionBuilder {
        AvpDefinitionBuilder::new(name, code)
    }

    pub fn is_grouped(&self) -> bool {
        matches!(self.kind, AvpKind::Grouped(_))
    }

    pub fn is_enumerated(&self) -> bool {
        matches!(self.kind, AvpKind::Enumerated { .. })
    }

    /// Symbolic name of an enumerated value, if this is an enumeration that maps it
    pub fn enum_name(&self, value: i64) -> Option<&str> {
        match &self.kind {
            AvpKind::Enumerated { values, .. } => values
                .iter()
                .find(|(v, _)| *v == value)
                .map(|(_, name)| name.as_str()),
            _ => None,
        }
    }

    /// Numeric value of a symbolic enumeration name
    pub fn enum_value(&self, name: &str) -> Option<i64> {
        match &self.kind {
            AvpKind::Enumerated { values, .. } => values
                .iter()
                .find(|(_, n)| n == name)
                .map(|(v, _)| *v),
            _ => None,
        }
    }

    pub fn members(&self) -> &[GroupedMember] {
        match &self.kind {
            AvpKind::Grouped(members) => members,
            _ => &[],
        }
    }
}

/// Declared type of an AVP before validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeclaredType {
    Base(AvpType),
    /// "Enumerated": an Integer32 carrying symbolic values
    Enumerated,
}

/// Builder enforcing the definition invariants:
/// Grouped excludes both a type and enumerations, and enumerations
/// need an integer-family type.
#[derive(Debug, Clone)]
pub struct AvpDefinitionBuilder {
    name: String,
    code: u32,
    vendor_id: Option<u32>,
    mandatory: bool,
    declared: Option<DeclaredType>,
    unknown_type: Option<String>,
    enums: Vec<(i64, String)>,
    grouped: Option<Vec<GroupedMember>>,
}

impl AvpDefinitionBuilder {
    pub fn new(name: impl Into<String>, code: u32) -> Self {
        Self {
            name: name.into(),
            code,
            vendor_id: None,
            mandatory: false,
            declared: None,
            unknown_type: None,
            enums: Vec::new(),
            grouped: None,
        }
    }

    pub fn vendor(mut self, vendor_id: u32) -> Self {
        self.vendor_id = Some(vendor_id);
        self
    }

    pub fn mandatory(mut self, mandatory: bool) -> Self {
        self.mandatory = mandatory;
        self
    }

    pub fn base_type(mut self, avp_type: AvpType) -> Self {
        self.declared = Some(DeclaredType::Base(avp_type));
        self
    }

    /// Set the type from its dictionary name; unknown names fail at `build`
    pub fn type_name(mut self, type_name: &str) -> Self {
        if type_name == "Enumerated" {
            self.declared = Some(DeclaredType::Enumerated);
        } else {
            match type_name.parse::<AvpType>() {
                Ok(avp_type) => self.declared = Some(DeclaredType::Base(avp_type)),
                Err(unknown) => self.unknown_type = Some(unknown),
            }
        }
        self
    }

    pub fn enumerated(mut self) -> Self {
        self.declared = Some(DeclaredType::Enumerated);
        self
    }

    pub fn enum_value(mut self, value: i64, name: impl Into<String>) -> Self {
        self.enums.push((value, name.into()));
        self
    }

    /// Mark as Grouped (possibly with no declared members)
    pub fn grouped(mut self) -> Self {
        self.grouped.get_or_insert_with(Vec::new);
        self
    }

    pub fn member(mut self, id: AvpId, min: u32, max: Option<u32>) -> Self {
        self.grouped
            .get_or_insert_with(Vec::new)
            .push(GroupedMember { id, min, max });
        self
    }

    pub fn build(self) -> Result<AvpDefinition, DictionaryError> {
        if let Some(type_name) = self.unknown_type {
            return Err(DictionaryError::UnknownType {
                name: self.name,
                type_name,
            });
        }

        let kind = match (self.grouped, self.declared) {
            (Some(_), _) if !self.enums.is_empty() => {
                return Err(DictionaryError::GroupedWithEnumeration(self.name));
            }
            (Some(_), Some(_)) => return Err(DictionaryError::GroupedWithType(self.name)),
            (Some(members), None) => {
                if let Some(bad) = members.iter().find(|m| m.max.is_some_and(|max| max < m.min)) {
                    return Err(DictionaryError::InvalidMultiplicity {
                        name: self.name,
                        detail: format!("{}: min {} > max {:?}", bad.id, bad.min, bad.max),
                    });
                }
                AvpKind::Grouped(members)
            }
            (None, Some(DeclaredType::Enumerated)) => AvpKind::Enumerated {
                base: EnumBase::Integer32,
                values: self.enums,
            },
            (None, Some(DeclaredType::Base(base @ (AvpType::Integer32 | AvpType::Unsigned32))))
                if !self.enums.is_empty() =>
            {
                let base = if base == AvpType::Integer32 {
                    EnumBase::Integer32
                } else {
                    EnumBase::Unsigned32
                };
                AvpKind::Enumerated {
                    base,
                    values: self.enums,
                }
            }
            (None, Some(DeclaredType::Base(avp_type))) if !self.enums.is_empty() => {
                return Err(DictionaryError::EnumerationBaseType {
                    name: self.name,
                    type_name: avp_type.name().to_string(),
                });
            }
            (None, None) if !self.enums.is_empty() => {
                return Err(DictionaryError::EnumerationBaseType {
                    name: self.name,
                    type_name: "<none>".to_string(),
                });
            }
            (None, Some(DeclaredType::Base(avp_type))) => AvpKind::Scalar(avp_type),
            (None, None) => return Err(DictionaryError::MissingType(self.name)),
        };

        Ok(AvpDefinition {
            id: AvpId::new(self.code, self.vendor_id),
            name: self.name,
            mandatory: self.mandatory,
            kind,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_definition() {
        let def = AvpDefinition::builder("Origin-Host", 264)
            .mandatory(true)
            .base_type(AvpType::DiameterIdentity)
            .build()
            .unwrap();

        assert_eq!(def.id, AvpId::base(264));
        assert_eq!(def.kind, AvpKind::Scalar(AvpType::DiameterIdentity));
        assert!(def.mandatory);
        assert!(!def.is_grouped());
    }

    #[test]
    fn test_enumerated_definition() {
        let def = AvpDefinition::builder("Disconnect-Cause", 273)
            .type_name("Enumerated")
            .enum_value(0, "REBOOTING")
            .enum_value(1, "BUSY")
            .build()
            .unwrap();

        assert!(def.is_enumerated());
        assert_eq!(def.enum_name(1), Some("BUSY"));
        assert_eq!(def.enum_name(7), None);
        assert_eq!(def.enum_value("REBOOTING"), Some(0));
    }

    #[test]
    fn test_unsigned_enumeration() {
        let def = AvpDefinition::builder("Flags", 1)
            .base_type(AvpType::Unsigned32)
            .enum_value(1, "ONE")
            .build()
            .unwrap();

        assert!(matches!(
            def.kind,
            AvpKind::Enumerated {
                base: EnumBase::Unsigned32,
                ..
            }
        ));
    }

    #[test]
    fn test_grouped_with_enumeration_fails() {
        let result = AvpDefinition::builder("Broken", 1)
            .member(AvpId::base(2), 0, None)
            .enum_value(1, "ONE")
            .build();

        assert_eq!(
            result,
            Err(DictionaryError::GroupedWithEnumeration("Broken".to_string()))
        );
    }

    #[test]
    fn test_grouped_with_type_fails() {
        let result = AvpDefinition::builder("Broken", 1)
            .grouped()
            .base_type(AvpType::OctetString)
            .build();

        assert!(matches!(result, Err(DictionaryError::GroupedWithType(_))));
    }

    #[test]
    fn test_enumeration_requires_integer_base() {
        let result = AvpDefinition::builder("Broken", 1)
            .base_type(AvpType::Utf8String)
            .enum_value(1, "ONE")
            .build();

        assert!(matches!(
            result,
            Err(DictionaryError::EnumerationBaseType { .. })
        ));

        let result = AvpDefinition::builder("Untyped", 1)
            .enum_value(1, "ONE")
            .build();
        assert!(matches!(
            result,
            Err(DictionaryError::EnumerationBaseType { .. })
        ));
    }

    #[test]
    fn test_missing_and_unknown_type() {
        assert_eq!(
            AvpDefinition::builder("Bare", 1).build(),
            Err(DictionaryError::MissingType("Bare".to_string()))
        );
        assert!(matches!(
            AvpDefinition::builder("Odd", 1).type_name("Blob").build(),
            Err(DictionaryError::UnknownType { .. })
        ));
    }

    #[test]
    fn test_grouped_members() {
        let def = AvpDefinition::builder("Vendor-Specific-Application-Id", 260)
            .member(AvpId::base(266), 1, Some(1))
            .member(AvpId::base(258), 0, Some(1))
            .build()
            .unwrap();

        assert!(def.is_grouped());
        assert_eq!(def.members().len(), 2);

        let bad = AvpDefinition::builder("Bad", 1)
            .member(AvpId::base(2), 3, Some(1))
            .build();
        assert!(matches!(bad, Err(DictionaryError::InvalidMultiplicity { .. })));
    }

    #[test]
    fn test_vendor_zero_is_base() {
        assert_eq!(AvpId::new(264, Some(0)), AvpId::base(264));
        assert_eq!(AvpId::new(1405, Some(10415)).to_string(), "1405/10415");
    }
}
