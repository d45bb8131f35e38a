use crate::data_type::fixed;
use crate::definition::{AvpDefinition, AvpId, AvpKind, EnumBase};
use crate::error::DictionaryError;
use crate::typed::{EnumValue, GroupedIssue, GroupedValue, TypedAvp, TypedValue};
use crate::xml;
use diastack_core::{FramedAvp, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Immutable AVP dictionary keyed by (code, vendor-id)
#[derive(Debug, Default)]
pub struct Dictionary {
    definitions: HashMap<AvpId, Arc<AvpDefinition>>,
    names: HashMap<String, AvpId>,
}

/// Collects definitions before freezing them into a [`Dictionary`]
#[derive(Debug, Default)]
pub struct DictionaryBuilder {
    definitions: HashMap<AvpId, AvpDefinition>,
    names: HashMap<String, AvpId>,
}

impl DictionaryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one definition. Redefining an identity with identical content is a no-op.
    pub fn define(&mut self, definition: AvpDefinition) -> std::result::Result<&mut Self, DictionaryError> {
        if let Some(existing) = self.definitions.get(&definition.id) {
            if *existing == definition {
                return Ok(self);
            }
            return Err(DictionaryError::DuplicateDefinition(definition.name));
        }
        if self.names.contains_key(&definition.name) {
            return Err(DictionaryError::DuplicateDefinition(definition.name));
        }

        self.names.insert(definition.name.clone(), definition.id);
        self.definitions.insert(definition.id, definition);
        Ok(self)
    }

    /// Merge the AVPs of an XML dictionary document
    pub fn extend_xml(&mut self, document: &str) -> std::result::Result<&mut Self, DictionaryError> {
        for definition in xml::parse(document, |name| self.id_of(name))? {
            self.define(definition)?;
        }
        Ok(self)
    }

    pub(crate) fn id_of(&self, name: &str) -> Option<AvpId> {
        self.names.get(name).copied()
    }

    pub fn build(self) -> Dictionary {
        Dictionary {
            definitions: self
                .definitions
                .into_iter()
                .map(|(id, def)| (id, Arc::new(def)))
                .collect(),
            names: self.names,
        }
    }
}

impl Dictionary {
    pub fn builder() -> DictionaryBuilder {
        DictionaryBuilder::new()
    }

    /// Load a dictionary from one XML document
    pub fn from_xml(document: &str) -> std::result::Result<Self, DictionaryError> {
        let mut builder = DictionaryBuilder::new();
        builder.extend_xml(document)?;
        Ok(builder.build())
    }

    /// Lookup AVP definition by identity
    pub fn lookup(&self, id: AvpId) -> Option<&Arc<AvpDefinition>> {
        self.definitions.get(&id)
    }

    /// Lookup AVP definition by name
    pub fn lookup_by_name(&self, name: &str) -> Option<&Arc<AvpDefinition>> {
        self.names.get(name).and_then(|id| self.definitions.get(id))
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Resolve a framed AVP into its typed form.
    ///
    /// Unknown AVPs and unmapped enumeration values degrade instead of
    /// failing. Only byte-level problems (wrong width, bad UTF-8, broken
    /// child framing) are errors.
    pub fn resolve(&self, avp: &FramedAvp) -> Result<TypedAvp> {
        let id = AvpId::new(avp.code, avp.vendor_id);
        let Some(definition) = self.definitions.get(&id) else {
            return Ok(TypedAvp {
                avp: avp.clone(),
                definition: None,
                value: TypedValue::Raw(avp.value.clone()),
            });
        };

        let value = match &definition.kind {
            AvpKind::Scalar(avp_type) => TypedValue::Scalar(avp_type.parse(avp.code, &avp.value)?),
            AvpKind::Enumerated { base, .. } => {
                let value = match base {
                    EnumBase::Integer32 => i64::from(i32::from_be_bytes(fixed(avp.code, &avp.value)?)),
                    EnumBase::Unsigned32 => i64::from(u32::from_be_bytes(fixed(avp.code, &avp.value)?)),
                };
                TypedValue::Enumerated(EnumValue {
                    value,
                    name: definition.enum_name(value).map(str::to_string),
                })
            }
            AvpKind::Grouped(_) => TypedValue::Grouped(self.resolve_grouped(definition, avp)?),
        };

        Ok(TypedAvp {
            avp: avp.clone(),
            definition: Some(Arc::clone(definition)),
            value,
        })
    }

    fn resolve_grouped(&self, definition: &AvpDefinition, avp: &FramedAvp) -> Result<GroupedValue> {
        let children = avp
            .children()?
            .iter()
            .map(|child| self.resolve(child))
            .collect::<Result<Vec<_>>>()?;

        let members = definition.members();
        let mut issues = Vec::new();

        for member in members {
            let found = children.iter().filter(|c| c.id() == member.id).count() as u32;
            if found < member.min {
                issues.push(GroupedIssue::Missing {
                    id: member.id,
                    min: member.min,
                    found,
                });
            }
            if let Some(max) = member.max.filter(|max| found > *max) {
                issues.push(GroupedIssue::TooMany {
                    id: member.id,
                    max,
                    found,
                });
            }
        }

        for child in &children {
            let id = child.id();
            if !members.iter().any(|m| m.id == id) {
                issues.push(GroupedIssue::Unexpected {
                    id,
                    mandatory: child.avp.is_mandatory(),
                    known: child.is_known(),
                });
            }
        }

        Ok(GroupedValue { children, issues })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_type::{AvpType, Value};
    use bytes::Bytes;
    use diastack_core::DiameterError;

    fn dictionary() -> Dictionary {
        let mut builder = Dictionary::builder();
        builder
            .define(
                AvpDefinition::builder("Vendor-Id", 266)
                    .base_type(AvpType::Unsigned32)
                    .build()
                    .unwrap(),
            )
            .unwrap()
            .define(
                AvpDefinition::builder("Auth-Application-Id", 258)
                    .base_type(AvpType::Unsigned32)
                    .build()
                    .unwrap(),
            )
            .unwrap()
            .define(
                AvpDefinition::builder("Vendor-Specific-Application-Id", 260)
                    .member(AvpId::base(266), 1, Some(1))
                    .member(AvpId::base(258), 0, Some(1))
                    .build()
                    .unwrap(),
            )
            .unwrap()
            .define(
                AvpDefinition::builder("Disconnect-Cause", 273)
                    .enumerated()
                    .enum_value(0, "REBOOTING")
                    .enum_value(2, "DO_NOT_WANT_TO_TALK_TO_YOU")
                    .build()
                    .unwrap(),
            )
            .unwrap()
            .define(
                AvpDefinition::builder("ULR-Flags", 1405)
                    .vendor(10415)
                    .base_type(AvpType::Unsigned32)
                    .build()
                    .unwrap(),
            )
            .unwrap();
        builder.build()
    }

    fn u32_avp(code: u32, value: u32) -> FramedAvp {
        FramedAvp::new(code, Bytes::copy_from_slice(&value.to_be_bytes()))
    }

    #[test]
    fn test_lookup() {
        let dict = dictionary();
        assert_eq!(dict.len(), 5);
        assert_eq!(dict.lookup(AvpId::base(266)).unwrap().name, "Vendor-Id");
        assert!(dict.lookup(AvpId::base(1405)).is_none());
        assert!(dict.lookup(AvpId::new(1405, Some(10415))).is_some());
        assert_eq!(dict.lookup_by_name("Disconnect-Cause").unwrap().id.code, 273);
    }

    #[test]
    fn test_resolve_scalar() {
        let typed = dictionary().resolve(&u32_avp(266, 10415)).unwrap();
        assert_eq!(typed.name(), Some("Vendor-Id"));
        assert_eq!(typed.as_u32().unwrap(), 10415);
    }

    #[test]
    fn test_resolve_vendor_avp() {
        let avp = u32_avp(1405, 3).with_vendor(10415);
        let typed = dictionary().resolve(&avp).unwrap();
        assert_eq!(typed.as_u32().unwrap(), 3);
    }

    #[test]
    fn test_unknown_avp_is_raw() {
        let avp = FramedAvp::new(4242, Bytes::from_static(b"opaque")).mandatory();
        let typed = dictionary().resolve(&avp).unwrap();

        assert!(!typed.is_known());
        assert_eq!(typed.value, TypedValue::Raw(Bytes::from_static(b"opaque")));
        assert_eq!(typed.into_framed().to_bytes(), avp.to_bytes());
    }

    #[test]
    fn test_enumerated_known_and_unmapped() {
        let dict = dictionary();

        let typed = dict.resolve(&u32_avp(273, 2)).unwrap();
        let value = typed.as_enumerated().unwrap();
        assert_eq!(value.value, 2);
        assert_eq!(value.name.as_deref(), Some("DO_NOT_WANT_TO_TALK_TO_YOU"));

        let typed = dict.resolve(&u32_avp(273, 9)).unwrap();
        assert_eq!(
            typed.as_enumerated().unwrap(),
            &EnumValue {
                value: 9,
                name: None
            }
        );
        assert!(matches!(
            typed.as_u32(),
            Err(DiameterError::AvpTypeMismatch { .. })
        ));
    }

    #[test]
    fn test_resolve_grouped() {
        let grouped = FramedAvp::grouped(260, &[u32_avp(266, 10415), u32_avp(258, 16777251)]);
        let typed = dictionary().resolve(&grouped).unwrap();

        let value = typed.as_grouped().unwrap();
        assert!(value.issues.is_empty());
        assert_eq!(value.child(258).unwrap().as_u32().unwrap(), 16777251);
    }

    #[test]
    fn test_grouped_population_issues_are_surfaced() {
        let grouped = FramedAvp::grouped(
            260,
            &[
                u32_avp(258, 1),
                u32_avp(258, 2),
                FramedAvp::new(4242, Bytes::from_static(b"x")).mandatory(),
            ],
        );
        let typed = dictionary().resolve(&grouped).unwrap();
        let value = typed.as_grouped().unwrap();

        assert_eq!(value.children.len(), 3);
        assert!(value.issues.contains(&GroupedIssue::Missing {
            id: AvpId::base(266),
            min: 1,
            found: 0
        }));
        assert!(value.issues.contains(&GroupedIssue::TooMany {
            id: AvpId::base(258),
            max: 1,
            found: 2
        }));
        assert_eq!(
            value.unexpected_mandatory().collect::<Vec<_>>(),
            vec![AvpId::base(4242)]
        );
    }

    #[test]
    fn test_grouped_with_broken_child_framing() {
        let avp = FramedAvp::new(260, Bytes::from_static(&[0, 0, 1, 10, 0, 0, 0, 99]));
        let result = dictionary().resolve(&avp);
        assert!(matches!(result, Err(DiameterError::MalformedMessage(_))));
    }

    #[test]
    fn test_scalar_wrong_width() {
        let avp = FramedAvp::new(266, Bytes::from_static(&[0, 1]));
        assert!(matches!(
            dictionary().resolve(&avp),
            Err(DiameterError::InvalidAvpValue { code: 266, .. })
        ));
    }

    #[test]
    fn test_duplicate_definition() {
        let mut builder = Dictionary::builder();
        let def = AvpDefinition::builder("Vendor-Id", 266)
            .base_type(AvpType::Unsigned32)
            .build()
            .unwrap();
        builder.define(def.clone()).unwrap();
        builder.define(def).unwrap();

        let clash = AvpDefinition::builder("Other", 266)
            .base_type(AvpType::OctetString)
            .build()
            .unwrap();
        assert!(matches!(
            builder.define(clash),
            Err(DictionaryError::DuplicateDefinition(_))
        ));
    }

    #[test]
    fn test_scalar_value_round_trip() {
        let typed = dictionary().resolve(&u32_avp(258, 4)).unwrap();
        assert_eq!(typed.as_scalar().unwrap().encode(), Value::Unsigned32(4).encode());
    }
}
