use crate::definition::{AvpDefinition, AvpId};
use crate::error::DictionaryError;
use serde::Deserialize;
use std::collections::HashMap;

/// `<dictionary>` root; anything but `<avp>` (vendors, applications) is ignored
#[derive(Debug, Deserialize)]
struct XmlDictionary {
    #[serde(rename = "avp", default)]
    avps: Vec<XmlAvp>,
}

#[derive(Debug, Deserialize)]
struct XmlAvp {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "@code")]
    code: u32,
    #[serde(rename = "@vendor-id", default)]
    vendor_id: Option<u32>,
    #[serde(rename = "@mandatory", default)]
    mandatory: Option<String>,
    #[serde(rename = "type", default)]
    typedef: Option<XmlType>,
    #[serde(rename = "enum", default)]
    enums: Vec<XmlEnum>,
    #[serde(default)]
    grouped: Option<XmlGrouped>,
}

#[derive(Debug, Deserialize)]
struct XmlType {
    #[serde(rename = "@type-name")]
    type_name: String,
}

#[derive(Debug, Deserialize)]
struct XmlEnum {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "@code")]
    code: i64,
}

#[derive(Debug, Default, Deserialize)]
struct XmlGrouped {
    #[serde(rename = "gavp", default)]
    members: Vec<XmlMember>,
}

#[derive(Debug, Deserialize)]
struct XmlMember {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "@min", default)]
    min: Option<u32>,
    #[serde(rename = "@max", default)]
    max: Option<String>,
}

fn parse_max(avp: &str, max: Option<&str>) -> Result<Option<u32>, DictionaryError> {
    match max {
        None | Some("*") => Ok(None),
        Some(n) => n
            .parse()
            .map(Some)
            .map_err(|_| DictionaryError::InvalidMultiplicity {
                name: avp.to_string(),
                detail: format!("max {n:?}"),
            }),
    }
}

/// Parse an XML dictionary document.
///
/// Grouped members are referenced by name and may point at AVPs in the same
/// document or, through `known`, at AVPs loaded earlier.
pub(crate) fn parse(
    document: &str,
    known: impl Fn(&str) -> Option<AvpId>,
) -> Result<Vec<AvpDefinition>, DictionaryError> {
    let root: XmlDictionary =
        quick_xml::de::from_str(document).map_err(|e| DictionaryError::Xml(e.to_string()))?;

    let local: HashMap<&str, AvpId> = root
        .avps
        .iter()
        .map(|avp| (avp.name.as_str(), AvpId::new(avp.code, avp.vendor_id)))
        .collect();

    let mut definitions = Vec::with_capacity(root.avps.len());
    for avp in &root.avps {
        let mut builder = AvpDefinition::builder(avp.name.clone(), avp.code)
            .mandatory(avp.mandatory.as_deref() == Some("must"));
        if let Some(vendor_id) = avp.vendor_id {
            builder = builder.vendor(vendor_id);
        }
        if let Some(typedef) = &avp.typedef {
            builder = builder.type_name(&typedef.type_name);
        }
        for value in &avp.enums {
            builder = builder.enum_value(value.code, value.name.clone());
        }
        if let Some(grouped) = &avp.grouped {
            builder = builder.grouped();
            for member in &grouped.members {
                let id = local
                    .get(member.name.as_str())
                    .copied()
                    .or_else(|| known(&member.name))
                    .ok_or_else(|| DictionaryError::UnknownGroupedMember {
                        avp: avp.name.clone(),
                        member: member.name.clone(),
                    })?;
                let max = parse_max(&avp.name, member.max.as_deref())?;
                builder = builder.member(id, member.min.unwrap_or(0), max);
            }
        }
        definitions.push(builder.build()?);
    }

    Ok(definitions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_type::AvpType;
    use crate::definition::AvpKind;

    const S6A: &str = r#"
<dictionary>
  <vendor id="10415" name="3GPP"/>
  <avp name="Visited-PLMN-Id" code="1407" vendor-id="10415" mandatory="must">
    <type type-name="OctetString"/>
  </avp>
  <avp name="RAT-Type" code="1032" vendor-id="10415">
    <type type-name="Enumerated"/>
    <enum name="WLAN" code="0"/>
    <enum name="EUTRAN" code="1004"/>
  </avp>
  <avp name="Subscription-Data" code="1400" vendor-id="10415">
    <grouped>
      <gavp name="RAT-Type" max="1"/>
      <gavp name="Visited-PLMN-Id" min="0" max="*"/>
    </grouped>
  </avp>
</dictionary>
"#;

    #[test]
    fn test_parse_s6a_fragment() {
        let defs = parse(S6A, |_| None).unwrap();
        assert_eq!(defs.len(), 3);

        let plmn = &defs[0];
        assert_eq!(plmn.id, AvpId::new(1407, Some(10415)));
        assert!(plmn.mandatory);
        assert_eq!(plmn.kind, AvpKind::Scalar(AvpType::OctetString));

        let rat = &defs[1];
        assert_eq!(rat.enum_name(1004), Some("EUTRAN"));
        assert!(!rat.mandatory);

        let members = defs[2].members();
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].id, AvpId::new(1032, Some(10415)));
        assert_eq!(members[0].max, Some(1));
        assert_eq!(members[1].max, None);
    }

    #[test]
    fn test_member_from_earlier_document() {
        let doc = r#"<dictionary>
            <avp name="Holder" code="900"><grouped><gavp name="Vendor-Id" min="1"/></grouped></avp>
        </dictionary>"#;

        let defs = parse(doc, |name| (name == "Vendor-Id").then_some(AvpId::base(266))).unwrap();
        assert_eq!(defs[0].members()[0].id, AvpId::base(266));
        assert_eq!(defs[0].members()[0].min, 1);
    }

    #[test]
    fn test_unknown_member_fails() {
        let doc = r#"<dictionary>
            <avp name="Holder" code="900"><grouped><gavp name="Nope"/></grouped></avp>
        </dictionary>"#;

        assert!(matches!(
            parse(doc, |_| None),
            Err(DictionaryError::UnknownGroupedMember { .. })
        ));
    }

    #[test]
    fn test_grouped_with_enum_fails_load() {
        let doc = r#"<dictionary>
            <avp name="Member" code="900"><type type-name="Unsigned32"/></avp>
            <avp name="Bad" code="901">
              <enum name="A" code="1"/>
              <grouped><gavp name="Member"/></grouped>
            </avp>
        </dictionary>"#;

        assert!(matches!(
            parse(doc, |_| None),
            Err(DictionaryError::GroupedWithEnumeration(_))
        ));
    }

    #[test]
    fn test_enum_on_string_fails_load() {
        let doc = r#"<dictionary>
            <avp name="Bad" code="902">
              <type type-name="UTF8String"/>
              <enum name="A" code="1"/>
            </avp>
        </dictionary>"#;

        assert!(matches!(
            parse(doc, |_| None),
            Err(DictionaryError::EnumerationBaseType { .. })
        ));
    }

    #[test]
    fn test_malformed_xml() {
        assert!(matches!(
            parse("<dictionary><avp name=", |_| None),
            Err(DictionaryError::Xml(_))
        ));
    }
}
