use thiserror::Error;

/// Dictionary construction errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DictionaryError {
    #[error("AVP {0}: a Grouped AVP cannot also declare enumerations")]
    GroupedWithEnumeration(String),

    #[error("AVP {0}: a Grouped AVP does not take a type")]
    GroupedWithType(String),

    #[error("AVP {name}: enumerations need an Integer32 or Unsigned32 type, not {type_name}")]
    EnumerationBaseType { name: String, type_name: String },

    #[error("AVP {0}: no type specified")]
    MissingType(String),

    #[error("AVP {name}: unknown type {type_name}")]
    UnknownType { name: String, type_name: String },

    #[error("AVP {avp}: grouped member {member} is not defined")]
    UnknownGroupedMember { avp: String, member: String },

    #[error("AVP {name}: invalid member multiplicity {detail}")]
    InvalidMultiplicity { name: String, detail: String },

    #[error("AVP {0} defined twice")]
    DuplicateDefinition(String),

    #[error("Dictionary XML: {0}")]
    Xml(String),
}
