// AVP base types and scalar values
pub mod data_type;

// AVP definitions and their builder
pub mod definition;

// Dictionary and typed resolution
pub mod dictionary;
pub mod typed;

// Dictionary errors
pub mod error;

// Embedded base protocol dictionary
pub mod standard;

mod xml;

pub use data_type::{Address, AvpType, Value};
pub use definition::{AvpDefinition, AvpDefinitionBuilder, AvpId, AvpKind, EnumBase, GroupedMember};
pub use dictionary::{Dictionary, DictionaryBuilder};
pub use error::DictionaryError;
pub use typed::{EnumValue, GroupedIssue, GroupedValue, TypedAvp, TypedValue};
