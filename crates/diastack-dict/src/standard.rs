use crate::dictionary::{Dictionary, DictionaryBuilder};
use crate::error::DictionaryError;

/// RFC 6733 base protocol AVPs, embedded at compile time
pub const BASE_XML: &str = include_str!("../dictionary/base.xml");

impl DictionaryBuilder {
    /// Builder preloaded with the base protocol AVPs, ready for vendor documents
    pub fn with_base() -> Result<Self, DictionaryError> {
        let mut builder = Self::new();
        builder.extend_xml(BASE_XML)?;
        Ok(builder)
    }
}

impl Dictionary {
    /// The base protocol dictionary
    pub fn base() -> Result<Self, DictionaryError> {
        Ok(DictionaryBuilder::with_base()?.build())
    }
}
