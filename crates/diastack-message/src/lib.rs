// AVP constructors and raw readers
pub mod avp;

// Message builder
pub mod builder;

// Protocol constants
pub mod constants;

// Hop-by-hop / end-to-end id allocation
pub mod ids;

// Message model
pub mod message;

pub use builder::MessageBuilder;
pub use constants::*;
pub use ids::IdGenerator;
pub use message::DiameterMessage;
