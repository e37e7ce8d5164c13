//! Value objects: immutable, self-validating, compared by value rather than identity.

pub mod event_type;
pub mod object_id;

pub use event_type::EventType;
pub use object_id::ObjectId;
