// ABOUTME: Strongly typed identifiers shared across the client.
// ABOUTME: Engine object IDs plus the opaque subscription reference.

mod id;
mod reference;

pub use id::{ContainerId, ExecId, Id, ImageId};
pub use reference::Reference;
