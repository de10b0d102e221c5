pub mod gate;
pub mod store;
pub mod visibility;

pub use gate::{can_message, ensure_can_message};
pub use store::{AccountEdges, FollowDecision, RelationState, Relationship, RelationshipStore};
pub use visibility::{can_view, can_view_post, ensure_can_view};
