pub mod computer;
pub mod group;

pub use computer::{Computer, NetworkInterface, Software, GROUP_PLACEHOLDER_DEVICE_ID};
pub use group::{EntityRef, Group, GroupPredicate, Membership, MembershipKind};
