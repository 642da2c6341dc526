//! Room-based signaling relay and peer-mesh coordination.
//!
//! Participants join a named room through the relay coordinator, which
//! assigns identities and store-and-forwards offer/answer/candidate frames
//! between them; every participant's mesh negotiator then establishes one
//! direct media connection per other member. Media itself never touches
//! the relay.

pub mod mesh;
pub mod protocol;
pub mod relay;
