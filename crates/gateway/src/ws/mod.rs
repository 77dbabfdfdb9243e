pub mod batcher;
pub mod dedup;
pub mod group;
pub mod handler;
pub mod session;

pub use handler::{
    router, WsRouterState, CLOSE_INVALID_CREDENTIAL, CLOSE_NOT_A_MEMBER, CLOSE_NO_CREDENTIAL,
};
