mod handler;
pub mod model;

pub use handler::{create_invite, my_invites, respond_invite};
