mod handler;
pub mod model;

pub use handler::{create_meeting, group_meetings, my_meeting_invites, respond_meeting_invite};
