mod handler;
pub mod model;

pub use handler::{
    create_group, delete_group, find_by_id, group_members, leave_group, my_groups,
};
