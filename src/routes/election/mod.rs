mod handler;
pub mod model;

pub use handler::{
    cast_vote, create_election, create_position, delete_position, end_election,
    group_elections, nominate_candidate, position_candidates, tally_by_candidate,
    tally_by_position,
};
