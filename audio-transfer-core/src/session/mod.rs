pub mod callback;
pub mod endpoint;
pub mod negotiate;
pub mod poll_loop;
pub mod run_state;
pub mod worker;
