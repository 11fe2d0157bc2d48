pub mod aggregation;
pub mod coordinator;
pub mod history_store;
pub mod keyword_history;
pub mod sentiment;
pub mod session_service;
pub mod session_state;
pub mod supervisor;
pub mod youtube;

#[cfg(test)]
pub mod testing;
