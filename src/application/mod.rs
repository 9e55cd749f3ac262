pub mod orchestrator;
pub mod pipeline;
pub mod sender;

#[cfg(test)]
pub mod testing;
