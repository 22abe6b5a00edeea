pub mod analyzer;
pub mod backlog;
pub mod handlers;
pub mod pipeline;
pub mod planner;
pub mod prompts;
pub mod repository;
pub mod scheduler;
pub mod tokens;
pub mod topics;

#[cfg(test)]
pub mod test_support;
