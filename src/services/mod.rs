pub mod callback;
pub mod extraction;
pub mod intake;
pub mod llm;
pub mod normalizer;
pub mod pipeline;
pub mod queue;
pub mod store;
pub mod submission;
pub mod worker;
