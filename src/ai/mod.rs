pub mod compose;
pub mod llm;
