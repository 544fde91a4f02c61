pub mod answer;
pub mod batch;
pub mod corpus;
pub mod question;

pub use answer::{AnswerResult, AnswerState, AnswerTimings, ContextWindow, WindowSpan};
pub use batch::BatchJob;
pub use corpus::{Corpus, Segment};
pub use question::Question;
