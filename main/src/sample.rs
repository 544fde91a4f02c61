use common::types::Question;

/// Demo batch over the bundled transcript. The last questions lean on
/// earlier ones, so relation derivation has something to find.
pub fn questions() -> Vec<Question> {
    vec![
        Question::new("When was the term artificial intelligence first coined?"),
        Question::new("What happened during the AI winter?"),
        Question::new("What role did deep learning play in the revival of AI?")
            .with_time_hint(105.0),
        Question::new("Which applications of AI in healthcare does the speaker mention?"),
        Question::new("How is AI used in transportation?"),
        Question::new("What ethical concerns does the speaker raise about AI?"),
        Question::new("Who organized the conference where artificial intelligence was coined?"),
        Question::new("What does the speaker say about the future of AI governance?"),
    ]
}
