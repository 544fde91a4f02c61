use std::collections::HashSet;
use std::sync::Arc;

use crate::error::AppError;
use crate::types::corpus::Corpus;
use crate::types::question::Question;

const RELATION_SIMILARITY_THRESHOLD: f64 = 0.3;
const RELATION_MIN_WORD_LEN: usize = 3;

const RELATION_STOP_WORDS: &[&str] = &[
    "what", "when", "where", "which", "whose", "about", "does", "how", "why", "who", "the", "and",
    "that", "this", "with", "from", "have", "has", "was", "were", "are", "is",
];

/// One unit of orchestration work: a shared corpus plus an ordered list of
/// questions. Question order is the output order.
#[derive(Debug, Clone)]
pub struct BatchJob {
    pub corpus: Arc<Corpus>,
    pub questions: Vec<Question>,
}

impl BatchJob {
    pub fn new(corpus: Arc<Corpus>, questions: Vec<Question>) -> Self {
        Self { corpus, questions }
    }

    /// Checks the whole job before any work is scheduled. Relation indices
    /// must refer to existing, non-self entries and must not form a cycle.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.corpus.text.trim().is_empty() {
            return Err(AppError::Validation("corpus text is empty".into()));
        }
        if self.questions.is_empty() {
            return Err(AppError::Validation("batch contains no questions".into()));
        }
        for (index, question) in self.questions.iter().enumerate() {
            if question.text.trim().is_empty() {
                return Err(AppError::Validation(format!(
                    "question {index} is empty"
                )));
            }
            for &related in &question.related {
                if related >= self.questions.len() {
                    return Err(AppError::Validation(format!(
                        "question {index} relates to out-of-range index {related}"
                    )));
                }
                if related == index {
                    return Err(AppError::Validation(format!(
                        "question {index} relates to itself"
                    )));
                }
            }
        }
        self.check_acyclic()
    }

    /// Iterative three-color DFS over the relation edges.
    fn check_acyclic(&self) -> Result<(), AppError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            White,
            Gray,
            Black,
        }

        let mut marks = vec![Mark::White; self.questions.len()];
        for root in 0..self.questions.len() {
            if marks[root] != Mark::White {
                continue;
            }
            let mut stack = vec![(root, 0usize)];
            marks[root] = Mark::Gray;
            while let Some(&(node, edge)) = stack.last() {
                match self.questions[node].related.get(edge).copied() {
                    Some(next) => {
                        if let Some(frame) = stack.last_mut() {
                            frame.1 += 1;
                        }
                        match marks[next] {
                            Mark::Gray => {
                                return Err(AppError::Validation(format!(
                                    "relation cycle through questions {node} and {next}"
                                )))
                            }
                            Mark::White => {
                                marks[next] = Mark::Gray;
                                stack.push((next, 0));
                            }
                            Mark::Black => {}
                        }
                    }
                    None => {
                        marks[node] = Mark::Black;
                        stack.pop();
                    }
                }
            }
        }
        Ok(())
    }

    /// Fills in `related` for questions that declare none, by keyword overlap
    /// with earlier questions. Edges only point backwards, so the result is
    /// acyclic by construction. Explicit relations are left untouched.
    pub fn derive_relations(&mut self) {
        let keyword_sets: Vec<HashSet<String>> = self
            .questions
            .iter()
            .map(|question| relation_keywords(&question.text))
            .collect();

        for index in 1..self.questions.len() {
            if !self.questions[index].related.is_empty() {
                continue;
            }
            let mut related = Vec::new();
            for earlier in 0..index {
                if jaccard(&keyword_sets[index], &keyword_sets[earlier])
                    >= RELATION_SIMILARITY_THRESHOLD
                {
                    related.push(earlier);
                }
            }
            self.questions[index].related = related;
        }
    }
}

fn relation_keywords(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| word.len() > RELATION_MIN_WORD_LEN && !RELATION_STOP_WORDS.contains(word))
        .map(str::to_owned)
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    intersection as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(questions: Vec<Question>) -> BatchJob {
        BatchJob::new(Arc::new(Corpus::with_id("c1", "some corpus text")), questions)
    }

    #[test]
    fn valid_job_passes() {
        let mut q2 = Question::new("And what happened next?");
        q2.related = vec![0];
        let job = job(vec![Question::new("What happened first?"), q2]);
        assert!(job.validate().is_ok());
    }

    #[test]
    fn out_of_range_relation_is_rejected() {
        let mut q = Question::new("Who spoke?");
        q.related = vec![5];
        let err = job(vec![q]).validate().unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(err.to_string().contains("out-of-range"));
    }

    #[test]
    fn self_relation_is_rejected() {
        let mut q = Question::new("Who spoke?");
        q.related = vec![0];
        let err = job(vec![q]).validate().unwrap_err();
        assert!(err.to_string().contains("itself"));
    }

    #[test]
    fn relation_cycle_is_rejected() {
        let mut q0 = Question::new("First question here");
        q0.related = vec![1];
        let mut q1 = Question::new("Second question here");
        q1.related = vec![0];
        let err = job(vec![q0, q1]).validate().unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn empty_question_is_rejected() {
        let err = job(vec![Question::new("   ")]).validate().unwrap_err();
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn derived_relations_point_backwards_and_stay_acyclic() {
        let mut job = job(vec![
            Question::new("When was artificial intelligence first coined?"),
            Question::new("What does the speaker say about weather patterns?"),
            Question::new("Who coined the term artificial intelligence?"),
        ]);
        job.derive_relations();
        assert!(job.questions[0].related.is_empty());
        assert!(job.questions[1].related.is_empty());
        assert_eq!(job.questions[2].related, vec![0]);
        assert!(job.validate().is_ok());
    }
}
