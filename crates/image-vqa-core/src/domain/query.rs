//! Questions asked about an image and the answers the model chose.

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// A single natural-language question about an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    question: String,
}

impl Query {
    /// Creates a query from non-empty question text.
    ///
    /// # Errors
    ///
    /// Returns an error if the question is empty or only whitespace.
    pub fn new(question: impl Into<String>) -> Result<Self> {
        let question = question.into();
        if question.trim().is_empty() {
            anyhow::bail!("Question must not be empty");
        }
        Ok(Self { question })
    }

    /// Returns the question text.
    #[must_use]
    pub fn question(&self) -> &str {
        &self.question
    }

    /// Builds queries from a list of question strings.
    ///
    /// # Errors
    ///
    /// Returns an error on the first empty question.
    pub fn from_questions<I, S>(questions: I) -> Result<Vec<Self>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        questions.into_iter().map(Self::new).collect()
    }
}

/// The model's answer to one query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// The question exactly as asked.
    pub question: String,
    /// Answer label chosen by the model.
    pub answer: String,
}

impl Response {
    /// Pairs a query with its answer label.
    #[must_use]
    pub fn new(query: &Query, answer: impl Into<String>) -> Self {
        Self {
            question: query.question().to_string(),
            answer: answer.into(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_query_rejects_empty() {
        assert!(Query::new("").is_err());
        assert!(Query::new("   \t").is_err());
    }

    #[test]
    fn test_query_keeps_text_verbatim() {
        let query = Query::new("  What is the style of the painting? ").unwrap();
        assert_eq!(query.question(), "  What is the style of the painting? ");
    }

    #[test]
    fn test_from_questions_stops_on_empty() {
        let result = Query::from_questions(["What is it?", "", "Why?"]);
        assert!(result.is_err());

        let queries = Query::from_questions(["a?", "b?"]).unwrap();
        assert_eq!(queries.len(), 2);
        assert_eq!(queries[1].question(), "b?");
    }

    #[test]
    fn test_response_copies_question() {
        let query = Query::new("What is the medium of the painting?").unwrap();
        let response = Response::new(&query, "oil");
        assert_eq!(response.question, query.question());
        assert_eq!(response.answer, "oil");
    }
}
