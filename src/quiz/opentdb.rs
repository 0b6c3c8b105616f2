use log::debug;
use serde::Deserialize;
use thiserror::Error;

use crate::quiz::Question;

const DEFAULT_BASE_URL: &str = "https://opentdb.com";

/// Network or data failure while talking to the trivia API. Not retried; the
/// caller reports it and stays out of the quiz flow.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("trivia API request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("trivia API could not serve the request (response_code {0})")]
    Api(u8),
    #[error("trivia API returned malformed data: {0}")]
    Malformed(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub const ALL: [Difficulty; 3] = [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard];

    /// Query-parameter value the API expects.
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }

    /// Button caption shown to the player.
    pub fn label(&self) -> &'static str {
        match self {
            Difficulty::Easy => "Easy",
            Difficulty::Medium => "Medium",
            Difficulty::Hard => "Hard",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.label() == label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Category {
    pub id: u32,
    pub name: String,
}

pub struct TriviaApi {
    client: reqwest::Client,
    base_url: String,
}

impl TriviaApi {
    /// Points at opentdb.com unless OPENTDB_BASE_URL says otherwise.
    pub fn from_env() -> Self {
        let base_url =
            std::env::var("OPENTDB_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Self::with_base_url(base_url)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Fetch `amount` multiple-choice questions. Every text field is decoded
    /// from HTML entities here, before it can reach display or comparison.
    pub async fn fetch_questions(
        &self,
        category: u32,
        difficulty: Difficulty,
        amount: usize,
    ) -> Result<Vec<Question>, FetchError> {
        debug!(
            "Fetching {} {} questions for category {}",
            amount,
            difficulty.as_str(),
            category
        );
        let payload: QuestionsResponse = self
            .client
            .get(format!("{}/api.php", self.base_url))
            .query(&[
                ("amount", amount.to_string()),
                ("category", category.to_string()),
                ("difficulty", difficulty.as_str().to_string()),
                ("type", "multiple".to_string()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        convert_questions(payload)
    }

    /// Fetch the category list used to build the selection keyboard.
    pub async fn fetch_categories(&self) -> Result<Vec<Category>, FetchError> {
        let payload: CategoriesResponse = self
            .client
            .get(format!("{}/api_category.php", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        if payload.trivia_categories.is_empty() {
            return Err(FetchError::Malformed("empty category list"));
        }
        Ok(payload.trivia_categories)
    }
}

#[derive(Debug, Deserialize)]
struct QuestionsResponse {
    response_code: u8,
    #[serde(default)]
    results: Vec<RawQuestion>,
}

/// A question as the API serves it: entity-encoded, extra fields ignored.
#[derive(Debug, Deserialize)]
struct RawQuestion {
    question: String,
    correct_answer: String,
    incorrect_answers: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CategoriesResponse {
    trivia_categories: Vec<Category>,
}

fn convert_questions(payload: QuestionsResponse) -> Result<Vec<Question>, FetchError> {
    if payload.response_code != 0 {
        return Err(FetchError::Api(payload.response_code));
    }
    if payload.results.is_empty() {
        return Err(FetchError::Malformed("empty result set"));
    }
    payload.results.into_iter().map(decode_question).collect()
}

fn decode_question(raw: RawQuestion) -> Result<Question, FetchError> {
    if raw.question.is_empty() {
        return Err(FetchError::Malformed("question without a prompt"));
    }
    if raw.correct_answer.is_empty() {
        return Err(FetchError::Malformed("question without a correct answer"));
    }
    if raw.incorrect_answers.is_empty() {
        return Err(FetchError::Malformed("question without incorrect answers"));
    }
    Ok(Question::new(
        decode_entities(&raw.question),
        decode_entities(&raw.correct_answer),
        raw.incorrect_answers
            .iter()
            .map(|answer| decode_entities(answer))
            .collect(),
    ))
}

fn decode_entities(text: &str) -> String {
    html_escape::decode_html_entities(text).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> QuestionsResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn decodes_entities_before_anything_else() {
        assert_eq!(decode_entities("Qu&eacute;bec"), "Québec");
        assert_eq!(
            decode_entities("Shakespeare&#039;s &quot;Hamlet&quot;"),
            "Shakespeare's \"Hamlet\""
        );
    }

    #[test]
    fn converts_a_successful_payload() {
        let payload = parse(
            r#"{
                "response_code": 0,
                "results": [{
                    "category": "Geography",
                    "type": "multiple",
                    "difficulty": "easy",
                    "question": "What is the capital of Qu&eacute;bec?",
                    "correct_answer": "Qu&eacute;bec City",
                    "incorrect_answers": ["Montr&eacute;al", "Laval", "Gatineau"]
                }]
            }"#,
        );
        let questions = convert_questions(payload).unwrap();
        assert_eq!(questions.len(), 1);
        assert_eq!(questions[0].prompt, "What is the capital of Québec?");
        assert_eq!(questions[0].correct_answer, "Québec City");
        assert_eq!(questions[0].incorrect_answers[0], "Montréal");
        assert_eq!(questions[0].choice_count(), 4);
    }

    #[test]
    fn non_zero_response_code_is_a_fetch_error() {
        let payload = parse(r#"{"response_code": 1, "results": []}"#);
        assert!(matches!(
            convert_questions(payload),
            Err(FetchError::Api(1))
        ));
    }

    #[test]
    fn empty_result_set_is_a_fetch_error() {
        let payload = parse(r#"{"response_code": 0, "results": []}"#);
        assert!(matches!(
            convert_questions(payload),
            Err(FetchError::Malformed(_))
        ));
    }

    #[test]
    fn question_without_wrong_answers_is_rejected() {
        let payload = parse(
            r#"{
                "response_code": 0,
                "results": [{
                    "question": "Lonely?",
                    "correct_answer": "Yes",
                    "incorrect_answers": []
                }]
            }"#,
        );
        assert!(matches!(
            convert_questions(payload),
            Err(FetchError::Malformed(_))
        ));
    }

    #[test]
    fn difficulty_labels_round_trip() {
        for difficulty in Difficulty::ALL {
            assert_eq!(Difficulty::from_label(difficulty.label()), Some(difficulty));
        }
        assert_eq!(Difficulty::from_label("Nightmare"), None);
    }
}
