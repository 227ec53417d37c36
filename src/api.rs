//! # Backend REST Client
//!
//! Typed wrappers for the auxiliary HTTP endpoints served next to the chat
//! channel. All calls share one `reqwest::Client` and the chat `api_url`.
//!
//! ## Endpoints:
//! - `POST /generate-summary` `{conversation: [{user, bot}]}` -> `{summary}`
//! - `POST /download-summary` `{summary}` -> PDF bytes
//! - `GET  /quiz/questions` -> `[Question]`
//! - `POST /quiz/submit` `{answers, questions}` -> `{gemini_recommendations}`
//! - `GET  /get-courses` -> `{courses}`
//! - `POST /compare-courses` `{course1, course2}` -> `ComparisonData`

use crate::chat::session::SummaryTurn;
use crate::error::{AppResult, ClientError};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

/// One quiz question. Fields other than the ones used here are kept so the
/// question can be sent back unchanged on submit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizQuestion {
    #[serde(rename = "_id")]
    pub id: String,
    pub question: String,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseDetails {
    pub name: String,
    #[serde(default)]
    pub career_opportunities: Vec<String>,
    #[serde(default)]
    pub skills_required: Vec<String>,
    #[serde(default)]
    pub industry_demand: String,
    #[serde(default)]
    pub average_salary_inr: String,
    #[serde(default)]
    pub top_companies: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonData {
    pub course1_details: CourseDetails,
    pub course2_details: CourseDetails,
    /// Markdown narrative.
    pub comparison: String,
}

#[derive(Serialize)]
struct SummaryRequest<'a> {
    conversation: &'a [SummaryTurn],
}

#[derive(Deserialize)]
struct SummaryResponse {
    summary: String,
}

#[derive(Serialize)]
struct DownloadRequest<'a> {
    summary: &'a str,
}

#[derive(Serialize)]
struct QuizSubmission<'a> {
    answers: &'a BTreeMap<String, String>,
    questions: &'a [QuizQuestion],
}

#[derive(Deserialize)]
struct QuizResult {
    gemini_recommendations: String,
}

#[derive(Deserialize)]
struct CourseList {
    courses: Vec<String>,
}

#[derive(Serialize)]
struct CompareRequest<'a> {
    course1: &'a str,
    course2: &'a str,
}

/// Client for the backend's REST endpoints.
#[derive(Debug, Clone)]
pub struct BackendClient {
    client: Client,
    base_url: String,
}

impl BackendClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Summarize a conversation, as produced by `ChatHandle::summary_conversation`.
    pub async fn generate_summary(&self, conversation: &[SummaryTurn]) -> AppResult<String> {
        if conversation.len() < 2 {
            return Err(ClientError::InvalidState(
                "not enough conversation to generate a summary".into(),
            ));
        }
        debug!(turns = conversation.len(), "Requesting conversation summary");
        let response = self
            .client
            .post(self.endpoint("generate-summary"))
            .json(&SummaryRequest { conversation })
            .send()
            .await?;
        let body: SummaryResponse = check(response).await?.json().await?;
        Ok(body.summary)
    }

    /// Render a summary as a PDF document.
    pub async fn download_summary(&self, summary: &str) -> AppResult<Vec<u8>> {
        let response = self
            .client
            .post(self.endpoint("download-summary"))
            .json(&DownloadRequest { summary })
            .send()
            .await?;
        let bytes = check(response).await?.bytes().await?;
        debug!(bytes = bytes.len(), "Summary document downloaded");
        Ok(bytes.to_vec())
    }

    pub async fn quiz_questions(&self) -> AppResult<Vec<QuizQuestion>> {
        let response = self.client.get(self.endpoint("quiz/questions")).send().await?;
        Ok(check(response).await?.json().await?)
    }

    /// Submit answers keyed by question id; returns the recommendation text.
    pub async fn submit_quiz(
        &self,
        answers: &BTreeMap<String, String>,
        questions: &[QuizQuestion],
    ) -> AppResult<String> {
        let response = self
            .client
            .post(self.endpoint("quiz/submit"))
            .json(&QuizSubmission { answers, questions })
            .send()
            .await?;
        let result: QuizResult = check(response).await?.json().await?;
        Ok(result.gemini_recommendations)
    }

    pub async fn list_courses(&self) -> AppResult<Vec<String>> {
        let response = self.client.get(self.endpoint("get-courses")).send().await?;
        let list: CourseList = check(response).await?.json().await?;
        Ok(list.courses)
    }

    pub async fn compare_courses(&self, course1: &str, course2: &str) -> AppResult<ComparisonData> {
        if course1.trim().is_empty() || course2.trim().is_empty() {
            return Err(ClientError::InvalidState("select both courses to compare".into()));
        }
        let response = self
            .client
            .post(self.endpoint("compare-courses"))
            .json(&CompareRequest { course1, course2 })
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }
}

/// Turn a non-success status into an error carrying the response body.
async fn check(response: Response) -> AppResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let url = response.url().to_string();
    let body = response.text().await.unwrap_or_default();
    Err(ClientError::Http(format!("{url} returned {status}: {body}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_endpoint_joins_paths() {
        let client = BackendClient::new("http://localhost:5000/");
        assert_eq!(client.endpoint("/generate-summary"), "http://localhost:5000/generate-summary");
        assert_eq!(client.endpoint("quiz/submit"), "http://localhost:5000/quiz/submit");
    }

    #[test]
    fn test_summary_request_shape() {
        let turns = vec![
            SummaryTurn { user: "hello".into(), bot: String::new() },
            SummaryTurn { user: String::new(), bot: "Hi!".into() },
        ];
        let body = serde_json::to_value(SummaryRequest { conversation: &turns }).unwrap();
        assert_eq!(
            body,
            json!({"conversation": [{"user": "hello", "bot": ""}, {"user": "", "bot": "Hi!"}]})
        );
    }

    #[test]
    fn test_quiz_question_keeps_unknown_fields() {
        let raw = json!({
            "_id": "q1",
            "question": "Which subject do you enjoy most?",
            "options": ["Maths", "Biology"],
            "category": "interest"
        });
        let question: QuizQuestion = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(question.id, "q1");
        assert_eq!(question.options.len(), 2);

        let mut answers = BTreeMap::new();
        answers.insert("q1".to_string(), "Maths".to_string());
        let body = serde_json::to_value(QuizSubmission { answers: &answers, questions: &[question] }).unwrap();
        assert_eq!(body["answers"]["q1"], "Maths");
        assert_eq!(body["questions"][0], raw);
    }

    #[test]
    fn test_comparison_data_parses() {
        let data: ComparisonData = serde_json::from_value(json!({
            "course1_details": {
                "name": "Computer Engineering",
                "career_opportunities": ["Software Developer"],
                "skills_required": ["Programming"],
                "industry_demand": "High",
                "average_salary_inr": "6-12 LPA",
                "top_companies": ["TCS", "Infosys"]
            },
            "course2_details": {"name": "Civil Engineering"},
            "comparison": "**Computer Engineering** has higher demand."
        }))
        .unwrap();
        assert_eq!(data.course1_details.top_companies, vec!["TCS", "Infosys"]);
        assert!(data.course2_details.career_opportunities.is_empty());
        assert!(data.comparison.starts_with("**"));
    }

    #[tokio::test]
    async fn test_client_side_validation() {
        let client = BackendClient::new("http://127.0.0.1:9");
        let one_turn = [SummaryTurn { user: "hi".into(), bot: String::new() }];
        assert!(matches!(client.generate_summary(&one_turn).await, Err(ClientError::InvalidState(_))));
        assert!(matches!(client.compare_courses("CE", " ").await, Err(ClientError::InvalidState(_))));
    }
}
