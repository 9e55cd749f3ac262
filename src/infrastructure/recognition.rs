//! HTTP client for the face recognition service.
//!
//! Endpoints:
//! - `POST /recognize`      `{"image": "data:image/jpeg;base64,..."}`
//! - `GET  /persons`
//! - `POST /add-person`     `{"name", "relation", "images": [base64, ...]}`
//! - `DELETE /delete-person/<id>`

use crate::domain::models::{Candidate, Person, RecognitionReply};
use crate::domain::ports::{Recognizer, RecognizerError};
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Serialize)]
struct RecognizeRequest {
    image: String,
}

#[derive(Debug, Deserialize)]
struct RecognizeResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    faces: Vec<Candidate>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Serialize)]
struct AddPersonRequest<'a> {
    name: &'a str,
    relation: &'a str,
    images: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct PersonsResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    persons: Vec<Person>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl StatusResponse {
    fn into_result(self) -> Result<String> {
        if self.success {
            Ok(self.message.unwrap_or_default())
        } else {
            anyhow::bail!(
                "{}",
                self.error
                    .or(self.message)
                    .unwrap_or_else(|| "request rejected".to_string())
            )
        }
    }
}

fn reply_from_response(response: RecognizeResponse) -> Result<RecognitionReply, RecognizerError> {
    if !response.success {
        return Err(RecognizerError::Service(
            response
                .message
                .unwrap_or_else(|| "recognition failed".to_string()),
        ));
    }
    // The service reports one entry per detected face; the first is used.
    Ok(match response.faces.into_iter().next() {
        Some(candidate) => RecognitionReply::Match(candidate),
        None => RecognitionReply::NoMatch,
    })
}

pub struct HttpRecognizer {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRecognizer {
    /// `timeout` bounds every request at the HTTP layer; the orchestrator
    /// applies its own recognition deadline on top.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn list_persons(&self) -> Result<Vec<Person>> {
        let response: PersonsResponse = self
            .client
            .get(self.url("/persons"))
            .send()
            .await
            .context("GET /persons")?
            .json()
            .await
            .context("decoding /persons response")?;
        if !response.success {
            anyhow::bail!(
                "listing persons failed: {}",
                response.message.unwrap_or_default()
            );
        }
        Ok(response.persons)
    }

    /// Register a person from one or more face photos (JPEG bytes).
    pub async fn add_person(&self, name: &str, relation: &str, images: &[Vec<u8>]) -> Result<String> {
        let request = AddPersonRequest {
            name,
            relation,
            images: images.iter().map(|image| BASE64.encode(image)).collect(),
        };
        info!("Registering {} ({}) with {} photos", name, relation, images.len());
        let response: StatusResponse = self
            .client
            .post(self.url("/add-person"))
            .json(&request)
            .send()
            .await
            .context("POST /add-person")?
            .json()
            .await
            .context("decoding /add-person response")?;
        response.into_result()
    }

    pub async fn delete_person(&self, id: i64) -> Result<String> {
        let response: StatusResponse = self
            .client
            .delete(self.url(&format!("/delete-person/{}", id)))
            .send()
            .await
            .with_context(|| format!("DELETE /delete-person/{}", id))?
            .json()
            .await
            .context("decoding /delete-person response")?;
        response.into_result()
    }
}

#[async_trait]
impl Recognizer for HttpRecognizer {
    async fn recognize(&self, frame: &[u8]) -> Result<RecognitionReply, RecognizerError> {
        let request = RecognizeRequest {
            image: format!("data:image/jpeg;base64,{}", BASE64.encode(frame)),
        };
        debug!("Submitting {} byte frame for recognition", frame.len());

        let response = self
            .client
            .post(self.url("/recognize"))
            .json(&request)
            .send()
            .await
            .map_err(|e| RecognizerError::Transport(e.to_string()))?;

        let status = response.status();
        let body: RecognizeResponse = response.json().await.map_err(|e| {
            RecognizerError::Service(format!("HTTP {}: undecodable body: {}", status, e))
        })?;
        if !status.is_success() && body.success {
            return Err(RecognizerError::Service(format!("HTTP {}", status)));
        }
        reply_from_response(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<RecognitionReply, RecognizerError> {
        reply_from_response(serde_json::from_str(json).unwrap())
    }

    #[test]
    fn test_first_face_is_used() {
        let reply = parse(
            r#"{"success":true,"faces":[
                {"name":"딸","relation":"딸","confidence":92},
                {"name":"unknown","relation":"","confidence":31.5}
            ]}"#,
        )
        .unwrap();
        assert_eq!(
            reply,
            RecognitionReply::Match(Candidate {
                name: "딸".to_string(),
                relation: "딸".to_string(),
                confidence: 92.0,
            })
        );
    }

    #[test]
    fn test_no_faces_is_no_match() {
        assert_eq!(
            parse(r#"{"success":true,"faces":[]}"#).unwrap(),
            RecognitionReply::NoMatch
        );
    }

    #[test]
    fn test_failure_carries_service_message() {
        let err = parse(r#"{"success":false,"message":"얼굴을 찾을 수 없습니다."}"#).unwrap_err();
        match err {
            RecognizerError::Service(message) => assert_eq!(message, "얼굴을 찾을 수 없습니다."),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_status_response() {
        let ok: StatusResponse =
            serde_json::from_str(r#"{"success":true,"message":"삭제되었습니다."}"#).unwrap();
        assert_eq!(ok.into_result().unwrap(), "삭제되었습니다.");

        let rejected: StatusResponse = serde_json::from_str(r#"{"error":"필수 데이터가 누락되었습니다"}"#).unwrap();
        assert!(rejected
            .into_result()
            .unwrap_err()
            .to_string()
            .contains("누락"));
    }

    #[test]
    fn test_base_url_is_normalized() {
        let recognizer = HttpRecognizer::new("http://127.0.0.1:5000/", Duration::from_secs(1)).unwrap();
        assert_eq!(recognizer.url("/persons"), "http://127.0.0.1:5000/persons");
    }
}
