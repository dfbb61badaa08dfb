//! Success test and human-readable error messages for completed responses.
//!
//! Well-known statuses always map to a fixed explanation, even when the body
//! carries more detail. Anything else falls back to the server's
//! `error.full_messages` list, then to a generic "unknown error".

use serde::Deserialize;

use crate::http::HttpResponse;

/// Verdict for a completed response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success(HttpResponse),
    Failure {
        message: String,
        response: HttpResponse,
    },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn response(&self) -> &HttpResponse {
        match self {
            Outcome::Success(response) | Outcome::Failure { response, .. } => response,
        }
    }
}

/// True iff the status is in `200..300`.
pub fn is_success(response: &HttpResponse) -> bool {
    (200..300).contains(&response.status)
}

fn well_known_message(status: u16) -> Option<&'static str> {
    let message = match status {
        400 => "Bad Request: something is wrong with the data sent",
        401 => "Unauthorized: check credentials for validity",
        403 => "Forbidden: credentials valid but insufficient access",
        404 => "Not Found: requested resource was not found",
        500 => "Internal Server Error: check server-side logs",
        502 => "Bad Gateway: invalid response from application server",
        503 => "Service Unavailable: backend service unreachable",
        504 => "Gateway Timeout: application did not respond in time",
        _ => return None,
    };
    Some(message)
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    full_messages: Vec<String>,
}

/// Explain why a response failed. Never fails itself.
pub fn error_message(response: &HttpResponse) -> String {
    if let Some(message) = well_known_message(response.status) {
        return message.to_string();
    }
    let joined = serde_json::from_str::<ErrorBody>(&response.body)
        .map(|body| body.error.full_messages.join(" "))
        .unwrap_or_default();
    if joined.trim().is_empty() {
        format!("unknown error (response {})", response.status)
    } else {
        joined
    }
}

pub fn classify(response: HttpResponse) -> Outcome {
    if is_success(&response) {
        Outcome::Success(response)
    } else {
        Outcome::Failure {
            message: error_message(&response),
            response,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_is_exactly_2xx() {
        for status in 100..600u16 {
            let expected = (200..=299).contains(&status);
            assert_eq!(is_success(&HttpResponse::new(status, "")), expected, "{status}");
        }
    }

    #[test]
    fn well_known_codes_ignore_body() {
        let body = r#"{"error":{"full_messages":["Name is invalid"]}}"#;
        let cases = [
            (400, "Bad Request: something is wrong with the data sent"),
            (401, "Unauthorized: check credentials for validity"),
            (403, "Forbidden: credentials valid but insufficient access"),
            (404, "Not Found: requested resource was not found"),
            (500, "Internal Server Error: check server-side logs"),
            (502, "Bad Gateway: invalid response from application server"),
            (503, "Service Unavailable: backend service unreachable"),
            (504, "Gateway Timeout: application did not respond in time"),
        ];
        for (status, expected) in cases {
            assert_eq!(error_message(&HttpResponse::new(status, body)), expected);
            assert_eq!(error_message(&HttpResponse::new(status, "garbage")), expected);
        }
    }

    #[test]
    fn full_messages_are_joined_with_a_space() {
        let response = HttpResponse::new(
            422,
            r#"{"error":{"full_messages":["Name is invalid","Email is invalid"]}}"#,
        );
        assert_eq!(error_message(&response), "Name is invalid Email is invalid");
    }

    #[test]
    fn unparsable_body_falls_back_to_status() {
        let response = HttpResponse::new(422, "<html>oops</html>");
        assert_eq!(error_message(&response), "unknown error (response 422)");
    }

    #[test]
    fn missing_structure_falls_back_to_status() {
        let response = HttpResponse::new(409, r#"{"error":{"message":"conflict"}}"#);
        assert_eq!(error_message(&response), "unknown error (response 409)");

        let response = HttpResponse::new(409, r#"["not","an","object"]"#);
        assert_eq!(error_message(&response), "unknown error (response 409)");
    }

    #[test]
    fn empty_full_messages_fall_back_to_status() {
        let response = HttpResponse::new(422, r#"{"error":{"full_messages":[]}}"#);
        assert_eq!(error_message(&response), "unknown error (response 422)");
        match classify(response) {
            Outcome::Failure { message, .. } => assert_eq!(message, "unknown error (response 422)"),
            Outcome::Success(_) => panic!("422 classified as success"),
        }
    }

    #[test]
    fn classify_splits_success_and_failure() {
        let ok = classify(HttpResponse::new(201, "{}"));
        assert!(ok.is_success());
        assert_eq!(ok.response().status, 201);

        let failed = classify(HttpResponse::new(404, ""));
        assert_eq!(
            failed,
            Outcome::Failure {
                message: "Not Found: requested resource was not found".to_string(),
                response: HttpResponse::new(404, ""),
            }
        );
    }
}
