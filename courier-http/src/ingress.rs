//! `POST /sendmail`: authenticate, validate and make the first delivery
//! attempt.

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, header::AUTHORIZATION},
};
use courier_common::{MailId, OutgoingMessage, Submission, ValidationError, delivery};
use courier_delivery::{DeliveryOutcome, SubmitError};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::{
    AppState,
    error::{ApiBody, ApiError},
};

/// Successful send.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResult {
    pub status: &'static str,
    pub mail_id: MailId,
    pub accepted: Vec<String>,
}

/// Checks run in the order the relay has always applied them: the body must
/// be a JSON object before the caller is authenticated, and fields are only
/// validated for authenticated callers.
pub async fn send_mail(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ApiBody<SendResult>>, ApiError> {
    let Ok(Value::Object(fields)) = serde_json::from_slice::<Value>(&body) else {
        return Err(ApiError::InvalidJson);
    };

    let authorization = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    if let Err(reason) = state.auth.authorize(authorization) {
        tracing::warn!(reason, "Rejected /sendmail request");
        return Err(ApiError::AccessDenied);
    }

    let submission = parse_submission(&fields)?;

    delivery!(
        level = INFO,
        mail_id = %submission.mail_id,
        to = %submission.message.to,
        "Received submission"
    );

    match state.engine.submit(&submission).await {
        Ok(DeliveryOutcome::Delivered { accepted }) => Ok(Json(ApiBody {
            result: Some(SendResult {
                status: "ok",
                mail_id: submission.mail_id,
                accepted,
            }),
            error: None,
        })),
        Ok(DeliveryOutcome::Failed { reason }) => {
            tracing::warn!(
                mail_id = %submission.mail_id,
                reason,
                "First delivery attempt failed"
            );
            Err(ApiError::DeliveryFailed)
        }
        Err(SubmitError::Duplicate(id)) => Err(ApiError::Duplicate(id)),
    }
}

fn parse_submission(fields: &Map<String, Value>) -> Result<Submission, ValidationError> {
    let message = OutgoingMessage::new(
        required(fields, "from")?,
        required(fields, "to")?,
        required(fields, "subject")?,
        required(fields, "html")?,
    )?;
    let mail_id = MailId::new(required(fields, "mailId")?)?;

    let mut submission = Submission::new(mail_id, message);

    if let Some(Value::String(user_id)) = fields.get("userId")
        && !user_id.is_empty()
    {
        submission = submission.with_user_id(user_id.as_str());
    }

    match fields.get("others") {
        None | Some(Value::Null) => {}
        Some(others) => submission = submission.with_others(others.clone()),
    }

    Ok(submission)
}

fn required<'a>(
    fields: &'a Map<String, Value>,
    name: &'static str,
) -> Result<&'a str, ValidationError> {
    match fields.get(name) {
        Some(Value::String(value)) if !value.trim().is_empty() => Ok(value),
        _ => Err(ValidationError::MissingField(name)),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn test_parse_full_submission() {
        let fields = object(json!({
            "from": "relay@example.com",
            "to": "alice@example.com",
            "subject": "Hi",
            "html": "<p>Hi</p>",
            "mailId": "order-42",
            "userId": "u-7",
            "others": { "campaign": "spring" },
        }));

        let submission = parse_submission(&fields).unwrap();

        assert_eq!(submission.mail_id.as_str(), "order-42");
        assert_eq!(submission.message.subject, "Hi");
        assert_eq!(submission.user_id.as_deref(), Some("u-7"));
        assert_eq!(submission.others, Some(json!({ "campaign": "spring" })));
    }

    #[test]
    fn test_missing_and_non_string_fields() {
        let base = json!({
            "from": "relay@example.com",
            "to": "alice@example.com",
            "subject": "Hi",
            "html": "<p>Hi</p>",
            "mailId": "order-42",
        });

        for (field, replacement) in [
            ("from", Value::Null),
            ("to", json!("   ")),
            ("subject", json!(12)),
            ("html", json!(["<p>"])),
            ("mailId", json!("")),
        ] {
            let mut fields = object(base.clone());
            fields.insert(field.to_string(), replacement);

            assert_eq!(
                parse_submission(&fields).unwrap_err(),
                ValidationError::MissingField(field)
            );
        }
    }

    #[test]
    fn test_to_without_addresses() {
        let fields = object(json!({
            "from": "relay@example.com",
            "to": ",,",
            "subject": "Hi",
            "html": "<p>Hi</p>",
            "mailId": "order-42",
        }));

        assert_eq!(
            parse_submission(&fields).unwrap_err(),
            ValidationError::NoRecipients
        );
    }

    #[test]
    fn test_optional_fields_default_to_none() {
        let fields = object(json!({
            "from": "relay@example.com",
            "to": "alice@example.com",
            "subject": "Hi",
            "html": "<p>Hi</p>",
            "mailId": "order-42",
            "others": null,
        }));

        let submission = parse_submission(&fields).unwrap();
        assert!(submission.user_id.is_none());
        assert!(submission.others.is_none());
    }
}
