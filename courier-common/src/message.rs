use serde::{Deserialize, Serialize};

use crate::{MailId, ValidationError};

/// The payload handed to a mail transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html: String,
}

impl OutgoingMessage {
    /// Build a message, rejecting empty fields.
    ///
    /// # Errors
    /// Returns [`ValidationError::MissingField`] naming the first empty field.
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        subject: impl Into<String>,
        html: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let message = Self {
            from: from.into(),
            to: to.into(),
            subject: subject.into(),
            html: html.into(),
        };
        message.validate()?;
        Ok(message)
    }

    /// Check that every field carries content and `to` names at least one
    /// recipient.
    ///
    /// # Errors
    /// Returns [`ValidationError::MissingField`] naming the first empty field,
    /// or [`ValidationError::NoRecipients`].
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some((field, _)) = [
            ("from", &self.from),
            ("to", &self.to),
            ("subject", &self.subject),
            ("html", &self.html),
        ]
        .into_iter()
        .find(|(_, value)| value.trim().is_empty())
        {
            return Err(ValidationError::MissingField(field));
        }

        if self.recipients().next().is_none() {
            return Err(ValidationError::NoRecipients);
        }

        Ok(())
    }

    /// The individual recipient addresses in `to`.
    ///
    /// Multiple recipients may be given comma separated.
    pub fn recipients(&self) -> impl Iterator<Item = &str> {
        self.to
            .split(',')
            .map(str::trim)
            .filter(|address| !address.is_empty())
    }
}

/// A validated request to send an email for the first time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub mail_id: MailId,
    pub message: OutgoingMessage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub others: Option<serde_json::Value>,
}

impl Submission {
    #[must_use]
    pub const fn new(mail_id: MailId, message: OutgoingMessage) -> Self {
        Self {
            mail_id,
            message,
            user_id: None,
            others: None,
        }
    }

    #[must_use]
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    #[must_use]
    pub fn with_others(mut self, others: serde_json::Value) -> Self {
        self.others = Some(others);
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_rejects_empty_fields() {
        let err = OutgoingMessage::new("a@x.com", "b@x.com", "  ", "<p>hi</p>").unwrap_err();
        assert_eq!(err, ValidationError::MissingField("subject"));

        let err = OutgoingMessage::new("", "", "", "").unwrap_err();
        assert_eq!(err, ValidationError::MissingField("from"));
    }

    #[test]
    fn test_rejects_separator_only_recipients() {
        for to in [",", ",,", " , ,"] {
            assert_eq!(
                OutgoingMessage::new("a@x.com", to, "Hi", "<p>hi</p>").unwrap_err(),
                ValidationError::NoRecipients
            );
        }
    }

    #[test]
    fn test_recipients_split_on_commas() {
        let message =
            OutgoingMessage::new("a@x.com", "b@x.com, c@x.com,,", "Hi", "<p>hi</p>").unwrap();

        assert_eq!(
            message.recipients().collect::<Vec<_>>(),
            vec!["b@x.com", "c@x.com"]
        );
    }
}
