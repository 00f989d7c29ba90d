use courier_common::{DeliveryStatus, EmailRecord};

/// Predicate over stored records used by [`find_many`](crate::RecordStore::find_many).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
    statuses: Option<Vec<DeliveryStatus>>,
    attempts_below: Option<u32>,
}

impl RecordFilter {
    /// Matches every record.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Records still eligible for another attempt under a budget of
    /// `max_retries`: not terminal and `attempts < max_retries`.
    #[must_use]
    pub fn retryable(max_retries: u32) -> Self {
        Self::all()
            .with_statuses([DeliveryStatus::Pending, DeliveryStatus::Retry])
            .with_attempts_below(max_retries)
    }

    #[must_use]
    pub fn with_statuses(mut self, statuses: impl IntoIterator<Item = DeliveryStatus>) -> Self {
        self.statuses = Some(statuses.into_iter().collect());
        self
    }

    #[must_use]
    pub const fn with_attempts_below(mut self, limit: u32) -> Self {
        self.attempts_below = Some(limit);
        self
    }

    #[must_use]
    pub fn matches(&self, record: &EmailRecord) -> bool {
        let status_ok = self
            .statuses
            .as_ref()
            .is_none_or(|statuses| statuses.contains(&record.status));
        let attempts_ok = self
            .attempts_below
            .is_none_or(|limit| record.attempts < limit);

        status_ok && attempts_ok
    }
}
