use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod logging;
pub mod wire;

pub use wire::{FieldMap, FieldReader, FieldWriter, WireError, WireRecord};

// ============================================================================
// Identities
// ============================================================================

/// A guest that can be addressed by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Recipient {
    pub id: String,
    pub name: String,
}

impl Recipient {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self { id: id.into(), name: name.into() }
    }
}

// ============================================================================
// Invitation
// ============================================================================

/// Event metadata carried by an invitation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDetails {
    pub name: String,
    pub date: String,
    pub time: String,
    pub location: String,
    pub description: String,
}

/// The record a host publishes, and the addressed copies the coordinator
/// derives from it.
#[derive(Debug, Clone, PartialEq)]
pub struct Invitation {
    pub id: String,
    pub event: EventDetails,
    pub host_id: String,
    pub host_name: String,
    pub timestamp: DateTime<Utc>,
    /// Set only on addressed copies.
    pub target: Option<Recipient>,
}

impl Invitation {
    /// New original invitation with a fresh id.
    pub fn new(host_id: impl Into<String>, host_name: impl Into<String>, event: EventDetails) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event,
            host_id: host_id.into(),
            host_name: host_name.into(),
            timestamp: Utc::now(),
            target: None,
        }
    }

    /// Copy of this invitation addressed to one recipient. The id is kept.
    pub fn addressed_to(&self, recipient: &Recipient) -> Self {
        Self {
            target: Some(recipient.clone()),
            ..self.clone()
        }
    }

    pub fn is_addressed(&self) -> bool {
        self.target.is_some()
    }

    pub fn is_addressed_to(&self, recipient_id: &str) -> bool {
        self.target.as_ref().is_some_and(|t| t.id == recipient_id)
    }
}

impl WireRecord for Invitation {
    const KIND: &'static str = "Invitation";

    fn to_fields(&self) -> FieldMap {
        FieldWriter::new()
            .put("id", &self.id)
            .put("event_name", &self.event.name)
            .put("event_date", &self.event.date)
            .put("event_time", &self.event.time)
            .put("location", &self.event.location)
            .put("description", &self.event.description)
            .put("host_name", &self.host_name)
            .put("host_id", &self.host_id)
            .put_timestamp("timestamp", &self.timestamp)
            .put_optional("target_guest_id", self.target.as_ref().map(|t| t.id.as_str()))
            .put_optional("target_guest_name", self.target.as_ref().map(|t| t.name.as_str()))
            .finish()
    }

    fn from_fields(fields: FieldMap) -> Result<Self, WireError> {
        let mut r = FieldReader::new(Self::KIND, fields);

        let target = match (r.take_optional("target_guest_id"), r.take_optional("target_guest_name")) {
            (Some(id), Some(name)) => Some(Recipient { id, name }),
            (None, None) => None,
            (Some(_), None) => return Err(WireError::MissingField {
                record: Self::KIND,
                field: "target_guest_name".to_string(),
            }),
            (None, Some(_)) => return Err(WireError::MissingField {
                record: Self::KIND,
                field: "target_guest_id".to_string(),
            }),
        };

        let invitation = Self {
            id: r.take("id")?,
            event: EventDetails {
                name: r.take("event_name")?,
                date: r.take("event_date")?,
                time: r.take("event_time")?,
                location: r.take("location")?,
                description: r.take("description")?,
            },
            host_name: r.take("host_name")?,
            host_id: r.take("host_id")?,
            timestamp: r.take_timestamp("timestamp")?,
            target,
        };
        r.finish()?;
        Ok(invitation)
    }
}

// ============================================================================
// Response
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Yes,
    No,
    Maybe,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Yes => "yes",
            Decision::No => "no",
            Decision::Maybe => "maybe",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "yes" => Ok(Decision::Yes),
            "no" => Ok(Decision::No),
            "maybe" => Ok(Decision::Maybe),
            other => Err(format!("unknown decision '{}', expected yes, no or maybe", other)),
        }
    }
}

/// A guest's reply to one invitation.
///
/// The serde representation is the one embedded in a summary's response list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Response {
    pub id: String,
    pub invitation_id: String,
    pub guest_name: String,
    pub guest_id: String,
    #[serde(rename = "response")]
    pub decision: Decision,
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Response {
    /// New response from `guest` to `invitation_id` with a fresh id.
    pub fn new(
        invitation_id: impl Into<String>,
        guest: &Recipient,
        decision: Decision,
        message: Option<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            invitation_id: invitation_id.into(),
            guest_name: guest.name.clone(),
            guest_id: guest.id.clone(),
            decision,
            message,
            timestamp: Utc::now(),
        }
    }
}

impl WireRecord for Response {
    const KIND: &'static str = "Response";

    fn to_fields(&self) -> FieldMap {
        FieldWriter::new()
            .put("id", &self.id)
            .put("invitation_id", &self.invitation_id)
            .put("guest_name", &self.guest_name)
            .put("guest_id", &self.guest_id)
            .put("response", self.decision)
            .put("message", self.message.as_deref().unwrap_or(""))
            .put_timestamp("timestamp", &self.timestamp)
            .finish()
    }

    fn from_fields(fields: FieldMap) -> Result<Self, WireError> {
        let mut r = FieldReader::new(Self::KIND, fields);
        let message = r.take("message")?;
        let response = Self {
            id: r.take("id")?,
            invitation_id: r.take("invitation_id")?,
            guest_name: r.take("guest_name")?,
            guest_id: r.take("guest_id")?,
            decision: r.take_parsed("response")?,
            message: (!message.is_empty()).then_some(message),
            timestamp: r.take_timestamp("timestamp")?,
        };
        r.finish()?;
        Ok(response)
    }
}

// ============================================================================
// Summary
// ============================================================================

/// The aggregate the coordinator sends back to the host once every
/// addressed guest has answered.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub id: String,
    pub invitation_id: String,
    pub host_id: String,
    pub total_invited: u32,
    pub total_responses: u32,
    pub yes_count: u32,
    pub no_count: u32,
    pub maybe_count: u32,
    pub responses: Vec<Response>,
    pub timestamp: DateTime<Utc>,
}

impl Summary {
    /// Build the summary for a completed workflow. Counts are derived from
    /// `responses`, which keeps arrival order.
    pub fn for_workflow(invitation: &Invitation, expected: usize, responses: Vec<Response>) -> Self {
        let count = |d: Decision| responses.iter().filter(|r| r.decision == d).count() as u32;

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            invitation_id: invitation.id.clone(),
            host_id: invitation.host_id.clone(),
            total_invited: expected as u32,
            total_responses: responses.len() as u32,
            yes_count: count(Decision::Yes),
            no_count: count(Decision::No),
            maybe_count: count(Decision::Maybe),
            responses,
            timestamp: Utc::now(),
        }
    }

    /// Percentage of invited guests that answered.
    pub fn response_rate(&self) -> f64 {
        percentage(self.total_responses, self.total_invited)
    }

    /// Percentage of invited guests that answered yes.
    pub fn attendance_rate(&self) -> f64 {
        percentage(self.yes_count, self.total_invited)
    }
}

fn percentage(part: u32, whole: u32) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}

impl WireRecord for Summary {
    const KIND: &'static str = "Summary";

    fn to_fields(&self) -> FieldMap {
        // Vec<Response> with derived Serialize cannot fail to encode
        let responses = serde_json::to_string(&self.responses).unwrap_or_else(|_| "[]".to_string());

        FieldWriter::new()
            .put("id", &self.id)
            .put("invitation_id", &self.invitation_id)
            .put("host_id", &self.host_id)
            .put("total_invited", self.total_invited)
            .put("total_responses", self.total_responses)
            .put("yes_count", self.yes_count)
            .put("no_count", self.no_count)
            .put("maybe_count", self.maybe_count)
            .put("responses", responses)
            .put_timestamp("timestamp", &self.timestamp)
            .finish()
    }

    fn from_fields(fields: FieldMap) -> Result<Self, WireError> {
        let mut r = FieldReader::new(Self::KIND, fields);
        let summary = Self {
            id: r.take("id")?,
            invitation_id: r.take("invitation_id")?,
            host_id: r.take("host_id")?,
            total_invited: r.take_parsed("total_invited")?,
            total_responses: r.take_parsed("total_responses")?,
            yes_count: r.take_parsed("yes_count")?,
            no_count: r.take_parsed("no_count")?,
            maybe_count: r.take_parsed("maybe_count")?,
            responses: r.take_embedded("responses")?,
            timestamp: r.take_timestamp("timestamp")?,
        };
        r.finish()?;
        Ok(summary)
    }
}
