//! # Contacts
//!
//! Contact model plus the lead matcher/merger that decides whether a
//! normalized lead creates a new contact or enriches an existing one.
//!
//! The merge policy never destroys operator data:
//! - scalar fields are only filled when currently empty
//! - notes are appended with a source tag
//! - attribution metadata is shallow-merged, incoming values winning

use crate::normalizer::{normalize_email, normalize_phone, NormalizedLead};
use crate::{ContactId, Timestamp, UserId, ValidationError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::OnceLock;

/// Maximum length of free-text scalar fields
pub const MAX_FIELD_LENGTH: usize = 255;

/// Lifecycle classification of a contact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactStatus {
    #[default]
    Lead,
    Qualified,
    Customer,
    Archived,
}

impl ContactStatus {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lead => "lead",
            Self::Qualified => "qualified",
            Self::Customer => "customer",
            Self::Archived => "archived",
        }
    }
}

impl fmt::Display for ContactStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Contact attribute names, used to report which fields a change touched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactField {
    FirstName,
    LastName,
    Name,
    Email,
    Phone,
    Company,
    JobTitle,
    Notes,
    Attribution,
    Status,
    Owner,
}

impl ContactField {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FirstName => "first_name",
            Self::LastName => "last_name",
            Self::Name => "name",
            Self::Email => "email",
            Self::Phone => "phone",
            Self::Company => "company",
            Self::JobTitle => "job_title",
            Self::Notes => "notes",
            Self::Attribution => "attribution",
            Self::Status => "status",
            Self::Owner => "owner",
        }
    }
}

impl fmt::Display for ContactField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A person tracked by the CRM
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: ContactId,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    /// Display name
    pub name: Option<String>,
    /// Normalized (trimmed, lower-cased) email
    pub email: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub job_title: Option<String>,
    pub notes: Option<String>,
    /// Campaign attribution (UTM parameters)
    #[serde(default)]
    pub attribution: BTreeMap<String, String>,
    pub status: ContactStatus,
    pub owner_id: Option<UserId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub deleted_at: Option<Timestamp>,
}

impl Contact {
    /// Create an empty contact with the given status
    pub fn new(status: ContactStatus, now: Timestamp) -> Self {
        Self {
            id: ContactId::new(),
            first_name: None,
            last_name: None,
            name: None,
            email: None,
            phone: None,
            company: None,
            job_title: None,
            notes: None,
            attribution: BTreeMap::new(),
            status,
            owner_id: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Whether the contact is soft-deleted
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Best available human-readable label
    pub fn display_label(&self) -> String {
        self.name
            .clone()
            .or_else(|| self.email.clone())
            .unwrap_or_else(|| self.id.to_string())
    }
}

/// Outcome of matching a lead against the contact store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LeadResolution {
    Created {
        contact: Contact,
    },
    Updated {
        contact: Contact,
        changed_fields: BTreeSet<ContactField>,
    },
}

impl LeadResolution {
    /// The resulting contact
    pub fn contact(&self) -> &Contact {
        match self {
            Self::Created { contact } | Self::Updated { contact, .. } => contact,
        }
    }

    /// Whether a new contact was created
    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created { .. })
    }

    /// Fields changed by a merge (empty for creations)
    pub fn changed_fields(&self) -> BTreeSet<ContactField> {
        match self {
            Self::Created { .. } => BTreeSet::new(),
            Self::Updated { changed_fields, .. } => changed_fields.clone(),
        }
    }
}

/// Human-readable tag for a webhook source, e.g. `website_form` -> `Website Form`
pub fn source_tag(source: &str) -> String {
    source
        .split(['_', '-', ' '])
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Decide how a normalized lead lands in the contact store
///
/// `existing` must be the non-deleted contact owning the lead's email, if any.
/// A lead without an email always creates a new contact.
pub fn resolve(
    lead: &NormalizedLead,
    existing: Option<&Contact>,
    source_tag: &str,
    now: Timestamp,
) -> LeadResolution {
    let existing = match (lead.email.as_ref(), existing) {
        (Some(_), Some(existing)) => existing,
        _ => {
            return LeadResolution::Created {
                contact: contact_from_lead(lead, source_tag, now),
            }
        }
    };

    let mut contact = existing.clone();
    let mut changed = BTreeSet::new();

    fill_if_empty(&mut contact.first_name, &lead.first_name, ContactField::FirstName, &mut changed);
    fill_if_empty(&mut contact.last_name, &lead.last_name, ContactField::LastName, &mut changed);
    fill_if_empty(&mut contact.name, &lead.name, ContactField::Name, &mut changed);
    fill_if_empty(&mut contact.phone, &lead.phone, ContactField::Phone, &mut changed);
    fill_if_empty(&mut contact.company, &lead.company, ContactField::Company, &mut changed);
    fill_if_empty(&mut contact.job_title, &lead.job_title, ContactField::JobTitle, &mut changed);

    if let Some(note) = &lead.notes {
        contact.notes = Some(append_note(contact.notes.as_deref(), note, source_tag));
        changed.insert(ContactField::Notes);
    }

    for (key, value) in &lead.attribution {
        let previous = contact.attribution.insert(key.clone(), value.clone());
        if previous.as_ref() != Some(value) {
            changed.insert(ContactField::Attribution);
        }
    }

    if !changed.is_empty() {
        contact.updated_at = now;
    }

    LeadResolution::Updated {
        contact,
        changed_fields: changed,
    }
}

fn contact_from_lead(lead: &NormalizedLead, source_tag: &str, now: Timestamp) -> Contact {
    let mut contact = Contact::new(ContactStatus::Lead, now);
    contact.first_name = lead.first_name.clone();
    contact.last_name = lead.last_name.clone();
    contact.name = lead.name.clone();
    contact.email = lead.email.clone();
    contact.phone = lead.phone.clone();
    contact.company = lead.company.clone();
    contact.job_title = lead.job_title.clone();
    contact.notes = lead
        .notes
        .as_deref()
        .map(|note| append_note(None, note, source_tag));
    contact.attribution = lead.attribution.clone();
    contact
}

fn fill_if_empty(
    target: &mut Option<String>,
    incoming: &Option<String>,
    field: ContactField,
    changed: &mut BTreeSet<ContactField>,
) {
    let is_empty = target.as_deref().map_or(true, |v| v.trim().is_empty());
    if let (true, Some(value)) = (is_empty, incoming) {
        *target = Some(value.clone());
        changed.insert(field);
    }
}

fn append_note(existing: Option<&str>, note: &str, source_tag: &str) -> String {
    let tagged = if source_tag.is_empty() {
        note.to_string()
    } else {
        format!("{}: {}", source_tag, note)
    };

    match existing.filter(|e| !e.trim().is_empty()) {
        Some(existing) => format!("{}\n\n{}", existing, tagged),
        None => tagged,
    }
}

// ============================================================================
// Operator edits
// ============================================================================

/// Operator-supplied fields for creating a contact
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContactDraft {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub job_title: Option<String>,
    pub notes: Option<String>,
    pub attribution: BTreeMap<String, String>,
    pub status: Option<ContactStatus>,
    pub owner_id: Option<UserId>,
}

impl ContactDraft {
    /// Validate the draft and build a contact
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] when the email is malformed, a field is
    /// too long, or neither a name nor an email is supplied.
    pub fn into_contact(self, now: Timestamp) -> Result<Contact, ValidationError> {
        let mut contact = Contact::new(self.status.unwrap_or_default(), now);
        contact.first_name = clean_text("first_name", self.first_name)?;
        contact.last_name = clean_text("last_name", self.last_name)?;
        contact.name = match clean_text("name", self.name)? {
            Some(name) => Some(name),
            None => join_names(contact.first_name.as_deref(), contact.last_name.as_deref()),
        };
        contact.email = clean_email(self.email)?;
        contact.phone = self.phone.as_deref().and_then(normalize_phone);
        contact.company = clean_text("company", self.company)?;
        contact.job_title = clean_text("job_title", self.job_title)?;
        contact.notes = self.notes.filter(|n| !n.trim().is_empty());
        contact.attribution = self.attribution;
        contact.owner_id = self.owner_id;

        if contact.name.is_none() && contact.email.is_none() {
            return Err(ValidationError::Required {
                field: "name".to_string(),
            });
        }

        Ok(contact)
    }
}

/// Partial update of a contact
///
/// `None` leaves a field untouched; an empty string clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContactPatch {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub job_title: Option<String>,
    pub notes: Option<String>,
    pub status: Option<ContactStatus>,
    pub owner_id: Option<UserId>,
}

impl ContactPatch {
    /// Apply the patch and report which fields changed
    pub fn apply(
        self,
        contact: &mut Contact,
        now: Timestamp,
    ) -> Result<BTreeSet<ContactField>, ValidationError> {
        let mut changed = BTreeSet::new();

        let text_updates = [
            (ContactField::FirstName, self.first_name),
            (ContactField::LastName, self.last_name),
            (ContactField::Name, self.name),
            (ContactField::Company, self.company),
            (ContactField::JobTitle, self.job_title),
        ];
        for (field, value) in text_updates {
            if let Some(value) = value {
                let cleaned = clean_text(field.as_str(), Some(value))?;
                let target = match field {
                    ContactField::FirstName => &mut contact.first_name,
                    ContactField::LastName => &mut contact.last_name,
                    ContactField::Name => &mut contact.name,
                    ContactField::Company => &mut contact.company,
                    _ => &mut contact.job_title,
                };
                set_if_changed(target, cleaned, field, &mut changed);
            }
        }

        if let Some(email) = self.email {
            let cleaned = clean_email(Some(email))?;
            set_if_changed(&mut contact.email, cleaned, ContactField::Email, &mut changed);
        }

        if let Some(phone) = self.phone {
            let cleaned = normalize_phone(&phone);
            set_if_changed(&mut contact.phone, cleaned, ContactField::Phone, &mut changed);
        }

        if let Some(notes) = self.notes {
            let cleaned = Some(notes).filter(|n| !n.trim().is_empty());
            set_if_changed(&mut contact.notes, cleaned, ContactField::Notes, &mut changed);
        }

        if let Some(status) = self.status {
            if contact.status != status {
                contact.status = status;
                changed.insert(ContactField::Status);
            }
        }

        if let Some(owner) = self.owner_id {
            if contact.owner_id != Some(owner) {
                contact.owner_id = Some(owner);
                changed.insert(ContactField::Owner);
            }
        }

        if !changed.is_empty() {
            contact.updated_at = now;
        }

        Ok(changed)
    }
}

fn set_if_changed(
    target: &mut Option<String>,
    value: Option<String>,
    field: ContactField,
    changed: &mut BTreeSet<ContactField>,
) {
    if *target != value {
        *target = value;
        changed.insert(field);
    }
}

fn clean_text(field: &str, value: Option<String>) -> Result<Option<String>, ValidationError> {
    let value = match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => v,
        _ => return Ok(None),
    };

    if value.chars().count() > MAX_FIELD_LENGTH {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max_length: MAX_FIELD_LENGTH,
        });
    }

    Ok(Some(value))
}

fn clean_email(value: Option<String>) -> Result<Option<String>, ValidationError> {
    let email = match value.as_deref().and_then(normalize_email) {
        Some(email) => email,
        None => return Ok(None),
    };

    if email.len() > MAX_FIELD_LENGTH {
        return Err(ValidationError::TooLong {
            field: "email".to_string(),
            max_length: MAX_FIELD_LENGTH,
        });
    }

    if !looks_like_email(&email) {
        return Err(ValidationError::InvalidFormat {
            field: "email".to_string(),
            message: "expected an address like name@example.com".to_string(),
        });
    }

    Ok(Some(email))
}

fn join_names(first: Option<&str>, last: Option<&str>) -> Option<String> {
    let joined = [first, last]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ");
    Some(joined).filter(|j| !j.is_empty())
}

fn looks_like_email(email: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(email))
}

#[cfg(test)]
#[path = "contact_tests.rs"]
mod tests;
