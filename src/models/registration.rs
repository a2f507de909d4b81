use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PHONE_CODE: &str = "+33";

fn default_phone_code() -> String {
    DEFAULT_PHONE_CODE.to_string()
}

// Raw form payload as posted by the site. Nothing in here is trusted.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegistrationInput {
    pub full_name: String,
    pub email: String,
    #[serde(alias = "phoneCountryCode")]
    pub phone_code: String,
    pub phone: String,
    pub country: String,
    pub city: String,
    pub spoken_language: String,

    pub needs_accommodation: bool,
    #[serde(alias = "arrivalDate")]
    pub start_date: String,
    #[serde(alias = "departureDate")]
    pub end_date: String,

    pub has_children: bool,
    #[serde(deserialize_with = "string_or_number")]
    pub number_of_children: String,
    pub children_ages: String,

    pub has_reduced_mobility: bool,
    pub has_special_needs: bool,

    pub allergies: String,
    pub comments: String,
}

// The number input may arrive as a JSON number, a string or null
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => String::new(),
        Some(serde_json::Value::String(s)) => s,
        Some(other) => other.to_string(),
    })
}

impl Default for RegistrationInput {
    fn default() -> Self {
        Self {
            full_name: String::new(),
            email: String::new(),
            phone_code: default_phone_code(),
            phone: String::new(),
            country: String::new(),
            city: String::new(),
            spoken_language: String::new(),
            needs_accommodation: false,
            start_date: String::new(),
            end_date: String::new(),
            has_children: false,
            number_of_children: String::new(),
            children_ages: String::new(),
            has_reduced_mobility: false,
            has_special_needs: false,
            allergies: String::new(),
            comments: String::new(),
        }
    }
}

/// Lifecycle of a registration once it reaches the remote store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationStatus {
    #[default]
    Pending,
    Confirmed,
    Cancelled,
}

impl RegistrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistrationStatus::Pending => "pending",
            RegistrationStatus::Confirmed => "confirmed",
            RegistrationStatus::Cancelled => "cancelled",
        }
    }
}

// Row of the `inscriptions` table, minus the server-assigned columns.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RegistrationRecord {
    // Personal information
    pub full_name: String,
    pub email: String,
    pub phone_code: String,
    pub phone: String,
    pub country: String,
    pub city: String,
    pub languages: Option<String>,

    // Accommodation
    pub needs_accommodation: bool,
    pub start_date: Option<String>, // ISO date
    pub end_date: Option<String>,   // ISO date

    // Family
    pub has_children: bool,
    pub number_of_children: Option<u8>,
    pub children_ages: Option<String>,

    // Accessibility
    pub has_reduced_mobility: bool,
    pub has_special_needs: bool,

    // Dietary and free text
    pub allergies: Option<String>,
    pub comments: Option<String>,

    #[serde(default)]
    pub status: RegistrationStatus,
}

/// A registration as returned by the remote store after insert.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StoredRecord {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub record: RegistrationRecord,
}
