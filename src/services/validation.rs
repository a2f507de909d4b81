//! Sanitization and validation of registration form fields.
//!
//! Every rule sanitizes first (markup removal, trimming) and then checks the
//! sanitized value, so callers always get back something safe to redisplay.
//! All functions here are pure: the only time-dependent rule (the accommodation
//! date window) takes "today" as a parameter.

use chrono::{DateTime, Months, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use validator::ValidateEmail;

use crate::models::registration::{RegistrationInput, RegistrationRecord, RegistrationStatus};

// Maximum field lengths, in characters
pub const MAX_FULL_NAME: usize = 100;
pub const MAX_EMAIL: usize = 254; // RFC 5321
pub const MAX_PHONE: usize = 20;
pub const MAX_COUNTRY: usize = 100;
pub const MAX_CITY: usize = 100;
pub const MAX_SPOKEN_LANGUAGE: usize = 100;
pub const MAX_CHILDREN_AGES: usize = 100;
pub const MAX_ALLERGIES: usize = 500;
pub const MAX_COMMENTS: usize = 1000;

pub const MAX_CHILDREN: i64 = 20;
pub const MIN_PHONE_DIGITS: usize = 6;
pub const DATE_WINDOW_MONTHS: u32 = 24;

static SCRIPT_OR_STYLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<(script|style)\b[^>]*>.*?</(script|style)\s*>")
        .expect("script/style pattern is valid")
});
static COMMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<!--.*?-->").expect("comment pattern is valid"));
static TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"</?[a-zA-Z!?][^>]*>").expect("tag pattern is valid"));
// A tag opener with no closing bracket swallows the rest of the text
static UNTERMINATED_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<[a-zA-Z/!?].*$").expect("unterminated tag pattern is valid"));

static NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-ZÀ-ÿ\s'-]+$").expect("name pattern is valid"));
static LOCATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-ZÀ-ÿ\s'-]+$").expect("location pattern is valid"));
static PHONE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9\s\-+()]+$").expect("phone pattern is valid"));
static PHONE_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+[0-9]{1,4}$").expect("phone code pattern is valid"));
static AGES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9,\s]+$").expect("ages pattern is valid"));

/// Form fields that can carry a validation error.
///
/// Declaration order is the focus priority: when several fields fail, the
/// presentation layer highlights the first one in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Field {
    FullName,
    Email,
    PhoneCode,
    Phone,
    Country,
    City,
    SpokenLanguage,
    Dates,
    NumberOfChildren,
    ChildrenAges,
    Allergies,
    Comments,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::FullName => "fullName",
            Field::Email => "email",
            Field::PhoneCode => "phoneCode",
            Field::Phone => "phone",
            Field::Country => "country",
            Field::City => "city",
            Field::SpokenLanguage => "spokenLanguage",
            Field::Dates => "dates",
            Field::NumberOfChildren => "numberOfChildren",
            Field::ChildrenAges => "childrenAges",
            Field::Allergies => "allergies",
            Field::Comments => "comments",
        }
    }

    // (French, English) labels used inside error messages
    fn labels(&self) -> (&'static str, &'static str) {
        match self {
            Field::FullName => ("Le nom", "Name"),
            Field::Email => ("L'email", "Email"),
            Field::PhoneCode => ("L'indicatif", "Country code"),
            Field::Phone => ("Le téléphone", "Phone"),
            Field::Country => ("Pays", "Country"),
            Field::City => ("Ville", "City"),
            Field::SpokenLanguage => ("Langue parlée", "Spoken language"),
            Field::Dates => ("Dates", "Dates"),
            Field::NumberOfChildren => ("Nombre d'enfants", "Number of children"),
            Field::ChildrenAges => ("Les âges", "Ages"),
            Field::Allergies => ("Allergies", "Allergies"),
            Field::Comments => ("Commentaires", "Comments"),
        }
    }
}

/// Outcome of a single field rule.
///
/// `sanitized` is filled even when the check fails so the form can show the
/// cleaned value back to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldCheck<T = String> {
    pub is_valid: bool,
    pub sanitized: T,
    pub error: Option<String>,
}

impl<T> FieldCheck<T> {
    fn ok(sanitized: T) -> Self {
        Self {
            is_valid: true,
            sanitized,
            error: None,
        }
    }

    fn fail(sanitized: T, error: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            sanitized,
            error: Some(error.into()),
        }
    }
}

/// Aggregated result of `validate_form_data`.
#[derive(Debug, Clone, PartialEq)]
pub struct FormValidationResult {
    pub is_valid: bool,
    pub errors: BTreeMap<Field, String>,
    pub sanitized: RegistrationRecord,
}

impl FormValidationResult {
    /// First invalid field in focus priority order.
    pub fn first_invalid_field(&self) -> Option<Field> {
        self.errors.keys().next().copied()
    }
}

fn strip_markup_once(input: &str) -> String {
    let without_blocks = SCRIPT_OR_STYLE.replace_all(input, "");
    let without_comments = COMMENT.replace_all(&without_blocks, "");
    TAG.replace_all(&without_comments, "").into_owned()
}

/// Strip markup from free text and trim surrounding whitespace.
///
/// Stripping repeats until nothing changes, since removing an inner tag can
/// join the pieces of an outer one (`<<b>script>`). Every pass that changes
/// the text makes it shorter, so the loop ends.
pub fn sanitize_string(input: &str) -> String {
    if input.is_empty() {
        return String::new();
    }

    let mut current = input.to_string();
    loop {
        let next = strip_markup_once(&current);
        if next == current {
            break;
        }
        current = next;
    }

    UNTERMINATED_TAG.replace(&current, "").trim().to_string()
}

fn char_len(value: &str) -> usize {
    value.chars().count()
}

fn too_long(field: Field, max: usize) -> String {
    let (fr, en) = field.labels();
    format!(
        "{} ne doit pas dépasser {} caractères / {} must not exceed {} characters",
        fr, max, en, max
    )
}

pub fn validate_full_name(name: &str) -> FieldCheck {
    let sanitized = sanitize_string(name);

    if sanitized.is_empty() {
        return FieldCheck::fail(sanitized, "Le nom est requis / Name is required");
    }

    if char_len(&sanitized) > MAX_FULL_NAME {
        return FieldCheck::fail(sanitized, too_long(Field::FullName, MAX_FULL_NAME));
    }

    if !NAME.is_match(&sanitized) {
        return FieldCheck::fail(
            sanitized,
            "Le nom contient des caractères invalides / Name contains invalid characters",
        );
    }

    FieldCheck::ok(sanitized)
}

/// Validate an email address; the sanitized value is lower-cased.
pub fn validate_email(email: &str) -> FieldCheck {
    let sanitized = sanitize_string(email).to_lowercase();

    if sanitized.is_empty() {
        return FieldCheck::fail(sanitized, "L'email est requis / Email is required");
    }

    if char_len(&sanitized) > MAX_EMAIL {
        return FieldCheck::fail(sanitized, too_long(Field::Email, MAX_EMAIL));
    }

    if !sanitized.as_str().validate_email() {
        return FieldCheck::fail(sanitized, "Format d'email invalide / Invalid email format");
    }

    // Rejected even when the grammar accepts them
    if sanitized.contains(['<', '>', '"']) {
        return FieldCheck::fail(
            sanitized,
            "Email contient des caractères interdits / Email contains forbidden characters",
        );
    }

    FieldCheck::ok(sanitized)
}

pub fn validate_phone_code(code: &str) -> FieldCheck {
    let sanitized = sanitize_string(code);

    if sanitized.is_empty() {
        return FieldCheck::fail(
            sanitized,
            "L'indicatif est requis / Country code is required",
        );
    }

    if !PHONE_CODE.is_match(&sanitized) {
        return FieldCheck::fail(
            sanitized,
            "Indicatif invalide (ex: +33) / Invalid country code (e.g. +33)",
        );
    }

    FieldCheck::ok(sanitized)
}

pub fn validate_phone(phone: &str) -> FieldCheck {
    let sanitized = sanitize_string(phone);

    if sanitized.is_empty() {
        return FieldCheck::fail(sanitized, "Le téléphone est requis / Phone is required");
    }

    if char_len(&sanitized) > MAX_PHONE {
        return FieldCheck::fail(sanitized, too_long(Field::Phone, MAX_PHONE));
    }

    if !PHONE.is_match(&sanitized) {
        return FieldCheck::fail(
            sanitized,
            "Format de téléphone invalide / Invalid phone format",
        );
    }

    let digits = sanitized.chars().filter(|c| c.is_ascii_digit()).count();
    if digits < MIN_PHONE_DIGITS {
        return FieldCheck::fail(
            sanitized,
            "Le numéro de téléphone est trop court / Phone number is too short",
        );
    }

    FieldCheck::ok(sanitized)
}

/// Validate a country or city. Any other field falls back to the city limit.
pub fn validate_location(location: &str, field: Field) -> FieldCheck {
    let sanitized = sanitize_string(location);
    let (fr, en) = field.labels();

    if sanitized.is_empty() {
        return FieldCheck::fail(sanitized, format!("{} est requis / {} is required", fr, en));
    }

    let max = match field {
        Field::Country => MAX_COUNTRY,
        _ => MAX_CITY,
    };

    if char_len(&sanitized) > max {
        return FieldCheck::fail(sanitized, too_long(field, max));
    }

    if !LOCATION.is_match(&sanitized) {
        return FieldCheck::fail(
            sanitized,
            format!(
                "{} contient des caractères invalides / {} contains invalid characters",
                fr, en
            ),
        );
    }

    FieldCheck::ok(sanitized)
}

pub fn validate_children_ages(ages: &str) -> FieldCheck {
    let sanitized = sanitize_string(ages);

    if sanitized.is_empty() {
        return FieldCheck::ok(sanitized);
    }

    if char_len(&sanitized) > MAX_CHILDREN_AGES {
        return FieldCheck::fail(
            sanitized,
            format!(
                "Les âges ne doivent pas dépasser {} caractères / Ages must not exceed {} characters",
                MAX_CHILDREN_AGES, MAX_CHILDREN_AGES
            ),
        );
    }

    if !AGES.is_match(&sanitized) {
        return FieldCheck::fail(
            sanitized,
            "Format d'âges invalide (utilisez des chiffres séparés par des virgules) / Invalid ages format (use numbers separated by commas)",
        );
    }

    FieldCheck::ok(sanitized)
}

/// Optional free text with a length cap and no charset restriction.
pub fn validate_text_field(text: &str, field: Field, max: usize) -> FieldCheck {
    let sanitized = sanitize_string(text);

    if sanitized.is_empty() {
        return FieldCheck::ok(sanitized);
    }

    if char_len(&sanitized) > max {
        return FieldCheck::fail(sanitized, too_long(field, max));
    }

    FieldCheck::ok(sanitized)
}

pub fn validate_number_of_children(raw: &str) -> FieldCheck<Option<u8>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return FieldCheck::ok(None);
    }

    match trimmed.parse::<i64>() {
        Ok(count) if (0..=MAX_CHILDREN).contains(&count) => FieldCheck::ok(Some(count as u8)),
        _ => FieldCheck::fail(
            None,
            "Nombre d'enfants invalide (0-20) / Invalid number of children (0-20)",
        ),
    }
}

// Accepts the `YYYY-MM-DD` value of a date input, or a full RFC 3339 timestamp
fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(value)
                .ok()
                .map(|dt| dt.date_naive())
        })
}

/// Sanitized accommodation dates, as ISO strings.
pub type DateRange = (Option<String>, Option<String>);

/// Validate the arrival/departure pair against `today`.
///
/// Format, ordering and the +/- two year window on the arrival date only
/// apply when both dates are given.
pub fn validate_dates(start: &str, end: &str, today: NaiveDate) -> FieldCheck<DateRange> {
    let start_raw = sanitize_string(start);
    let end_raw = sanitize_string(end);

    // A lone date is kept when it parses and dropped otherwise
    if start_raw.is_empty() || end_raw.is_empty() {
        let lone = |raw: &str| {
            (!raw.is_empty())
                .then(|| parse_date(raw))
                .flatten()
                .map(|d| d.format("%Y-%m-%d").to_string())
        };
        return FieldCheck::ok((lone(&start_raw), lone(&end_raw)));
    }

    let (Some(start_date), Some(end_date)) = (parse_date(&start_raw), parse_date(&end_raw)) else {
        return FieldCheck::fail(
            (Some(start_raw), Some(end_raw)),
            "Format de date invalide / Invalid date format",
        );
    };

    let sanitized = (
        Some(start_date.format("%Y-%m-%d").to_string()),
        Some(end_date.format("%Y-%m-%d").to_string()),
    );

    if end_date < start_date {
        return FieldCheck::fail(
            sanitized,
            "La date de départ doit être après la date d'arrivée / End date must be after start date",
        );
    }

    let earliest = today
        .checked_sub_months(Months::new(DATE_WINDOW_MONTHS))
        .unwrap_or(NaiveDate::MIN);
    let latest = today
        .checked_add_months(Months::new(DATE_WINDOW_MONTHS))
        .unwrap_or(NaiveDate::MAX);

    if start_date < earliest || start_date > latest {
        return FieldCheck::fail(
            sanitized,
            "La date d'arrivée doit être dans une période raisonnable / Start date must be within a reasonable timeframe",
        );
    }

    FieldCheck::ok(sanitized)
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn collect<T>(errors: &mut BTreeMap<Field, String>, field: Field, check: &FieldCheck<T>) {
    if let Some(error) = &check.error {
        errors.insert(field, error.clone());
    }
}

/// Validate the whole form against today's date (UTC).
pub fn validate_form_data(input: &RegistrationInput) -> FormValidationResult {
    validate_form_data_at(input, Utc::now().date_naive())
}

/// Validate the whole form, collecting every field error.
///
/// Accommodation dates are only checked when `needs_accommodation` is set and
/// the children fields only when `has_children` is set; skipped fields are left
/// out of the sanitized record.
pub fn validate_form_data_at(input: &RegistrationInput, today: NaiveDate) -> FormValidationResult {
    let mut errors = BTreeMap::new();
    let mut record = RegistrationRecord {
        status: RegistrationStatus::Pending,
        ..RegistrationRecord::default()
    };

    let name = validate_full_name(&input.full_name);
    collect(&mut errors, Field::FullName, &name);
    record.full_name = name.sanitized;

    let email = validate_email(&input.email);
    collect(&mut errors, Field::Email, &email);
    record.email = email.sanitized;

    let phone_code = validate_phone_code(&input.phone_code);
    collect(&mut errors, Field::PhoneCode, &phone_code);
    record.phone_code = phone_code.sanitized;

    let phone = validate_phone(&input.phone);
    collect(&mut errors, Field::Phone, &phone);
    record.phone = phone.sanitized;

    let country = validate_location(&input.country, Field::Country);
    collect(&mut errors, Field::Country, &country);
    record.country = country.sanitized;

    let city = validate_location(&input.city, Field::City);
    collect(&mut errors, Field::City, &city);
    record.city = city.sanitized;

    let language = validate_text_field(
        &input.spoken_language,
        Field::SpokenLanguage,
        MAX_SPOKEN_LANGUAGE,
    );
    collect(&mut errors, Field::SpokenLanguage, &language);
    record.languages = non_empty(language.sanitized);

    record.needs_accommodation = input.needs_accommodation;
    if input.needs_accommodation {
        let dates = validate_dates(&input.start_date, &input.end_date, today);
        collect(&mut errors, Field::Dates, &dates);
        (record.start_date, record.end_date) = dates.sanitized;
    }

    record.has_children = input.has_children;
    if input.has_children {
        let count = validate_number_of_children(&input.number_of_children);
        collect(&mut errors, Field::NumberOfChildren, &count);
        record.number_of_children = count.sanitized;

        let ages = validate_children_ages(&input.children_ages);
        collect(&mut errors, Field::ChildrenAges, &ages);
        record.children_ages = non_empty(ages.sanitized);
    }

    record.has_reduced_mobility = input.has_reduced_mobility;
    record.has_special_needs = input.has_special_needs;

    let allergies = validate_text_field(&input.allergies, Field::Allergies, MAX_ALLERGIES);
    collect(&mut errors, Field::Allergies, &allergies);
    record.allergies = non_empty(allergies.sanitized);

    let comments = validate_text_field(&input.comments, Field::Comments, MAX_COMMENTS);
    collect(&mut errors, Field::Comments, &comments);
    record.comments = non_empty(comments.sanitized);

    FormValidationResult {
        is_valid: errors.is_empty(),
        errors,
        sanitized: record,
    }
}

/// Short, stable digest of an email for log lines.
pub fn email_fingerprint(email: &str) -> String {
    let digest = Sha256::digest(email.trim().to_lowercase().as_bytes());
    hex::encode(&digest[..6])
}
