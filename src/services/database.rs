use async_trait::async_trait;
use chrono::{DateTime, Utc};
use csv::{ReaderBuilder, WriterBuilder};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{error, info};

use crate::client::{RemoteError, RemoteStore};
use crate::models::registration::{RegistrationRecord, RegistrationStatus, StoredRecord};
use crate::services::validation::email_fingerprint;

const HEADERS: [&str; 20] = [
    "id",
    "created_at",
    "full_name",
    "email",
    "phone_code",
    "phone",
    "country",
    "city",
    "languages",
    "needs_accommodation",
    "start_date",
    "end_date",
    "has_children",
    "number_of_children",
    "children_ages",
    "has_reduced_mobility",
    "has_special_needs",
    "allergies",
    "comments",
    "status",
];

// One CSV row per registration, in the same column order as HEADERS
#[derive(Debug, Serialize, Deserialize, Clone)]
struct RegistrationRow {
    id: String,
    created_at: String, // ISO format
    full_name: String,
    email: String,
    phone_code: String,
    phone: String,
    country: String,
    city: String,
    languages: Option<String>,
    needs_accommodation: bool,
    start_date: Option<String>,
    end_date: Option<String>,
    has_children: bool,
    number_of_children: Option<u8>,
    children_ages: Option<String>,
    has_reduced_mobility: bool,
    has_special_needs: bool,
    allergies: Option<String>,
    comments: Option<String>,
    status: RegistrationStatus,
}

impl RegistrationRow {
    fn new(id: String, created_at: DateTime<Utc>, record: &RegistrationRecord) -> Self {
        let record = record.clone();
        Self {
            id,
            created_at: created_at.to_rfc3339(),
            full_name: record.full_name,
            email: record.email,
            phone_code: record.phone_code,
            phone: record.phone,
            country: record.country,
            city: record.city,
            languages: record.languages,
            needs_accommodation: record.needs_accommodation,
            start_date: record.start_date,
            end_date: record.end_date,
            has_children: record.has_children,
            number_of_children: record.number_of_children,
            children_ages: record.children_ages,
            has_reduced_mobility: record.has_reduced_mobility,
            has_special_needs: record.has_special_needs,
            allergies: record.allergies,
            comments: record.comments,
            status: record.status,
        }
    }

    fn into_stored(self) -> Result<StoredRecord, String> {
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| format!("Invalid created_at '{}': {}", self.created_at, e))?
            .with_timezone(&Utc);

        Ok(StoredRecord {
            id: self.id,
            created_at,
            updated_at: None,
            record: RegistrationRecord {
                full_name: self.full_name,
                email: self.email,
                phone_code: self.phone_code,
                phone: self.phone,
                country: self.country,
                city: self.city,
                languages: self.languages,
                needs_accommodation: self.needs_accommodation,
                start_date: self.start_date,
                end_date: self.end_date,
                has_children: self.has_children,
                number_of_children: self.number_of_children,
                children_ages: self.children_ages,
                has_reduced_mobility: self.has_reduced_mobility,
                has_special_needs: self.has_special_needs,
                allergies: self.allergies,
                comments: self.comments,
                status: self.status,
            },
        })
    }
}

/// Registration store backed by a local CSV file.
///
/// Used in simulation mode when no hosted database is configured. It honours
/// the same contract as the hosted table, including rejecting a second insert
/// for an email that is already registered.
pub struct CsvRegistrationStore {
    csv_path: String,
    file_mutex: Mutex<()>,
}

impl CsvRegistrationStore {
    pub fn new(csv_path: &str) -> Result<Self, String> {
        // Create the CSV file if it doesn't exist with proper headers
        if !Path::new(csv_path).exists() {
            info!("Creating new registrations file at {}", csv_path);

            if let Some(dir) = Path::new(csv_path).parent().filter(|d| !d.as_os_str().is_empty()) {
                std::fs::create_dir_all(dir)
                    .map_err(|e| format!("Failed to create data directory: {}", e))?;
            }

            let file = File::create(csv_path)
                .map_err(|e| format!("Failed to create registrations file: {}", e))?;

            let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);
            writer
                .write_record(HEADERS)
                .map_err(|e| format!("Failed to write headers: {}", e))?;
            writer
                .flush()
                .map_err(|e| format!("Failed to flush headers: {}", e))?;
        }

        Ok(Self {
            csv_path: csv_path.to_string(),
            file_mutex: Mutex::new(()),
        })
    }

    // Read every row; the caller must hold the file mutex
    fn read_rows(&self) -> Result<Vec<RegistrationRow>, String> {
        let file = match File::open(&self.csv_path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(format!("Failed to open registrations file: {}", e)),
        };

        let mut reader = ReaderBuilder::new().has_headers(true).from_reader(file);
        reader
            .deserialize()
            .map(|row| row.map_err(|e| format!("Failed to read record: {}", e)))
            .collect()
    }

    /// Find a registration by (lower-cased) email
    pub fn find_by_email(&self, email: &str) -> Result<Option<StoredRecord>, String> {
        let _lock = self
            .file_mutex
            .lock()
            .map_err(|e| format!("Failed to acquire mutex: {}", e))?;

        self.read_rows()?
            .into_iter()
            .find(|row| row.email == email)
            .map(RegistrationRow::into_stored)
            .transpose()
    }

    /// All stored registrations, oldest first
    pub fn all(&self) -> Result<Vec<StoredRecord>, String> {
        let _lock = self
            .file_mutex
            .lock()
            .map_err(|e| format!("Failed to acquire mutex: {}", e))?;

        self.read_rows()?
            .into_iter()
            .map(RegistrationRow::into_stored)
            .collect()
    }

    /// Append a registration, refusing duplicates by email
    pub fn store_registration(
        &self,
        record: &RegistrationRecord,
    ) -> Result<StoredRecord, RemoteError> {
        let _lock = self
            .file_mutex
            .lock()
            .map_err(|e| RemoteError::Unknown(format!("Failed to acquire mutex: {}", e)))?;

        let rows = self.read_rows().map_err(RemoteError::Unknown)?;
        if rows.iter().any(|row| row.email == record.email) {
            info!(
                "Registration {} already exists, skipping insertion",
                email_fingerprint(&record.email)
            );
            return Err(RemoteError::Duplicate(format!(
                "email already present in {}",
                self.csv_path
            )));
        }

        let now = Utc::now();
        let row = RegistrationRow::new(format!("csv-{}", rows.len() + 1), now, record);

        let file = OpenOptions::new()
            .append(true)
            .open(&self.csv_path)
            .map_err(|e| RemoteError::Unknown(format!("Failed to open registrations file: {}", e)))?;

        let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);
        writer
            .serialize(&row)
            .map_err(|e| RemoteError::Unknown(format!("Failed to serialize record: {}", e)))?;
        writer
            .flush()
            .map_err(|e| RemoteError::Unknown(format!("Failed to flush writer: {}", e)))?;

        info!(
            "Stored registration {} with ID {}",
            email_fingerprint(&row.email),
            row.id
        );

        row.into_stored().map_err(RemoteError::Unknown)
    }
}

#[async_trait]
impl RemoteStore for CsvRegistrationStore {
    async fn email_exists(&self, email: &str) -> Result<bool, RemoteError> {
        self.find_by_email(email)
            .map(|found| found.is_some())
            .map_err(|e| {
                error!("Failed to look up registration: {}", e);
                RemoteError::Unknown(e)
            })
    }

    async fn insert(&self, record: &RegistrationRecord) -> Result<StoredRecord, RemoteError> {
        self.store_registration(record)
    }
}

// Create the CSV store, defaulting to the container data directory
pub fn create_csv_store(csv_path: Option<&str>) -> Result<Arc<CsvRegistrationStore>, String> {
    let default_path = "/app/data/registrations.csv";
    let csv_path = csv_path.unwrap_or(default_path);

    CsvRegistrationStore::new(csv_path).map(Arc::new)
}
