use async_trait::async_trait;
use chrono::Utc;
use mockall::mock;
use std::sync::{Arc, Mutex};

use crate::client::{RemoteError, RemoteStore};
use crate::models::registration::{RegistrationRecord, StoredRecord};

// Define a mock for the remote registration store
mock! {
    pub RemoteStore {}

    #[async_trait]
    impl RemoteStore for RemoteStore {
        async fn email_exists(&self, email: &str) -> Result<bool, RemoteError>;
        async fn insert(&self, record: &RegistrationRecord) -> Result<StoredRecord, RemoteError>;
        async fn ping(&self) -> Result<(), RemoteError>;
    }
}

// A simple in-memory table for the mock store
#[derive(Default)]
pub struct MockDataStore {
    records: Mutex<Vec<StoredRecord>>,
}

impl MockDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, email: &str) -> bool {
        let records = self.records.lock().unwrap();
        records.iter().any(|stored| stored.record.email == email)
    }

    pub fn insert(&self, record: &RegistrationRecord) -> Result<StoredRecord, RemoteError> {
        let mut records = self.records.lock().unwrap();
        if records.iter().any(|stored| stored.record.email == record.email) {
            return Err(RemoteError::Duplicate("unique_violation on email".to_string()));
        }

        let stored = StoredRecord {
            id: (records.len() + 1).to_string(),
            created_at: Utc::now(),
            updated_at: None,
            record: record.clone(),
        };
        records.push(stored.clone());
        Ok(stored)
    }

    pub fn count(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

// Helper function to set up a mock store backed by an in-memory table
pub fn setup_mock_store() -> (MockRemoteStore, Arc<MockDataStore>) {
    let data_store = Arc::new(MockDataStore::new());
    let mut mock_store = MockRemoteStore::new();

    let store_ref1 = Arc::clone(&data_store);
    mock_store
        .expect_email_exists()
        .returning(move |email| Ok(store_ref1.contains(email)));

    let store_ref2 = Arc::clone(&data_store);
    mock_store
        .expect_insert()
        .returning(move |record| store_ref2.insert(record));

    mock_store.expect_ping().returning(|| Ok(()));

    (mock_store, data_store)
}
