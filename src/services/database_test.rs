#[cfg(test)]
mod database_tests {
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    use crate::client::{RemoteError, RemoteStore};
    use crate::models::registration::{RegistrationRecord, RegistrationStatus};
    use crate::services::database::{create_csv_store, CsvRegistrationStore};

    fn create_test_record(email: &str) -> RegistrationRecord {
        RegistrationRecord {
            full_name: "Jean Dupont".to_string(),
            email: email.to_string(),
            phone_code: "+33".to_string(),
            phone: "612345678".to_string(),
            country: "France".to_string(),
            city: "Paris".to_string(),
            languages: Some("Français, English".to_string()),
            needs_accommodation: true,
            start_date: Some("2025-07-10".to_string()),
            end_date: Some("2025-07-14".to_string()),
            has_children: true,
            number_of_children: Some(2),
            children_ages: Some("4, 7".to_string()),
            comments: Some("Merci, à bientôt".to_string()),
            ..RegistrationRecord::default()
        }
    }

    #[test]
    fn test_new_creates_file_with_headers() {
        let dir = tempdir().unwrap();
        let csv_path = dir.path().join("nested").join("registrations.csv");
        let csv_path_str = csv_path.to_str().unwrap();

        let _store = CsvRegistrationStore::new(csv_path_str).unwrap();

        assert!(Path::new(csv_path_str).exists());
        let content = fs::read_to_string(csv_path_str).unwrap();
        assert!(content.starts_with("id,created_at,full_name,email"));
        assert!(content.trim_end().ends_with("status"));
    }

    #[test]
    fn test_store_and_find_registration() {
        let dir = tempdir().unwrap();
        let csv_path = dir.path().join("registrations.csv");
        let store = CsvRegistrationStore::new(csv_path.to_str().unwrap()).unwrap();

        let stored = store
            .store_registration(&create_test_record("jean@example.com"))
            .unwrap();
        assert_eq!(stored.id, "csv-1");
        assert_eq!(stored.record.status, RegistrationStatus::Pending);

        let found = store.find_by_email("jean@example.com").unwrap().unwrap();
        assert_eq!(found.id, "csv-1");
        assert_eq!(found.record, create_test_record("jean@example.com"));
        assert_eq!(found.created_at, stored.created_at);

        assert!(store.find_by_email("marie@example.com").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_email_is_rejected() {
        let dir = tempdir().unwrap();
        let csv_path = dir.path().join("registrations.csv");
        let store = CsvRegistrationStore::new(csv_path.to_str().unwrap()).unwrap();

        store
            .store_registration(&create_test_record("jean@example.com"))
            .unwrap();
        let second = store.store_registration(&create_test_record("jean@example.com"));

        assert!(matches!(second, Err(RemoteError::Duplicate(_))));
        assert_eq!(store.all().unwrap().len(), 1);
    }

    #[test]
    fn test_ids_follow_row_count() {
        let dir = tempdir().unwrap();
        let csv_path = dir.path().join("registrations.csv");
        let store = CsvRegistrationStore::new(csv_path.to_str().unwrap()).unwrap();

        store
            .store_registration(&create_test_record("a@example.com"))
            .unwrap();
        let second = store
            .store_registration(&create_test_record("b@example.com"))
            .unwrap();

        assert_eq!(second.id, "csv-2");
        let all = store.all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].record.email, "a@example.com");
    }

    #[test]
    fn test_optional_fields_round_trip_as_empty() {
        let dir = tempdir().unwrap();
        let csv_path = dir.path().join("registrations.csv");
        let store = CsvRegistrationStore::new(csv_path.to_str().unwrap()).unwrap();

        let minimal = RegistrationRecord {
            full_name: "Marie Curie".to_string(),
            email: "marie@example.com".to_string(),
            phone_code: "+48".to_string(),
            phone: "123456789".to_string(),
            country: "Pologne".to_string(),
            city: "Varsovie".to_string(),
            ..RegistrationRecord::default()
        };
        store.store_registration(&minimal).unwrap();

        let found = store.find_by_email("marie@example.com").unwrap().unwrap();
        assert_eq!(found.record, minimal);
    }

    #[test]
    fn test_existing_file_is_reused() {
        let dir = tempdir().unwrap();
        let csv_path = dir.path().join("registrations.csv");
        let csv_path_str = csv_path.to_str().unwrap();

        {
            let store = CsvRegistrationStore::new(csv_path_str).unwrap();
            store
                .store_registration(&create_test_record("jean@example.com"))
                .unwrap();
        }

        let reopened = create_csv_store(Some(csv_path_str)).unwrap();
        assert!(reopened.find_by_email("jean@example.com").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_remote_store_contract() {
        let dir = tempdir().unwrap();
        let csv_path = dir.path().join("registrations.csv");
        let store = CsvRegistrationStore::new(csv_path.to_str().unwrap()).unwrap();

        assert!(!store.email_exists("jean@example.com").await.unwrap());
        store
            .insert(&create_test_record("jean@example.com"))
            .await
            .unwrap();
        assert!(store.email_exists("jean@example.com").await.unwrap());
        assert!(store.ping().await.is_ok());
    }
}
