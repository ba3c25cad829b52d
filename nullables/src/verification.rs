//! Nullable verification service: in-memory KYC records.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use timetoken_types::Subject;
use timetoken_verification::{
    RecordStatus, VerificationRecord, VerificationService, VerificationServiceError,
};

/// An in-memory verification database for testing.
pub struct NullVerificationService {
    records: Mutex<HashMap<Subject, VerificationRecord>>,
    failing: Mutex<bool>,
    lookups: Mutex<u32>,
}

impl NullVerificationService {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            failing: Mutex::new(false),
            lookups: Mutex::new(0),
        }
    }

    /// Store a record exactly as given.
    pub fn insert(&self, subject: &Subject, record: VerificationRecord) {
        self.records.lock().unwrap().insert(subject.clone(), record);
    }

    /// Store an approved, verified record at `level`.
    ///
    /// The stored address is uppercased to exercise case-insensitive matching.
    pub fn approve(&self, subject: &Subject, level: u8) {
        self.insert(
            subject,
            VerificationRecord {
                address: subject.as_str().to_uppercase().replacen("0X", "0x", 1),
                verified: true,
                status: RecordStatus::Approved,
                level,
            },
        );
    }

    /// Make every lookup fail as if the service were down.
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }

    /// Number of lookups so far.
    pub fn lookups(&self) -> u32 {
        *self.lookups.lock().unwrap()
    }
}

impl Default for NullVerificationService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VerificationService for NullVerificationService {
    async fn lookup(
        &self,
        subject: &Subject,
    ) -> Result<Option<VerificationRecord>, VerificationServiceError> {
        *self.lookups.lock().unwrap() += 1;
        if *self.failing.lock().unwrap() {
            return Err(VerificationServiceError::Unreachable(
                "connection refused".into(),
            ));
        }
        Ok(self.records.lock().unwrap().get(subject).cloned())
    }
}
