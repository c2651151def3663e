//! Repository traits over the clinic's persistent records.
//!
//! Every read that is not explicitly delete-aware excludes soft-deleted rows
//! (`deleted_at IS NULL`). Nothing in this layer removes rows physically.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::enquiry::{Enquiry, EnquiryChanges, EnquiryStatus, NewEnquiry};
use crate::patient::{NewPatient, Patient, PatientChanges, PatientStatus};
use crate::user::{NewUser, SessionRecord, User, UserChanges, UserCredentials};
use crate::validation::FieldErrors;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("validation failed")]
    Validation(FieldErrors),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl From<FieldErrors> for StoreError {
    fn from(errors: FieldErrors) -> Self {
        StoreError::Validation(errors)
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Result of an enquiry update that may have promoted the enquiry to a patient.
#[derive(Debug, Clone)]
pub struct EnquiryUpdate {
    pub enquiry: Enquiry,
    /// Set only when this very update created the patient.
    pub created_patient: Option<Patient>,
}

#[derive(Debug, Clone, Default)]
pub struct EnquiryFilter {
    pub status: Option<EnquiryStatus>,
}

#[derive(Debug, Clone, Default)]
pub struct PatientFilter {
    pub status: Option<PatientStatus>,
    /// Case-insensitive substring over name, phone, email and patient_code.
    pub search: Option<String>,
}

#[async_trait]
pub trait EnquiryRepository: Send + Sync {
    async fn create_enquiry(&self, new: NewEnquiry, created_by: Option<i64>) -> StoreResult<Enquiry>;

    async fn get_enquiry(&self, id: i64) -> StoreResult<Option<Enquiry>>;

    /// Ordered by `enquiry_date DESC, id DESC`. Returns the page plus the total match count.
    async fn list_enquiries(
        &self,
        filter: &EnquiryFilter,
        limit: u64,
        offset: u64,
    ) -> StoreResult<(Vec<Enquiry>, u64)>;

    /// Plain field update, no conversion side effects.
    async fn update_enquiry(&self, id: i64, changes: &EnquiryChanges) -> StoreResult<Enquiry>;

    /// Records the conversion linkage. Refuses to overwrite an existing link.
    async fn link_converted_patient(
        &self,
        id: i64,
        patient_id: i64,
        conversion_date: NaiveDate,
    ) -> StoreResult<Enquiry>;

    /// Applies `changes` and, when they convert the enquiry, creates and links
    /// the patient, all as one unit: on any error nothing is persisted.
    async fn update_enquiry_converting(
        &self,
        id: i64,
        changes: &EnquiryChanges,
        conversion_date: NaiveDate,
    ) -> StoreResult<EnquiryUpdate>;

    async fn soft_delete_enquiry(&self, id: i64) -> StoreResult<()>;
}

#[async_trait]
pub trait PatientRepository: Send + Sync {
    /// Assigns the next `CPC-NNN` code when `new.patient_code` is `None`.
    async fn create_patient(&self, new: NewPatient, created_by: Option<i64>) -> StoreResult<Patient>;

    async fn get_patient(&self, id: i64) -> StoreResult<Option<Patient>>;

    /// Delete-aware lookup: also returns soft-deleted patients.
    async fn get_patient_including_deleted(&self, id: i64) -> StoreResult<Option<Patient>>;

    /// Ordered by `created_at DESC, id DESC`.
    async fn list_patients(
        &self,
        filter: &PatientFilter,
        limit: u64,
        offset: u64,
    ) -> StoreResult<(Vec<Patient>, u64)>;

    async fn update_patient(&self, id: i64, changes: &PatientChanges) -> StoreResult<Patient>;

    async fn soft_delete_patient(&self, id: i64) -> StoreResult<()>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create_user(&self, new: NewUser) -> StoreResult<User>;

    async fn get_user(&self, id: i64) -> StoreResult<Option<User>>;

    /// Includes inactive users; excludes deleted ones.
    async fn find_credentials_by_email(&self, email: &str) -> StoreResult<Option<UserCredentials>>;

    /// Ordered by `created_at DESC, id DESC`.
    async fn list_users(&self, group: Option<&str>, limit: u64, offset: u64) -> StoreResult<(Vec<User>, u64)>;

    async fn update_user(&self, id: i64, changes: &UserChanges) -> StoreResult<User>;

    async fn soft_delete_user(&self, id: i64) -> StoreResult<()>;

    async fn create_access_token(
        &self,
        user_id: i64,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<Uuid>;

    /// Resolves a token hash to its session, provided the token is unrevoked,
    /// unexpired, and its user is active and not deleted.
    async fn find_session(&self, token_hash: &str) -> StoreResult<Option<SessionRecord>>;

    async fn touch_access_token(&self, token_id: Uuid) -> StoreResult<()>;

    /// Returns the number of tokens revoked.
    async fn revoke_user_tokens(&self, user_id: i64) -> StoreResult<u64>;
}

/// Everything the HTTP layer needs from one backend.
pub trait ClinicStore: EnquiryRepository + PatientRepository + UserRepository {}

impl<T> ClinicStore for T where T: EnquiryRepository + PatientRepository + UserRepository {}
