// src/store/memory.rs
//
// In-process backend. One mutex guards all tables, so every trait method is
// atomic with respect to the others.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::conversion::{patient_from_enquiry, triggers_conversion};
use crate::enquiry::{Enquiry, EnquiryChanges, NewEnquiry};
use crate::patient::{
    MSG_CODE_TAKEN, MSG_SOURCE_ENQUIRY_MISSING, NewPatient, Patient, PatientBounds, PatientChanges,
    next_patient_code,
};
use crate::store::{
    EnquiryFilter, EnquiryRepository, EnquiryUpdate, PatientFilter, PatientRepository, StoreError,
    StoreResult, UserRepository,
};
use crate::user::{NewUser, SessionRecord, User, UserChanges, UserCredentials};
use crate::validation::FieldErrors;

#[derive(Debug)]
struct StoredUser {
    user: User,
    password_hash: String,
}

#[derive(Debug)]
struct StoredToken {
    user_id: i64,
    token_hash: String,
    expires_at: DateTime<Utc>,
    revoked_at: Option<DateTime<Utc>>,
    last_used_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct Tables {
    next_enquiry_id: i64,
    next_patient_id: i64,
    next_user_id: i64,
    enquiries: BTreeMap<i64, Enquiry>,
    patients: BTreeMap<i64, Patient>,
    users: BTreeMap<i64, StoredUser>,
    tokens: HashMap<Uuid, StoredToken>,
}

impl Default for Tables {
    fn default() -> Self {
        Self {
            next_enquiry_id: 1,
            next_patient_id: 1,
            next_user_id: 1,
            enquiries: BTreeMap::new(),
            patients: BTreeMap::new(),
            users: BTreeMap::new(),
            tokens: HashMap::new(),
        }
    }
}

fn page<T: Clone>(rows: Vec<&T>, limit: u64, offset: u64) -> (Vec<T>, u64) {
    let total = rows.len() as u64;
    let items = rows
        .into_iter()
        .skip(usize::try_from(offset).unwrap_or(usize::MAX))
        .take(limit as usize)
        .cloned()
        .collect();
    (items, total)
}

impl Tables {
    fn live_enquiry_mut(&mut self, id: i64) -> StoreResult<&mut Enquiry> {
        self.enquiries
            .get_mut(&id)
            .filter(|e| !e.is_deleted())
            .ok_or(StoreError::NotFound("enquiry"))
    }

    fn live_patient_mut(&mut self, id: i64) -> StoreResult<&mut Patient> {
        self.patients
            .get_mut(&id)
            .filter(|p| !p.is_deleted())
            .ok_or(StoreError::NotFound("patient"))
    }

    fn live_user_mut(&mut self, id: i64) -> StoreResult<&mut StoredUser> {
        self.users
            .get_mut(&id)
            .filter(|u| u.user.deleted_at.is_none())
            .ok_or(StoreError::NotFound("user"))
    }

    fn code_taken(&self, code: &str, except_id: Option<i64>) -> bool {
        // soft-deleted patients keep their code reserved
        self.patients
            .values()
            .any(|p| p.patient_code == code && Some(p.id) != except_id)
    }

    /// Inserts only once every check has passed, so a failure mutates nothing.
    fn insert_patient(&mut self, new: NewPatient, created_by: Option<i64>) -> StoreResult<Patient> {
        if new.source_enquiry_id.is_some_and(|id| !self.enquiries.contains_key(&id)) {
            let mut errors = FieldErrors::new();
            errors.add("source_enquiry_id", MSG_SOURCE_ENQUIRY_MISSING);
            return Err(StoreError::Validation(errors));
        }
        let code = match &new.patient_code {
            Some(code) => {
                if self.code_taken(code, None) {
                    let mut errors = FieldErrors::new();
                    errors.add("patient_code", MSG_CODE_TAKEN);
                    return Err(StoreError::Validation(errors));
                }
                code.clone()
            }
            None => {
                let last = self
                    .patients
                    .values()
                    .rev()
                    .find(|p| !p.patient_code.is_empty())
                    .map(|p| p.patient_code.as_str());
                let code = next_patient_code(last);
                if self.code_taken(&code, None) {
                    return Err(StoreError::Conflict(format!("patient_code {code} already exists")));
                }
                code
            }
        };

        let id = self.next_patient_id;
        self.next_patient_id += 1;
        let patient = new.into_patient(id, code, created_by, Utc::now());
        self.patients.insert(id, patient.clone());
        Ok(patient)
    }

    fn check_user_unique(&self, username: Option<&str>, email: Option<&str>, except_id: Option<i64>) -> StoreResult<()> {
        for stored in self.users.values().filter(|u| Some(u.user.id) != except_id) {
            if username.is_some_and(|n| stored.user.username.eq_ignore_ascii_case(n)) {
                return Err(StoreError::Conflict("username already exists".into()));
            }
            if email.is_some_and(|e| stored.user.email.eq_ignore_ascii_case(e)) {
                return Err(StoreError::Conflict("email already exists".into()));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EnquiryRepository for MemoryStore {
    async fn create_enquiry(&self, new: NewEnquiry, created_by: Option<i64>) -> StoreResult<Enquiry> {
        let mut t = self.tables.lock().await;
        let id = t.next_enquiry_id;
        t.next_enquiry_id += 1;
        let enquiry = new.into_enquiry(id, created_by, Utc::now());
        t.enquiries.insert(id, enquiry.clone());
        Ok(enquiry)
    }

    async fn get_enquiry(&self, id: i64) -> StoreResult<Option<Enquiry>> {
        let t = self.tables.lock().await;
        Ok(t.enquiries.get(&id).filter(|e| !e.is_deleted()).cloned())
    }

    async fn list_enquiries(
        &self,
        filter: &EnquiryFilter,
        limit: u64,
        offset: u64,
    ) -> StoreResult<(Vec<Enquiry>, u64)> {
        let t = self.tables.lock().await;
        let mut rows: Vec<&Enquiry> = t
            .enquiries
            .values()
            .filter(|e| !e.is_deleted())
            .filter(|e| filter.status.is_none_or(|s| e.status == s))
            .collect();
        rows.sort_by(|a, b| b.enquiry_date.cmp(&a.enquiry_date).then(b.id.cmp(&a.id)));
        Ok(page(rows, limit, offset))
    }

    async fn update_enquiry(&self, id: i64, changes: &EnquiryChanges) -> StoreResult<Enquiry> {
        let mut t = self.tables.lock().await;
        let e = t.live_enquiry_mut(id)?;
        changes.apply_to(e);
        e.updated_at = Utc::now();
        Ok(e.clone())
    }

    async fn link_converted_patient(
        &self,
        id: i64,
        patient_id: i64,
        conversion_date: NaiveDate,
    ) -> StoreResult<Enquiry> {
        let mut t = self.tables.lock().await;
        let e = t.live_enquiry_mut(id)?;
        if let Some(existing) = e.converted_to_patient_id {
            if existing != patient_id {
                return Err(StoreError::Conflict(format!(
                    "enquiry {id} is already linked to patient {existing}"
                )));
            }
        }
        e.converted_to_patient_id = Some(patient_id);
        e.conversion_date = Some(conversion_date);
        e.updated_at = Utc::now();
        Ok(e.clone())
    }

    async fn update_enquiry_converting(
        &self,
        id: i64,
        changes: &EnquiryChanges,
        conversion_date: NaiveDate,
    ) -> StoreResult<EnquiryUpdate> {
        let mut t = self.tables.lock().await;
        let current = t.live_enquiry_mut(id)?.clone();

        // work on a copy; the stored row is replaced only at the end
        let mut updated = current.clone();
        changes.apply_to(&mut updated);
        updated.updated_at = Utc::now();

        let created_patient = if triggers_conversion(&current, changes) {
            let new = patient_from_enquiry(&updated, PatientBounds::FROM_ENQUIRY)?;
            let patient = t.insert_patient(new, updated.created_by)?;
            updated.converted_to_patient_id = Some(patient.id);
            updated.conversion_date = Some(conversion_date);
            Some(patient)
        } else {
            None
        };

        t.enquiries.insert(id, updated.clone());
        Ok(EnquiryUpdate {
            enquiry: updated,
            created_patient,
        })
    }

    async fn soft_delete_enquiry(&self, id: i64) -> StoreResult<()> {
        let mut t = self.tables.lock().await;
        let e = t.live_enquiry_mut(id)?;
        e.deleted_at = Some(Utc::now());
        Ok(())
    }
}

#[async_trait]
impl PatientRepository for MemoryStore {
    async fn create_patient(&self, new: NewPatient, created_by: Option<i64>) -> StoreResult<Patient> {
        let mut t = self.tables.lock().await;
        t.insert_patient(new, created_by)
    }

    async fn get_patient(&self, id: i64) -> StoreResult<Option<Patient>> {
        let t = self.tables.lock().await;
        Ok(t.patients.get(&id).filter(|p| !p.is_deleted()).cloned())
    }

    async fn get_patient_including_deleted(&self, id: i64) -> StoreResult<Option<Patient>> {
        let t = self.tables.lock().await;
        Ok(t.patients.get(&id).cloned())
    }

    async fn list_patients(
        &self,
        filter: &PatientFilter,
        limit: u64,
        offset: u64,
    ) -> StoreResult<(Vec<Patient>, u64)> {
        let t = self.tables.lock().await;
        let needle = filter.search.as_deref().map(str::to_lowercase);
        let mut rows: Vec<&Patient> = t
            .patients
            .values()
            .filter(|p| !p.is_deleted())
            .filter(|p| filter.status.is_none_or(|s| p.status == s))
            .filter(|p| needle.as_deref().is_none_or(|n| p.matches_search(n)))
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(page(rows, limit, offset))
    }

    async fn update_patient(&self, id: i64, changes: &PatientChanges) -> StoreResult<Patient> {
        let mut t = self.tables.lock().await;
        t.live_patient_mut(id)?;
        if let Some(code) = &changes.patient_code {
            if t.code_taken(code, Some(id)) {
                let mut errors = FieldErrors::new();
                errors.add("patient_code", MSG_CODE_TAKEN);
                return Err(StoreError::Validation(errors));
            }
        }
        let p = t.live_patient_mut(id)?;
        changes.apply_to(p);
        p.updated_at = Utc::now();
        Ok(p.clone())
    }

    async fn soft_delete_patient(&self, id: i64) -> StoreResult<()> {
        let mut t = self.tables.lock().await;
        let p = t.live_patient_mut(id)?;
        p.deleted_at = Some(Utc::now());
        Ok(())
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn create_user(&self, new: NewUser) -> StoreResult<User> {
        let mut t = self.tables.lock().await;
        t.check_user_unique(Some(&new.username), Some(&new.email), None)?;

        let id = t.next_user_id;
        t.next_user_id += 1;
        let now = Utc::now();
        let user = User {
            id,
            username: new.username,
            email: new.email,
            active: new.active,
            groups: new.groups,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        t.users.insert(
            id,
            StoredUser {
                user: user.clone(),
                password_hash: new.password_hash,
            },
        );
        Ok(user)
    }

    async fn get_user(&self, id: i64) -> StoreResult<Option<User>> {
        let t = self.tables.lock().await;
        Ok(t
            .users
            .get(&id)
            .filter(|u| u.user.deleted_at.is_none())
            .map(|u| u.user.clone()))
    }

    async fn find_credentials_by_email(&self, email: &str) -> StoreResult<Option<UserCredentials>> {
        let t = self.tables.lock().await;
        Ok(t
            .users
            .values()
            .find(|u| u.user.deleted_at.is_none() && u.user.email.eq_ignore_ascii_case(email))
            .map(|u| UserCredentials {
                user: u.user.clone(),
                password_hash: u.password_hash.clone(),
            }))
    }

    async fn list_users(&self, group: Option<&str>, limit: u64, offset: u64) -> StoreResult<(Vec<User>, u64)> {
        let t = self.tables.lock().await;
        let mut rows: Vec<&User> = t
            .users
            .values()
            .map(|u| &u.user)
            .filter(|u| u.deleted_at.is_none())
            .filter(|u| group.is_none_or(|g| u.groups.iter().any(|ug| ug == g)))
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(page(rows, limit, offset))
    }

    async fn update_user(&self, id: i64, changes: &UserChanges) -> StoreResult<User> {
        let mut t = self.tables.lock().await;
        t.live_user_mut(id)?;
        t.check_user_unique(changes.username.as_deref(), changes.email.as_deref(), Some(id))?;

        let stored = t.live_user_mut(id)?;
        if let Some(username) = &changes.username {
            stored.user.username = username.clone();
        }
        if let Some(email) = &changes.email {
            stored.user.email = email.clone();
        }
        if let Some(hash) = &changes.password_hash {
            stored.password_hash = hash.clone();
        }
        if let Some(active) = changes.active {
            stored.user.active = active;
        }
        if let Some(groups) = &changes.groups {
            stored.user.groups = groups.clone();
        }
        stored.user.updated_at = Utc::now();
        Ok(stored.user.clone())
    }

    async fn soft_delete_user(&self, id: i64) -> StoreResult<()> {
        let mut t = self.tables.lock().await;
        let stored = t.live_user_mut(id)?;
        stored.user.deleted_at = Some(Utc::now());
        Ok(())
    }

    async fn create_access_token(
        &self,
        user_id: i64,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<Uuid> {
        let mut t = self.tables.lock().await;
        let token_id = Uuid::new_v4();
        t.tokens.insert(
            token_id,
            StoredToken {
                user_id,
                token_hash: token_hash.to_string(),
                expires_at,
                revoked_at: None,
                last_used_at: None,
            },
        );
        Ok(token_id)
    }

    async fn find_session(&self, token_hash: &str) -> StoreResult<Option<SessionRecord>> {
        let t = self.tables.lock().await;
        let now = Utc::now();
        let Some((token_id, token)) = t
            .tokens
            .iter()
            .find(|(_, tok)| tok.token_hash == token_hash && tok.revoked_at.is_none() && tok.expires_at > now)
        else {
            return Ok(None);
        };
        Ok(t
            .users
            .get(&token.user_id)
            .filter(|u| u.user.active && u.user.deleted_at.is_none())
            .map(|u| SessionRecord {
                token_id: *token_id,
                user: u.user.clone(),
            }))
    }

    async fn touch_access_token(&self, token_id: Uuid) -> StoreResult<()> {
        let mut t = self.tables.lock().await;
        if let Some(tok) = t.tokens.get_mut(&token_id) {
            tok.last_used_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn revoke_user_tokens(&self, user_id: i64) -> StoreResult<u64> {
        let mut t = self.tables.lock().await;
        let now = Utc::now();
        let mut revoked = 0;
        for tok in t.tokens.values_mut() {
            if tok.user_id == user_id && tok.revoked_at.is_none() {
                tok.revoked_at = Some(now);
                revoked += 1;
            }
        }
        Ok(revoked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enquiry::{CreateEnquiryRequest, EnquiryStatus};
    use crate::patient::CreatePatientRequest;
    use chrono::Duration;

    fn new_enquiry(name: &str, date: &str) -> NewEnquiry {
        CreateEnquiryRequest {
            name: Some(name.into()),
            phone: Some("9000000000".into()),
            enquiry_date: Some(date.into()),
            ..Default::default()
        }
        .validate()
        .unwrap()
    }

    fn new_patient(name: &str, code: Option<&str>) -> NewPatient {
        CreatePatientRequest {
            name: Some(name.into()),
            phone: Some("9840012345".into()),
            patient_code: code.map(str::to_string),
            ..Default::default()
        }
        .validate()
        .unwrap()
    }

    #[tokio::test]
    async fn test_created_enquiry_reads_back_as_new() {
        let store = MemoryStore::new();
        let e = store.create_enquiry(new_enquiry("A", "2025-01-01"), None).await.unwrap();
        let read = store.get_enquiry(e.id).await.unwrap().unwrap();
        assert_eq!(read.status, EnquiryStatus::New);
        assert_eq!(read.converted_to_patient_id, None);
    }

    #[tokio::test]
    async fn test_enquiry_list_order_filter_and_soft_delete() {
        let store = MemoryStore::new();
        let older = store.create_enquiry(new_enquiry("Old", "2025-01-01"), None).await.unwrap();
        let newer = store.create_enquiry(new_enquiry("New", "2025-03-01"), None).await.unwrap();
        let same_day = store.create_enquiry(new_enquiry("Same", "2025-03-01"), None).await.unwrap();
        store
            .update_enquiry(older.id, &EnquiryChanges::status_only(EnquiryStatus::Contacted))
            .await
            .unwrap();

        let (rows, total) = store.list_enquiries(&EnquiryFilter::default(), 20, 0).await.unwrap();
        assert_eq!(total, 3);
        let ids: Vec<i64> = rows.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![same_day.id, newer.id, older.id]);

        let contacted = EnquiryFilter {
            status: Some(EnquiryStatus::Contacted),
        };
        let (rows, total) = store.list_enquiries(&contacted, 20, 0).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(rows[0].id, older.id);

        store.soft_delete_enquiry(newer.id).await.unwrap();
        let (_, total) = store.list_enquiries(&EnquiryFilter::default(), 20, 0).await.unwrap();
        assert_eq!(total, 2);
        assert!(store.get_enquiry(newer.id).await.unwrap().is_none());
        assert!(matches!(
            store.soft_delete_enquiry(newer.id).await,
            Err(StoreError::NotFound("enquiry"))
        ));
        assert!(matches!(
            store.update_enquiry(newer.id, &EnquiryChanges::default()).await,
            Err(StoreError::NotFound("enquiry"))
        ));
    }

    #[tokio::test]
    async fn test_enquiry_pagination() {
        let store = MemoryStore::new();
        for day in 1..=5 {
            store
                .create_enquiry(new_enquiry("P", &format!("2025-01-0{day}")), None)
                .await
                .unwrap();
        }
        let (rows, total) = store.list_enquiries(&EnquiryFilter::default(), 2, 2).await.unwrap();
        assert_eq!(total, 5);
        let dates: Vec<String> = rows.iter().map(|e| e.enquiry_date.to_string()).collect();
        assert_eq!(dates, vec!["2025-01-03", "2025-01-02"]);
    }

    #[tokio::test]
    async fn test_sequential_patient_codes() {
        let store = MemoryStore::new();
        let mut codes = Vec::new();
        for i in 0..5 {
            let p = store.create_patient(new_patient(&format!("Patient {i}"), None), None).await.unwrap();
            codes.push(p.patient_code);
        }
        assert_eq!(codes, vec!["CPC-001", "CPC-002", "CPC-003", "CPC-004", "CPC-005"]);
    }

    #[tokio::test]
    async fn test_patient_codes_not_reused_after_delete() {
        let store = MemoryStore::new();
        store.create_patient(new_patient("First", None), None).await.unwrap();
        let second = store.create_patient(new_patient("Second", None), None).await.unwrap();
        store.soft_delete_patient(second.id).await.unwrap();

        let third = store.create_patient(new_patient("Third", None), None).await.unwrap();
        assert_eq!(third.patient_code, "CPC-003");

        // still reachable through the delete-aware lookup only
        assert!(store.get_patient(second.id).await.unwrap().is_none());
        assert!(store.get_patient_including_deleted(second.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_explicit_patient_code_must_be_unique() {
        let store = MemoryStore::new();
        store.create_patient(new_patient("First", Some("VIP-1")), None).await.unwrap();
        let err = store
            .create_patient(new_patient("Second", Some("VIP-1")), None)
            .await
            .unwrap_err();
        match err {
            StoreError::Validation(errors) => assert_eq!(errors.get("patient_code"), Some(MSG_CODE_TAKEN)),
            other => panic!("unexpected error: {other:?}"),
        }

        // a foreign-format code restarts the sequence at CPC-001
        let p = store.create_patient(new_patient("Third", None), None).await.unwrap();
        assert_eq!(p.patient_code, "CPC-001");
    }

    #[tokio::test]
    async fn test_generated_code_collision_is_a_conflict() {
        let store = MemoryStore::new();
        store.create_patient(new_patient("Manual", Some("CPC-001")), None).await.unwrap();
        store.create_patient(new_patient("Foreign", Some("OLD-9")), None).await.unwrap();
        let err = store.create_patient(new_patient("Auto", None), None).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_source_enquiry_must_exist() {
        let store = MemoryStore::new();
        let mut orphan = new_patient("Orphan", None);
        orphan.source_enquiry_id = Some(404);
        match store.create_patient(orphan, None).await.unwrap_err() {
            StoreError::Validation(errors) => {
                assert_eq!(errors.get("source_enquiry_id"), Some(MSG_SOURCE_ENQUIRY_MISSING))
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(store.list_patients(&PatientFilter::default(), 20, 0).await.unwrap().1, 0);

        let e = store.create_enquiry(new_enquiry("Source", "2025-01-01"), None).await.unwrap();
        let mut linked = new_patient("Linked", None);
        linked.source_enquiry_id = Some(e.id);
        let p = store.create_patient(linked, None).await.unwrap();
        assert_eq!(p.source_enquiry_id, Some(e.id));
    }

    #[tokio::test]
    async fn test_patient_search_excludes_deleted() {
        let store = MemoryStore::new();
        let kumar = store.create_patient(new_patient("Kumar", None), None).await.unwrap();
        store.create_patient(new_patient("Priya", None), None).await.unwrap();
        let filter = PatientFilter {
            search: Some("KUM".into()),
            ..Default::default()
        };
        assert_eq!(store.list_patients(&filter, 20, 0).await.unwrap().1, 1);

        store.soft_delete_patient(kumar.id).await.unwrap();
        assert_eq!(store.list_patients(&filter, 20, 0).await.unwrap().1, 0);
    }

    #[tokio::test]
    async fn test_sessions_expire_and_revoke() {
        let store = MemoryStore::new();
        let user = store
            .create_user(NewUser {
                username: "desk".into(),
                email: "desk@cpc.in".into(),
                password_hash: "x".into(),
                active: true,
                groups: vec!["user".into()],
            })
            .await
            .unwrap();

        let live = Utc::now() + Duration::hours(1);
        let expired = Utc::now() - Duration::hours(1);
        store.create_access_token(user.id, "live", live).await.unwrap();
        store.create_access_token(user.id, "stale", expired).await.unwrap();

        assert!(store.find_session("live").await.unwrap().is_some());
        assert!(store.find_session("stale").await.unwrap().is_none());

        assert_eq!(store.revoke_user_tokens(user.id).await.unwrap(), 2);
        assert!(store.find_session("live").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_user_email_conflicts() {
        let store = MemoryStore::new();
        let make = |username: &str| NewUser {
            username: username.into(),
            email: "same@cpc.in".into(),
            password_hash: "x".into(),
            active: true,
            groups: vec![],
        };
        store.create_user(make("first")).await.unwrap();
        assert!(matches!(store.create_user(make("second")).await, Err(StoreError::Conflict(_))));
    }
}
