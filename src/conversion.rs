// src/conversion.rs
//
// Enquiry -> patient promotion. An enquiry update that moves the status to
// `converted` (from anything else, with no patient linked yet) creates exactly
// one patient derived from the enquiry and links it back.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};

use crate::enquiry::{Enquiry, EnquiryChanges, EnquiryStatus};
use crate::patient::{CreatePatientRequest, NewPatient, PatientBounds, PatientStatus};
use crate::store::{ClinicStore, EnquiryUpdate, StoreError, StoreResult};
use crate::validation::FieldErrors;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConversionMode {
    /// Update, patient creation and linkage commit together or not at all.
    Atomic,
    /// Update commits first; a failed patient creation is logged and the
    /// enquiry is left `converted` with no linked patient.
    Legacy,
}

impl FromStr for ConversionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "atomic" => Ok(ConversionMode::Atomic),
            "legacy" => Ok(ConversionMode::Legacy),
            other => Err(format!("unknown conversion mode: {other} (expected atomic|legacy)")),
        }
    }
}

/// True when applying `changes` to `current` must create a patient.
pub fn triggers_conversion(current: &Enquiry, changes: &EnquiryChanges) -> bool {
    changes.status == Some(EnquiryStatus::Converted)
        && current.status != EnquiryStatus::Converted
        && current.converted_to_patient_id.is_none()
}

/// Patient payload carried over from an enquiry, before validation.
pub fn patient_request_from_enquiry(enquiry: &Enquiry) -> CreatePatientRequest {
    CreatePatientRequest {
        name: Some(enquiry.name.clone()),
        email: enquiry.email.clone(),
        phone: Some(enquiry.phone.clone()),
        area: enquiry.area.clone(),
        pincode: enquiry.pincode.clone(),
        source_enquiry_id: Some(enquiry.id),
        notes: enquiry.notes.clone(),
        status: Some(PatientStatus::Active.as_str().to_string()),
        ..Default::default()
    }
}

/// Validated patient for `enquiry` under `bounds`; failures are keyed `patient.<field>`.
pub fn patient_from_enquiry(enquiry: &Enquiry, bounds: PatientBounds) -> Result<NewPatient, FieldErrors> {
    patient_request_from_enquiry(enquiry)
        .validate_with(bounds)
        .map_err(|errors| errors.prefixed("patient"))
}

#[derive(Clone)]
pub struct ConversionWorkflow {
    store: Arc<dyn ClinicStore>,
    mode: ConversionMode,
}

impl ConversionWorkflow {
    pub fn new(store: Arc<dyn ClinicStore>, mode: ConversionMode) -> Self {
        Self { store, mode }
    }

    pub fn mode(&self) -> ConversionMode {
        self.mode
    }

    /// Enquiry update entry point for the HTTP layer.
    pub async fn update_enquiry(&self, id: i64, changes: &EnquiryChanges) -> StoreResult<EnquiryUpdate> {
        let today = Utc::now().date_naive();
        let outcome = match self.mode {
            ConversionMode::Atomic => self.store.update_enquiry_converting(id, changes, today).await?,
            ConversionMode::Legacy => self.update_legacy(id, changes, today).await?,
        };

        if let Some(patient) = &outcome.created_patient {
            tracing::info!(
                enquiry_id = id,
                patient_id = patient.id,
                patient_code = %patient.patient_code,
                "enquiry converted to patient"
            );
        }
        Ok(outcome)
    }

    async fn update_legacy(
        &self,
        id: i64,
        changes: &EnquiryChanges,
        today: NaiveDate,
    ) -> StoreResult<EnquiryUpdate> {
        let current = self
            .store
            .get_enquiry(id)
            .await?
            .ok_or(StoreError::NotFound("enquiry"))?;
        let convert = triggers_conversion(&current, changes);

        let updated = self.store.update_enquiry(id, changes).await?;
        if !convert {
            return Ok(EnquiryUpdate {
                enquiry: updated,
                created_patient: None,
            });
        }

        // Legacy promotion reads the record as it was before this update and
        // holds it to the desk registration rules.
        let created = match patient_from_enquiry(&current, PatientBounds::REGISTRATION) {
            Ok(new) => self.store.create_patient(new, current.created_by).await,
            Err(errors) => Err(StoreError::Validation(errors)),
        };

        let patient = match created {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(
                    enquiry_id = id,
                    error = ?e,
                    "patient creation failed; enquiry left converted without a linked patient"
                );
                return Ok(EnquiryUpdate {
                    enquiry: updated,
                    created_patient: None,
                });
            }
        };

        let enquiry = self.store.link_converted_patient(id, patient.id, today).await?;
        Ok(EnquiryUpdate {
            enquiry,
            created_patient: Some(patient),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enquiry::CreateEnquiryRequest;
    use crate::store::{EnquiryRepository, MemoryStore, PatientFilter, PatientRepository};

    fn workflow(mode: ConversionMode) -> (Arc<MemoryStore>, ConversionWorkflow) {
        let store = Arc::new(MemoryStore::new());
        let wf = ConversionWorkflow::new(store.clone(), mode);
        (store, wf)
    }

    async fn seed_enquiry(store: &MemoryStore, phone: &str) -> Enquiry {
        let new = CreateEnquiryRequest {
            name: Some("Anitha".into()),
            phone: Some(phone.into()),
            email: Some("anitha@example.com".into()),
            area: Some("Adyar".into()),
            pincode: Some("600020".into()),
            notes: Some("left knee pain".into()),
            enquiry_date: Some("2025-01-01".into()),
            ..Default::default()
        }
        .validate()
        .unwrap();
        store.create_enquiry(new, Some(7)).await.unwrap()
    }

    async fn patient_count(store: &MemoryStore) -> u64 {
        store
            .list_patients(&PatientFilter::default(), 100, 0)
            .await
            .unwrap()
            .1
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("atomic".parse::<ConversionMode>(), Ok(ConversionMode::Atomic));
        assert_eq!(" Legacy ".parse::<ConversionMode>(), Ok(ConversionMode::Legacy));
        assert!("eventual".parse::<ConversionMode>().is_err());
    }

    #[test]
    fn test_patient_payload_carries_contact_fields() {
        let e = CreateEnquiryRequest {
            name: Some("Anitha".into()),
            phone: Some("9000000000".into()),
            area: Some("Adyar".into()),
            notes: Some("walk-in".into()),
            enquiry_date: Some("2025-01-01".into()),
            ..Default::default()
        }
        .validate()
        .unwrap()
        .into_enquiry(42, Some(3), Utc::now());

        let new = patient_from_enquiry(&e, PatientBounds::FROM_ENQUIRY).unwrap();
        assert_eq!(new.name, "Anitha");
        assert_eq!(new.phone, "9000000000");
        assert_eq!(new.area.as_deref(), Some("Adyar"));
        assert_eq!(new.notes.as_deref(), Some("walk-in"));
        assert_eq!(new.source_enquiry_id, Some(42));
        assert_eq!(new.status, PatientStatus::Active);
        assert_eq!(new.patient_code, None);
    }

    #[tokio::test]
    async fn test_converting_creates_and_links_exactly_one_patient() {
        for mode in [ConversionMode::Atomic, ConversionMode::Legacy] {
            let (store, wf) = workflow(mode);
            let e = seed_enquiry(&store, "9000000000").await;

            let out = wf
                .update_enquiry(e.id, &EnquiryChanges::status_only(EnquiryStatus::Converted))
                .await
                .unwrap();

            let patient = out.created_patient.expect("patient created");
            assert_eq!(out.enquiry.status, EnquiryStatus::Converted);
            assert_eq!(out.enquiry.converted_to_patient_id, Some(patient.id));
            assert_eq!(out.enquiry.conversion_date, Some(Utc::now().date_naive()));
            assert_eq!(patient.source_enquiry_id, Some(e.id));
            assert_eq!(patient.created_by, Some(7));
            assert_eq!(patient.patient_code, "CPC-001");
            assert_eq!(patient_count(&store).await, 1);
        }
    }

    #[tokio::test]
    async fn test_reconverting_is_a_no_op() {
        let (store, wf) = workflow(ConversionMode::Atomic);
        let e = seed_enquiry(&store, "9000000000").await;
        let convert = EnquiryChanges::status_only(EnquiryStatus::Converted);

        let first = wf.update_enquiry(e.id, &convert).await.unwrap();
        let second = wf.update_enquiry(e.id, &convert).await.unwrap();

        assert!(second.created_patient.is_none());
        assert_eq!(
            second.enquiry.converted_to_patient_id,
            first.enquiry.converted_to_patient_id
        );
        assert_eq!(patient_count(&store).await, 1);
    }

    #[tokio::test]
    async fn test_link_survives_moving_away_from_converted() {
        let (store, wf) = workflow(ConversionMode::Atomic);
        let e = seed_enquiry(&store, "9000000000").await;
        let first = wf
            .update_enquiry(e.id, &EnquiryChanges::status_only(EnquiryStatus::Converted))
            .await
            .unwrap();

        wf.update_enquiry(e.id, &EnquiryChanges::status_only(EnquiryStatus::Completed))
            .await
            .unwrap();
        let again = wf
            .update_enquiry(e.id, &EnquiryChanges::status_only(EnquiryStatus::Converted))
            .await
            .unwrap();

        assert!(again.created_patient.is_none());
        assert_eq!(
            again.enquiry.converted_to_patient_id,
            first.enquiry.converted_to_patient_id
        );
        assert_eq!(patient_count(&store).await, 1);
    }

    #[tokio::test]
    async fn test_other_statuses_never_create_patients() {
        let (store, wf) = workflow(ConversionMode::Atomic);
        let e = seed_enquiry(&store, "9000000000").await;

        for status in [
            EnquiryStatus::Contacted,
            EnquiryStatus::Scheduled,
            EnquiryStatus::Cancelled,
            EnquiryStatus::Completed,
            EnquiryStatus::New,
        ] {
            let out = wf
                .update_enquiry(e.id, &EnquiryChanges::status_only(status))
                .await
                .unwrap();
            assert_eq!(out.enquiry.status, status);
            assert!(out.created_patient.is_none());
        }
        assert_eq!(patient_count(&store).await, 0);
    }

    async fn seed_patient(store: &MemoryStore, code: &str) {
        let new = CreatePatientRequest {
            patient_code: Some(code.into()),
            name: Some("Walk In".into()),
            phone: Some("9840012345".into()),
            ..Default::default()
        }
        .validate()
        .unwrap();
        store.create_patient(new, None).await.unwrap();
    }

    #[tokio::test]
    async fn test_atomic_accepts_enquiry_level_name_and_phone() {
        let (store, wf) = workflow(ConversionMode::Atomic);
        let new = CreateEnquiryRequest {
            name: Some("A".into()),
            phone: Some("12345".into()),
            enquiry_date: Some("2025-01-01".into()),
            ..Default::default()
        }
        .validate()
        .unwrap();
        let e = store.create_enquiry(new, None).await.unwrap();

        let out = wf
            .update_enquiry(e.id, &EnquiryChanges::status_only(EnquiryStatus::Converted))
            .await
            .unwrap();

        let patient = out.created_patient.expect("patient created");
        assert_eq!(patient.name, "A");
        assert_eq!(patient.phone, "12345");
        assert_eq!(patient.patient_code, "CPC-001");
        assert_eq!(out.enquiry.converted_to_patient_id, Some(patient.id));
    }

    #[tokio::test]
    async fn test_atomic_failure_leaves_enquiry_untouched() {
        let (store, wf) = workflow(ConversionMode::Atomic);
        let e = seed_enquiry(&store, "9000000000").await;
        // the next generated code restarts at CPC-001, which is taken
        seed_patient(&store, "CPC-001").await;
        seed_patient(&store, "OLD-9").await;

        let err = wf
            .update_enquiry(e.id, &EnquiryChanges::status_only(EnquiryStatus::Converted))
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Conflict(_)), "unexpected error: {err:?}");
        let reloaded = store.get_enquiry(e.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, EnquiryStatus::New);
        assert_eq!(reloaded.converted_to_patient_id, None);
        assert_eq!(reloaded.conversion_date, None);
        assert_eq!(patient_count(&store).await, 2);
    }

    #[tokio::test]
    async fn test_patient_source_record_depends_on_mode() {
        let changes = EnquiryChanges {
            status: Some(EnquiryStatus::Converted),
            name: Some("New Name".into()),
            ..Default::default()
        };

        let (store, wf) = workflow(ConversionMode::Atomic);
        let e = seed_enquiry(&store, "9000000000").await;
        let atomic = wf.update_enquiry(e.id, &changes).await.unwrap();
        assert_eq!(atomic.created_patient.unwrap().name, "New Name");

        let (store, wf) = workflow(ConversionMode::Legacy);
        let e = seed_enquiry(&store, "9000000000").await;
        let legacy = wf.update_enquiry(e.id, &changes).await.unwrap();
        assert_eq!(legacy.enquiry.name, "New Name");
        assert_eq!(legacy.created_patient.unwrap().name, "Anitha");
    }

    #[tokio::test]
    async fn test_legacy_ignores_phone_fixed_in_the_converting_update() {
        let (store, wf) = workflow(ConversionMode::Legacy);
        let e = seed_enquiry(&store, "12345").await;
        let changes = EnquiryChanges {
            status: Some(EnquiryStatus::Converted),
            phone: Some("9111111111".into()),
            ..Default::default()
        };

        let out = wf.update_enquiry(e.id, &changes).await.unwrap();

        assert!(out.created_patient.is_none());
        assert_eq!(out.enquiry.phone, "9111111111");
        assert_eq!(out.enquiry.status, EnquiryStatus::Converted);
        assert_eq!(out.enquiry.converted_to_patient_id, None);
        assert_eq!(patient_count(&store).await, 0);
    }

    #[tokio::test]
    async fn test_legacy_failure_leaves_unlinked_converted_enquiry() {
        let (store, wf) = workflow(ConversionMode::Legacy);
        let e = seed_enquiry(&store, "12345").await;

        let out = wf
            .update_enquiry(e.id, &EnquiryChanges::status_only(EnquiryStatus::Converted))
            .await
            .unwrap();

        assert!(out.created_patient.is_none());
        assert_eq!(out.enquiry.status, EnquiryStatus::Converted);
        assert_eq!(out.enquiry.converted_to_patient_id, None);
        assert_eq!(patient_count(&store).await, 0);
    }

    #[tokio::test]
    async fn test_unknown_enquiry_is_not_found() {
        for mode in [ConversionMode::Atomic, ConversionMode::Legacy] {
            let (_store, wf) = workflow(mode);
            let err = wf
                .update_enquiry(99, &EnquiryChanges::status_only(EnquiryStatus::Converted))
                .await
                .unwrap_err();
            assert!(matches!(err, StoreError::NotFound("enquiry")));
        }
    }
}
