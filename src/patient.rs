// src/patient.rs

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::models::{Gender, string_enum};
use crate::validation::{
    self, FieldErrors, double_option, optional_date, optional_email, optional_enum, optional_text,
    patch_date, patch_email, patch_enum, patch_text, required_text,
};

string_enum!(
    PatientStatus {
        Active => "active",
        Inactive => "inactive",
        Archived => "archived",
    }
);

pub const PATIENT_CODE_PREFIX: &str = "CPC-";

static PATIENT_CODE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"CPC-(\d+)").unwrap_or_else(|e| panic!("patient code pattern must compile: {e}"))
});

/// Next code in the `CPC-NNN` sequence after `last_code`.
///
/// Anything that doesn't carry a `CPC-<digits>` suffix restarts the count at 1.
pub fn next_patient_code(last_code: Option<&str>) -> String {
    let base: u64 = last_code
        .and_then(|code| PATIENT_CODE_RE.captures(code))
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0);
    format!("{PATIENT_CODE_PREFIX}{:03}", base + 1)
}

const MSG_NAME_REQUIRED: &str = "Patient name is required";
const MSG_PHONE_REQUIRED: &str = "Phone number is required";
const MSG_NAME_MIN: &str = "Name must be at least 2 characters";
const MSG_PHONE_MIN: &str = "Phone number must be at least 10 digits";
const MSG_DOB_INVALID: &str = "Please enter a valid date of birth";
pub const MSG_CODE_TAKEN: &str = "patient_code must be unique";
pub const MSG_SOURCE_ENQUIRY_MISSING: &str = "source_enquiry_id must reference an existing enquiry";

/// Minimum name and phone lengths a new patient must meet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatientBounds {
    pub name_min: usize,
    pub phone_min: usize,
}

impl PatientBounds {
    /// Patients registered directly at the desk.
    pub const REGISTRATION: Self = Self { name_min: 2, phone_min: 10 };
    /// Patients promoted from an enquiry, which already passed the enquiry minimums.
    pub const FROM_ENQUIRY: Self = Self { name_min: 1, phone_min: 1 };
}

fn required_min(
    errors: &mut FieldErrors,
    field: &str,
    value: Option<&str>,
    (min, max): (usize, usize),
    required_msg: &str,
    min_msg: &str,
) -> Option<String> {
    let v = required_text(errors, field, value, 1, max, required_msg)?;
    if v.chars().count() < min {
        errors.add(field, min_msg);
    }
    Some(v)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Patient {
    pub id: i64,
    pub patient_code: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: String,
    pub alternate_phone: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Option<Gender>,
    pub address: Option<String>,
    pub area: Option<String>,
    pub pincode: Option<String>,
    pub emergency_contact_name: Option<String>,
    pub emergency_contact_phone: Option<String>,
    pub emergency_contact_relation: Option<String>,
    pub medical_history: Option<String>,
    pub current_medications: Option<String>,
    pub allergies: Option<String>,
    pub source_enquiry_id: Option<i64>,
    pub status: PatientStatus,
    pub notes: Option<String>,
    pub created_by: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Patient {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Case-insensitive substring match over name, phone, email and code.
    /// `needle` must already be lowercase.
    pub fn matches_search(&self, needle: &str) -> bool {
        [
            Some(self.name.as_str()),
            Some(self.phone.as_str()),
            self.email.as_deref(),
            Some(self.patient_code.as_str()),
        ]
        .into_iter()
        .flatten()
        .any(|field| field.to_lowercase().contains(needle))
    }
}

/// Validated insert payload. `patient_code` is assigned by the store when `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPatient {
    pub patient_code: Option<String>,
    pub name: String,
    pub email: Option<String>,
    pub phone: String,
    pub alternate_phone: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Option<Gender>,
    pub address: Option<String>,
    pub area: Option<String>,
    pub pincode: Option<String>,
    pub emergency_contact_name: Option<String>,
    pub emergency_contact_phone: Option<String>,
    pub emergency_contact_relation: Option<String>,
    pub medical_history: Option<String>,
    pub current_medications: Option<String>,
    pub allergies: Option<String>,
    pub source_enquiry_id: Option<i64>,
    pub status: PatientStatus,
    pub notes: Option<String>,
}

impl NewPatient {
    pub fn into_patient(
        self,
        id: i64,
        patient_code: String,
        created_by: Option<i64>,
        now: DateTime<Utc>,
    ) -> Patient {
        Patient {
            id,
            patient_code,
            name: self.name,
            email: self.email,
            phone: self.phone,
            alternate_phone: self.alternate_phone,
            date_of_birth: self.date_of_birth,
            gender: self.gender,
            address: self.address,
            area: self.area,
            pincode: self.pincode,
            emergency_contact_name: self.emergency_contact_name,
            emergency_contact_phone: self.emergency_contact_phone,
            emergency_contact_relation: self.emergency_contact_relation,
            medical_history: self.medical_history,
            current_medications: self.current_medications,
            allergies: self.allergies,
            source_enquiry_id: self.source_enquiry_id,
            status: self.status,
            notes: self.notes,
            created_by,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct CreatePatientRequest {
    pub patient_code: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub alternate_phone: Option<String>,
    pub date_of_birth: Option<String>,
    pub gender: Option<String>,
    pub address: Option<String>,
    pub area: Option<String>,
    pub pincode: Option<String>,
    pub emergency_contact_name: Option<String>,
    pub emergency_contact_phone: Option<String>,
    pub emergency_contact_relation: Option<String>,
    pub medical_history: Option<String>,
    pub current_medications: Option<String>,
    pub allergies: Option<String>,
    pub source_enquiry_id: Option<i64>,
    pub status: Option<String>,
    pub notes: Option<String>,
}

impl CreatePatientRequest {
    pub fn validate(&self) -> Result<NewPatient, FieldErrors> {
        self.validate_with(PatientBounds::REGISTRATION)
    }

    pub fn validate_with(&self, bounds: PatientBounds) -> Result<NewPatient, FieldErrors> {
        let mut errors = FieldErrors::new();

        let name = required_min(
            &mut errors,
            "name",
            self.name.as_deref(),
            (bounds.name_min, 255),
            MSG_NAME_REQUIRED,
            MSG_NAME_MIN,
        );
        let phone = required_min(
            &mut errors,
            "phone",
            self.phone.as_deref(),
            (bounds.phone_min, 20),
            MSG_PHONE_REQUIRED,
            MSG_PHONE_MIN,
        );
        let patient_code = optional_text(&mut errors, "patient_code", self.patient_code.as_deref(), 20);
        let email = optional_email(&mut errors, "email", self.email.as_deref());
        let alternate_phone = optional_text(&mut errors, "alternate_phone", self.alternate_phone.as_deref(), 20);
        let date_of_birth = optional_date(&mut errors, "date_of_birth", self.date_of_birth.as_deref(), MSG_DOB_INVALID);
        let gender = optional_enum(&mut errors, "gender", self.gender.as_deref(), Gender::ALL);
        let area = optional_text(&mut errors, "area", self.area.as_deref(), 100);
        let pincode = optional_text(&mut errors, "pincode", self.pincode.as_deref(), 10);
        let emergency_contact_name =
            optional_text(&mut errors, "emergency_contact_name", self.emergency_contact_name.as_deref(), 255);
        let emergency_contact_phone =
            optional_text(&mut errors, "emergency_contact_phone", self.emergency_contact_phone.as_deref(), 20);
        let emergency_contact_relation = optional_text(
            &mut errors,
            "emergency_contact_relation",
            self.emergency_contact_relation.as_deref(),
            50,
        );
        let status = optional_enum(&mut errors, "status", self.status.as_deref(), PatientStatus::ALL);

        match (name, phone) {
            (Some(name), Some(phone)) if errors.is_empty() => Ok(NewPatient {
                patient_code,
                name,
                email,
                phone,
                alternate_phone,
                date_of_birth,
                gender,
                address: validation::clean(self.address.as_deref()),
                area,
                pincode,
                emergency_contact_name,
                emergency_contact_phone,
                emergency_contact_relation,
                medical_history: validation::clean(self.medical_history.as_deref()),
                current_medications: validation::clean(self.current_medications.as_deref()),
                allergies: validation::clean(self.allergies.as_deref()),
                source_enquiry_id: self.source_enquiry_id,
                status: status.unwrap_or(PatientStatus::Active),
                notes: validation::clean(self.notes.as_deref()),
            }),
            _ => Err(errors),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct UpdatePatientRequest {
    pub patient_code: Option<String>,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub status: Option<String>,
    #[serde(deserialize_with = "double_option")]
    pub email: Option<Option<String>>,
    #[serde(deserialize_with = "double_option")]
    pub alternate_phone: Option<Option<String>>,
    #[serde(deserialize_with = "double_option")]
    pub date_of_birth: Option<Option<String>>,
    #[serde(deserialize_with = "double_option")]
    pub gender: Option<Option<String>>,
    #[serde(deserialize_with = "double_option")]
    pub address: Option<Option<String>>,
    #[serde(deserialize_with = "double_option")]
    pub area: Option<Option<String>>,
    #[serde(deserialize_with = "double_option")]
    pub pincode: Option<Option<String>>,
    #[serde(deserialize_with = "double_option")]
    pub emergency_contact_name: Option<Option<String>>,
    #[serde(deserialize_with = "double_option")]
    pub emergency_contact_phone: Option<Option<String>>,
    #[serde(deserialize_with = "double_option")]
    pub emergency_contact_relation: Option<Option<String>>,
    #[serde(deserialize_with = "double_option")]
    pub medical_history: Option<Option<String>>,
    #[serde(deserialize_with = "double_option")]
    pub current_medications: Option<Option<String>>,
    #[serde(deserialize_with = "double_option")]
    pub allergies: Option<Option<String>>,
    #[serde(deserialize_with = "double_option")]
    pub notes: Option<Option<String>>,
}

/// Validated changed-fields-only update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatientChanges {
    pub patient_code: Option<String>,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub status: Option<PatientStatus>,
    pub email: Option<Option<String>>,
    pub alternate_phone: Option<Option<String>>,
    pub date_of_birth: Option<Option<NaiveDate>>,
    pub gender: Option<Option<Gender>>,
    pub address: Option<Option<String>>,
    pub area: Option<Option<String>>,
    pub pincode: Option<Option<String>>,
    pub emergency_contact_name: Option<Option<String>>,
    pub emergency_contact_phone: Option<Option<String>>,
    pub emergency_contact_relation: Option<Option<String>>,
    pub medical_history: Option<Option<String>>,
    pub current_medications: Option<Option<String>>,
    pub allergies: Option<Option<String>>,
    pub notes: Option<Option<String>>,
}

fn patch_free_text(value: &Option<Option<String>>) -> Option<Option<String>> {
    value.as_ref().map(|v| validation::clean(v.as_deref()))
}

impl UpdatePatientRequest {
    pub fn validate(&self) -> Result<PatientChanges, FieldErrors> {
        let mut errors = FieldErrors::new();

        let patient_code = match &self.patient_code {
            None => None,
            Some(c) => required_text(&mut errors, "patient_code", Some(c), 1, 20, "patient_code cannot be blank"),
        };
        let name = match &self.name {
            None => None,
            Some(n) => required_min(&mut errors, "name", Some(n), (2, 255), MSG_NAME_REQUIRED, MSG_NAME_MIN),
        };
        let phone = match &self.phone {
            None => None,
            Some(p) => required_min(&mut errors, "phone", Some(p), (10, 20), MSG_PHONE_REQUIRED, MSG_PHONE_MIN),
        };
        let status = optional_enum(&mut errors, "status", self.status.as_deref(), PatientStatus::ALL);

        let changes = PatientChanges {
            patient_code,
            name,
            phone,
            status,
            email: patch_email(&mut errors, "email", &self.email),
            alternate_phone: patch_text(&mut errors, "alternate_phone", &self.alternate_phone, 20),
            date_of_birth: patch_date(&mut errors, "date_of_birth", &self.date_of_birth, MSG_DOB_INVALID),
            gender: patch_enum(&mut errors, "gender", &self.gender, Gender::ALL),
            address: patch_free_text(&self.address),
            area: patch_text(&mut errors, "area", &self.area, 100),
            pincode: patch_text(&mut errors, "pincode", &self.pincode, 10),
            emergency_contact_name: patch_text(&mut errors, "emergency_contact_name", &self.emergency_contact_name, 255),
            emergency_contact_phone: patch_text(
                &mut errors,
                "emergency_contact_phone",
                &self.emergency_contact_phone,
                20,
            ),
            emergency_contact_relation: patch_text(
                &mut errors,
                "emergency_contact_relation",
                &self.emergency_contact_relation,
                50,
            ),
            medical_history: patch_free_text(&self.medical_history),
            current_medications: patch_free_text(&self.current_medications),
            allergies: patch_free_text(&self.allergies),
            notes: patch_free_text(&self.notes),
        };

        errors.into_result()?;
        Ok(changes)
    }
}

impl PatientChanges {
    pub fn apply_to(&self, p: &mut Patient) {
        fn set<T: Clone>(target: &mut T, value: &Option<T>) {
            if let Some(v) = value {
                *target = v.clone();
            }
        }

        set(&mut p.patient_code, &self.patient_code);
        set(&mut p.name, &self.name);
        set(&mut p.phone, &self.phone);
        set(&mut p.status, &self.status);
        set(&mut p.email, &self.email);
        set(&mut p.alternate_phone, &self.alternate_phone);
        set(&mut p.date_of_birth, &self.date_of_birth);
        set(&mut p.gender, &self.gender);
        set(&mut p.address, &self.address);
        set(&mut p.area, &self.area);
        set(&mut p.pincode, &self.pincode);
        set(&mut p.emergency_contact_name, &self.emergency_contact_name);
        set(&mut p.emergency_contact_phone, &self.emergency_contact_phone);
        set(&mut p.emergency_contact_relation, &self.emergency_contact_relation);
        set(&mut p.medical_history, &self.medical_history);
        set(&mut p.current_medications, &self.current_medications);
        set(&mut p.allergies, &self.allergies);
        set(&mut p.notes, &self.notes);
    }
}
