// src/enquiry.rs

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Gender, string_enum};
use crate::validation::{
    self, FieldErrors, double_option, optional_email, optional_enum, optional_text,
    patch_email, patch_enum, patch_text, required_text,
};

string_enum!(
    EnquiryStatus {
        New => "new",
        Contacted => "contacted",
        Scheduled => "scheduled",
        Converted => "converted",
        Cancelled => "cancelled",
        Completed => "completed",
    }
);

string_enum!(
    VisitType {
        Clinic => "clinic",
        HomeVisit => "home_visit",
    }
);

string_enum!(
    ContactMethod {
        Phone => "phone",
        Email => "email",
        WalkIn => "walk_in",
    }
);

const MSG_NAME_REQUIRED: &str = "Name is required";
const MSG_PHONE_REQUIRED: &str = "Phone number is required";
const MSG_DATE_REQUIRED: &str = "Enquiry date is required";
const MSG_DATE_INVALID: &str = "Please enter a valid date";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Enquiry {
    pub id: i64,
    pub name: String,
    pub email: Option<String>,
    pub phone: String,
    pub age: Option<i32>,
    pub gender: Option<Gender>,
    pub enquiry_date: NaiveDate,
    pub enquiry_type: Option<String>,
    pub area: Option<String>,
    pub pincode: Option<String>,
    pub visit_type: Option<VisitType>,
    pub contact_method: Option<ContactMethod>,
    pub complaint: Option<String>,
    pub source: Option<String>,
    pub status: EnquiryStatus,
    pub notes: Option<String>,
    pub converted_to_patient_id: Option<i64>,
    pub conversion_date: Option<NaiveDate>,
    pub created_by: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Enquiry {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Validated insert payload.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEnquiry {
    pub name: String,
    pub email: Option<String>,
    pub phone: String,
    pub age: Option<i32>,
    pub gender: Option<Gender>,
    pub enquiry_date: NaiveDate,
    pub enquiry_type: Option<String>,
    pub area: Option<String>,
    pub pincode: Option<String>,
    pub visit_type: Option<VisitType>,
    pub contact_method: Option<ContactMethod>,
    pub complaint: Option<String>,
    pub source: Option<String>,
    pub status: EnquiryStatus,
    pub notes: Option<String>,
}

impl NewEnquiry {
    pub fn into_enquiry(self, id: i64, created_by: Option<i64>, now: DateTime<Utc>) -> Enquiry {
        Enquiry {
            id,
            name: self.name,
            email: self.email,
            phone: self.phone,
            age: self.age,
            gender: self.gender,
            enquiry_date: self.enquiry_date,
            enquiry_type: self.enquiry_type,
            area: self.area,
            pincode: self.pincode,
            visit_type: self.visit_type,
            contact_method: self.contact_method,
            complaint: self.complaint,
            source: self.source,
            status: self.status,
            notes: self.notes,
            converted_to_patient_id: None,
            conversion_date: None,
            created_by,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CreateEnquiryRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub age: Option<i32>,
    pub gender: Option<String>,
    pub enquiry_date: Option<String>,
    pub enquiry_type: Option<String>,
    pub area: Option<String>,
    pub pincode: Option<String>,
    pub visit_type: Option<String>,
    pub contact_method: Option<String>,
    pub complaint: Option<String>,
    pub source: Option<String>,
    pub status: Option<String>,
    pub notes: Option<String>,
}

fn check_age(errors: &mut FieldErrors, age: Option<i32>) {
    if let Some(a) = age {
        if !(1..150).contains(&a) {
            errors.add("age", "age must be between 1 and 149");
        }
    }
}

impl CreateEnquiryRequest {
    pub fn validate(&self) -> Result<NewEnquiry, FieldErrors> {
        let mut errors = FieldErrors::new();

        let name = required_text(&mut errors, "name", self.name.as_deref(), 1, 255, MSG_NAME_REQUIRED);
        let phone = required_text(&mut errors, "phone", self.phone.as_deref(), 1, 20, MSG_PHONE_REQUIRED);
        let enquiry_date = match validation::clean(self.enquiry_date.as_deref()) {
            None => {
                errors.add("enquiry_date", MSG_DATE_REQUIRED);
                None
            }
            Some(raw) => {
                let parsed = validation::parse_date(&raw);
                if parsed.is_none() {
                    errors.add("enquiry_date", MSG_DATE_INVALID);
                }
                parsed
            }
        };
        let email = optional_email(&mut errors, "email", self.email.as_deref());
        check_age(&mut errors, self.age);
        let gender = optional_enum(&mut errors, "gender", self.gender.as_deref(), Gender::ALL);
        let visit_type = optional_enum(&mut errors, "visit_type", self.visit_type.as_deref(), VisitType::ALL);
        let contact_method = optional_enum(
            &mut errors,
            "contact_method",
            self.contact_method.as_deref(),
            ContactMethod::ALL,
        );
        let status: Option<EnquiryStatus> =
            optional_enum(&mut errors, "status", self.status.as_deref(), EnquiryStatus::ALL);
        // conversion only happens through an update, so a new enquiry can't start there
        if status == Some(EnquiryStatus::Converted) {
            errors.add("status", "A new enquiry cannot be created as converted");
        }

        let enquiry_type = optional_text(&mut errors, "enquiry_type", self.enquiry_type.as_deref(), 100);
        let area = optional_text(&mut errors, "area", self.area.as_deref(), 100);
        let pincode = optional_text(&mut errors, "pincode", self.pincode.as_deref(), 10);
        let source = optional_text(&mut errors, "source", self.source.as_deref(), 100);
        let complaint = validation::clean(self.complaint.as_deref());
        let notes = validation::clean(self.notes.as_deref());

        match (name, phone, enquiry_date) {
            (Some(name), Some(phone), Some(enquiry_date)) if errors.is_empty() => Ok(NewEnquiry {
                name,
                email,
                phone,
                age: self.age,
                gender,
                enquiry_date,
                enquiry_type,
                area,
                pincode,
                visit_type,
                contact_method,
                complaint,
                source,
                status: status.unwrap_or(EnquiryStatus::New),
                notes,
            }),
            _ => Err(errors),
        }
    }
}

/// PUT body. Only the fields present are touched; nullable fields accept `null`.
/// Conversion linkage is not client writable and is ignored if sent.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct UpdateEnquiryRequest {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub enquiry_date: Option<String>,
    pub status: Option<String>,
    #[serde(deserialize_with = "double_option")]
    pub email: Option<Option<String>>,
    #[serde(deserialize_with = "double_option")]
    pub age: Option<Option<i32>>,
    #[serde(deserialize_with = "double_option")]
    pub gender: Option<Option<String>>,
    #[serde(deserialize_with = "double_option")]
    pub enquiry_type: Option<Option<String>>,
    #[serde(deserialize_with = "double_option")]
    pub area: Option<Option<String>>,
    #[serde(deserialize_with = "double_option")]
    pub pincode: Option<Option<String>>,
    #[serde(deserialize_with = "double_option")]
    pub visit_type: Option<Option<String>>,
    #[serde(deserialize_with = "double_option")]
    pub contact_method: Option<Option<String>>,
    #[serde(deserialize_with = "double_option")]
    pub complaint: Option<Option<String>>,
    #[serde(deserialize_with = "double_option")]
    pub source: Option<Option<String>>,
    #[serde(deserialize_with = "double_option")]
    pub notes: Option<Option<String>>,
}

/// Validated changed-fields-only update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnquiryChanges {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub enquiry_date: Option<NaiveDate>,
    pub status: Option<EnquiryStatus>,
    pub email: Option<Option<String>>,
    pub age: Option<Option<i32>>,
    pub gender: Option<Option<Gender>>,
    pub enquiry_type: Option<Option<String>>,
    pub area: Option<Option<String>>,
    pub pincode: Option<Option<String>>,
    pub visit_type: Option<Option<VisitType>>,
    pub contact_method: Option<Option<ContactMethod>>,
    pub complaint: Option<Option<String>>,
    pub source: Option<Option<String>>,
    pub notes: Option<Option<String>>,
}

impl UpdateEnquiryRequest {
    pub fn validate(&self) -> Result<EnquiryChanges, FieldErrors> {
        let mut errors = FieldErrors::new();

        let name = match &self.name {
            None => None,
            Some(n) => required_text(&mut errors, "name", Some(n), 1, 255, MSG_NAME_REQUIRED),
        };
        let phone = match &self.phone {
            None => None,
            Some(p) => required_text(&mut errors, "phone", Some(p), 1, 20, MSG_PHONE_REQUIRED),
        };
        let enquiry_date = match &self.enquiry_date {
            None => None,
            Some(raw) if raw.trim().is_empty() => {
                errors.add("enquiry_date", MSG_DATE_REQUIRED);
                None
            }
            Some(raw) => {
                let parsed = validation::parse_date(raw);
                if parsed.is_none() {
                    errors.add("enquiry_date", MSG_DATE_INVALID);
                }
                parsed
            }
        };
        let status = optional_enum(&mut errors, "status", self.status.as_deref(), EnquiryStatus::ALL);

        let email = patch_email(&mut errors, "email", &self.email);
        if let Some(Some(age)) = self.age {
            check_age(&mut errors, Some(age));
        }
        let gender = patch_enum(&mut errors, "gender", &self.gender, Gender::ALL);
        let visit_type = patch_enum(&mut errors, "visit_type", &self.visit_type, VisitType::ALL);
        let contact_method = patch_enum(&mut errors, "contact_method", &self.contact_method, ContactMethod::ALL);
        let enquiry_type = patch_text(&mut errors, "enquiry_type", &self.enquiry_type, 100);
        let area = patch_text(&mut errors, "area", &self.area, 100);
        let pincode = patch_text(&mut errors, "pincode", &self.pincode, 10);
        let source = patch_text(&mut errors, "source", &self.source, 100);
        let complaint = self.complaint.as_ref().map(|c| validation::clean(c.as_deref()));
        let notes = self.notes.as_ref().map(|n| validation::clean(n.as_deref()));

        errors.into_result()?;

        Ok(EnquiryChanges {
            name,
            phone,
            enquiry_date,
            status,
            email,
            age: self.age,
            gender,
            enquiry_type,
            area,
            pincode,
            visit_type,
            contact_method,
            complaint,
            source,
            notes,
        })
    }
}

impl EnquiryChanges {
    pub fn status_only(status: EnquiryStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Apply onto a loaded record. Timestamps are the caller's job.
    pub fn apply_to(&self, e: &mut Enquiry) {
        fn set<T: Clone>(target: &mut T, value: &Option<T>) {
            if let Some(v) = value {
                *target = v.clone();
            }
        }

        set(&mut e.name, &self.name);
        set(&mut e.phone, &self.phone);
        set(&mut e.enquiry_date, &self.enquiry_date);
        set(&mut e.status, &self.status);
        set(&mut e.email, &self.email);
        set(&mut e.age, &self.age);
        set(&mut e.gender, &self.gender);
        set(&mut e.enquiry_type, &self.enquiry_type);
        set(&mut e.area, &self.area);
        set(&mut e.pincode, &self.pincode);
        set(&mut e.visit_type, &self.visit_type);
        set(&mut e.contact_method, &self.contact_method);
        set(&mut e.complaint, &self.complaint);
        set(&mut e.source, &self.source);
        set(&mut e.notes, &self.notes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_req(name: &str, phone: &str, date: &str) -> CreateEnquiryRequest {
        CreateEnquiryRequest {
            name: Some(name.into()),
            phone: Some(phone.into()),
            enquiry_date: Some(date.into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_create_defaults_status_to_new() {
        let new = create_req("A", "9000000000", "2025-01-01").validate().unwrap();
        assert_eq!(new.status, EnquiryStatus::New);
        assert_eq!(new.enquiry_date, NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
    }

    #[test]
    fn test_create_reports_every_missing_field() {
        let errors = CreateEnquiryRequest::default().validate().unwrap_err();
        assert_eq!(errors.get("name"), Some("Name is required"));
        assert_eq!(errors.get("phone"), Some("Phone number is required"));
        assert_eq!(errors.get("enquiry_date"), Some("Enquiry date is required"));
    }

    #[test]
    fn test_create_rejects_bad_enums_email_and_lengths() {
        let mut req = create_req("A", "9000000000", "not-a-date");
        req.email = Some("nope".into());
        req.visit_type = Some("teleconsult".into());
        req.contact_method = Some("fax".into());
        req.pincode = Some("60004000000".into());
        req.age = Some(150);
        let errors = req.validate().unwrap_err();
        for field in ["enquiry_date", "email", "visit_type", "contact_method", "pincode", "age"] {
            assert!(errors.contains(field), "missing error for {field}");
        }
    }

    #[test]
    fn test_create_cannot_start_converted() {
        let mut req = create_req("A", "9000000000", "2025-01-01");
        req.status = Some("converted".into());
        assert!(req.validate().unwrap_err().contains("status"));
    }

    #[test]
    fn test_update_distinguishes_null_from_absent() {
        let req: UpdateEnquiryRequest =
            serde_json::from_str(r#"{"email": null, "status": "contacted"}"#).unwrap();
        let changes = req.validate().unwrap();
        assert_eq!(changes.email, Some(None));
        assert_eq!(changes.area, None);
        assert_eq!(changes.status, Some(EnquiryStatus::Contacted));
    }

    #[test]
    fn test_update_rejects_blank_required_field() {
        let req: UpdateEnquiryRequest = serde_json::from_str(r#"{"name": "  "}"#).unwrap();
        assert_eq!(req.validate().unwrap_err().get("name"), Some("Name is required"));
    }

    #[test]
    fn test_apply_changes_leaves_absent_fields() {
        let mut e = create_req("Ravi", "9000000000", "2025-01-01")
            .validate()
            .unwrap()
            .into_enquiry(1, None, Utc::now());
        e.area = Some("Adyar".into());

        let changes = EnquiryChanges {
            phone: Some("9111111111".into()),
            area: Some(None),
            ..Default::default()
        };
        changes.apply_to(&mut e);

        assert_eq!(e.name, "Ravi");
        assert_eq!(e.phone, "9111111111");
        assert_eq!(e.area, None);
    }
}
