// src/store/postgres.rs

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgConnection, PgPool};
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

/// Advisory lock key serializing patient_code assignment across connections.
const PATIENT_CODE_LOCK: i64 = 0x4350_435f_434f_4445; // "CPC_CODE"

const ENQUIRY_COLUMNS: &str = "id, name, email, phone, age, gender, enquiry_date, enquiry_type, \
    area, pincode, visit_type, contact_method, complaint, source, status, notes, \
    converted_to_patient_id, conversion_date, created_by, created_at, updated_at, deleted_at";

const PATIENT_COLUMNS: &str = "id, patient_code, name, email, phone, alternate_phone, \
    date_of_birth, gender, address, area, pincode, emergency_contact_name, \
    emergency_contact_phone, emergency_contact_relation, medical_history, \
    current_medications, allergies, source_enquiry_id, status, notes, created_by, \
    created_at, updated_at, deleted_at";

const USER_COLUMNS: &str = "id, username, email, active, groups, created_at, updated_at, deleted_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Unique violations become conflicts; everything else stays a database error.
const SOURCE_ENQUIRY_FK: &str = "patients_source_enquiry_id_fkey";

fn db_err(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            return StoreError::Conflict(db.message().to_string());
        }
        if db.is_foreign_key_violation() {
            if let Some(err) = fk_violation_error(db.constraint()) {
                return err;
            }
        }
    }
    StoreError::Database(e)
}

/// Field-level error for foreign keys a client can point at a missing row.
fn fk_violation_error(constraint: Option<&str>) -> Option<StoreError> {
    match constraint {
        Some(SOURCE_ENQUIRY_FK) => Some(source_enquiry_missing_error()),
        _ => None,
    }
}

fn parse_col<T: std::str::FromStr<Err = String>>(value: &str) -> StoreResult<T> {
    value.parse().map_err(StoreError::Corrupt)
}

fn parse_opt_col<T: std::str::FromStr<Err = String>>(value: Option<String>) -> StoreResult<Option<T>> {
    value.as_deref().map(parse_col).transpose()
}

/// `%needle%` for ILIKE, with the pattern metacharacters escaped.
fn like_pattern(needle: &str) -> String {
    let escaped = needle
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

/* -------------------------
   DB Row Models
--------------------------*/

#[derive(Debug, sqlx::FromRow)]
struct EnquiryRow {
    id: i64,
    name: String,
    email: Option<String>,
    phone: String,
    age: Option<i32>,
    gender: Option<String>,
    enquiry_date: NaiveDate,
    enquiry_type: Option<String>,
    area: Option<String>,
    pincode: Option<String>,
    visit_type: Option<String>,
    contact_method: Option<String>,
    complaint: Option<String>,
    source: Option<String>,
    status: String,
    notes: Option<String>,
    converted_to_patient_id: Option<i64>,
    conversion_date: Option<NaiveDate>,
    created_by: Option<i64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<EnquiryRow> for Enquiry {
    type Error = StoreError;

    fn try_from(r: EnquiryRow) -> Result<Self, Self::Error> {
        Ok(Enquiry {
            id: r.id,
            name: r.name,
            email: r.email,
            phone: r.phone,
            age: r.age,
            gender: parse_opt_col(r.gender)?,
            enquiry_date: r.enquiry_date,
            enquiry_type: r.enquiry_type,
            area: r.area,
            pincode: r.pincode,
            visit_type: parse_opt_col(r.visit_type)?,
            contact_method: parse_opt_col(r.contact_method)?,
            complaint: r.complaint,
            source: r.source,
            status: parse_col(&r.status)?,
            notes: r.notes,
            converted_to_patient_id: r.converted_to_patient_id,
            conversion_date: r.conversion_date,
            created_by: r.created_by,
            created_at: r.created_at,
            updated_at: r.updated_at,
            deleted_at: r.deleted_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PatientRow {
    id: i64,
    patient_code: String,
    name: String,
    email: Option<String>,
    phone: String,
    alternate_phone: Option<String>,
    date_of_birth: Option<NaiveDate>,
    gender: Option<String>,
    address: Option<String>,
    area: Option<String>,
    pincode: Option<String>,
    emergency_contact_name: Option<String>,
    emergency_contact_phone: Option<String>,
    emergency_contact_relation: Option<String>,
    medical_history: Option<String>,
    current_medications: Option<String>,
    allergies: Option<String>,
    source_enquiry_id: Option<i64>,
    status: String,
    notes: Option<String>,
    created_by: Option<i64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<PatientRow> for Patient {
    type Error = StoreError;

    fn try_from(r: PatientRow) -> Result<Self, Self::Error> {
        Ok(Patient {
            id: r.id,
            patient_code: r.patient_code,
            name: r.name,
            email: r.email,
            phone: r.phone,
            alternate_phone: r.alternate_phone,
            date_of_birth: r.date_of_birth,
            gender: parse_opt_col(r.gender)?,
            address: r.address,
            area: r.area,
            pincode: r.pincode,
            emergency_contact_name: r.emergency_contact_name,
            emergency_contact_phone: r.emergency_contact_phone,
            emergency_contact_relation: r.emergency_contact_relation,
            medical_history: r.medical_history,
            current_medications: r.current_medications,
            allergies: r.allergies,
            source_enquiry_id: r.source_enquiry_id,
            status: parse_col(&r.status)?,
            notes: r.notes,
            created_by: r.created_by,
            created_at: r.created_at,
            updated_at: r.updated_at,
            deleted_at: r.deleted_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CredentialsRow {
    #[sqlx(flatten)]
    user: User,
    password_hash: String,
}

#[derive(Debug, sqlx::FromRow)]
struct SessionRow {
    token_id: Uuid,
    #[sqlx(flatten)]
    user: User,
}

fn enquiries(rows: Vec<EnquiryRow>) -> StoreResult<Vec<Enquiry>> {
    rows.into_iter().map(Enquiry::try_from).collect()
}

fn patients(rows: Vec<PatientRow>) -> StoreResult<Vec<Patient>> {
    rows.into_iter().map(Patient::try_from).collect()
}

/* -------------------------
   Connection-level helpers
   (callable inside a transaction)
--------------------------*/

async fn lock_live_enquiry(conn: &mut PgConnection, id: i64) -> StoreResult<Enquiry> {
    let sql = format!(
        "SELECT {ENQUIRY_COLUMNS} FROM enquiries WHERE id = $1 AND deleted_at IS NULL FOR UPDATE"
    );
    let row: EnquiryRow = sqlx::query_as(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err)?
        .ok_or(StoreError::NotFound("enquiry"))?;
    row.try_into()
}

/// Writes every mutable column of `e` back.
async fn write_enquiry(conn: &mut PgConnection, e: &Enquiry) -> StoreResult<Enquiry> {
    let sql = format!(
        r#"
        UPDATE enquiries
        SET name = $1,
            email = $2,
            phone = $3,
            age = $4,
            gender = $5,
            enquiry_date = $6,
            enquiry_type = $7,
            area = $8,
            pincode = $9,
            visit_type = $10,
            contact_method = $11,
            complaint = $12,
            source = $13,
            status = $14,
            notes = $15,
            converted_to_patient_id = $16,
            conversion_date = $17,
            updated_at = now()
        WHERE id = $18
        RETURNING {ENQUIRY_COLUMNS}
        "#
    );
    let row: EnquiryRow = sqlx::query_as(&sql)
        .bind(&e.name)
        .bind(&e.email)
        .bind(&e.phone)
        .bind(e.age)
        .bind(e.gender.map(|g| g.as_str()))
        .bind(e.enquiry_date)
        .bind(&e.enquiry_type)
        .bind(&e.area)
        .bind(&e.pincode)
        .bind(e.visit_type.map(|v| v.as_str()))
        .bind(e.contact_method.map(|c| c.as_str()))
        .bind(&e.complaint)
        .bind(&e.source)
        .bind(e.status.as_str())
        .bind(&e.notes)
        .bind(e.converted_to_patient_id)
        .bind(e.conversion_date)
        .bind(e.id)
        .fetch_one(&mut *conn)
        .await
        .map_err(db_err)?;
    row.try_into()
}

async fn code_taken(conn: &mut PgConnection, code: &str, except_id: Option<i64>) -> StoreResult<bool> {
    // soft-deleted rows included: codes are never reused
    let found: Option<i64> = sqlx::query_scalar(
        r#"
        SELECT id FROM patients
        WHERE patient_code = $1
          AND ($2::bigint IS NULL OR id <> $2)
        LIMIT 1
        "#,
    )
    .bind(code)
    .bind(except_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(db_err)?;
    Ok(found.is_some())
}

fn source_enquiry_missing_error() -> StoreError {
    let mut errors = FieldErrors::new();
    errors.add("source_enquiry_id", MSG_SOURCE_ENQUIRY_MISSING);
    StoreError::Validation(errors)
}

fn code_taken_error() -> StoreError {
    let mut errors = FieldErrors::new();
    errors.add("patient_code", MSG_CODE_TAKEN);
    StoreError::Validation(errors)
}

/// Must run inside a transaction: the advisory lock is released at commit/rollback.
async fn insert_patient(
    conn: &mut PgConnection,
    new: NewPatient,
    created_by: Option<i64>,
) -> StoreResult<Patient> {
    if let Some(enquiry_id) = new.source_enquiry_id {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM enquiries WHERE id = $1)")
            .bind(enquiry_id)
            .fetch_one(&mut *conn)
            .await
            .map_err(db_err)?;
        if !exists {
            return Err(source_enquiry_missing_error());
        }
    }

    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(PATIENT_CODE_LOCK)
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;

    let code = match &new.patient_code {
        Some(code) => {
            if code_taken(conn, code, None).await? {
                return Err(code_taken_error());
            }
            code.clone()
        }
        None => {
            let last: Option<String> = sqlx::query_scalar(
                r#"
                SELECT patient_code FROM patients
                WHERE patient_code <> ''
                ORDER BY id DESC
                LIMIT 1
                "#,
            )
            .fetch_optional(&mut *conn)
            .await
            .map_err(db_err)?;
            next_patient_code(last.as_deref())
        }
    };

    let sql = format!(
        r#"
        INSERT INTO patients (
            patient_code, name, email, phone, alternate_phone, date_of_birth, gender,
            address, area, pincode, emergency_contact_name, emergency_contact_phone,
            emergency_contact_relation, medical_history, current_medications, allergies,
            source_enquiry_id, status, notes, created_by
        )
        VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19,$20)
        RETURNING {PATIENT_COLUMNS}
        "#
    );
    let row: PatientRow = sqlx::query_as(&sql)
        .bind(&code)
        .bind(&new.name)
        .bind(&new.email)
        .bind(&new.phone)
        .bind(&new.alternate_phone)
        .bind(new.date_of_birth)
        .bind(new.gender.map(|g| g.as_str()))
        .bind(&new.address)
        .bind(&new.area)
        .bind(&new.pincode)
        .bind(&new.emergency_contact_name)
        .bind(&new.emergency_contact_phone)
        .bind(&new.emergency_contact_relation)
        .bind(&new.medical_history)
        .bind(&new.current_medications)
        .bind(&new.allergies)
        .bind(new.source_enquiry_id)
        .bind(new.status.as_str())
        .bind(&new.notes)
        .bind(created_by)
        .fetch_one(&mut *conn)
        .await
        .map_err(db_err)?;
    row.try_into()
}

/* -------------------------
   Enquiries
--------------------------*/

#[async_trait]
impl EnquiryRepository for PgStore {
    async fn create_enquiry(&self, new: NewEnquiry, created_by: Option<i64>) -> StoreResult<Enquiry> {
        let sql = format!(
            r#"
            INSERT INTO enquiries (
                name, email, phone, age, gender, enquiry_date, enquiry_type, area, pincode,
                visit_type, contact_method, complaint, source, status, notes, created_by
            )
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16)
            RETURNING {ENQUIRY_COLUMNS}
            "#
        );
        let row: EnquiryRow = sqlx::query_as(&sql)
            .bind(&new.name)
            .bind(&new.email)
            .bind(&new.phone)
            .bind(new.age)
            .bind(new.gender.map(|g| g.as_str()))
            .bind(new.enquiry_date)
            .bind(&new.enquiry_type)
            .bind(&new.area)
            .bind(&new.pincode)
            .bind(new.visit_type.map(|v| v.as_str()))
            .bind(new.contact_method.map(|c| c.as_str()))
            .bind(&new.complaint)
            .bind(&new.source)
            .bind(new.status.as_str())
            .bind(&new.notes)
            .bind(created_by)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        row.try_into()
    }

    async fn get_enquiry(&self, id: i64) -> StoreResult<Option<Enquiry>> {
        let sql = format!("SELECT {ENQUIRY_COLUMNS} FROM enquiries WHERE id = $1 AND deleted_at IS NULL");
        let row: Option<EnquiryRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(Enquiry::try_from).transpose()
    }

    async fn list_enquiries(
        &self,
        filter: &EnquiryFilter,
        limit: u64,
        offset: u64,
    ) -> StoreResult<(Vec<Enquiry>, u64)> {
        let status = filter.status.map(|s| s.as_str());

        let sql = format!(
            r#"
            SELECT {ENQUIRY_COLUMNS}
            FROM enquiries
            WHERE deleted_at IS NULL
              AND ($1::text IS NULL OR status = $1)
            ORDER BY enquiry_date DESC, id DESC
            LIMIT $2 OFFSET $3
            "#
        );
        let rows: Vec<EnquiryRow> = sqlx::query_as(&sql)
            .bind(status)
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM enquiries
            WHERE deleted_at IS NULL
              AND ($1::text IS NULL OR status = $1)
            "#,
        )
        .bind(status)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        Ok((enquiries(rows)?, total.max(0) as u64))
    }

    async fn update_enquiry(&self, id: i64, changes: &EnquiryChanges) -> StoreResult<Enquiry> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let mut e = lock_live_enquiry(&mut *tx, id).await?;
        changes.apply_to(&mut e);
        let updated = write_enquiry(&mut *tx, &e).await?;
        tx.commit().await.map_err(db_err)?;
        Ok(updated)
    }

    async fn link_converted_patient(
        &self,
        id: i64,
        patient_id: i64,
        conversion_date: NaiveDate,
    ) -> StoreResult<Enquiry> {
        let sql = format!(
            r#"
            UPDATE enquiries
            SET converted_to_patient_id = $1,
                conversion_date = $2,
                updated_at = now()
            WHERE id = $3
              AND deleted_at IS NULL
              AND (converted_to_patient_id IS NULL OR converted_to_patient_id = $1)
            RETURNING {ENQUIRY_COLUMNS}
            "#
        );
        let row: Option<EnquiryRow> = sqlx::query_as(&sql)
            .bind(patient_id)
            .bind(conversion_date)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        match row {
            Some(r) => r.try_into(),
            None => match self.get_enquiry(id).await? {
                Some(_) => Err(StoreError::Conflict(format!(
                    "enquiry {id} is already linked to another patient"
                ))),
                None => Err(StoreError::NotFound("enquiry")),
            },
        }
    }

    async fn update_enquiry_converting(
        &self,
        id: i64,
        changes: &EnquiryChanges,
        conversion_date: NaiveDate,
    ) -> StoreResult<EnquiryUpdate> {
        // dropping `tx` on any early return rolls everything back
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let current = lock_live_enquiry(&mut *tx, id).await?;
        let mut updated = current.clone();
        changes.apply_to(&mut updated);

        let created_patient = if triggers_conversion(&current, changes) {
            let new = patient_from_enquiry(&updated, PatientBounds::FROM_ENQUIRY)?;
            let patient = insert_patient(&mut *tx, new, updated.created_by).await?;
            updated.converted_to_patient_id = Some(patient.id);
            updated.conversion_date = Some(conversion_date);
            Some(patient)
        } else {
            None
        };

        let enquiry = write_enquiry(&mut *tx, &updated).await?;
        tx.commit().await.map_err(db_err)?;

        Ok(EnquiryUpdate {
            enquiry,
            created_patient,
        })
    }

    async fn soft_delete_enquiry(&self, id: i64) -> StoreResult<()> {
        let res = sqlx::query(
            r#"
            UPDATE enquiries
            SET deleted_at = now()
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound("enquiry"));
        }
        Ok(())
    }
}

/* -------------------------
   Patients
--------------------------*/

#[async_trait]
impl PatientRepository for PgStore {
    async fn create_patient(&self, new: NewPatient, created_by: Option<i64>) -> StoreResult<Patient> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let patient = insert_patient(&mut *tx, new, created_by).await?;
        tx.commit().await.map_err(db_err)?;
        Ok(patient)
    }

    async fn get_patient(&self, id: i64) -> StoreResult<Option<Patient>> {
        let sql = format!("SELECT {PATIENT_COLUMNS} FROM patients WHERE id = $1 AND deleted_at IS NULL");
        let row: Option<PatientRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(Patient::try_from).transpose()
    }

    async fn get_patient_including_deleted(&self, id: i64) -> StoreResult<Option<Patient>> {
        let sql = format!("SELECT {PATIENT_COLUMNS} FROM patients WHERE id = $1");
        let row: Option<PatientRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(Patient::try_from).transpose()
    }

    async fn list_patients(
        &self,
        filter: &PatientFilter,
        limit: u64,
        offset: u64,
    ) -> StoreResult<(Vec<Patient>, u64)> {
        let status = filter.status.map(|s| s.as_str());
        let pattern = filter.search.as_deref().map(like_pattern);

        let sql = format!(
            r#"
            SELECT {PATIENT_COLUMNS}
            FROM patients
            WHERE deleted_at IS NULL
              AND ($1::text IS NULL OR status = $1)
              AND ($2::text IS NULL
                   OR name ILIKE $2
                   OR phone ILIKE $2
                   OR email ILIKE $2
                   OR patient_code ILIKE $2)
            ORDER BY created_at DESC, id DESC
            LIMIT $3 OFFSET $4
            "#
        );
        let rows: Vec<PatientRow> = sqlx::query_as(&sql)
            .bind(status)
            .bind(pattern.as_deref())
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM patients
            WHERE deleted_at IS NULL
              AND ($1::text IS NULL OR status = $1)
              AND ($2::text IS NULL
                   OR name ILIKE $2
                   OR phone ILIKE $2
                   OR email ILIKE $2
                   OR patient_code ILIKE $2)
            "#,
        )
        .bind(status)
        .bind(pattern.as_deref())
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        Ok((patients(rows)?, total.max(0) as u64))
    }

    async fn update_patient(&self, id: i64, changes: &PatientChanges) -> StoreResult<Patient> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let sql = format!(
            "SELECT {PATIENT_COLUMNS} FROM patients WHERE id = $1 AND deleted_at IS NULL FOR UPDATE"
        );
        let existing: PatientRow = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?
            .ok_or(StoreError::NotFound("patient"))?;
        let mut p = Patient::try_from(existing)?;

        if let Some(code) = &changes.patient_code {
            if code != &p.patient_code && code_taken(&mut *tx, code, Some(id)).await? {
                return Err(code_taken_error());
            }
        }
        changes.apply_to(&mut p);

        let sql = format!(
            r#"
            UPDATE patients
            SET patient_code = $1,
                name = $2,
                email = $3,
                phone = $4,
                alternate_phone = $5,
                date_of_birth = $6,
                gender = $7,
                address = $8,
                area = $9,
                pincode = $10,
                emergency_contact_name = $11,
                emergency_contact_phone = $12,
                emergency_contact_relation = $13,
                medical_history = $14,
                current_medications = $15,
                allergies = $16,
                status = $17,
                notes = $18,
                updated_at = now()
            WHERE id = $19
            RETURNING {PATIENT_COLUMNS}
            "#
        );
        let row: PatientRow = sqlx::query_as(&sql)
            .bind(&p.patient_code)
            .bind(&p.name)
            .bind(&p.email)
            .bind(&p.phone)
            .bind(&p.alternate_phone)
            .bind(p.date_of_birth)
            .bind(p.gender.map(|g| g.as_str()))
            .bind(&p.address)
            .bind(&p.area)
            .bind(&p.pincode)
            .bind(&p.emergency_contact_name)
            .bind(&p.emergency_contact_phone)
            .bind(&p.emergency_contact_relation)
            .bind(&p.medical_history)
            .bind(&p.current_medications)
            .bind(&p.allergies)
            .bind(p.status.as_str())
            .bind(&p.notes)
            .bind(id)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        row.try_into()
    }

    async fn soft_delete_patient(&self, id: i64) -> StoreResult<()> {
        let res = sqlx::query(
            r#"
            UPDATE patients
            SET deleted_at = now()
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound("patient"));
        }
        Ok(())
    }
}

/* -------------------------
   Users & access tokens
--------------------------*/

#[async_trait]
impl UserRepository for PgStore {
    async fn create_user(&self, new: NewUser) -> StoreResult<User> {
        let sql = format!(
            r#"
            INSERT INTO users (username, email, password_hash, active, groups)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {USER_COLUMNS}
            "#
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(&new.username)
            .bind(&new.email)
            .bind(&new.password_hash)
            .bind(new.active)
            .bind(&new.groups)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn get_user(&self, id: i64) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1 AND deleted_at IS NULL");
        sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn find_credentials_by_email(&self, email: &str) -> StoreResult<Option<UserCredentials>> {
        let sql = format!(
            "SELECT {USER_COLUMNS}, password_hash FROM users WHERE lower(email) = lower($1) AND deleted_at IS NULL"
        );
        let row: Option<CredentialsRow> = sqlx::query_as(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.map(|r| UserCredentials {
            user: r.user,
            password_hash: r.password_hash,
        }))
    }

    async fn list_users(&self, group: Option<&str>, limit: u64, offset: u64) -> StoreResult<(Vec<User>, u64)> {
        let sql = format!(
            r#"
            SELECT {USER_COLUMNS}
            FROM users
            WHERE deleted_at IS NULL
              AND ($1::text IS NULL OR $1 = ANY(groups))
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#
        );
        let users: Vec<User> = sqlx::query_as(&sql)
            .bind(group)
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM users
            WHERE deleted_at IS NULL
              AND ($1::text IS NULL OR $1 = ANY(groups))
            "#,
        )
        .bind(group)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        Ok((users, total.max(0) as u64))
    }

    async fn update_user(&self, id: i64, changes: &UserChanges) -> StoreResult<User> {
        let sql = format!(
            r#"
            UPDATE users
            SET username = COALESCE($1, username),
                email = COALESCE($2, email),
                password_hash = COALESCE($3, password_hash),
                active = COALESCE($4, active),
                groups = COALESCE($5, groups),
                updated_at = now()
            WHERE id = $6 AND deleted_at IS NULL
            RETURNING {USER_COLUMNS}
            "#
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(changes.username.as_deref())
            .bind(changes.email.as_deref())
            .bind(changes.password_hash.as_deref())
            .bind(changes.active)
            .bind(changes.groups.as_ref())
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or(StoreError::NotFound("user"))
    }

    async fn soft_delete_user(&self, id: i64) -> StoreResult<()> {
        let res = sqlx::query(
            r#"
            UPDATE users
            SET deleted_at = now()
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound("user"));
        }
        Ok(())
    }

    async fn create_access_token(
        &self,
        user_id: i64,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<Uuid> {
        let token_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO access_tokens (id, user_id, token_hash, expires_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(token_id)
        .bind(user_id)
        .bind(token_hash)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(token_id)
    }

    async fn find_session(&self, token_hash: &str) -> StoreResult<Option<SessionRecord>> {
        let row: Option<SessionRow> = sqlx::query_as(
            r#"
            SELECT t.id AS token_id,
                   u.id, u.username, u.email, u.active, u.groups,
                   u.created_at, u.updated_at, u.deleted_at
            FROM access_tokens t
            JOIN users u ON u.id = t.user_id
            WHERE t.token_hash = $1
              AND t.revoked_at IS NULL
              AND t.expires_at > now()
              AND u.active = true
              AND u.deleted_at IS NULL
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.map(|r| SessionRecord {
            token_id: r.token_id,
            user: r.user,
        }))
    }

    async fn touch_access_token(&self, token_id: Uuid) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE access_tokens
            SET last_used_at = now()
            WHERE id = $1
            "#,
        )
        .bind(token_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn revoke_user_tokens(&self, user_id: i64) -> StoreResult<u64> {
        let res = sqlx::query(
            r#"
            UPDATE access_tokens
            SET revoked_at = now()
            WHERE user_id = $1 AND revoked_at IS NULL
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(res.rows_affected())
    }
}
