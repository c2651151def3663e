use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::conversion::{ConversionMode, ConversionWorkflow};
use crate::store::ClinicStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ClinicStore>,
    pub conversion: ConversionWorkflow,
    pub session_ttl_hours: i64,
    pub environment: String,
}

impl AppState {
    pub fn new(
        store: Arc<dyn ClinicStore>,
        mode: ConversionMode,
        session_ttl_hours: i64,
        environment: String,
    ) -> Self {
        Self {
            conversion: ConversionWorkflow::new(store.clone(), mode),
            store,
            session_ttl_hours,
            environment,
        }
    }
}

/* -------------------------
   Response envelopes
--------------------------*/

#[derive(Debug, Serialize)]
pub struct ApiOk<T> {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
    pub data: T,
}

impl<T> ApiOk<T> {
    pub fn new(data: T) -> Self {
        Self {
            status: "success",
            message: None,
            data,
        }
    }

    pub fn with_message(data: T, message: &'static str) -> Self {
        Self {
            status: "success",
            message: Some(message),
            data,
        }
    }
}

/// Success body for endpoints that return nothing but a message.
#[derive(Debug, Serialize)]
pub struct ApiMessage {
    pub status: &'static str,
    pub message: &'static str,
}

impl ApiMessage {
    pub fn new(message: &'static str) -> Self {
        Self {
            status: "success",
            message,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiPage<T> {
    pub status: &'static str,
    pub data: Vec<T>,
    pub pager: Pager,
}

impl<T> ApiPage<T> {
    pub fn new(data: Vec<T>, page: PageRequest, total: u64) -> Self {
        Self {
            status: "success",
            data,
            pager: Pager::new(page, total),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pager {
    pub current_page: u64,
    pub per_page: u64,
    pub total: u64,
    pub page_count: u64,
}

impl Pager {
    pub fn new(page: PageRequest, total: u64) -> Self {
        Self {
            current_page: page.page,
            per_page: page.per_page,
            total,
            page_count: total.div_ceil(page.per_page),
        }
    }
}

/* -------------------------
   Pagination
--------------------------*/

pub const DEFAULT_PER_PAGE: u64 = 20;
pub const MAX_PER_PAGE: u64 = 100;

/// Normalized `page` / `per_page` pair (1-based page).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u64,
    pub per_page: u64,
}

impl PageRequest {
    pub fn from_query(page: Option<i64>, per_page: Option<i64>) -> Self {
        let page = page.filter(|p| *p >= 1).unwrap_or(1) as u64;
        let per_page = per_page
            .filter(|p| *p >= 1)
            .map(|p| (p as u64).min(MAX_PER_PAGE))
            .unwrap_or(DEFAULT_PER_PAGE);
        Self { page, per_page }
    }

    pub fn limit(&self) -> u64 {
        self.per_page
    }

    /// Row offset, capped so it always fits a signed 64-bit SQL bind.
    pub fn offset(&self) -> u64 {
        (self.page - 1)
            .saturating_mul(self.per_page)
            .min(i64::MAX as u64)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: DEFAULT_PER_PAGE,
        }
    }
}

/// Shared `?page=&per_page=` query fragment.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl PageQuery {
    pub fn page_request(&self) -> PageRequest {
        PageRequest::from_query(self.page, self.per_page)
    }
}

/* -------------------------
   Helpers
--------------------------*/

/// Declares a closed set of snake_case string values with `FromStr`,
/// `as_str` and serde support.
macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [&'static str] = &[$($text),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(format!("unknown {}: {other}", stringify!($name))),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

pub(crate) use string_enum;

string_enum!(
    /// Shared by enquiries and patients.
    Gender {
        Male => "male",
        Female => "female",
        Other => "other",
    }
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_request_defaults_and_clamps() {
        assert_eq!(PageRequest::from_query(None, None), PageRequest { page: 1, per_page: 20 });
        assert_eq!(PageRequest::from_query(Some(0), Some(-5)), PageRequest { page: 1, per_page: 20 });
        assert_eq!(PageRequest::from_query(Some(3), Some(500)).per_page, MAX_PER_PAGE);
        assert_eq!(PageRequest::from_query(Some(3), Some(10)).offset(), 20);
    }

    #[test]
    fn test_huge_page_offset_saturates() {
        let page = PageRequest::from_query(Some(i64::MAX), Some(100));
        assert_eq!(page.page, i64::MAX as u64);
        assert_eq!(page.offset(), i64::MAX as u64);
        assert_eq!(Pager::new(page, 3).current_page, i64::MAX as u64);
    }

    #[test]
    fn test_pager_page_count_rounds_up() {
        let pager = Pager::new(PageRequest { page: 2, per_page: 20 }, 41);
        assert_eq!(pager.page_count, 3);
        assert_eq!(Pager::new(PageRequest::default(), 0).page_count, 0);

        let json = serde_json::to_value(&pager).unwrap();
        assert_eq!(json["currentPage"], 2);
        assert_eq!(json["pageCount"], 3);
    }

    #[test]
    fn test_string_enum_round_trip() {
        assert_eq!("female".parse::<Gender>(), Ok(Gender::Female));
        assert!("unknown".parse::<Gender>().is_err());
        assert_eq!(Gender::Other.to_string(), "other");
        assert_eq!(serde_json::to_value(Gender::Male).unwrap(), "male");
    }
}
