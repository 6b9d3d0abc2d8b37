//! Contact normalisation for invoice customers.

use serde::{Deserialize, Serialize};

use crate::entities::{order, user};
use crate::errors::ServiceError;

/// Calling code used when none is configured.
pub const DEFAULT_COUNTRY_CODE: &str = "20";

/// Normalises phone numbers into the `+<country><subscriber>` form the gateway
/// accepts. Numbers that match none of the national patterns only gain a
/// leading `+`; malformed input is not rejected.
#[derive(Debug, Clone)]
pub struct PhoneNormalizer {
    country_code: String,
}

impl Default for PhoneNormalizer {
    fn default() -> Self {
        Self::new(DEFAULT_COUNTRY_CODE)
    }
}

impl PhoneNormalizer {
    pub fn new(country_code: impl Into<String>) -> Self {
        let code: String = country_code.into();
        Self {
            country_code: code.trim_start_matches('+').to_string(),
        }
    }

    /// Value sent when the customer has no phone on record.
    pub fn placeholder(&self) -> String {
        format!("+{}0000000000", self.country_code)
    }

    pub fn normalize(&self, raw: Option<&str>) -> String {
        let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
            return self.placeholder();
        };

        let cc = self.country_code.as_str();
        if raw.starts_with(&format!("+{}", cc)) {
            return raw.to_string();
        }

        let compact: String = raw
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '-' && *c != '(' && *c != ')')
            .collect();
        let all_digits = !compact.is_empty() && compact.chars().all(|c| c.is_ascii_digit());

        if all_digits {
            if compact.starts_with(cc) && compact.len() >= 12 {
                return format!("+{}", compact);
            }
            if compact.starts_with('0') && compact.len() == 11 {
                return format!("+{}{}", cc, &compact[1..]);
            }
            if compact.starts_with('1') && compact.len() == 10 {
                return format!("+{}{}", cc, compact);
            }
        }

        if compact.starts_with('+') {
            compact
        } else {
            format!("+{}", compact)
        }
    }
}

/// Customer block required by the gateway when creating an invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerSnapshot {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub address: String,
}

impl CustomerSnapshot {
    /// Assembles the snapshot from the order's shipping contact, falling back
    /// per field to the account profile.
    pub fn assemble(
        order: &order::Model,
        profile: Option<&user::Model>,
        phones: &PhoneNormalizer,
    ) -> Result<Self, ServiceError> {
        fn pick(primary: Option<&str>, fallback: Option<&str>) -> Option<String> {
            primary
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .or_else(|| fallback.map(str::trim).filter(|s| !s.is_empty()))
                .map(str::to_string)
        }

        let first_name = pick(
            order.ship_first_name.as_deref(),
            profile.map(|u| u.first_name.as_str()),
        );
        let last_name = pick(
            order.ship_last_name.as_deref(),
            profile.map(|u| u.last_name.as_str()),
        );
        let email = pick(
            order.ship_email.as_deref(),
            profile.map(|u| u.email.as_str()),
        );
        let address = pick(
            order.ship_address.as_deref(),
            profile.and_then(|u| u.address.as_deref()),
        );
        let phone = pick(
            order.ship_phone.as_deref(),
            profile.and_then(|u| u.phone.as_deref()),
        );

        let mut missing = Vec::new();
        if first_name.is_none() {
            missing.push("firstName");
        }
        if last_name.is_none() {
            missing.push("lastName");
        }
        if email.is_none() {
            missing.push("email");
        }
        if address.is_none() {
            missing.push("address");
        }
        if !missing.is_empty() {
            return Err(ServiceError::ValidationError(format!(
                "customer details incomplete for order {}: missing {}",
                order.id,
                missing.join(", ")
            )));
        }

        Ok(Self {
            first_name: first_name.unwrap_or_default(),
            last_name: last_name.unwrap_or_default(),
            email: email.unwrap_or_default(),
            phone: phones.normalize(phone.as_deref()),
            address: address.unwrap_or_default(),
        })
    }

    /// Names of required fields that are blank.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        [
            ("firstName", &self.first_name),
            ("lastName", &self.last_name),
            ("email", &self.email),
            ("phone", &self.phone),
            ("address", &self.address),
        ]
        .into_iter()
        .filter(|(_, v)| v.trim().is_empty())
        .map(|(k, _)| k)
        .collect()
    }
}
