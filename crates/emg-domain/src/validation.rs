//! Form schemas for every editable entity.
//!
//! Each `*Form` is the raw client payload. `validate()` checks field shape,
//! turns empty optional strings into `None` and returns the typed values that
//! get written to the store. Failures are collected per field so the client can
//! show them inline.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;
use specta::Type;
use uuid::Uuid;

use crate::{OrderStatus, Ownership, Role, order_number};

#[derive(Debug, Clone, Default, PartialEq, Eq, thiserror::Error)]
#[error("validation failed: {fields:?}")]
pub struct ValidationErrors {
    pub fields: BTreeMap<String, String>,
}

impl ValidationErrors {
    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.fields
            .entry(field.to_string())
            .or_insert_with(|| message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn into_result<T>(self, value: impl FnOnce() -> T) -> Result<T, ValidationErrors> {
        if self.is_empty() { Ok(value()) } else { Err(self) }
    }
}

/// `None` for missing or blank input, the trimmed value otherwise.
pub fn empty_to_none(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("validation regex"))
}

fn device_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"^(HMQ-\d{4}|ZC-\d{3})$")
}

fn serial_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"^\d{8}$")
}

fn client_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"^\d{2}-\d{2}$")
}

fn pin_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"^\d{4}$")
}

fn color_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"^#[0-9a-fA-F]{6}$")
}

fn required(errors: &mut ValidationErrors, field: &str, value: &str, message: &str) -> String {
    let v = value.trim();
    if v.is_empty() {
        errors.add(field, message);
    }
    v.to_string()
}

fn max_len(errors: &mut ValidationErrors, field: &str, value: Option<&str>, max: usize) {
    if value.is_some_and(|v| v.chars().count() > max) {
        errors.add(field, format!("Maximal {max} Zeichen erlaubt"));
    }
}

fn parse_date(errors: &mut ValidationErrors, field: &str, value: Option<String>) -> Option<NaiveDate> {
    let raw = empty_to_none(value)?;
    match NaiveDate::parse_from_str(&raw, "%Y-%m-%d") {
        Ok(d) => Some(d),
        Err(_) => {
            errors.add(field, "Ungültiges Datum");
            None
        }
    }
}

fn required_date(
    errors: &mut ValidationErrors,
    field: &str,
    value: &str,
    message: &str,
) -> Option<NaiveDate> {
    if value.trim().is_empty() {
        errors.add(field, message);
        return None;
    }
    parse_date(errors, field, Some(value.to_string()))
}

fn parse_id(errors: &mut ValidationErrors, field: &str, value: Option<String>, message: &str) -> Option<Uuid> {
    let raw = empty_to_none(value)?;
    match Uuid::parse_str(&raw) {
        Ok(id) => Some(id),
        Err(_) => {
            errors.add(field, message);
            None
        }
    }
}

fn required_id(errors: &mut ValidationErrors, field: &str, value: &str, message: &str) -> Uuid {
    match Uuid::parse_str(value.trim()) {
        Ok(id) => id,
        Err(_) => {
            errors.add(field, message);
            Uuid::nil()
        }
    }
}

fn matching(
    errors: &mut ValidationErrors,
    field: &str,
    value: Option<String>,
    re: &Regex,
    message: &str,
) -> Option<String> {
    let v = empty_to_none(value)?;
    if !re.is_match(&v) {
        errors.add(field, message);
    }
    Some(v)
}

#[derive(Debug, Clone, serde::Deserialize, Type)]
pub struct DeviceForm {
    pub name: String,
    pub ownership: Ownership,
    pub serial_number: String,
    pub client: Option<String>,
    pub ip_address: Option<String>,
    pub pin: Option<String>,
    pub kind_id: Option<String>,
    pub status_id: Option<String>,
    pub purchase_date: Option<String>,
    pub next_service_date: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceValues {
    pub name: String,
    pub ownership: Ownership,
    pub serial_number: String,
    pub client: Option<String>,
    pub ip_address: Option<String>,
    pub pin: Option<String>,
    pub kind_id: Option<Uuid>,
    pub status_id: Option<Uuid>,
    pub purchase_date: Option<NaiveDate>,
    pub next_service_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

impl DeviceForm {
    pub fn validate(self) -> Result<DeviceValues, ValidationErrors> {
        let mut e = ValidationErrors::default();

        let name = required(&mut e, "name", &self.name, "Name ist erforderlich");
        if !name.is_empty() && !device_name_re().is_match(&name) {
            e.add("name", "Name muss im Format HMQ-XXXX oder ZC-XXX sein");
        }

        let serial_number = required(
            &mut e,
            "serial_number",
            &self.serial_number,
            "Seriennummer ist erforderlich",
        );
        if !serial_number.is_empty() && !serial_re().is_match(&serial_number) {
            e.add("serial_number", "Seriennummer muss 8 Ziffern haben");
        }

        let client = matching(&mut e, "client", self.client, client_re(), "Client muss im Format XX-XX sein");
        let pin = matching(&mut e, "pin", self.pin, pin_re(), "PIN muss 4 Ziffern haben");

        let ip_address = empty_to_none(self.ip_address);
        if ip_address.as_deref().is_some_and(|ip| ip.parse::<Ipv4Addr>().is_err()) {
            e.add("ip_address", "Ungültige IPv4-Adresse");
        }

        let kind_id = parse_id(&mut e, "kind_id", self.kind_id, "Ungültige Geräteart");
        let status_id = parse_id(&mut e, "status_id", self.status_id, "Ungültiger Status");
        let purchase_date = parse_date(&mut e, "purchase_date", self.purchase_date);
        let next_service_date = parse_date(&mut e, "next_service_date", self.next_service_date);
        let notes = empty_to_none(self.notes);
        let ownership = self.ownership;

        e.into_result(|| DeviceValues {
            name,
            ownership,
            serial_number,
            client,
            ip_address,
            pin,
            kind_id,
            status_id,
            purchase_date,
            next_service_date,
            notes,
        })
    }
}

#[derive(Debug, Clone, serde::Deserialize, Type)]
pub struct OrderForm {
    pub order_number: String,
    pub site: Option<String>,
    pub description: Option<String>,
    pub status: Option<OrderStatus>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderValues {
    pub order_number: String,
    pub site: Option<String>,
    pub description: Option<String>,
    pub status: OrderStatus,
}

impl OrderForm {
    pub fn validate(self) -> Result<OrderValues, ValidationErrors> {
        let mut e = ValidationErrors::default();

        let order_number = required(
            &mut e,
            "order_number",
            &self.order_number,
            "Auftragsnummer ist erforderlich",
        );
        if !order_number.is_empty() && !order_number::is_valid(&order_number) {
            e.add("order_number", "Auftragsnummer muss im Format 51XXXX.XXXX sein");
        }

        let site = empty_to_none(self.site);
        max_len(&mut e, "site", site.as_deref(), 255);
        let description = empty_to_none(self.description);
        let status = self.status.unwrap_or_default();

        e.into_result(|| OrderValues {
            order_number,
            site,
            description,
            status,
        })
    }
}

#[derive(Debug, Clone, serde::Deserialize, Type)]
pub struct DeploymentForm {
    pub device_id: String,
    pub order_id: String,
    pub start_date: String,
    pub planned_end_date: Option<String>,
    pub street: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentValues {
    pub device_id: Uuid,
    pub order_id: Uuid,
    pub start_date: NaiveDate,
    pub planned_end_date: Option<NaiveDate>,
    pub street: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub notes: Option<String>,
}

impl DeploymentForm {
    pub fn validate(self) -> Result<DeploymentValues, ValidationErrors> {
        let mut e = ValidationErrors::default();

        let device_id = required_id(&mut e, "device_id", &self.device_id, "Bitte wählen Sie ein Gerät");
        let order_id = required_id(&mut e, "order_id", &self.order_id, "Bitte wählen Sie einen Auftrag");
        let start_date = required_date(&mut e, "start_date", &self.start_date, "Von-Datum ist erforderlich");
        let planned_end_date = parse_date(&mut e, "planned_end_date", self.planned_end_date);
        if let (Some(start), Some(end)) = (start_date, planned_end_date)
            && end < start
        {
            e.add("planned_end_date", "Bis-Datum liegt vor dem Von-Datum");
        }

        let street = empty_to_none(self.street);
        let postal_code = empty_to_none(self.postal_code);
        let city = empty_to_none(self.city);
        max_len(&mut e, "street", street.as_deref(), 255);
        max_len(&mut e, "postal_code", postal_code.as_deref(), 10);
        max_len(&mut e, "city", city.as_deref(), 100);

        let (lat, lng) = (self.lat, self.lng);
        if lat.is_some_and(|v| !(-90.0..=90.0).contains(&v)) {
            e.add("lat", "Breitengrad muss zwischen -90 und 90 liegen");
        }
        if lng.is_some_and(|v| !(-180.0..=180.0).contains(&v)) {
            e.add("lng", "Längengrad muss zwischen -180 und 180 liegen");
        }

        let notes = empty_to_none(self.notes);

        e.into_result(|| DeploymentValues {
            device_id,
            order_id,
            start_date: start_date.unwrap_or_default(),
            planned_end_date,
            street,
            postal_code,
            city,
            lat,
            lng,
            notes,
        })
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize, Type)]
pub struct EndDeploymentForm {
    pub end_date: Option<String>,
    pub status_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EndDeploymentValues {
    pub end_date: Option<NaiveDate>,
    pub status_id: Option<Uuid>,
}

impl EndDeploymentForm {
    pub fn validate(self) -> Result<EndDeploymentValues, ValidationErrors> {
        let mut e = ValidationErrors::default();
        let end_date = parse_date(&mut e, "end_date", self.end_date);
        let status_id = parse_id(&mut e, "status_id", self.status_id, "Bitte wählen Sie einen Status");
        e.into_result(|| EndDeploymentValues { end_date, status_id })
    }
}

#[derive(Debug, Clone, serde::Deserialize, Type)]
pub struct MaintenanceForm {
    pub device_id: String,
    pub kind_id: Option<String>,
    pub date: String,
    pub performed_by: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MaintenanceValues {
    pub device_id: Uuid,
    pub kind_id: Option<Uuid>,
    pub date: NaiveDate,
    pub performed_by: Option<String>,
    pub notes: Option<String>,
}

impl MaintenanceForm {
    pub fn validate(self) -> Result<MaintenanceValues, ValidationErrors> {
        let mut e = ValidationErrors::default();
        let device_id = required_id(&mut e, "device_id", &self.device_id, "Ungültige Geräte-ID");
        let kind_id = parse_id(&mut e, "kind_id", self.kind_id, "Ungültige Wartungsart");
        let date = required_date(&mut e, "date", &self.date, "Datum ist erforderlich");
        let performed_by = empty_to_none(self.performed_by);
        max_len(&mut e, "performed_by", performed_by.as_deref(), 100);
        let notes = empty_to_none(self.notes);

        e.into_result(|| MaintenanceValues {
            device_id,
            kind_id,
            date: date.unwrap_or_default(),
            performed_by,
            notes,
        })
    }
}

/// Shared shape of device kinds, statuses and maintenance kinds.
#[derive(Debug, Clone, serde::Deserialize, Type)]
pub struct ReferenceForm {
    pub label: String,
    /// Device and maintenance kinds only.
    pub description: Option<String>,
    pub color: Option<String>,
    pub interval_months: Option<i32>,
    pub sort_order: Option<i32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceValues {
    pub label: String,
    pub description: Option<String>,
    pub color: Option<String>,
    pub interval_months: Option<i32>,
    pub sort_order: i32,
}

impl ReferenceForm {
    pub fn validate(self) -> Result<ReferenceValues, ValidationErrors> {
        let mut e = ValidationErrors::default();
        let label = required(&mut e, "label", &self.label, "Bezeichnung ist erforderlich");
        max_len(&mut e, "label", Some(label.as_str()), 100);
        let description = empty_to_none(self.description);
        max_len(&mut e, "description", description.as_deref(), 500);
        let color = matching(
            &mut e,
            "color",
            self.color,
            color_re(),
            "Farbe muss im Format #RRGGBB sein",
        );
        if self.interval_months.is_some_and(|m| m < 1) {
            e.add("interval_months", "Intervall muss mindestens 1 Monat sein");
        }
        let interval_months = self.interval_months;
        let sort_order = self.sort_order.unwrap_or(0);

        e.into_result(|| ReferenceValues {
            label,
            description,
            color,
            interval_months,
            sort_order,
        })
    }
}

#[derive(Debug, Clone, serde::Deserialize, Type)]
pub struct InviteForm {
    pub email: String,
    pub name: Option<String>,
    pub role: Option<Role>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InviteValues {
    pub email: String,
    pub name: Option<String>,
    pub role: Role,
}

pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

pub fn is_plausible_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.chars().any(char::is_whitespace)
        && !domain.contains('@')
}

impl InviteForm {
    pub fn validate(self) -> Result<InviteValues, ValidationErrors> {
        let mut e = ValidationErrors::default();
        let email = normalize_email(&self.email);
        if !is_plausible_email(&email) {
            e.add("email", "Ungültige E-Mail-Adresse");
        }
        let name = empty_to_none(self.name);
        let role = self.role.unwrap_or_default();
        e.into_result(|| InviteValues { email, name, role })
    }
}
