use chrono::NaiveDate;
use emg_db::entities::{device_statuses, devices};
use emg_domain::status;

/// Devices due for service within this many days are listed on the dashboard.
pub const SERVICE_HORIZON_DAYS: i64 = 30;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StatusCounts {
    pub total: u32,
    pub in_office: u32,
    pub in_use: u32,
    pub in_maintenance: u32,
    pub defective: u32,
}

fn clamp_usize_to_u32(v: usize) -> u32 {
    u32::try_from(v).unwrap_or(u32::MAX)
}

pub fn count_by_status(
    all: &[devices::Model],
    statuses: &[device_statuses::Model],
) -> StatusCounts {
    let count_label = |label: &str| {
        let Some(s) = status::find_by_label(statuses, label, |s| s.label.as_str()) else {
            return 0;
        };
        clamp_usize_to_u32(all.iter().filter(|d| d.status_id == Some(s.id)).count())
    };

    StatusCounts {
        total: clamp_usize_to_u32(all.len()),
        in_office: count_label(status::IN_OFFICE),
        in_use: count_label(status::IN_USE),
        in_maintenance: count_label(status::IN_MAINTENANCE),
        defective: count_label(status::DEFECTIVE),
    }
}

/// Devices whose next service falls within the horizon, overdue ones
/// included, soonest first.
pub fn due_for_service(all: &[devices::Model], today: NaiveDate) -> Vec<&devices::Model> {
    let horizon = today + chrono::Duration::days(SERVICE_HORIZON_DAYS);
    let mut due: Vec<&devices::Model> = all
        .iter()
        .filter(|d| d.next_service_date.is_some_and(|n| n <= horizon))
        .collect();
    due.sort_by_key(|d| d.next_service_date);
    due
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::prelude::Uuid;

    fn status_row(label: &str) -> device_statuses::Model {
        device_statuses::Model {
            id: Uuid::new_v4(),
            label: label.to_string(),
            color: "#000000".to_string(),
            sort_order: 0,
            created_at: chrono::Utc::now().fixed_offset(),
        }
    }

    fn device(status_id: Option<Uuid>, next: Option<NaiveDate>) -> devices::Model {
        devices::Model {
            id: Uuid::new_v4(),
            name: "HMQ-0001".to_string(),
            ownership: "eigen".to_string(),
            serial_number: "12345678".to_string(),
            client: None,
            ip_address: None,
            pin: None,
            kind_id: None,
            status_id,
            purchase_date: None,
            next_service_date: next,
            notes: None,
            created_at: chrono::Utc::now().fixed_offset(),
            updated_at: chrono::Utc::now().fixed_offset(),
        }
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn counts_known_labels_case_insensitively() {
        let office = status_row("im büro");
        let field = status_row("Im Einsatz");
        let statuses = vec![office.clone(), field.clone()];
        let all = vec![
            device(Some(office.id), None),
            device(Some(office.id), None),
            device(Some(field.id), None),
            device(None, None),
        ];

        let got = count_by_status(&all, &statuses);
        assert_eq!(
            got,
            StatusCounts {
                total: 4,
                in_office: 2,
                in_use: 1,
                in_maintenance: 0,
                defective: 0,
            }
        );
    }

    #[test]
    fn due_list_includes_overdue_and_sorts() {
        let today = day(2024, 6, 1);
        let all = vec![
            device(None, Some(day(2024, 6, 20))),
            device(None, Some(day(2024, 5, 1))),
            device(None, Some(day(2024, 8, 1))),
            device(None, None),
        ];

        let due: Vec<_> = due_for_service(&all, today)
            .into_iter()
            .map(|d| d.next_service_date)
            .collect();
        assert_eq!(due, vec![Some(day(2024, 5, 1)), Some(day(2024, 6, 20))]);
    }
}
