use chrono::NaiveDate;

/// Anything carrying a deployment's effective end date.
pub trait EndDated {
    fn actual_end_date(&self) -> Option<NaiveDate>;

    /// A deployment is active until its effective end date is recorded.
    fn is_active(&self) -> bool {
        self.actual_end_date().is_none()
    }
}

impl EndDated for Option<NaiveDate> {
    fn actual_end_date(&self) -> Option<NaiveDate> {
        *self
    }
}

/// Splits `items` into `(active, ended)`, keeping the input order in both.
pub fn partition_active<T: EndDated>(items: Vec<T>) -> (Vec<T>, Vec<T>) {
    items.into_iter().partition(|d| d.is_active())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Row {
        id: u32,
        end: Option<NaiveDate>,
    }

    impl EndDated for Row {
        fn actual_end_date(&self) -> Option<NaiveDate> {
            self.end
        }
    }

    #[test]
    fn partitions_mixed_list() {
        let day = NaiveDate::from_ymd_opt(2024, 3, 1);
        let rows = vec![
            Row { id: 1, end: None },
            Row { id: 2, end: day },
            Row { id: 3, end: None },
            Row { id: 4, end: day },
        ];

        let (active, ended) = partition_active(rows);
        assert_eq!(active.iter().map(|r| r.id).collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(ended.iter().map(|r| r.id).collect::<Vec<_>>(), vec![2, 4]);
        assert!(active.iter().all(EndDated::is_active));
        assert!(!ended.iter().any(EndDated::is_active));
    }

    #[test]
    fn empty_list_partitions_to_empty_halves() {
        let (active, ended) = partition_active(Vec::<Row>::new());
        assert!(active.is_empty());
        assert!(ended.is_empty());
    }
}
