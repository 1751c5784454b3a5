//! Resolving which GTFS service ids run on which dates.

use chrono::{Datelike, NaiveDate, Weekday};
use std::collections::{BTreeMap, BTreeSet};

use super::feed::{Calendar, CalendarDate};

fn runs_on(entry: &Calendar, day: Weekday) -> bool {
    let flag = match day {
        Weekday::Mon => entry.monday,
        Weekday::Tue => entry.tuesday,
        Weekday::Wed => entry.wednesday,
        Weekday::Thu => entry.thursday,
        Weekday::Fri => entry.friday,
        Weekday::Sat => entry.saturday,
        Weekday::Sun => entry.sunday,
    };
    flag == 1
}

/// Maps every date the feed covers to the service ids active that day.
///
/// `calendar` supplies the weekly pattern; `calendar_dates` adds
/// (`exception_type` 1) or removes (2) a service on a single date. Dates left
/// with no service are omitted.
pub fn service_ids_by_date(
    calendar: &[Calendar],
    calendar_dates: &[CalendarDate],
) -> BTreeMap<NaiveDate, BTreeSet<String>> {
    let mut by_date: BTreeMap<NaiveDate, BTreeSet<String>> = BTreeMap::new();

    for entry in calendar {
        let mut day = entry.start_date;
        while day <= entry.end_date {
            if runs_on(entry, day.weekday()) {
                by_date
                    .entry(day)
                    .or_default()
                    .insert(entry.service_id.clone());
            }
            let Some(next) = day.succ_opt() else { break };
            day = next;
        }
    }

    for exception in calendar_dates {
        match exception.exception_type {
            1 => {
                by_date
                    .entry(exception.date)
                    .or_default()
                    .insert(exception.service_id.clone());
            }
            2 => {
                if let Some(ids) = by_date.get_mut(&exception.date) {
                    ids.remove(&exception.service_id);
                }
            }
            _ => {}
        }
    }

    by_date.retain(|_, ids| !ids.is_empty());
    by_date
}
