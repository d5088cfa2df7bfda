use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::Serialize;
use sqlx::{FromRow, SqlitePool};
use std::collections::{BTreeMap, HashMap};

use super::reports::{end_of_day, start_of_day};

/// First hour of the day tracked by the occupancy histogram.
pub const FIRST_HOUR: u32 = 8;
/// Hour at which the histogram's last bucket ends.
pub const LAST_HOUR: u32 = 22;

/// Time spent in the building by one person over the report window.
#[derive(Debug, Clone, Serialize)]
pub struct Person {
    pub name: String,
    pub hours: f64,
    pub dates: BTreeMap<NaiveDate, f64>,
}

impl Person {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            hours: 0.0,
            dates: BTreeMap::new(),
        }
    }

    fn add_visit(&mut self, enter_time: NaiveDateTime, exit_time: NaiveDateTime) {
        let hours = (exit_time - enter_time).num_seconds().max(0) as f64 / 3600.0;
        self.hours += hours;
        *self.dates.entry(enter_time.date()).or_default() += hours;
    }
}

/// Number of visits overlapping one hour of one day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisitorsAtTime {
    pub start_time: NaiveDateTime,
    pub num_visitors: usize,
}

#[derive(Debug, Clone, Copy)]
struct Span {
    enter_time: NaiveDateTime,
    exit_time: NaiveDateTime,
}

impl Span {
    /// Enter inside the window, exit inside the window, or spanning it.
    fn overlaps(&self, start: NaiveDateTime, end: NaiveDateTime) -> bool {
        (self.enter_time >= start && self.enter_time <= end)
            || (self.exit_time >= start && self.exit_time <= end)
            || (self.enter_time <= start && self.exit_time >= end)
    }
}

#[derive(Debug, FromRow)]
struct VisitRow {
    enter_time: NaiveDateTime,
    exit_time: Option<NaiveDateTime>,
    display_name: String,
    barcode: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Statistics {
    pub begin_date: NaiveDate,
    pub end_date: NaiveDate,
    pub total_hours: f64,
    pub unique_visitors: usize,
    pub avg_time: f64,
    pub median_time: f64,
    /// People by hours in the building, most first.
    pub sorted_list: Vec<Person>,
    #[serde(skip)]
    spans: Vec<Span>,
}

impl Statistics {
    /// Gathers the visits of members and guests that started between the
    /// start of `begin_date` and the end of `end_date`.
    pub async fn load(pool: &SqlitePool, begin_date: NaiveDate, end_date: NaiveDate) -> Result<Self, sqlx::Error> {
        let (start, end) = (start_of_day(begin_date), end_of_day(end_date));

        let rows = sqlx::query_as::<_, VisitRow>(
            r#"
            SELECT v0.enter_time, v0.exit_time, m.display_name, v0.barcode
            FROM visits v0
            INNER JOIN members m ON m.barcode = v0.barcode
            WHERE v0.enter_time BETWEEN ? AND ?
            UNION ALL
            SELECT v1.enter_time, v1.exit_time, g.display_name, v1.barcode
            FROM visits v1
            INNER JOIN guests g ON g.guest_id = v1.barcode
            WHERE v1.enter_time BETWEEN ? AND ?
            "#,
        )
        .bind(start)
        .bind(end)
        .bind(start)
        .bind(end)
        .fetch_all(pool)
        .await?;

        Ok(Self::from_visits(
            begin_date,
            end_date,
            rows.into_iter()
                .map(|row| (row.barcode, row.display_name, row.enter_time, row.exit_time)),
        ))
    }

    fn from_visits(
        begin_date: NaiveDate,
        end_date: NaiveDate,
        visits: impl IntoIterator<Item = (String, String, NaiveDateTime, Option<NaiveDateTime>)>,
    ) -> Self {
        let mut visitors: HashMap<String, Person> = HashMap::new();
        let mut spans = Vec::new();

        for (barcode, name, enter_time, exit_time) in visits {
            let exit_time = exit_time.unwrap_or(enter_time);
            visitors
                .entry(barcode)
                .or_insert_with(|| Person::new(&name))
                .add_visit(enter_time, exit_time);
            spans.push(Span { enter_time, exit_time });
        }

        let mut sorted_list: Vec<Person> = visitors.into_values().collect();
        sorted_list.sort_by(|a, b| b.hours.total_cmp(&a.hours).then_with(|| a.name.cmp(&b.name)));

        let total_hours: f64 = sorted_list.iter().map(|p| p.hours).sum();
        let unique_visitors = sorted_list.len();

        let (avg_time, median_time) = if unique_visitors == 0 {
            (0.0, 0.0)
        } else {
            let half = unique_visitors / 2;
            let median = if unique_visitors % 2 == 1 {
                sorted_list[half].hours
            } else {
                (sorted_list[half - 1].hours + sorted_list[half].hours) / 2.0
            };
            (total_hours / unique_visitors as f64, median)
        };

        Self {
            begin_date,
            end_date,
            total_hours,
            unique_visitors,
            avg_time,
            median_time,
            sorted_list,
            spans,
        }
    }

    /// Hourly occupancy from 08:00 to 22:00 for every day in the window.
    pub fn building_usage(&self) -> Vec<VisitorsAtTime> {
        let mut points = Vec::new();
        let mut day = self.begin_date;

        while day <= self.end_date {
            for hour in FIRST_HOUR..LAST_HOUR {
                let Some(start_time) = day.and_hms_opt(hour, 0, 0) else {
                    continue;
                };
                let end_time = start_time + Duration::hours(1);

                points.push(VisitorsAtTime {
                    start_time,
                    num_visitors: self
                        .spans
                        .iter()
                        .filter(|span| span.overlaps(start_time, end_time))
                        .count(),
                });
            }

            match day.succ_opt() {
                Some(next) => day = next,
                None => break,
            }
        }

        points
    }
}
