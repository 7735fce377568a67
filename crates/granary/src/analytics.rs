//! Reporting queries over the hiring tables.

use tracing::debug;

use crate::error::Result;
use crate::storage::StorageGateway;
use crate::types::{Row, Value};

/// Hires per department and job, split by calendar quarter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuarterlyHires {
    /// Department name.
    pub department: String,
    /// Job title.
    pub job: String,
    /// Hires in Q1 through Q4.
    pub quarters: [i64; 4],
}

/// A department whose hire count exceeded the yearly mean.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepartmentAboveMean {
    /// Department id.
    pub id: i64,
    /// Department name.
    pub department: String,
    /// Employees hired in the year.
    pub hired: i64,
}

fn hires_by_quarter_sql(year: i32) -> String {
    format!(
        r#"SELECT d."department", j."job",
    SUM(CASE WHEN EXTRACT(QUARTER FROM he."datetime"::timestamp) = 1 THEN 1 ELSE 0 END) AS "q1",
    SUM(CASE WHEN EXTRACT(QUARTER FROM he."datetime"::timestamp) = 2 THEN 1 ELSE 0 END) AS "q2",
    SUM(CASE WHEN EXTRACT(QUARTER FROM he."datetime"::timestamp) = 3 THEN 1 ELSE 0 END) AS "q3",
    SUM(CASE WHEN EXTRACT(QUARTER FROM he."datetime"::timestamp) = 4 THEN 1 ELSE 0 END) AS "q4"
FROM "hired_employees" he
JOIN "departments" d ON he."department_id" = d."id"
JOIN "jobs" j ON he."job_id" = j."id"
WHERE EXTRACT(YEAR FROM he."datetime"::timestamp) = {year}
GROUP BY d."department", j."job"
ORDER BY d."department", j."job""#
    )
}

fn departments_above_mean_sql(year: i32) -> String {
    format!(
        r#"SELECT d."id", d."department", COUNT(*) AS "hired"
FROM "hired_employees" he
JOIN "departments" d ON he."department_id" = d."id"
WHERE EXTRACT(YEAR FROM he."datetime"::timestamp) = {year}
GROUP BY d."id", d."department"
HAVING COUNT(*) > (
    SELECT AVG("cnt") FROM (
        SELECT COUNT(*) AS "cnt"
        FROM "hired_employees"
        WHERE EXTRACT(YEAR FROM "datetime"::timestamp) = {year}
        GROUP BY "department_id"
    ) AS "per_department"
)
ORDER BY "hired" DESC"#
    )
}

/// Hires per department and job for `year`, split by quarter and
/// ordered alphabetically.
pub async fn hires_by_quarter(
    gateway: &dyn StorageGateway,
    year: i32,
) -> Result<Vec<QuarterlyHires>> {
    let rows = gateway.fetch_all(&hires_by_quarter_sql(year)).await?;
    debug!(year, rows = rows.len(), "fetched quarterly hires");
    Ok(rows.iter().map(quarterly_from_row).collect())
}

/// Departments that hired more than the per-department mean in `year`,
/// ordered by hire count descending.
pub async fn departments_above_mean(
    gateway: &dyn StorageGateway,
    year: i32,
) -> Result<Vec<DepartmentAboveMean>> {
    let rows = gateway.fetch_all(&departments_above_mean_sql(year)).await?;
    debug!(year, rows = rows.len(), "fetched departments above mean");
    Ok(rows.iter().map(above_mean_from_row).collect())
}

fn quarterly_from_row(row: &Row) -> QuarterlyHires {
    QuarterlyHires {
        department: text(row, "department"),
        job: text(row, "job"),
        quarters: [
            int(row, "q1"),
            int(row, "q2"),
            int(row, "q3"),
            int(row, "q4"),
        ],
    }
}

fn above_mean_from_row(row: &Row) -> DepartmentAboveMean {
    DepartmentAboveMean {
        id: int(row, "id"),
        department: text(row, "department"),
        hired: int(row, "hired"),
    }
}

fn text(row: &Row, column: &str) -> String {
    row.get(column).map(Value::as_string).unwrap_or_default()
}

fn int(row: &Row, column: &str) -> i64 {
    row.get(column).and_then(Value::as_i64).unwrap_or(0)
}
