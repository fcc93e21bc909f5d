use chrono::{DateTime, NaiveDateTime, Utc};

use super::types::{ParsedBatch, SipRecord};
use crate::config::FeedLayout;

pub const COLUMNS: [&str; 5] = ["ASN", "ASname", "ipaddr", "lastseen", "category"];

const LASTSEEN_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RowParseError {
    #[error("expected {expected} pipe-delimited fields, found {found}")]
    FieldCount { expected: usize, found: usize },
    #[error("field `{0}` is empty")]
    EmptyField(&'static str),
    #[error("unrecognized lastseen timestamp '{0}'")]
    Timestamp(String),
}

pub fn data_lines<'a>(text: &'a str, layout: &FeedLayout) -> Vec<&'a str> {
    let lines: Vec<&str> = text.split('\n').collect();
    if lines.len() <= layout.header_lines + layout.footer_lines {
        return Vec::new();
    }
    lines[layout.header_lines..lines.len() - layout.footer_lines].to_vec()
}

pub fn parse_line(line: &str) -> Result<SipRecord, RowParseError> {
    let fields: Vec<&str> = line.split('|').map(str::trim).collect();
    if fields.len() != COLUMNS.len() {
        return Err(RowParseError::FieldCount {
            expected: COLUMNS.len(),
            found: fields.len(),
        });
    }
    if let Some(index) = fields.iter().position(|field| field.is_empty()) {
        return Err(RowParseError::EmptyField(COLUMNS[index]));
    }

    let last_seen = parse_lastseen(fields[3])
        .ok_or_else(|| RowParseError::Timestamp(fields[3].to_string()))?;

    Ok(SipRecord {
        asn: fields[0].to_string(),
        as_name: fields[1].to_string(),
        ip: fields[2].to_string(),
        last_seen,
        category: fields[4].to_string(),
    })
}

// naive timestamps are UTC
pub fn parse_lastseen(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    LASTSEEN_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
        .or_else(|| {
            DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|value| value.with_timezone(&Utc))
        })
}

pub fn parse_records(
    text: &str,
    layout: &FeedLayout,
    last_run: Option<DateTime<Utc>>,
) -> ParsedBatch {
    let lines = data_lines(text, layout);
    let mut batch = ParsedBatch {
        data_lines: lines.len(),
        ..ParsedBatch::default()
    };

    for line in lines {
        let record = match parse_line(line) {
            Ok(record) => record,
            Err(error) => {
                tracing::warn!(%error, line, "dropping malformed row");
                batch.malformed += 1;
                continue;
            }
        };
        if last_run.is_some_and(|threshold| record.last_seen <= threshold) {
            batch.stale += 1;
            continue;
        }
        batch.records.push(record);
    }
    batch
}
