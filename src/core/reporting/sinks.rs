//! Sink boundaries: the structured database writer and the in-memory results
//! collector both accept (id, value, timestamp) tuples and stay opaque to the
//! rest of the engine.

use crate::core::units::{ReportingFrequency, StoreType, Unit};
use indexmap::IndexMap;
use std::fmt::Debug;

/// Dictionary record declaring one reportable quantity to the database.
#[derive(Clone, Debug, PartialEq)]
pub struct DictionaryRecord {
    pub report_id: usize,
    pub store_type: StoreType,
    pub key: String,
    pub name: String,
    pub units: Unit,
    pub frequency: ReportingFrequency,
    pub is_meter: bool,
    pub schedule_name: Option<String>,
}

/// Time-index record: one per (window, tick) flush, shared by all data
/// records of that flush.
#[derive(Clone, Debug, PartialEq)]
pub struct TimeIndexRecord {
    pub interval_type: i32,
    pub day_of_sim: u32,
    pub calendar_year: i32,
    pub month: Option<u32>,
    pub day: Option<u32>,
    pub hour: Option<u32>,
    pub start_minute: Option<u32>,
    pub end_minute: Option<u32>,
    pub dst: Option<bool>,
    pub day_type: Option<String>,
    pub warmup: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DataRecord {
    pub report_id: usize,
    pub value: f64,
    pub min: Option<f64>,
    pub min_date: Option<u32>,
    pub max: Option<f64>,
    pub max_date: Option<u32>,
}

pub trait SqlSink: Debug {
    fn write_dictionary_record(&mut self, record: DictionaryRecord);
    fn write_time_index_record(&mut self, record: TimeIndexRecord);
    fn write_data_record(&mut self, record: DataRecord);
}

/// Sink used when no database output was requested.
#[derive(Debug, Default)]
pub struct NullSqlSink;

impl SqlSink for NullSqlSink {
    fn write_dictionary_record(&mut self, _record: DictionaryRecord) {}
    fn write_time_index_record(&mut self, _record: TimeIndexRecord) {}
    fn write_data_record(&mut self, _record: DataRecord) {}
}

/// Records everything; doubles as the test double for the database boundary.
#[derive(Debug, Default)]
pub struct InMemorySqlSink {
    pub dictionary: Vec<DictionaryRecord>,
    pub time_indices: Vec<TimeIndexRecord>,
    pub data: Vec<DataRecord>,
}

impl SqlSink for InMemorySqlSink {
    fn write_dictionary_record(&mut self, record: DictionaryRecord) {
        self.dictionary.push(record);
    }

    fn write_time_index_record(&mut self, record: TimeIndexRecord) {
        self.time_indices.push(record);
    }

    fn write_data_record(&mut self, record: DataRecord) {
        self.data.push(record);
    }
}

/// Row-oriented in-memory results, keyed by report id and organised per
/// reporting cadence, for downstream export independent of the text/SQL
/// sinks.
#[derive(Debug, Default)]
pub struct ResultsStore {
    rows: IndexMap<ReportingFrequency, IndexMap<usize, Vec<f64>>>,
}

impl ResultsStore {
    pub fn append(&mut self, frequency: ReportingFrequency, report_id: usize, value: f64) {
        self.rows
            .entry(frequency)
            .or_default()
            .entry(report_id)
            .or_default()
            .push(value);
    }

    pub fn values(&self, frequency: ReportingFrequency, report_id: usize) -> Option<&[f64]> {
        self.rows
            .get(&frequency)
            .and_then(|by_id| by_id.get(&report_id))
            .map(|v| v.as_slice())
    }

    pub fn report_ids(&self, frequency: ReportingFrequency) -> Vec<usize> {
        self.rows
            .get(&frequency)
            .map(|by_id| by_id.keys().copied().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::*;

    #[rstest]
    fn results_store_appends_per_cadence() {
        let mut store = ResultsStore::default();
        store.append(ReportingFrequency::Hourly, 7, 1.0);
        store.append(ReportingFrequency::Hourly, 7, 2.0);
        store.append(ReportingFrequency::Daily, 7, 3.0);
        assert_eq!(
            store.values(ReportingFrequency::Hourly, 7),
            Some([1.0, 2.0].as_slice())
        );
        assert_eq!(
            store.values(ReportingFrequency::Daily, 7),
            Some([3.0].as_slice())
        );
        assert_eq!(store.values(ReportingFrequency::Monthly, 7), None);
        assert_eq!(store.report_ids(ReportingFrequency::Hourly), vec![7]);
    }

    #[rstest]
    fn in_memory_sql_sink_records_everything() {
        let mut sink = InMemorySqlSink::default();
        sink.write_data_record(DataRecord {
            report_id: 1,
            value: 42.0,
            min: None,
            min_date: None,
            max: None,
            max_date: None,
        });
        assert_eq!(sink.data.len(), 1);
        assert_eq!(sink.data[0].value, 42.0);
    }
}
