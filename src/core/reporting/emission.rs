//! Formatting and flushing of accumulated values to the text streams, the
//! database sink and the in-memory results store.

use super::sinks::{DataRecord, DictionaryRecord, ResultsStore, SqlSink, TimeIndexRecord};
use super::MinMaxTracker;
use crate::core::units::{format_value, ReportingFrequency, StoreType, Unit, VariableKind};
use crate::output::{Output, AUDIT_KEY, EIO_KEY, ESO_KEY, MTD_KEY, MTR_KEY};
use crate::simulation_time::{decode_timestamp, SimulationClock};
use indexmap::IndexMap;
use std::io::Write;

/// Which text stream a record belongs to.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum EmitStream {
    Variable,
    Meter,
}

/// Fixed stamp-line number per window class; each-call, timestep and hourly
/// share the sub-daily shape.
fn stamp_number(window: ReportingFrequency) -> u8 {
    match window {
        ReportingFrequency::EachCall | ReportingFrequency::TimeStep | ReportingFrequency::Hourly => 1,
        ReportingFrequency::Daily => 2,
        ReportingFrequency::Monthly => 3,
        ReportingFrequency::RunPeriod => 4,
        ReportingFrequency::Yearly => 5,
    }
}

/// Decoded-date fields appended after a min or max, at the granularity the
/// window calls for.
fn decoded_date_fields(window: ReportingFrequency, stamp: u32) -> Vec<String> {
    let (month, day, hour, minute) = decode_timestamp(stamp);
    match window {
        ReportingFrequency::Daily => vec![hour.to_string(), minute.to_string()],
        ReportingFrequency::Monthly => {
            vec![day.to_string(), hour.to_string(), minute.to_string()]
        }
        ReportingFrequency::RunPeriod | ReportingFrequency::Yearly => vec![
            month.to_string(),
            day.to_string(),
            hour.to_string(),
            minute.to_string(),
        ],
        _ => vec![],
    }
}

/// Whether a window's value rows carry min/max-with-date fields.
pub fn window_reports_min_max(window: ReportingFrequency) -> bool {
    !matches!(
        window,
        ReportingFrequency::EachCall | ReportingFrequency::TimeStep | ReportingFrequency::Hourly
    )
}

pub struct EmissionLayer<S: SqlSink> {
    eso: Box<dyn Write + Send>,
    mtr: Box<dyn Write + Send>,
    eio: Box<dyn Write + Send>,
    mtd: Box<dyn Write + Send>,
    audit: Box<dyn Write + Send>,
    sql: S,
    results: ResultsStore,
    /// One-shot stamp latch per (stream, window): holds the tick the stamp
    /// was last written for.
    stamp_latches: IndexMap<(EmitStream, u8), u64>,
    sql_stamp_latches: IndexMap<u8, u64>,
}

impl<S: SqlSink> std::fmt::Debug for EmissionLayer<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmissionLayer").finish_non_exhaustive()
    }
}

impl<S: SqlSink> EmissionLayer<S> {
    pub fn new(output: &dyn Output, sql: S) -> anyhow::Result<Self> {
        Ok(Self {
            eso: output.writer_for_location_key(ESO_KEY)?,
            mtr: output.writer_for_location_key(MTR_KEY)?,
            eio: output.writer_for_location_key(EIO_KEY)?,
            mtd: output.writer_for_location_key(MTD_KEY)?,
            audit: output.writer_for_location_key(AUDIT_KEY)?,
            sql,
            results: ResultsStore::default(),
            stamp_latches: Default::default(),
            sql_stamp_latches: Default::default(),
        })
    }

    pub fn results(&self) -> &ResultsStore {
        &self.results
    }

    pub fn sql(&self) -> &S {
        &self.sql
    }

    /// Header row declaring one (variable, frequency) combination, written
    /// before any values.
    #[allow(clippy::too_many_arguments)]
    pub fn write_variable_dictionary_item(
        &mut self,
        report_id: usize,
        frequency: ReportingFrequency,
        key: &str,
        name: &str,
        units: Unit,
        store_type: StoreType,
        schedule_name: Option<&str>,
    ) -> anyhow::Result<()> {
        let mut line = format!(
            "{report_id},{},{key},{name} [{units}] {}",
            frequency.data_field_count(),
            frequency.dictionary_suffix()
        );
        if let Some(schedule) = schedule_name {
            line.push(',');
            line.push_str(schedule);
        }
        writeln!(self.eso, "{line}")?;
        writeln!(
            self.audit,
            "Output:Variable,{key},{name},{}",
            frequency.label()
        )?;
        self.sql.write_dictionary_record(DictionaryRecord {
            report_id,
            store_type,
            key: key.to_string(),
            name: name.to_string(),
            units,
            frequency,
            is_meter: false,
            schedule_name: schedule_name.map(str::to_string),
        });
        Ok(())
    }

    pub fn write_meter_dictionary_item(
        &mut self,
        report_id: usize,
        frequency: ReportingFrequency,
        name: &str,
        units: Unit,
        cumulative: bool,
    ) -> anyhow::Result<()> {
        let prefix = if cumulative { "Cumulative " } else { "" };
        let line = format!(
            "{report_id},{},{prefix}{name} [{units}] {}",
            frequency.data_field_count(),
            frequency.dictionary_suffix()
        );
        writeln!(self.mtr, "{line}")?;
        writeln!(self.eso, "{line}")?;
        writeln!(self.audit, "Output:Meter,{prefix}{name},{}", frequency.label())?;
        self.sql.write_dictionary_record(DictionaryRecord {
            report_id,
            store_type: StoreType::Summed,
            key: String::new(),
            name: format!("{prefix}{name}"),
            units,
            frequency,
            is_meter: true,
            schedule_name: None,
        });
        Ok(())
    }

    /// Write the timestamp row for a window/tick at most once per stream,
    /// before any value rows of that flush; later callers sharing the tick
    /// reuse the already-written stamp.
    pub fn emit_time_stamp(
        &mut self,
        stream: EmitStream,
        window: ReportingFrequency,
        clock: &SimulationClock,
    ) -> anyhow::Result<()> {
        let number = stamp_number(window);
        let tick = clock.tick_counter();
        if self.stamp_latches.get(&(stream, number)) == Some(&tick) {
            return Ok(());
        }
        self.stamp_latches.insert((stream, number), tick);

        let dst = u8::from(clock.dst());
        let line = match number {
            1 => format!(
                "{number},{},{},{},{dst},{},{},{},{}",
                clock.day_of_sim(),
                clock.month(),
                clock.day_of_month(),
                clock.hour(),
                clock.start_minute(),
                clock.end_minute(),
                clock.day_type()
            ),
            2 => format!(
                "{number},{},{},{},{dst},{}",
                clock.day_of_sim(),
                clock.month(),
                clock.day_of_month(),
                clock.day_type()
            ),
            3 => format!("{number},{},{}", clock.day_of_sim(), clock.month()),
            4 => format!("{number},{}", clock.day_of_sim()),
            _ => format!("{number},{}", clock.calendar_year()),
        };
        match stream {
            EmitStream::Variable => writeln!(self.eso, "{line}")?,
            EmitStream::Meter => writeln!(self.mtr, "{line}")?,
        }

        if self.sql_stamp_latches.get(&number) != Some(&tick) {
            self.sql_stamp_latches.insert(number, tick);
            let sub_daily = number == 1;
            let daily = number == 2;
            let monthly = number == 3;
            self.sql.write_time_index_record(TimeIndexRecord {
                interval_type: window.sql_interval_type(),
                day_of_sim: clock.day_of_sim(),
                calendar_year: clock.calendar_year(),
                month: (sub_daily || daily || monthly).then(|| clock.month()),
                day: (sub_daily || daily).then(|| clock.day_of_month()),
                hour: sub_daily.then(|| clock.hour()),
                start_minute: sub_daily.then(|| clock.start_minute()),
                end_minute: sub_daily.then(|| clock.end_minute()),
                dst: (sub_daily || daily).then(|| clock.dst()),
                day_type: (sub_daily || daily).then(|| clock.day_type().to_string()),
                warmup: clock.warmup(),
            });
        }
        Ok(())
    }

    /// Value row: `id,value` for sub-daily windows, with formatted
    /// min/max-with-date fields appended for daily and coarser windows.
    pub fn emit_value(
        &mut self,
        stream: EmitStream,
        report_id: usize,
        window: ReportingFrequency,
        value: f64,
        kind: VariableKind,
        min_max: Option<&MinMaxTracker>,
    ) -> anyhow::Result<()> {
        let mut fields = vec![report_id.to_string(), format_value(value, kind)];
        if let Some(tracker) = min_max.filter(|_| window_reports_min_max(window)) {
            fields.push(format_value(tracker.min, kind));
            fields.extend(decoded_date_fields(window, tracker.min_stamp));
            fields.push(format_value(tracker.max, kind));
            fields.extend(decoded_date_fields(window, tracker.max_stamp));
        }
        let line = fields.join(",");
        match stream {
            EmitStream::Variable => writeln!(self.eso, "{line}")?,
            EmitStream::Meter => writeln!(self.mtr, "{line}")?,
        }
        let with_min_max = min_max.filter(|_| window_reports_min_max(window));
        self.sql.write_data_record(DataRecord {
            report_id,
            value,
            min: with_min_max.map(|t| t.min),
            min_date: with_min_max.map(|t| t.min_stamp),
            max: with_min_max.map(|t| t.max),
            max_date: with_min_max.map(|t| t.max_stamp),
        });
        self.results.append(window, report_id, value);
        Ok(())
    }

    /// Cumulative meter rows bypass min/max entirely and print only the
    /// running total.
    pub fn emit_cumulative_value(
        &mut self,
        report_id: usize,
        window: ReportingFrequency,
        value: f64,
    ) -> anyhow::Result<()> {
        writeln!(
            self.mtr,
            "{report_id},{}",
            format_value(value, VariableKind::Real)
        )?;
        self.sql.write_data_record(DataRecord {
            report_id,
            value,
            min: None,
            min_date: None,
            max: None,
            max_date: None,
        });
        self.results.append(window, report_id, value);
        Ok(())
    }

    pub fn eio_writer(&mut self) -> &mut dyn Write {
        &mut self.eio
    }

    pub fn mtd_writer(&mut self) -> &mut dyn Write {
        &mut self.mtd
    }

    pub fn audit_line(&mut self, line: &str) -> anyhow::Result<()> {
        writeln!(self.audit, "{line}")?;
        Ok(())
    }

    pub fn flush(&mut self) -> anyhow::Result<()> {
        self.eso.flush()?;
        self.mtr.flush()?;
        self.eio.flush()?;
        self.mtd.flush()?;
        self.audit.flush()?;
        Ok(())
    }
}
