//! Import of delimited schedule files: one column per `Schedule:File`
//! object, or a wide per-surface pivot for `Schedule:File:Shading`.

use super::day::{redistribute, DaySchedule};
use super::{AnnualSchedule, ScheduleRegistry, WeekSchedule};
use crate::core::units::{DAY_TYPE_COUNT, HOURS_PER_DAY, MINUTES_PER_DAY, MINUTES_PER_HOUR};
use crate::errors::ErrorCollector;
use crate::input::{FileScheduleInput, InterpolationInput, ShadingFileInput};
use crate::simulation_time::FEB29_SLOT;
use csv::ReaderBuilder as CsvReaderBuilder;
use std::fmt::Debug;
use std::fs::File;
use std::io::Read;

const HOURS_NON_LEAP: u32 = 8760;
const HOURS_LEAP: u32 = 8784;

/// Resolves schedule file names to readable streams, so tests can feed
/// in-memory data instead of touching the filesystem.
pub trait ScheduleFileLoader: Debug {
    fn open(&self, file_name: &str) -> anyhow::Result<Box<dyn Read>>;
}

#[derive(Debug, Default)]
pub struct FsFileLoader;

impl ScheduleFileLoader for FsFileLoader {
    fn open(&self, file_name: &str) -> anyhow::Result<Box<dyn Read>> {
        Ok(Box::new(File::open(file_name)?))
    }
}

/// One column of parsed values plus the count of cells that failed to parse
/// (each substituted with 0.0).
struct ParsedColumn {
    values: Vec<f64>,
    bad_cells: usize,
}

fn read_column(
    reader: impl Read,
    separator: u8,
    rows_to_skip: usize,
    column_index: usize,
) -> ParsedColumn {
    let mut csv_reader = CsvReaderBuilder::new()
        .delimiter(separator)
        .flexible(true)
        .has_headers(false)
        .from_reader(reader);
    let mut values = vec![];
    let mut bad_cells = 0;
    for record in csv_reader.records().skip(rows_to_skip).flatten() {
        match record.get(column_index).map(|cell| cell.trim().parse::<f64>()) {
            Some(Ok(value)) => values.push(value),
            _ => {
                bad_cells += 1;
                values.push(0.0);
            }
        }
    }
    ParsedColumn { values, bad_cells }
}

/// Calendar slot for a 1-based file day: 365-row files have no Feb 29 row,
/// so days from March onwards shift past the Feb 29 slot.
fn slot_for_file_day(file_day: u32, file_has_feb29: bool) -> u32 {
    if file_has_feb29 || file_day < FEB29_SLOT {
        file_day
    } else {
        file_day + 1
    }
}

/// Install one imported column as day/week/annual entries: one generated
/// day/week pair per calendar day of the year.
#[allow(clippy::too_many_arguments)]
fn install_imported_column(
    registry: &mut ScheduleRegistry,
    schedule_name: &str,
    type_limits: Option<usize>,
    values: &[f64],
    minutes_per_item: u32,
    days_in_file: u32,
    interpolation: InterpolationInput,
    context: &str,
    collector: &mut ErrorCollector,
) {
    let steps_per_hour = registry.steps_per_hour();
    let items_per_day = (MINUTES_PER_DAY / minutes_per_item) as usize;
    let mut week_for_slot: Vec<Option<usize>> = vec![None; super::YEAR_SLOTS];
    for file_day in 1..=days_in_file {
        let base = (file_day as usize - 1) * items_per_day;
        let mut minutes = vec![0.0; MINUTES_PER_DAY as usize];
        for item in 0..items_per_day {
            let value = values.get(base + item).copied().unwrap_or(0.0);
            let begin = item * minutes_per_item as usize;
            for slot in minutes.iter_mut().skip(begin).take(minutes_per_item as usize) {
                *slot = value;
            }
        }
        let day = DaySchedule::from_step_values(
            format!("{schedule_name} Day {file_day}"),
            type_limits,
            interpolation,
            redistribute(&minutes, interpolation, steps_per_hour),
            steps_per_hour,
        );
        registry.check_day_against_limits(&day, collector);
        let Some(day_idx) = registry.add_day_schedule(day, context, collector) else {
            return;
        };
        let week = WeekSchedule {
            name: format!("{schedule_name} Week {file_day}"),
            days: [Some(day_idx); DAY_TYPE_COUNT],
        };
        let Some(week_idx) = registry.add_week_schedule(week, context, collector) else {
            return;
        };
        let slot = slot_for_file_day(file_day, days_in_file == 366);
        week_for_slot[(slot - 1) as usize] = Some(week_idx);
    }
    super::compact::finalize_year_coverage(&mut week_for_slot, context, collector);
    registry.add_annual(
        AnnualSchedule {
            name: schedule_name.to_string(),
            type_limits,
            weeks: week_for_slot,
        },
        context,
        collector,
    );
}

pub(crate) fn compile_file_schedule(
    registry: &mut ScheduleRegistry,
    input: &FileScheduleInput,
    loader: &dyn ScheduleFileLoader,
    leap_year: bool,
    collector: &mut ErrorCollector,
) {
    let context = format!("Schedule:File={}", input.name);
    let type_limits =
        registry.resolve_type_limits(input.schedule_type_limits.as_deref(), &context, collector);

    let hours_in_year = input
        .number_of_hours
        .unwrap_or(if leap_year { HOURS_LEAP } else { HOURS_NON_LEAP });
    if hours_in_year != HOURS_NON_LEAP && hours_in_year != HOURS_LEAP {
        collector.severe(
            &context,
            format!("NumberOfHours must be 8760 or 8784, found {hours_in_year}"),
        );
        return;
    }
    let minutes_per_item = input.minutes_per_item.unwrap_or(MINUTES_PER_HOUR);
    if minutes_per_item == 0 || MINUTES_PER_HOUR % minutes_per_item != 0 {
        collector.severe(
            &context,
            format!("MinutesPerItem {minutes_per_item} does not divide 60 evenly"),
        );
        return;
    }
    if input.column_number == 0 {
        collector.severe(&context, "ColumnNumber is 1-based and must be at least 1");
        return;
    }

    let reader = match loader.open(&input.file_name) {
        Ok(reader) => reader,
        Err(err) => {
            collector.severe(&context, format!("Could not open '{}': {err}", input.file_name));
            return;
        }
    };
    let mut column = read_column(
        reader,
        input.column_separator.as_byte(),
        input.rows_to_skip,
        input.column_number - 1,
    );
    if column.bad_cells > 0 {
        collector.warning(
            &context,
            format!(
                "{} cell(s) could not be parsed as numbers and were set to 0.0",
                column.bad_cells
            ),
        );
    }

    let days_in_file = hours_in_year / HOURS_PER_DAY;
    let expected_rows = (days_in_file * MINUTES_PER_DAY / minutes_per_item) as usize;
    if column.values.len() != expected_rows {
        collector.warning(
            &context,
            format!(
                "Expected {expected_rows} data rows (accounting for leap year), found {}",
                column.values.len()
            ),
        );
        column.values.resize(expected_rows, 0.0);
    }

    install_imported_column(
        registry,
        &input.name,
        type_limits,
        &column.values,
        minutes_per_item,
        days_in_file,
        input.interpolate,
        &context,
        collector,
    );
}

/// Pivot a single wide CSV (one column per named shading surface) into one
/// synthetic schedule per column.
pub(crate) fn compile_shading_file(
    registry: &mut ScheduleRegistry,
    input: &ShadingFileInput,
    loader: &dyn ScheduleFileLoader,
    leap_year: bool,
    collector: &mut ErrorCollector,
) {
    let context = format!("Schedule:File:Shading={}", input.file_name);
    let reader = match loader.open(&input.file_name) {
        Ok(reader) => reader,
        Err(err) => {
            collector.severe(&context, format!("Could not open '{}': {err}", input.file_name));
            return;
        }
    };
    let mut csv_reader = CsvReaderBuilder::new()
        .flexible(true)
        .has_headers(false)
        .from_reader(reader);
    let mut records = csv_reader.records().skip(input.rows_to_skip).flatten();
    let Some(header) = records.next() else {
        collector.severe(&context, "File is empty; expected a header row of surface names");
        return;
    };
    // first column is the timestamp, remaining columns are surface names
    let surface_names: Vec<(usize, String)> = header
        .iter()
        .enumerate()
        .skip(1)
        .filter(|(_, name)| !name.trim().is_empty())
        .map(|(idx, name)| (idx, name.trim().to_string()))
        .collect();
    if surface_names.is_empty() {
        collector.severe(&context, "Header row names no shading surfaces");
        return;
    }

    let mut columns: Vec<ParsedColumn> = surface_names
        .iter()
        .map(|_| ParsedColumn {
            values: vec![],
            bad_cells: 0,
        })
        .collect();
    for record in records {
        for (column, (cell_idx, _)) in columns.iter_mut().zip(&surface_names) {
            match record.get(*cell_idx).map(|cell| cell.trim().parse::<f64>()) {
                Some(Ok(value)) => column.values.push(value),
                _ => {
                    column.bad_cells += 1;
                    column.values.push(0.0);
                }
            }
        }
    }

    let days_in_file: u32 = if leap_year { 366 } else { 365 };
    let row_count = columns.first().map(|c| c.values.len()).unwrap_or(0);
    let minutes_in_year = days_in_file * MINUTES_PER_DAY;
    let minutes_per_item = match input.minutes_per_item {
        Some(mpi) => mpi,
        None if row_count > 0 && minutes_in_year as usize % row_count == 0 => {
            minutes_in_year / row_count as u32
        }
        None => MINUTES_PER_HOUR,
    };
    if minutes_per_item == 0 || MINUTES_PER_HOUR % minutes_per_item != 0 {
        collector.severe(
            &context,
            format!("MinutesPerItem {minutes_per_item} does not divide 60 evenly"),
        );
        return;
    }
    let expected_rows = (minutes_in_year / minutes_per_item) as usize;

    for ((_, surface_name), mut column) in surface_names.iter().zip(columns.drain(..)) {
        let surface_context = format!("{context}, surface {surface_name}");
        if column.bad_cells > 0 {
            collector.warning(
                &surface_context,
                format!(
                    "{} cell(s) could not be parsed as numbers and were set to 0.0",
                    column.bad_cells
                ),
            );
        }
        if column.values.len() != expected_rows {
            collector.warning(
                &surface_context,
                format!(
                    "Expected {expected_rows} data rows (accounting for leap year), found {}",
                    column.values.len()
                ),
            );
            column.values.resize(expected_rows, 0.0);
        }
        install_imported_column(
            registry,
            surface_name,
            None,
            &column.values,
            minutes_per_item,
            days_in_file,
            InterpolationInput::No,
            &surface_context,
            collector,
        );
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::*;
    use std::io::Cursor;

    #[rstest]
    fn bad_cells_become_zero_and_are_counted() {
        let data = "1.0\nnot-a-number\n3.5\n";
        let column = read_column(Cursor::new(data), b',', 0, 0);
        assert_eq!(column.values, vec![1.0, 0.0, 3.5]);
        assert_eq!(column.bad_cells, 1);
    }

    #[rstest]
    fn header_rows_are_skipped() {
        let data = "value\n2.0\n4.0\n";
        let column = read_column(Cursor::new(data), b',', 1, 0);
        assert_eq!(column.values, vec![2.0, 4.0]);
        assert_eq!(column.bad_cells, 0);
    }

    #[rstest]
    fn semicolon_separated_columns_select_correctly() {
        let data = "a;1.0;10.0\nb;2.0;20.0\n";
        let column = read_column(Cursor::new(data), b';', 0, 2);
        assert_eq!(column.values, vec![10.0, 20.0]);
    }

    #[rstest]
    fn file_days_shift_past_feb29_in_non_leap_files() {
        assert_eq!(slot_for_file_day(59, false), 59);
        assert_eq!(slot_for_file_day(60, false), 61);
        assert_eq!(slot_for_file_day(365, false), 366);
        assert_eq!(slot_for_file_day(60, true), 60);
        assert_eq!(slot_for_file_day(366, true), 366);
    }
}
