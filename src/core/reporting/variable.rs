//! The catalog of individually reportable scalars: setup matched against
//! user output requests, the per-tick update lifecycle, and flush-and-reset
//! per reporting frequency.

use super::emission::{EmissionLayer, EmitStream};
use super::sinks::SqlSink;
use super::{MinMaxTracker, ReportIdGenerator};
use crate::core::schedule::{ScheduleRef, ScheduleRegistry};
use crate::core::units::{ReportingFrequency, StoreType, Unit, VariableKind};
use crate::errors::ErrorCollector;
use crate::input::Input;
use crate::simulation_time::SimulationClock;
use anyhow::{anyhow, bail};
use indexmap::IndexMap;
use smartstring::alias::String as SmartString;
use tracing::debug;

/// Handle returned from setup. A variable nobody requested still gets a
/// handle; updates through it are no-ops.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct VariableHandle(Option<usize>);

impl VariableHandle {
    pub fn unreported() -> Self {
        Self(None)
    }

    pub fn is_reported(&self) -> bool {
        self.0.is_some()
    }

    pub(crate) fn source_index(&self) -> Option<usize> {
        self.0
    }
}

/// One physical reportable quantity, registered once per (key, name) pair by
/// its producer.
#[derive(Debug)]
pub struct VariableSource {
    pub key: SmartString,
    pub name: SmartString,
    pub units: Unit,
    pub store_type: StoreType,
    pub kind: VariableKind,
    /// Instantaneous value recorded this tick, fed to attached meters.
    tick_value: f64,
    /// Index into the meter engine's attachment table, when on any meter.
    pub(crate) meter_array: Option<usize>,
    cells: Vec<usize>,
}

/// One reporting record: a (key, name, frequency) triple with its own
/// accumulator and min/max-with-date state.
#[derive(Debug)]
struct ReportCell {
    source: usize,
    frequency: ReportingFrequency,
    schedule: Option<ScheduleRef>,
    schedule_name: Option<String>,
    report_id: usize,
    value: f64,
    weight_sum: f64,
    num_stored: usize,
    stored: bool,
    min_max: MinMaxTracker,
}

impl ReportCell {
    fn reset(&mut self) {
        self.value = 0.0;
        self.weight_sum = 0.0;
        self.num_stored = 0;
        self.stored = false;
        self.min_max.reset();
    }

    /// Time-weighted average for averaged cells, running total for summed.
    fn report_value(&self, store_type: StoreType) -> f64 {
        match store_type {
            StoreType::Averaged if self.weight_sum > 0.0 => self.value / self.weight_sum,
            StoreType::Averaged => 0.0,
            StoreType::Summed => self.value,
        }
    }
}

#[derive(Debug)]
struct CompiledRequest {
    /// `None` matches every key (a "*" request).
    key: Option<SmartString>,
    name: SmartString,
    frequency: ReportingFrequency,
    schedule_name: Option<String>,
}

#[derive(Debug, Default)]
pub struct VariableRegistry {
    requests: Vec<CompiledRequest>,
    sources: Vec<VariableSource>,
    cells: Vec<ReportCell>,
    by_key_name: IndexMap<(SmartString, SmartString), usize>,
    minimum_frequency: Option<ReportingFrequency>,
}

fn upper(s: &str) -> SmartString {
    s.trim().to_uppercase().into()
}

impl VariableRegistry {
    /// Compile the user's `Output:Variable` requests. Unknown frequency
    /// strings warn and fall back to hourly.
    pub fn from_input(input: &Input, collector: &mut ErrorCollector) -> Self {
        let minimum_frequency = input
            .simulation
            .minimum_reporting_frequency
            .as_deref()
            .and_then(|raw| match raw.parse::<ReportingFrequency>() {
                Ok(frequency) => {
                    debug!("Clamping requested reporting frequencies to at least {frequency}");
                    Some(frequency)
                }
                Err(err) => {
                    collector.warning("Simulation", err);
                    None
                }
            });
        let requests = input
            .output_variables
            .iter()
            .map(|request| {
                let frequency = match request.reporting_frequency.parse::<ReportingFrequency>() {
                    Ok(frequency) => frequency,
                    Err(err) => {
                        collector.warning(
                            format!("Output:Variable={}", request.variable_name),
                            format!("{err}; defaulting to Hourly"),
                        );
                        ReportingFrequency::Hourly
                    }
                };
                CompiledRequest {
                    key: (request.key_value != "*").then(|| upper(&request.key_value)),
                    name: upper(&request.variable_name),
                    frequency,
                    schedule_name: request.schedule_name.clone(),
                }
            })
            .collect();
        Self {
            requests,
            sources: vec![],
            cells: vec![],
            by_key_name: Default::default(),
            minimum_frequency,
        }
    }

    /// Register a reportable quantity. The first call for a (key, name) pair
    /// creates the record; repeat calls are idempotent and return the
    /// existing handle. One report cell is created per distinct matching
    /// request frequency. With `force_create`, a source record is created
    /// even when no request matches, so meters can still read its per-tick
    /// value.
    #[allow(clippy::too_many_arguments)]
    pub fn setup_variable_with(
        &mut self,
        key: &str,
        name: &str,
        units: Unit,
        store_type: StoreType,
        kind: VariableKind,
        force_create: bool,
        schedules: &mut ScheduleRegistry,
        ids: &mut ReportIdGenerator,
    ) -> anyhow::Result<VariableHandle> {
        let map_key = (upper(key), upper(name));
        if let Some(&existing) = self.by_key_name.get(&map_key) {
            ensure_consistent_store_type(self.sources[existing].store_type, store_type, key, name)?;
            return Ok(VariableHandle(Some(existing)));
        }

        let matching: Vec<(ReportingFrequency, Option<String>)> = self
            .requests
            .iter()
            .filter(|request| {
                request.name == map_key.1
                    && request.key.as_ref().map(|k| *k == map_key.0).unwrap_or(true)
            })
            .map(|request| {
                let frequency = match self.minimum_frequency {
                    Some(minimum) => request.frequency.max(minimum),
                    None => request.frequency,
                };
                (frequency, request.schedule_name.clone())
            })
            .collect();
        if matching.is_empty() && !force_create {
            return Ok(VariableHandle::unreported());
        }

        let source_idx = self.sources.len();
        self.by_key_name.insert(map_key, source_idx);
        self.sources.push(VariableSource {
            key: key.into(),
            name: name.into(),
            units,
            store_type,
            kind,
            tick_value: 0.0,
            meter_array: None,
            cells: vec![],
        });

        let mut seen_frequencies = vec![];
        for (frequency, schedule_name) in matching {
            // one record per frequency-key-name triple
            if seen_frequencies.contains(&frequency) {
                continue;
            }
            seen_frequencies.push(frequency);
            let schedule = match schedule_name.as_deref() {
                None => None,
                Some(raw) => {
                    let sref = schedules
                        .schedule_ref(raw)
                        .ok_or_else(|| anyhow!("Schedule '{raw}' gating variable '{name}' was not found"))?;
                    schedules.mark_used(sref);
                    Some(sref)
                }
            };
            let cell_idx = self.cells.len();
            self.cells.push(ReportCell {
                source: source_idx,
                frequency,
                schedule,
                schedule_name,
                report_id: ids.next_id(),
                value: 0.0,
                weight_sum: 0.0,
                num_stored: 0,
                stored: false,
                min_max: MinMaxTracker::default(),
            });
            self.sources[source_idx].cells.push(cell_idx);
        }
        Ok(VariableHandle(Some(source_idx)))
    }

    /// [`Self::setup_variable_with`] without the force-create escape hatch:
    /// variables nobody requested stay unreported.
    pub fn setup_variable(
        &mut self,
        key: &str,
        name: &str,
        units: Unit,
        store_type: StoreType,
        kind: VariableKind,
        schedules: &mut ScheduleRegistry,
        ids: &mut ReportIdGenerator,
    ) -> anyhow::Result<VariableHandle> {
        self.setup_variable_with(key, name, units, store_type, kind, false, schedules, ids)
    }

    /// Record this tick's instantaneous value. Averaged cells accumulate
    /// value x weight; summed cells accumulate the value directly. Schedule
    /// gating happens here, not at flush, so gated-off ticks never reach the
    /// accumulator.
    pub fn update(
        &mut self,
        handle: VariableHandle,
        value: f64,
        schedules: &ScheduleRegistry,
        clock: &SimulationClock,
    ) -> anyhow::Result<()> {
        let Some(source_idx) = handle.source_index() else {
            return Ok(());
        };
        let store_type = {
            let source = self
                .sources
                .get_mut(source_idx)
                .ok_or_else(|| anyhow!("Variable handle {source_idx} is out of the declared range"))?;
            source.tick_value = value;
            source.store_type
        };
        let weight = clock.minutes_per_step() as f64;
        let stamp = clock.timestamp_code();
        for cell_slot in 0..self.sources[source_idx].cells.len() {
            let cell_idx = self.sources[source_idx].cells[cell_slot];
            let cell = &mut self.cells[cell_idx];
            if let Some(gate) = cell.schedule {
                if schedules.current_value(gate) == 0.0 {
                    continue;
                }
            }
            match store_type {
                StoreType::Averaged => {
                    cell.value += value * weight;
                    cell.weight_sum += weight;
                }
                StoreType::Summed => cell.value += value,
            }
            cell.num_stored += 1;
            cell.stored = true;
            cell.min_max.observe(value, stamp);
        }
        Ok(())
    }

    /// Per-tick value a meter attachment reads; zero until the producer's
    /// first update.
    pub(crate) fn tick_value(&self, source_idx: usize) -> f64 {
        self.sources
            .get(source_idx)
            .map(|source| source.tick_value)
            .unwrap_or(0.0)
    }

    pub(crate) fn source(&self, source_idx: usize) -> Option<&VariableSource> {
        self.sources.get(source_idx)
    }

    pub(crate) fn source_mut(&mut self, source_idx: usize) -> Option<&mut VariableSource> {
        self.sources.get_mut(source_idx)
    }

    /// Locate a source by case-insensitive (key, name) pair.
    pub fn find_source(&self, key: &str, name: &str) -> Option<usize> {
        self.by_key_name.get(&(upper(key), upper(name))).copied()
    }

    /// Sources by name alone (any key); used by custom meter resolution.
    pub(crate) fn find_sources_by_name(&self, name: &str, key: Option<&str>) -> Vec<usize> {
        let wanted_name = upper(name);
        let wanted_key = key.map(upper);
        self.by_key_name
            .iter()
            .filter(|((source_key, source_name), _)| {
                *source_name == wanted_name
                    && wanted_key.as_ref().map(|k| source_key == k).unwrap_or(true)
            })
            .map(|(_, &idx)| idx)
            .collect()
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Emit a dictionary header for every report cell, before any values.
    pub fn write_dictionary<S: SqlSink>(
        &self,
        emission: &mut EmissionLayer<S>,
    ) -> anyhow::Result<()> {
        for cell in &self.cells {
            let source = &self.sources[cell.source];
            emission.write_variable_dictionary_item(
                cell.report_id,
                cell.frequency,
                &source.key,
                &source.name,
                source.units,
                source.store_type,
                cell.schedule_name.as_deref(),
            )?;
        }
        Ok(())
    }

    /// Flush every stored cell of the given frequency to the emission layer,
    /// then zero its accumulator, count and min/max state.
    pub fn flush_and_reset<S: SqlSink>(
        &mut self,
        frequency: ReportingFrequency,
        emission: &mut EmissionLayer<S>,
        clock: &SimulationClock,
    ) -> anyhow::Result<()> {
        for cell in self.cells.iter_mut() {
            if cell.frequency != frequency || !cell.stored {
                continue;
            }
            let source = &self.sources[cell.source];
            emission.emit_time_stamp(EmitStream::Variable, frequency, clock)?;
            emission.emit_value(
                EmitStream::Variable,
                cell.report_id,
                frequency,
                cell.report_value(source.store_type),
                source.kind,
                Some(&cell.min_max),
            )?;
            cell.reset();
        }
        Ok(())
    }

    /// Zero the accumulators of monthly/yearly/run-period cells so warm-up
    /// energy does not pollute reported annual totals. Invoked exactly once,
    /// when the warm-up convergence phase ends.
    pub fn reset_after_warmup(&mut self) {
        for cell in self.cells.iter_mut() {
            if matches!(
                cell.frequency,
                ReportingFrequency::Monthly | ReportingFrequency::Yearly | ReportingFrequency::RunPeriod
            ) {
                cell.reset();
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn cell_state(&self, source_idx: usize, frequency: ReportingFrequency) -> Option<(f64, usize, MinMaxTracker)> {
        self.sources.get(source_idx).and_then(|source| {
            source.cells.iter().find_map(|&cell_idx| {
                let cell = &self.cells[cell_idx];
                (cell.frequency == frequency).then(|| (cell.value, cell.num_stored, cell.min_max))
            })
        })
    }

    #[cfg(test)]
    pub(crate) fn report_id(&self, source_idx: usize, frequency: ReportingFrequency) -> Option<usize> {
        self.sources.get(source_idx).and_then(|source| {
            source.cells.iter().find_map(|&cell_idx| {
                let cell = &self.cells[cell_idx];
                (cell.frequency == frequency).then_some(cell.report_id)
            })
        })
    }
}

/// Guard against accidental double registration under a different store
/// type: the first registration wins and later conflicting ones error.
pub fn ensure_consistent_store_type(
    existing: StoreType,
    requested: StoreType,
    key: &str,
    name: &str,
) -> anyhow::Result<()> {
    if existing != requested {
        bail!("Variable '{key}:{name}' was already registered with store type {existing}");
    }
    Ok(())
}
